//! Minimal in-process stand-ins for a Modbus/TCP slave and an MQTT
//! broker, used to drive the scenarios in `scenarios.rs` without a
//! real device or broker on the network.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// Speaks just enough Modbus/TCP (MBAP header + read-holding/read-input
/// PDUs) to answer the device worker's requests with a fixed register
/// image. Accepts any number of sequential connections so it can be
/// killed and restarted by the test to simulate an outage.
pub struct MockModbusServer {
    pub addr: SocketAddr,
}

impl MockModbusServer {
    /// Bind an ephemeral port and serve `registers` for every read
    /// request, whatever address or function code is asked for.
    /// Returns a counter of requests served so tests can assert on
    /// call volume.
    pub async fn start(registers: Vec<u16>) -> (Self, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_task = hits.clone();

        tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                let registers = registers.clone();
                let hits = hits_task.clone();
                tokio::spawn(serve_modbus_connection(socket, registers, hits));
            }
        });

        (MockModbusServer { addr }, hits)
    }

    /// Reserve an ephemeral port, then immediately release it so a
    /// connect attempt against it fails with connection-refused. The
    /// port number itself stays valid to rebind later via
    /// [`MockModbusServer::resume_on`].
    pub async fn reserved_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    /// Bind a previously-reserved port and start serving, simulating a
    /// device coming back online.
    pub async fn resume_on(port: u16, registers: Vec<u16>) -> (Self, Arc<AtomicUsize>) {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_task = hits.clone();

        tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                let registers = registers.clone();
                let hits = hits_task.clone();
                tokio::spawn(serve_modbus_connection(socket, registers, hits));
            }
        });

        (MockModbusServer { addr }, hits)
    }
}

async fn serve_modbus_connection(
    mut socket: TcpStream,
    registers: Vec<u16>,
    hits: Arc<AtomicUsize>,
) {
    loop {
        let mut header = [0u8; 7];
        if socket.read_exact(&mut header).await.is_err() {
            return;
        }
        let transaction_id = u16::from_be_bytes([header[0], header[1]]);
        let unit_id = header[6];

        let mut pdu = [0u8; 5];
        if socket.read_exact(&mut pdu).await.is_err() {
            return;
        }
        let function = pdu[0];
        let start = u16::from_be_bytes([pdu[1], pdu[2]]);
        let quantity = u16::from_be_bytes([pdu[3], pdu[4]]) as usize;

        hits.fetch_add(1, Ordering::SeqCst);

        let mut body = vec![function, (quantity * 2) as u8];
        for i in 0..quantity {
            let idx = (start as usize + i).min(registers.len().saturating_sub(1));
            let word = registers.get(idx).copied().unwrap_or(0);
            body.extend_from_slice(&word.to_be_bytes());
        }

        let length = (1 + body.len()) as u16; // unit id + pdu
        let mut response = Vec::with_capacity(7 + body.len());
        response.extend_from_slice(&transaction_id.to_be_bytes());
        response.extend_from_slice(&[0, 0]); // protocol id
        response.extend_from_slice(&length.to_be_bytes());
        response.push(unit_id);
        response.extend_from_slice(&body);

        if socket.write_all(&response).await.is_err() {
            return;
        }
    }
}

/// A just-enough MQTT 3.1.1 broker: ACKs CONNECT, answers PINGREQ, and
/// records every PUBLISH (topic, payload) it receives. Only QoS 0 is
/// handled since that is the only QoS the bridge ever publishes with.
pub struct MockMqttBroker {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl MockMqttBroker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_task = received.clone();

        tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                tokio::spawn(serve_mqtt_connection(socket, received_task.clone()));
            }
        });

        MockMqttBroker { addr, received }
    }

    pub async fn messages(&self) -> Vec<(String, Vec<u8>)> {
        self.received.lock().await.clone()
    }
}

async fn serve_mqtt_connection(mut socket: TcpStream, received: Arc<Mutex<Vec<(String, Vec<u8>)>>>) {
    loop {
        let Some((packet_type, payload)) = read_mqtt_packet(&mut socket).await else {
            return;
        };
        match packet_type & 0xF0 {
            0x10 => {
                // CONNECT -> CONNACK, session-present=0, return-code=0
                if socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.is_err() {
                    return;
                }
            }
            0x30 => {
                if let Some((topic, body)) = parse_publish(packet_type, &payload) {
                    received.lock().await.push((topic, body));
                }
            }
            0xC0 => {
                if socket.write_all(&[0xD0, 0x00]).await.is_err() {
                    return;
                }
            }
            0xE0 => return,
            _ => {}
        }
    }
}

/// Read one fixed-header-prefixed MQTT packet: the first byte (packet
/// type + flags) followed by a variable-length-encoded remaining
/// length and that many payload bytes. Returns `None` on disconnect.
async fn read_mqtt_packet(socket: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let mut first = [0u8; 1];
    socket.read_exact(&mut first).await.ok()?;

    let mut remaining_length: u32 = 0;
    let mut multiplier: u32 = 1;
    loop {
        let mut byte = [0u8; 1];
        socket.read_exact(&mut byte).await.ok()?;
        remaining_length += (byte[0] & 0x7F) as u32 * multiplier;
        if byte[0] & 0x80 == 0 {
            break;
        }
        multiplier *= 128;
    }

    let mut payload = vec![0u8; remaining_length as usize];
    socket.read_exact(&mut payload).await.ok()?;
    Some((first[0], payload))
}

/// Extract `(topic, application payload)` from a PUBLISH packet's
/// variable header and payload. QoS is read from the fixed-header
/// flags bits so a packet identifier is skipped only when present.
fn parse_publish(packet_type: u8, payload: &[u8]) -> Option<(String, Vec<u8>)> {
    let qos = (packet_type >> 1) & 0x03;
    if payload.len() < 2 {
        return None;
    }
    let topic_len = u16::from_be_bytes([payload[0], payload[1]]) as usize;
    let topic_start = 2;
    let topic_end = topic_start + topic_len;
    let topic = std::str::from_utf8(payload.get(topic_start..topic_end)?)
        .ok()?
        .to_string();

    let body_start = if qos > 0 { topic_end + 2 } else { topic_end };
    let body = payload.get(body_start..)?.to_vec();
    Some((topic, body))
}
