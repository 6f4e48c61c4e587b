//! Per-device worker: owns one Modbus/TCP connection, executes reads
//! serially, and reconnects with a capped exponential back-off.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::*;
use tracing::{error, info, warn};

use crate::mqtt::Mqtt;
use crate::poll::{FunctionCode, PollSnapshot, Width};
use crate::queue::{Command, CommandReceiver};

const MODBUS_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);
const INITIAL_BACKOFF_SECS: u32 = 1;

/// Tracks the active flag the registry reads lock-free: set while the
/// worker holds a live session, cleared on disconnect and on shutdown.
pub type ActiveFlag = Arc<AtomicBool>;

/// Runs on its own task for the lifetime of the device slot. Returns
/// once the command queue is stopped (shutdown) or closed.
pub async fn run(
    addr: SocketAddr,
    mut commands: CommandReceiver,
    mqtt: Arc<Mqtt>,
    active: ActiveFlag,
    max_re_time: u32,
) {
    let mut session: Option<Context> = None;
    let mut conn_to = INITIAL_BACKOFF_SECS;

    loop {
        let cmd = match commands.read().await {
            Ok(cmd) => cmd,
            Err(_) => break,
        };

        match cmd {
            Command::Connect => {
                session = None;
                active.store(false, Ordering::Release);
                match connect_with_backoff(addr, &mut conn_to, max_re_time, &mut commands).await {
                    Some(ctx) => {
                        info!(%addr, "modbus session established");
                        session = Some(ctx);
                        active.store(true, Ordering::Release);
                        conn_to = INITIAL_BACKOFF_SECS;
                    }
                    None => break, // cancelled while backing off
                }
            }
            Command::Poll(snapshot) => {
                let Some(ctx) = session.as_mut() else {
                    warn!(%addr, "poll command dropped, device not connected");
                    continue;
                };
                match service_poll(ctx, &snapshot, &mqtt).await {
                    Ok(()) => {}
                    Err(e) => {
                        error!(%addr, error = %e, "read failed, reconnecting");
                        session = None;
                        active.store(false, Ordering::Release);
                        commands.clear();
                        match connect_with_backoff(addr, &mut conn_to, max_re_time, &mut commands)
                            .await
                        {
                            Some(ctx) => {
                                session = Some(ctx);
                                active.store(true, Ordering::Release);
                                conn_to = INITIAL_BACKOFF_SECS;
                            }
                            None => break,
                        }
                    }
                }
            }
        }
    }

    active.store(false, Ordering::Release);
    info!(%addr, "worker terminated");
}

/// Connect, retrying with a doubling back-off capped at `max_re_time`
/// seconds. A direct loop rather than a self-enqueued `Connect`
/// command, avoiding a reconnect command competing for queue space
/// with incoming polls. Returns `None` if the queue is cancelled while
/// sleeping between attempts.
async fn connect_with_backoff(
    addr: SocketAddr,
    conn_to: &mut u32,
    max_re_time: u32,
    commands: &mut CommandReceiver,
) -> Option<Context> {
    loop {
        match tcp::connect_slave(addr, Slave(0)).await {
            Ok(ctx) => return Some(ctx),
            Err(e) => {
                warn!(%addr, error = %e, backoff_secs = *conn_to, "connect failed, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(*conn_to as u64)) => {}
                    _ = wait_for_cancel(commands) => return None,
                }
                *conn_to = (*conn_to * 2).min(max_re_time);
            }
        }
    }
}

/// Resolves only when the queue has been stopped, letting the backoff
/// sleep above be interrupted by shutdown.
async fn wait_for_cancel(commands: &mut CommandReceiver) {
    loop {
        if commands.is_cancelled() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn service_poll(
    ctx: &mut Context,
    snapshot: &PollSnapshot,
    mqtt: &Mqtt,
) -> Result<(), String> {
    ctx.set_slave(Slave(snapshot.identity.unit_id));

    let count = match snapshot.width {
        Width::Single => 1,
        Width::Double => 2,
    };

    let registers: Vec<u16> = match snapshot.identity.function {
        FunctionCode::ReadHoldingRegisters => ctx
            .read_holding_registers(snapshot.identity.register, count)
            .await
            .map_err(|e| format!("io error: {e}"))?
            .map_err(|e| format!("modbus exception: {e}"))?,
        FunctionCode::ReadInputRegisters => ctx
            .read_input_registers(snapshot.identity.register, count)
            .await
            .map_err(|e| format!("io error: {e}"))?
            .map_err(|e| format!("modbus exception: {e}"))?,
    };

    let value = convert(&registers, snapshot.signed) * snapshot.scale;
    let bytes = value.to_ne_bytes();

    mqtt.publish(&snapshot.topic, &bytes)
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}

/// Combine one or two 16-bit registers into the scaled float's raw
/// integer input, matching the big-endian register pair convention
/// (the first register supplies the high 16 bits for width 2).
fn convert(registers: &[u16], signed: bool) -> f32 {
    match registers.len() {
        1 => {
            if signed {
                registers[0] as i16 as f32
            } else {
                registers[0] as f32
            }
        }
        2 => {
            let combined = ((registers[0] as u32) << 16) | registers[1] as u32;
            if signed {
                combined as i32 as f32
            } else {
                combined as f32
            }
        }
        n => panic!("unexpected register count {n}"),
    }
}

/// Default Modbus/TCP response timeout used when establishing a new
/// session. tokio-modbus does not currently expose a per-context
/// timeout knob on this connect path; the session's read calls are
/// bounded externally by the scheduler's poll period instead.
pub fn response_timeout() -> Duration {
    MODBUS_RESPONSE_TIMEOUT
}
