//! Fixed-capacity table of active devices, keyed by (host, port).

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::device;
use crate::error::{Error, Result};
use crate::mqtt::Mqtt;
use crate::poll::{Poll, PollIdentity, PollList};
use crate::queue::{self, Command, CommandSender, CommandStopper};
use crate::wakeup::Wakeup;

/// Default compile-time registry capacity.
pub const SERVERS_MAX: usize = 16;

struct DeviceSlot {
    host: Ipv4Addr,
    port: u16,
    polls: Arc<AsyncMutex<PollList>>,
    sender: CommandSender,
    stopper: CommandStopper,
    active: Arc<AtomicBool>,
    worker: JoinHandle<()>,
    overflow_streak: AtomicU32,
}

/// Owns every device slot and the shared pieces each worker needs.
pub struct Registry {
    slots: Vec<DeviceSlot>,
    capacity: usize,
    mqtt: Arc<Mqtt>,
    max_re_time: u32,
    wakeup: Wakeup,
}

impl Registry {
    pub fn new(mqtt: Arc<Mqtt>, max_re_time: u32, wakeup: Wakeup) -> Self {
        Registry {
            slots: Vec::new(),
            capacity: SERVERS_MAX,
            mqtt,
            max_re_time,
            wakeup,
        }
    }

    /// Host must be a non-zero (not `0.0.0.0`) IPv4 address; the
    /// original's `ntohl(inet_addr(ip)) == INADDR_ANY` check is
    /// replaced with a proper parse plus unspecified-address check.
    fn validate_host(host: &str) -> Result<Ipv4Addr> {
        let addr: Ipv4Addr = host
            .parse()
            .map_err(|_| Error::InvalidInput(format!("'{host}' is not a valid ipv4 address")))?;
        if addr == Ipv4Addr::UNSPECIFIED {
            return Err(Error::InvalidInput(
                "ipv4 address must not be 0.0.0.0".to_string(),
            ));
        }
        Ok(addr)
    }

    fn find(&self, host: Ipv4Addr, port: u16) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.host == host && s.port == port)
    }

    /// Returns an existing active slot or allocates a free one,
    /// spawning its worker and sending the initial `Connect`.
    async fn find_or_create(&mut self, host: &str, port: u16) -> Result<usize> {
        let host = Self::validate_host(host)?;
        if let Some(idx) = self.find(host, port) {
            return Ok(idx);
        }
        if self.slots.len() >= self.capacity {
            return Err(Error::NoSpace);
        }

        let (sender, receiver, stopper) = queue::channel();
        let active = Arc::new(AtomicBool::new(false));
        let addr = SocketAddr::V4(SocketAddrV4::new(host, port));
        let worker = tokio::spawn(device::run(
            addr,
            receiver,
            self.mqtt.clone(),
            active.clone(),
            self.max_re_time,
        ));

        sender
            .try_send(Command::Connect)
            .map_err(|_| Error::OutOfMemory)?;

        let slot = DeviceSlot {
            host,
            port,
            polls: Arc::new(AsyncMutex::new(PollList::new())),
            sender,
            stopper,
            active,
            worker,
            overflow_streak: AtomicU32::new(0),
        };
        self.slots.push(slot);
        info!(%host, port, "device slot created");
        Ok(self.slots.len() - 1)
    }

    /// `FindOrCreate` then insert into the device's poll list, then
    /// raise the wakeup signal so the scheduler recomputes its sleep.
    pub async fn add_poll(&mut self, host: &str, port: u16, poll: Poll) -> Result<()> {
        let idx = self.find_or_create(host, port).await?;
        let polls = self.slots[idx].polls.clone();
        let mut guard = polls.lock().await;
        guard.add(poll)?;
        drop(guard);
        self.wakeup.signal();
        Ok(())
    }

    pub async fn delete_poll(
        &mut self,
        host: &str,
        port: u16,
        identity: PollIdentity,
    ) -> Result<()> {
        let host = Self::validate_host(host)?;
        let idx = self.find(host, port).ok_or(Error::NotFound)?;
        let mut guard = self.slots[idx].polls.lock().await;
        guard.delete(identity)?;
        drop(guard);
        self.wakeup.signal();
        Ok(())
    }

    /// Iterate the active device slots, exposing exactly what the
    /// scheduler needs: the poll list lock, the command sender, and
    /// the debounced overflow-warning counter for that device's queue.
    pub fn devices(
        &self,
    ) -> impl Iterator<Item = (&Arc<AsyncMutex<PollList>>, &CommandSender, &AtomicU32)> {
        self.slots
            .iter()
            .map(|s| (&s.polls, &s.sender, &s.overflow_streak))
    }

    pub fn is_active(&self, host: Ipv4Addr, port: u16) -> bool {
        self.find(host, port)
            .map(|idx| self.slots[idx].active.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Tear down every device: stop its queue, join its worker, and
    /// drop its poll list. The original's `m2md_modbus_cleanup()` is a
    /// stub that leaks threads and sessions; this is the teardown it
    /// never implemented.
    pub async fn shutdown(mut self) {
        for slot in &self.slots {
            slot.stopper.stop();
        }
        for slot in self.slots.drain(..) {
            let _ = slot.worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_host_rejects_unspecified() {
        assert!(matches!(
            Registry::validate_host("0.0.0.0"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn validate_host_rejects_malformed() {
        assert!(Registry::validate_host("not-an-ip").is_err());
    }

    #[test]
    fn validate_host_accepts_ordinary_address() {
        assert_eq!(
            Registry::validate_host("10.0.0.1").unwrap(),
            Ipv4Addr::new(10, 0, 0, 1)
        );
    }
}
