//! Bounded command queue coupling the scheduler to a device worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

use crate::error::{Error, Result};
use crate::poll::PollSnapshot;

pub const QUEUE_CAPACITY: usize = 16;

/// A worker command. `Connect` (re)opens the device session; `Poll`
/// carries one due register sample.
#[derive(Debug, Clone)]
pub enum Command {
    Connect,
    Poll(PollSnapshot),
}

/// The producer half, held by the scheduler (and cloned freely — it is
/// multi-producer by construction).
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Command>,
    stopped: Arc<AtomicBool>,
}

impl CommandSender {
    /// Non-blocking send. Used by the scheduler on every due poll; a
    /// full queue is reported as `WouldBlock`, never blocks the tick.
    pub fn try_send(&self, cmd: Command) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::Cancelled);
        }
        self.tx.try_send(cmd).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::WouldBlock,
            mpsc::error::TrySendError::Closed(_) => Error::Cancelled,
        })
    }

    /// Blocking send, used only by the worker itself when it needs to
    /// guarantee a command lands (not used by the reconnect path, which
    /// loops directly instead of self-enqueuing — see device.rs).
    pub async fn write(&self, cmd: Command) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::Cancelled);
        }
        self.tx.send(cmd).await.map_err(|_| Error::Cancelled)
    }
}

/// The consumer half, owned solely by the worker task.
pub struct CommandReceiver {
    rx: mpsc::Receiver<Command>,
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
}

impl CommandReceiver {
    /// Blocking dequeue. Resolves with `Cancelled` once the queue has
    /// been stopped, even if commands remain buffered — shutdown takes
    /// priority over draining.
    pub async fn read(&mut self) -> Result<Command> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            _ = self.stop_notify.notified() => Err(Error::Cancelled),
            cmd = self.rx.recv() => cmd.ok_or(Error::Cancelled),
        }
    }

    /// Drop all pending commands. Used before a reconnect retry so that
    /// polls queued against the dead session do not fail immediately.
    pub fn clear(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_cancelled(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Handle held by whoever owns the device slot (the registry), separate
/// from both queue halves, so shutdown can be triggered from outside
/// the worker task that owns the [`CommandReceiver`].
#[derive(Clone)]
pub struct CommandStopper {
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
}

impl CommandStopper {
    /// Wake any blocked reader with `Cancelled` and cause subsequent
    /// reads and sends to return `Cancelled` immediately.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.stop_notify.notify_waiters();
    }
}

/// Create a linked sender/receiver/stopper set with the fixed
/// device-queue capacity.
pub fn channel() -> (CommandSender, CommandReceiver, CommandStopper) {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let stopped = Arc::new(AtomicBool::new(false));
    let stop_notify = Arc::new(Notify::new());
    (
        CommandSender {
            tx,
            stopped: stopped.clone(),
        },
        CommandReceiver {
            rx,
            stopped: stopped.clone(),
            stop_notify: stop_notify.clone(),
        },
        CommandStopper {
            stopped,
            stop_notify,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::{FunctionCode, PollIdentity, Width};

    fn snapshot() -> PollSnapshot {
        PollSnapshot {
            identity: PollIdentity {
                function: FunctionCode::ReadHoldingRegisters,
                register: 1,
                unit_id: 1,
            },
            signed: true,
            width: Width::Single,
            scale: 1.0,
            topic: "t".to_string(),
        }
    }

    #[tokio::test]
    async fn try_send_then_read_round_trips() {
        let (tx, mut rx, _stopper) = channel();
        tx.try_send(Command::Connect).unwrap();
        let cmd = rx.read().await.unwrap();
        assert!(matches!(cmd, Command::Connect));
    }

    #[tokio::test]
    async fn try_send_fails_with_would_block_when_full() {
        let (tx, _rx, _stopper) = channel();
        for _ in 0..QUEUE_CAPACITY {
            tx.try_send(Command::Poll(snapshot())).unwrap();
        }
        assert!(matches!(
            tx.try_send(Command::Poll(snapshot())),
            Err(Error::WouldBlock)
        ));
    }

    #[tokio::test]
    async fn clear_drops_all_pending() {
        let (tx, mut rx, _stopper) = channel();
        tx.try_send(Command::Connect).unwrap();
        tx.try_send(Command::Poll(snapshot())).unwrap();
        rx.clear();
        // Nothing left to read without a further send; confirm the
        // queue has capacity again instead of blocking on read().
        for _ in 0..QUEUE_CAPACITY {
            tx.try_send(Command::Connect).unwrap();
        }
    }

    #[tokio::test]
    async fn stop_wakes_blocked_reader_with_cancelled() {
        let (_tx, mut rx, stopper) = channel();
        stopper.stop();
        let result = rx.read().await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn try_send_after_stop_is_cancelled() {
        let (tx, _rx, stopper) = channel();
        stopper.stop();
        assert!(matches!(
            tx.try_send(Command::Connect),
            Err(Error::Cancelled)
        ));
    }
}
