//! OS signal handling: SIGINT/SIGTERM request shutdown, SIGUSR1 asks
//! the outer driver to flush log buffers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

const FLUSH_MIN_INTERVAL: Duration = Duration::from_secs(60);

/// Shared shutdown flag, readable from the main loop without locking.
#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        ShutdownFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Installs SIGINT/SIGTERM/SIGUSR1 handlers and spawns a task that
/// updates `shutdown` and a debounced flush-logs flag. Call once at
/// startup, before the main loop begins.
pub fn install(shutdown: ShutdownFlag) -> Arc<AtomicBool> {
    let flush_requested = Arc::new(AtomicBool::new(false));

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigusr1 = signal(SignalKind::user_defined1())
        .expect("failed to install SIGUSR1 handler");

    let flush_flag = flush_requested.clone();
    tokio::spawn(async move {
        let mut last_flush = Instant::now() - FLUSH_MIN_INTERVAL;
        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("received SIGINT, shutting down");
                    shutdown.set();
                    break;
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    shutdown.set();
                    break;
                }
                _ = sigusr1.recv() => {
                    if last_flush.elapsed() >= FLUSH_MIN_INTERVAL {
                        flush_flag.store(true, Ordering::Release);
                        last_flush = Instant::now();
                    } else {
                        info!("SIGUSR1 ignored, below minimum flush interval");
                    }
                }
            }
        }
    });

    flush_requested
}
