//! Background dispatch scheduler.
//!
//! Runs one allocation pass per tick on a dedicated thread, concurrently with
//! request-driven lifecycle commands against the same store. The timer is only
//! re-armed after a pass finishes, so passes never overlap: a slow pass delays
//! the next tick instead of stacking a second one on top of it.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;

use crate::dispatch::Dispatcher;

pub struct DispatchScheduler {
    stop: mpsc::Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl DispatchScheduler {
    /// Spawn the scheduler thread, ticking at the dispatcher's configured
    /// interval.
    pub fn start(dispatcher: Dispatcher) -> io::Result<Self> {
        let interval = dispatcher.config().tick_interval;
        let (stop, ticks) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("dispatch-scheduler".into())
            .spawn(move || {
                log::info!("dispatch scheduler started, interval {:?}", interval);
                loop {
                    match ticks.recv_timeout(interval) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            // Per-ride failures are already contained inside
                            // the pass; nothing here can take the loop down.
                            let stats = dispatcher.dispatch_pending();
                            if stats.processed > 0 {
                                log::info!(
                                    "dispatch pass done: {} processed, {} assigned, {} exhausted, {} errors",
                                    stats.processed,
                                    stats.assigned,
                                    stats.exhausted,
                                    stats.errors
                                );
                            }
                        }
                    }
                }
                log::info!("dispatch scheduler stopped");
            })?;
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Stop the scheduler and wait for an in-flight pass to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Send fails only if the loop already exited.
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for DispatchScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
