//! CPU budget watchdog.
//!
//! A dedicated thread samples the isolate thread's CPU clock and terminates
//! V8 execution once the budget is spent. Termination surfaces inside the
//! isolate as a thrown error, which the evaluator maps to a timeout result.
//! Wall-clock enforcement is a separate, host-side race — see `eval.rs`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use deno_core::v8;

use crate::thread_clock::ThreadCpuClock;

pub(crate) struct CpuWatchdog {
    cancel_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl CpuWatchdog {
    /// Arm the watchdog against `clock` (the isolate thread's CPU clock).
    /// `fired` is set before termination so the caller can distinguish a CPU
    /// timeout from an ordinary thrown error.
    pub fn arm(
        clock: ThreadCpuClock,
        isolate_handle: v8::IsolateHandle,
        budget: Duration,
        fired: Arc<AtomicBool>,
    ) -> Self {
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let started = clock.elapsed_cpu();
        let poll = poll_interval(budget);

        let handle = std::thread::spawn(move || {
            loop {
                match cancel_rx.recv_timeout(poll) {
                    // Disarmed, or the evaluator went away entirely.
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    Err(RecvTimeoutError::Timeout) => {
                        if clock.elapsed_cpu().saturating_sub(started) >= budget {
                            fired.store(true, Ordering::SeqCst);
                            isolate_handle.terminate_execution();
                            return;
                        }
                    }
                }
            }
        });

        Self { cancel_tx, handle }
    }

    /// Disarm and wait for the watchdog thread to exit. Joining before the
    /// runtime is dropped keeps the IsolateHandle from outliving its isolate.
    pub fn disarm(self) {
        let _ = self.cancel_tx.send(());
        let _ = self.handle.join();
    }
}

fn poll_interval(budget: Duration) -> Duration {
    (budget / 4).clamp(Duration::from_millis(1), Duration::from_millis(5))
}
