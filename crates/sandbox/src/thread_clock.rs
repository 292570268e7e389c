//! Per-thread CPU clocks, readable from other threads.
//!
//! The CPU watchdog runs on its own thread but accounts against the isolate
//! thread's CPU time, so a hook blocked on a host-bridge call accrues
//! nothing. Each platform exposes a handle that can be sampled remotely.

use std::time::Duration;

/// CPU clock for one specific thread. Create it on the thread to be
/// measured; `elapsed_cpu` may be called from any thread.
#[cfg(target_os = "linux")]
pub(crate) struct ThreadCpuClock {
    clock_id: libc::clockid_t,
}

#[cfg(target_os = "linux")]
impl ThreadCpuClock {
    pub fn for_current_thread() -> Option<Self> {
        let mut clock_id: libc::clockid_t = 0;
        let rc = unsafe { libc::pthread_getcpuclockid(libc::pthread_self(), &mut clock_id) };
        if rc == 0 { Some(Self { clock_id }) } else { None }
    }

    pub fn elapsed_cpu(&self) -> Duration {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe {
            libc::clock_gettime(self.clock_id, &mut ts);
        }
        Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
    }
}

#[cfg(target_os = "macos")]
pub(crate) struct ThreadCpuClock {
    port: u32,
}

#[cfg(target_os = "macos")]
impl ThreadCpuClock {
    pub fn for_current_thread() -> Option<Self> {
        let port = unsafe { mach2::mach_init::mach_thread_self() };
        if port != 0 { Some(Self { port }) } else { None }
    }

    pub fn elapsed_cpu(&self) -> Duration {
        use libc::{THREAD_BASIC_INFO, thread_basic_info, thread_info};

        unsafe {
            let mut info = std::mem::zeroed::<thread_basic_info>();
            let mut count = (std::mem::size_of::<thread_basic_info>()
                / std::mem::size_of::<libc::c_int>()) as u32;

            let kr = thread_info(
                self.port,
                THREAD_BASIC_INFO as u32,
                &mut info as *mut _ as *mut _,
                &mut count,
            );

            if kr == 0 {
                let user = Duration::new(
                    info.user_time.seconds as u64,
                    info.user_time.microseconds as u32 * 1000,
                );
                let sys = Duration::new(
                    info.system_time.seconds as u64,
                    info.system_time.microseconds as u32 * 1000,
                );
                user + sys
            } else {
                Duration::ZERO
            }
        }
    }
}

/// Fallback for platforms without a remote-readable thread CPU clock. Wall
/// time stands in for CPU time, which over-counts blocked threads.
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub(crate) struct ThreadCpuClock {
    started: std::time::Instant,
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
impl ThreadCpuClock {
    pub fn for_current_thread() -> Option<Self> {
        Some(Self {
            started: std::time::Instant::now(),
        })
    }

    pub fn elapsed_cpu(&self) -> Duration {
        self.started.elapsed()
    }
}
