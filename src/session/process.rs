//! Process liveness probes and termination used by the lock protocol and
//! session cleanup.

use std::time::Duration;

/// Check whether a process with the given PID exists.
///
/// Uses `kill(pid, 0)`, the null signal, which performs the existence
/// check without delivering anything.
#[must_use]
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    #[cfg(unix)]
    {
        // PID values are always within i32 range on supported platforms.
        #[allow(clippy::cast_possible_wrap)]
        let pid_i32 = pid as i32;
        // SAFETY: signal 0 is a null signal used only for existence checks.
        (unsafe { libc::kill(pid_i32, 0) }) == 0
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Terminate a process tree: SIGTERM to the process group, poll for up to
/// two seconds, then escalate to SIGKILL.
///
/// Used to stop Chrome (which runs renderer/GPU/utility children in its
/// process group) and to reap orphaned workers.
pub fn kill_process(pid: u32) {
    if pid == 0 {
        return;
    }
    #[cfg(unix)]
    {
        use std::thread;

        #[allow(clippy::cast_possible_wrap)]
        let pid_i32 = pid as i32;

        // SAFETY: libc::kill with a negative pid targets the process group.
        let term_result = unsafe { libc::kill(-pid_i32, libc::SIGTERM) };
        if term_result != 0 {
            // Not a process group leader; signal the single process.
            unsafe { libc::kill(pid_i32, libc::SIGTERM) };
        }

        let poll_interval = Duration::from_millis(100);
        let max_wait = Duration::from_secs(2);
        let start = std::time::Instant::now();

        while start.elapsed() < max_wait {
            if !pid_alive(pid) {
                return;
            }
            thread::sleep(poll_interval);
        }

        // SIGTERM was not enough; escalate.
        let kill_result = unsafe { libc::kill(-pid_i32, libc::SIGKILL) };
        if kill_result != 0 {
            unsafe { libc::kill(pid_i32, libc::SIGKILL) };
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}
