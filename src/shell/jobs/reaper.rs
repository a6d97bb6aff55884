use nix::{
    errno::Errno,
    libc::SIGCHLD,
    sys::wait::{self, WaitPidFlag, WaitStatus},
    unistd::Pid,
};
use signal_hook::iterator::Signals;

use super::{
    job::JobTable,
    process::{ExitCause, State},
};
use crate::{error::Result, shell::syscall};

/// Child-status reaper.
///
/// SIGCHLD only wakes a self-pipe; the actual `waitpid` pass runs on the
/// shell thread through [`Reaper::reap`], so job table edits never race
/// with it.
pub struct Reaper {
    signals: Signals,
}

impl Reaper {
    pub fn install() -> Result<Self> {
        let signals = Signals::new([SIGCHLD])?;
        Ok(Reaper { signals })
    }

    /// Collects every pending child status and records it in `table`.
    pub fn reap(&mut self, table: &mut JobTable) {
        // Clear the latch first: anything arriving after this point wakes
        // the next `suspend`.
        for _ in self.signals.pending() {}

        // WUNTRACED: report stopped children
        // WCONTINUED: report resumed children
        // WNOHANG: never block
        let flag = Some(WaitPidFlag::WUNTRACED | WaitPidFlag::WNOHANG | WaitPidFlag::WCONTINUED);
        loop {
            match syscall(|| wait::waitpid(Pid::from_raw(-1), flag)) {
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => return,
                Ok(status) => {
                    if let Some((pid, state)) = outcome(status) {
                        if table.update(pid, state) {
                            tracing::debug!(%pid, ?state, "process changed state");
                        } else {
                            tracing::trace!(%pid, ?state, "status for untracked process");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("waitpid: {}", e);
                    return;
                }
            }
        }
    }

    /// Blocks until at least one child notification has arrived since the
    /// last [`Reaper::reap`].
    pub fn suspend(&mut self) {
        for _ in self.signals.wait() {}
    }
}

impl std::fmt::Debug for Reaper {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("Reaper")
    }
}

/// Translates a wait status into the new state of the reported process.
pub fn outcome(status: WaitStatus) -> Option<(Pid, State)> {
    match status {
        WaitStatus::Exited(pid, code) => Some((pid, State::Finished(ExitCause::Exited(code)))),
        WaitStatus::Signaled(pid, sig, _core) => {
            Some((pid, State::Finished(ExitCause::Signaled(sig))))
        }
        WaitStatus::Stopped(pid, _sig) => Some((pid, State::Stopped)),
        WaitStatus::Continued(pid) => Some((pid, State::Running)),
        _ => None,
    }
}
