use std::fmt::{self, Display, Formatter};

use nix::{sys::signal::Signal, unistd::Pid};

/// How a finished process (or job) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCause {
    Exited(i32),
    Signaled(Signal),
}

impl ExitCause {
    /// Numeric status as seen by the user: the exit code, or `128 + signal`.
    pub fn status(self) -> i32 {
        match self {
            ExitCause::Exited(code) => code,
            ExitCause::Signaled(sig) => 128 + sig as i32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    Stopped,
    Finished(ExitCause),
}

impl State {
    pub fn is_finished(self) -> bool {
        matches!(self, State::Finished(_))
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            State::Running => write!(f, "running"),
            State::Stopped => write!(f, "suspended"),
            State::Finished(_) => write!(f, "finished"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub pid: Pid,
    pub state: State,
}

impl Process {
    pub fn new(pid: Pid) -> Self {
        Process {
            pid,
            state: State::Running,
        }
    }
}

/// Derives a job's state from its stages.
///
/// Any running stage keeps the job running; otherwise any stopped stage
/// keeps it stopped; once every stage is done the job finishes with the
/// exit cause of its last stage. A job without stages yet is running.
pub fn aggregate(procs: &[Process]) -> State {
    let mut stopped = false;
    for p in procs {
        match p.state {
            State::Running => return State::Running,
            State::Stopped => stopped = true,
            State::Finished(_) => {}
        }
    }
    if stopped {
        return State::Stopped;
    }
    match procs.last() {
        Some(Process {
            state: State::Finished(cause),
            ..
        }) => State::Finished(*cause),
        _ => State::Running,
    }
}
