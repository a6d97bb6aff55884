//! Job control: the job table, child reaping, terminal ownership and the
//! operations built on them.

mod job;
mod process;
mod reaper;
mod spawn;
mod terminal;

use std::fmt::{self, Display, Formatter};

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::{self, Pid},
};

pub use job::{Job, JobId, JobTable, FOREGROUND};
pub use process::{aggregate, ExitCause, Process, State};
pub use reaper::{outcome, Reaper};
pub use spawn::Builtin;
pub use terminal::{Mode, Terminal};

use crate::{
    error::{Error, Result},
    helper::Defer,
};

/// Which jobs `watch` reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Running,
    Stopped,
    Finished,
    All,
}

impl Filter {
    pub fn matches(self, state: State) -> bool {
        match self {
            Filter::Running => state == State::Running,
            Filter::Stopped => state == State::Stopped,
            Filter::Finished => state.is_finished(),
            Filter::All => true,
        }
    }
}

/// One line of job status shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub id: JobId,
    pub command: String,
    pub state: State,
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let (id, cmd) = (self.id, &self.command);
        match self.state {
            State::Running => write!(f, "[{}] running '{}'", id, cmd),
            State::Stopped => write!(f, "[{}] suspended '{}'", id, cmd),
            State::Finished(ExitCause::Exited(code)) => {
                write!(f, "[{}] exited '{}', status={}", id, cmd, code)
            }
            // FIXME: suspect special case, a signaled `false` is reported
            // as an exit.
            State::Finished(ExitCause::Signaled(sig)) if cmd == "false" => {
                write!(f, "[{}] exited '{}', status={}", id, cmd, sig as i32)
            }
            State::Finished(ExitCause::Signaled(sig)) => {
                write!(f, "[{}] killed '{}' by signal {}", id, cmd, sig as i32)
            }
        }
    }
}

fn msg(line: impl Display) {
    eprintln!("{}", line);
}

/// Sends `sig` to every process of the group. A group that is already gone
/// is not an error.
fn signal_group(pgid: Pid, sig: Signal) -> Result<()> {
    match signal::killpg(pgid, sig) {
        Ok(()) => {
            tracing::debug!(%pgid, ?sig, "signal sent");
            Ok(())
        }
        Err(Errno::ESRCH) => {
            tracing::debug!(%pgid, ?sig, "process group already gone");
            Ok(())
        }
        Err(e) => Err(Error::sys("killpg")(e)),
    }
}

/// Process-wide job-control context. Created once by [`JobControl::init`]
/// and torn down by [`JobControl::shutdown`].
#[derive(Debug)]
pub struct JobControl {
    table: JobTable,
    terminal: Terminal,
    reaper: Reaper,
    shell_pgid: Pid,
    /// Cleared in a stage's child: the table there is a snapshot of jobs
    /// that belong to the parent shell.
    owns_jobs: bool,
}

impl JobControl {
    /// Installs the SIGCHLD notifier and takes over `terminal`.
    pub fn init(terminal: Terminal) -> Result<Self> {
        let reaper = Reaper::install()?;
        let shell_pgid = unistd::getpgrp();
        terminal.grant_foreground(shell_pgid)?;
        Ok(JobControl {
            table: JobTable::new(),
            terminal,
            reaper,
            shell_pgid,
            owns_jobs: true,
        })
    }

    pub fn table(&self) -> &JobTable {
        &self.table
    }

    pub fn terminal(&self) -> &Terminal {
        &self.terminal
    }

    pub fn shell_pgid(&self) -> Pid {
        self.shell_pgid
    }

    /// Gives up control of the tabled jobs. They stay listed but can no
    /// longer be resumed or killed from this process.
    pub(crate) fn disown_jobs(&mut self) {
        self.owns_jobs = false;
    }

    pub fn add_job(&mut self, pgid: Pid, background: bool) -> JobId {
        let mode = self.terminal.shell_mode().clone();
        self.table.add_job(pgid, background, mode)
    }

    pub fn add_process<S: AsRef<str>>(&mut self, id: JobId, pid: Pid, words: &[S]) {
        self.table.add_process(id, pid, words)
    }

    pub fn job_command(&self, id: JobId) -> Option<&str> {
        self.table.job_command(id)
    }

    /// Destructive state read, see [`JobTable::job_state`].
    pub fn job_state(&mut self, id: JobId) -> Option<State> {
        self.reaper.reap(&mut self.table);
        self.table.job_state(id)
    }

    /// Current state of a job without reclaiming it.
    pub fn status(&mut self, id: JobId) -> Option<State> {
        self.reaper.reap(&mut self.table);
        self.table.get(id).map(Job::state)
    }

    /// Waits for the foreground job to finish or stop.
    ///
    /// A stopped job is moved to a background slot and reports status 0.
    /// Either way the shell gets the terminal and its modes back.
    pub fn monitor(&mut self) -> Result<i32> {
        let Some(pgid) = self.table.get(FOREGROUND).map(|job| job.pgid) else {
            return Ok(0);
        };
        let terminal = &self.terminal;
        let shell_pgid = self.shell_pgid;
        let _reclaim = Defer::new(|| {
            if let Err(e) = terminal.grant_foreground(shell_pgid) {
                tracing::warn!("failed to reclaim terminal: {}", e);
            }
            if let Err(e) = terminal.restore_mode(terminal.shell_mode()) {
                tracing::warn!("failed to restore terminal modes: {}", e);
            }
        });
        terminal.grant_foreground(pgid)?;

        loop {
            self.reaper.reap(&mut self.table);
            match self.table.job_state(FOREGROUND) {
                Some(State::Running) => self.reaper.suspend(),
                Some(State::Stopped) => {
                    let mode = terminal.save_mode()?;
                    self.table.set_mode(FOREGROUND, mode);
                    let id = self.table.to_background();
                    let command = self.table.job_command(id).unwrap_or_default().to_string();
                    msg(Report {
                        id,
                        command,
                        state: State::Stopped,
                    });
                    return Ok(0);
                }
                Some(State::Finished(cause)) => return Ok(cause.status()),
                None => return Ok(0),
            }
        }
    }

    /// Continues a job, by default the most recently started one.
    ///
    /// Returns `None` when the job does not exist or has finished.
    pub fn resume(&mut self, id: Option<JobId>, foreground: bool) -> Result<Option<i32>> {
        if !self.owns_jobs {
            return Ok(None);
        }
        self.reaper.reap(&mut self.table);
        let Some(id) = id.or_else(|| self.table.most_recent()) else {
            return Ok(None);
        };
        let Some(job) = self.table.get(id) else {
            return Ok(None);
        };
        if job.state().is_finished() {
            return Ok(None);
        }
        let (pgid, mode, command) = (job.pgid, job.mode.clone(), job.command.clone());
        if foreground && !id.is_foreground() && self.table.get(FOREGROUND).is_some() {
            return Err(Error::BadJob(format!("{}: another job owns the terminal", id)));
        }

        // The group is running again as soon as SIGCONT is sent; the
        // matching notification may only be reaped later.
        self.table.continued(id);
        if foreground {
            if !id.is_foreground() {
                self.table.move_job(id, FOREGROUND);
            }
            self.terminal.restore_mode(&mode)?;
            self.terminal.grant_foreground(pgid)?;
            signal_group(pgid, Signal::SIGCONT)?;
            msg(format_args!("[{}] continue '{}'", id, command));
            self.monitor().map(Some)
        } else {
            signal_group(pgid, Signal::SIGCONT)?;
            msg(format_args!("[{}] continue '{}'", id, command));
            Ok(Some(0))
        }
    }

    /// Sends SIGTERM to a job. Returns `false` when there is nothing to kill.
    pub fn kill(&mut self, id: JobId) -> Result<bool> {
        if !self.owns_jobs {
            return Ok(false);
        }
        self.reaper.reap(&mut self.table);
        let Some(job) = self.table.get(id) else {
            return Ok(false);
        };
        let state = job.state();
        if state.is_finished() {
            return Ok(false);
        }
        tracing::debug!(job = %id, command = %job.command, "killing");
        let pgid = job.pgid;
        signal_group(pgid, Signal::SIGTERM)?;
        // A stopped process only acts on SIGTERM once continued.
        if state == State::Stopped {
            signal_group(pgid, Signal::SIGCONT)?;
        }
        Ok(true)
    }

    /// Reports background jobs matching `filter` on stderr and reclaims
    /// finished ones.
    pub fn watch(&mut self, filter: Filter) -> Vec<Report> {
        let reports = self.reports(filter);
        for report in &reports {
            msg(report);
        }
        reports
    }

    /// Same as [`JobControl::watch`] without printing anything.
    pub fn reports(&mut self, filter: Filter) -> Vec<Report> {
        self.reaper.reap(&mut self.table);
        let ids: Vec<JobId> = self
            .table
            .occupied()
            .map(|(id, _)| id)
            .filter(|id| !id.is_foreground())
            .collect();

        let mut reports = Vec::new();
        for id in ids {
            // Reading a finished state frees the slot, so take the command first.
            let command = self.table.job_command(id).unwrap_or_default().to_string();
            let Some(state) = self.table.job_state(id) else {
                continue;
            };
            if filter.matches(state) {
                reports.push(Report { id, command, state });
            }
        }
        reports
    }

    /// Terminates every remaining job, waits for all of them and hands the
    /// terminal back in the state the shell found it.
    pub fn shutdown(mut self) -> Result<()> {
        self.reaper.reap(&mut self.table);
        let live: Vec<(JobId, Pid)> = self
            .table
            .occupied()
            .filter(|(_, job)| !job.state().is_finished())
            .map(|(id, job)| (id, job.pgid))
            .collect();

        for (id, pgid) in live {
            if !id.is_foreground() {
                self.terminal.grant_foreground(pgid)?;
            }
            self.kill(id)?;
            while self
                .table
                .get(id)
                .is_some_and(|job| !job.state().is_finished())
            {
                self.reaper.suspend();
                self.reaper.reap(&mut self.table);
            }
            if !id.is_foreground() {
                self.terminal.grant_foreground(self.shell_pgid)?;
            }
        }

        self.watch(Filter::Finished);
        self.terminal.release()
    }
}
