use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use nix::unistd::Pid;

use super::{
    process::{aggregate, Process, State},
    terminal::Mode,
};

/// Index of a job in the table. `0` is the foreground slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(usize);

pub const FOREGROUND: JobId = JobId(0);

impl JobId {
    pub fn is_foreground(self) -> bool {
        self == FOREGROUND
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Accepts `3` as well as `%3`.
impl FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.strip_prefix('%').unwrap_or(s).parse()?;
        Ok(JobId(id))
    }
}

impl From<JobId> for usize {
    fn from(id: JobId) -> usize {
        id.0
    }
}

impl From<usize> for JobId {
    fn from(id: usize) -> Self {
        JobId(id)
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub pgid: Pid,
    pub procs: Vec<Process>,
    pub mode: Mode,
    pub command: String,
    seq: u64,
}

impl Job {
    pub fn state(&self) -> State {
        aggregate(&self.procs)
    }
}

/// Slot-indexed job table. A `None` entry is a free slot.
#[derive(Debug)]
pub struct JobTable {
    slots: Vec<Option<Job>>,
    next_seq: u64,
}

impl Default for JobTable {
    fn default() -> Self {
        JobTable {
            slots: vec![None],
            next_seq: 0,
        }
    }
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs in the table.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.slots.get(id.0)?.as_ref()
    }

    /// Occupied slots in table order, foreground first.
    pub fn occupied(&self) -> impl Iterator<Item = (JobId, &Job)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(n, slot)| slot.as_ref().map(|job| (JobId(n), job)))
    }

    fn free_slot(&mut self) -> JobId {
        if let Some(n) = (1..self.slots.len()).find(|&n| self.slots[n].is_none()) {
            return JobId(n);
        }
        self.slots.push(None);
        JobId(self.slots.len() - 1)
    }

    pub fn add_job(&mut self, pgid: Pid, background: bool, mode: Mode) -> JobId {
        let id = if background {
            self.free_slot()
        } else {
            assert!(self.slots[0].is_none(), "foreground slot is taken");
            FOREGROUND
        };
        self.next_seq += 1;
        self.slots[id.0] = Some(Job {
            pgid,
            procs: Vec::new(),
            mode,
            command: String::new(),
            seq: self.next_seq,
        });
        tracing::debug!(job = %id, %pgid, background, "job added");
        id
    }

    pub fn add_process<S: AsRef<str>>(&mut self, id: JobId, pid: Pid, words: &[S]) {
        let job = self
            .slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .expect("add_process on a free slot");
        job.procs.push(Process::new(pid));
        if !job.command.is_empty() {
            job.command.push_str(" | ");
        }
        for (i, word) in words.iter().enumerate() {
            if i > 0 {
                job.command.push(' ');
            }
            job.command.push_str(word.as_ref());
        }
        tracing::debug!(job = %id, %pid, "process added");
    }

    /// Returns the job's state, freeing the slot when it has finished.
    ///
    /// Callers wanting the command text of a finished job must read it
    /// before calling this.
    pub fn job_state(&mut self, id: JobId) -> Option<State> {
        let slot = self.slots.get_mut(id.0)?;
        let state = slot.as_ref()?.state();
        if state.is_finished() {
            *slot = None;
            tracing::debug!(job = %id, ?state, "job removed");
        }
        Some(state)
    }

    pub fn job_command(&self, id: JobId) -> Option<&str> {
        self.get(id).map(|job| job.command.as_str())
    }

    pub fn move_job(&mut self, from: JobId, to: JobId) {
        assert!(self.slots[to.0].is_none(), "slot {} is taken", to);
        let job = self.slots[from.0].take();
        self.slots[to.0] = job;
    }

    /// Moves the foreground job into a background slot and returns it.
    pub fn to_background(&mut self) -> JobId {
        let to = self.free_slot();
        self.move_job(FOREGROUND, to);
        to
    }

    pub fn set_mode(&mut self, id: JobId, mode: Mode) {
        if let Some(job) = self.slots.get_mut(id.0).and_then(Option::as_mut) {
            job.mode = mode;
        }
    }

    /// Marks the stopped processes of a job as running after SIGCONT.
    pub fn continued(&mut self, id: JobId) {
        if let Some(job) = self.slots.get_mut(id.0).and_then(Option::as_mut) {
            for p in job.procs.iter_mut().filter(|p| p.state == State::Stopped) {
                p.state = State::Running;
            }
        }
    }

    /// The most recently added background job that has not finished.
    pub fn most_recent(&self) -> Option<JobId> {
        self.occupied()
            .filter(|(id, job)| !id.is_foreground() && !job.state().is_finished())
            .max_by_key(|(_, job)| job.seq)
            .map(|(id, _)| id)
    }

    /// Records a new state for the live process `pid`.
    ///
    /// Only state fields are written here; slots are never allocated or
    /// freed. Returns `false` when no tracked live process has that pid.
    pub fn update(&mut self, pid: Pid, state: State) -> bool {
        for job in self.slots.iter_mut().flatten() {
            if let Some(p) = job
                .procs
                .iter_mut()
                .find(|p| p.pid == pid && !p.state.is_finished())
            {
                p.state = state;
                return true;
            }
        }
        false
    }
}
