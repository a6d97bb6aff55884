use std::{
    ffi::CString,
    fs::{File, OpenOptions},
    io::Write,
    os::{
        fd::{AsRawFd, OwnedFd},
        unix::fs::OpenOptionsExt,
    },
    path::Path,
};

use nix::{
    fcntl::OFlag,
    libc,
    sys::signal::{self, SigHandler, Signal},
    unistd::{self, ForkResult, Pid},
};

use super::JobControl;
use crate::{
    error::{Error, Result},
    shell::{parser::Pipeline, syscall},
};

/// Built-in command hook run inside a stage's child process.
///
/// The child's `JobControl` only lists the shell's jobs; resuming or
/// killing them from there finds nothing. Returns `Ok(None)` when the words
/// do not name a built-in.
pub type Builtin = fn(&mut JobControl, &[String]) -> Result<Option<i32>>;

/// Descriptors a stage starts with, owned by the parent until fork.
struct Redirect {
    input: Option<OwnedFd>,
    output: Option<OwnedFd>,
}

fn open_input(path: &Path) -> Result<OwnedFd> {
    File::open(path)
        .map(OwnedFd::from)
        .map_err(|source| Error::Redirect {
            path: path.to_path_buf(),
            source,
        })
}

fn open_output(path: &Path) -> Result<OwnedFd> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o700)
        .open(path)
        .map(OwnedFd::from)
        .map_err(|source| Error::Redirect {
            path: path.to_path_buf(),
            source,
        })
}

fn argv(words: &[String]) -> Result<Vec<CString>> {
    words
        .iter()
        .map(|w| {
            CString::new(w.as_bytes())
                .map_err(|_| Error::Syntax(format!("`{}` contains a NUL byte", w.escape_debug())))
        })
        .collect()
}

impl JobControl {
    /// Starts every stage of `pipeline` as one job in one process group.
    ///
    /// Foreground jobs are monitored until they finish or stop; background
    /// jobs are announced and left running. Nothing is spawned when a stage
    /// has no words or a redirection target cannot be opened.
    pub fn run(&mut self, pipeline: &Pipeline, builtin: Builtin) -> Result<i32> {
        if pipeline.stages.is_empty() || pipeline.stages.iter().any(|s| s.words.is_empty()) {
            return Err(Error::MalformedPipeline);
        }
        let argvs = pipeline
            .stages
            .iter()
            .map(|s| argv(&s.words))
            .collect::<Result<Vec<_>>>()?;
        let redirects = pipeline
            .stages
            .iter()
            .map(|s| {
                Ok(Redirect {
                    input: s.input.as_deref().map(open_input).transpose()?,
                    output: s.output.as_deref().map(open_output).transpose()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let background = pipeline.background;
        let last = pipeline.stages.len() - 1;
        let mut pgid = None;
        let mut job = None;
        let mut next_input = None;
        let stages = pipeline.stages.iter().zip(argvs).zip(redirects);
        for (i, ((stage, argv), redirect)) in stages.enumerate() {
            let (read, write) = if i < last {
                let (r, w) = unistd::pipe2(OFlag::O_CLOEXEC).map_err(Error::sys("pipe"))?;
                (Some(r), Some(w))
            } else {
                (None, None)
            };
            // An explicit redirection replaces the pipe end, which is then
            // closed right here.
            let io = Redirect {
                input: redirect.input.or(next_input.take()),
                output: redirect.output.or(write),
            };

            let pid = self.fork_stage(pgid, &stage.words, &argv, io, builtin, background)?;
            let group = *pgid.get_or_insert(pid);
            let id = *job.get_or_insert_with(|| self.add_job(group, background));
            self.table.add_process(id, pid, &stage.words);
            next_input = read;
        }

        let Some(id) = job else {
            return Err(Error::MalformedPipeline);
        };
        if background {
            super::msg(format_args!(
                "[{}] running '{}'",
                id,
                self.table.job_command(id).unwrap_or_default()
            ));
            Ok(0)
        } else {
            self.monitor()
        }
    }

    fn fork_stage(
        &mut self,
        pgid: Option<Pid>,
        words: &[String],
        argv: &[CString],
        io: Redirect,
        builtin: Builtin,
        background: bool,
    ) -> Result<Pid> {
        match syscall(|| unsafe { unistd::fork() }).map_err(Error::sys("fork"))? {
            ForkResult::Parent { child } => {
                let group = pgid.unwrap_or(child);
                // Both sides set the group; whichever runs second may see
                // EACCES once the child has exec'd.
                if let Err(e) = unistd::setpgid(child, group) {
                    tracing::debug!(%child, %group, "setpgid from parent: {}", e);
                }
                drop(io);
                tracing::debug!(%child, %group, background, "stage started");
                Ok(child)
            }
            ForkResult::Child => self.exec_stage(pgid, words, argv, io, builtin, background),
        }
    }

    /// Child side of a stage. Never returns to the shell.
    fn exec_stage(
        &mut self,
        pgid: Option<Pid>,
        words: &[String],
        argv: &[CString],
        io: Redirect,
        builtin: Builtin,
        background: bool,
    ) -> ! {
        self.disown_jobs();
        let code = match self.enter_stage(pgid, io, background) {
            Ok(()) => match builtin(self, words) {
                Ok(Some(code)) => code,
                Ok(None) => exec(argv),
                Err(e) => {
                    eprintln!("jobsh: {}", e);
                    1
                }
            },
            Err(e) => {
                eprintln!("jobsh: {}", e);
                1
            }
        };
        let _ = std::io::stdout().flush();
        std::process::exit(code)
    }

    fn enter_stage(&self, pgid: Option<Pid>, io: Redirect, background: bool) -> Result<()> {
        // Terminal I/O signals stay ignored for foreground stages.
        let ignored = [Signal::SIGTSTP, Signal::SIGINT, Signal::SIGTTIN, Signal::SIGTTOU];
        let n = if background { 4 } else { 2 };
        for &sig in &ignored[..n] {
            unsafe { signal::signal(sig, SigHandler::SigDfl) }.map_err(Error::sys("signal"))?;
        }

        let group = pgid.unwrap_or(Pid::from_raw(0));
        unistd::setpgid(Pid::from_raw(0), group).map_err(Error::sys("setpgid"))?;
        if !background {
            self.terminal
                .grant_foreground(pgid.unwrap_or_else(unistd::getpid))?;
        }

        if let Some(fd) = io.input {
            syscall(|| unistd::dup2(fd.as_raw_fd(), libc::STDIN_FILENO))
                .map_err(Error::sys("dup2"))?;
        }
        if let Some(fd) = io.output {
            syscall(|| unistd::dup2(fd.as_raw_fd(), libc::STDOUT_FILENO))
                .map_err(Error::sys("dup2"))?;
        }
        Ok(())
    }
}

fn exec(argv: &[CString]) -> i32 {
    match unistd::execvp(&argv[0], argv) {
        Ok(never) => match never {},
        Err(e) => {
            eprintln!("jobsh: {}: {}", argv[0].to_string_lossy(), e);
            127
        }
    }
}
