//! End-to-end job control against real child processes.
//!
//! The reaper collects any child of the test process, so every test that
//! forks holds `LOCK` for its whole body.

use std::{
    sync::{Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};

use jobsh::{
    shell::{
        builtin,
        jobs::{ExitCause, Filter, JobControl, JobId, Report, State, Terminal, FOREGROUND},
        parser::{parse_cmd, Pipeline, Stage},
    },
    Error,
};
use nix::{
    errno::Errno,
    sys::signal::{killpg, Signal},
    unistd::{getpgid, Pid},
};

static LOCK: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

fn no_builtins(_: &mut JobControl, _: &[String]) -> jobsh::Result<Option<i32>> {
    Ok(None)
}

fn jobs() -> JobControl {
    JobControl::init(Terminal::detached()).unwrap()
}

fn run(jobs: &mut JobControl, line: &str) -> jobsh::Result<i32> {
    let pipeline = parse_cmd(line).unwrap().unwrap();
    jobs.run(&pipeline, no_builtins)
}

fn run_with_builtins(jobs: &mut JobControl, line: &str) -> jobsh::Result<i32> {
    let pipeline = parse_cmd(line).unwrap().unwrap();
    jobs.run(&pipeline, builtin::run)
}

fn id(n: usize) -> JobId {
    JobId::from(n)
}

fn wait_for(jobs: &mut JobControl, job: JobId, want: impl Fn(State) -> bool) -> State {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let state = jobs.status(job).expect("job vanished");
        if want(state) {
            return state;
        }
        assert!(Instant::now() < deadline, "timed out waiting on job {}", job);
        thread::sleep(Duration::from_millis(10));
    }
}

fn pgid_of(jobs: &JobControl, job: JobId) -> Pid {
    jobs.table().get(job).unwrap().pgid
}

#[test]
fn rightmost_stage_sets_pipeline_status() {
    let _g = serial();
    let mut jobs = jobs();
    assert_eq!(run(&mut jobs, "false | true").unwrap(), 0);
    assert_eq!(run(&mut jobs, "true | false").unwrap(), 1);
    assert!(jobs.table().get(FOREGROUND).is_none());
    assert_eq!(jobs.terminal().foreground(), Some(jobs.shell_pgid()));
    jobs.shutdown().unwrap();
}

#[test]
fn background_job_stops_resumes_and_finishes() {
    let _g = serial();
    let mut jobs = jobs();
    assert_eq!(run(&mut jobs, "sleep 1 &").unwrap(), 0);
    assert!(jobs.table().get(FOREGROUND).is_none());

    let reports = jobs.watch(Filter::All);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].to_string(), "[1] running 'sleep 1'");

    killpg(pgid_of(&jobs, id(1)), Signal::SIGSTOP).unwrap();
    assert_eq!(wait_for(&mut jobs, id(1), |s| s == State::Stopped), State::Stopped);
    assert_eq!(jobs.watch(Filter::Stopped)[0].to_string(), "[1] suspended 'sleep 1'");

    assert_eq!(jobs.resume(Some(id(1)), false).unwrap(), Some(0));
    wait_for(&mut jobs, id(1), State::is_finished);
    let reports = jobs.watch(Filter::Finished);
    assert_eq!(
        reports,
        vec![Report {
            id: id(1),
            command: "sleep 1".to_string(),
            state: State::Finished(ExitCause::Exited(0)),
        }]
    );
    assert_eq!(reports[0].to_string(), "[1] exited 'sleep 1', status=0");
    // read once, gone
    assert!(jobs.table().get(id(1)).is_none());
    assert_eq!(jobs.job_state(id(1)), None);
    jobs.shutdown().unwrap();
}

#[test]
fn killing_a_stopped_job_finishes_it() {
    let _g = serial();
    let mut jobs = jobs();
    run(&mut jobs, "sleep 100 &").unwrap();
    killpg(pgid_of(&jobs, id(1)), Signal::SIGSTOP).unwrap();
    wait_for(&mut jobs, id(1), |s| s == State::Stopped);

    assert!(jobs.kill(id(1)).unwrap());
    let state = wait_for(&mut jobs, id(1), State::is_finished);
    assert_eq!(state, State::Finished(ExitCause::Signaled(Signal::SIGTERM)));
    let reports = jobs.watch(Filter::All);
    assert_eq!(reports[0].to_string(), "[1] killed 'sleep 100' by signal 15");
    assert!(!jobs.kill(id(1)).unwrap());
    jobs.shutdown().unwrap();
}

#[test]
fn missing_jobs_are_not_found() {
    let _g = serial();
    let mut jobs = jobs();
    assert!(!jobs.kill(id(3)).unwrap());
    assert_eq!(jobs.resume(Some(id(3)), false).unwrap(), None);
    assert_eq!(jobs.resume(None, true).unwrap(), None);
    jobs.shutdown().unwrap();
}

#[test]
fn pipeline_stages_share_one_group() {
    let _g = serial();
    let mut jobs = jobs();
    run(&mut jobs, "sleep 100 | sleep 100 | sleep 100 &").unwrap();
    let job = jobs.table().get(id(1)).unwrap().clone();
    assert_eq!(job.procs.len(), 3);
    assert_eq!(job.pgid, job.procs[0].pid);
    for p in &job.procs {
        assert_eq!(getpgid(Some(p.pid)).unwrap(), job.pgid);
    }
    assert_eq!(job.command, "sleep 100 | sleep 100 | sleep 100");
    jobs.shutdown().unwrap();
}

#[test]
fn resume_defaults_to_newest_job() {
    let _g = serial();
    let mut jobs = jobs();
    run(&mut jobs, "sleep 100 &").unwrap();
    run(&mut jobs, "sleep 100 &").unwrap();
    for n in [1, 2] {
        killpg(pgid_of(&jobs, id(n)), Signal::SIGSTOP).unwrap();
        wait_for(&mut jobs, id(n), |s| s == State::Stopped);
    }
    assert_eq!(jobs.resume(None, false).unwrap(), Some(0));
    assert_eq!(jobs.status(id(2)), Some(State::Running));
    assert_eq!(jobs.status(id(1)), Some(State::Stopped));
    jobs.shutdown().unwrap();
}

#[test]
fn stopped_foreground_job_moves_to_background() {
    let _g = serial();
    let mut jobs = jobs();
    let pipeline = Pipeline {
        stages: vec![Stage {
            words: vec!["sh".into(), "-c".into(), "kill -STOP $$; exit 3".into()],
            ..Stage::default()
        }],
        background: false,
    };
    assert_eq!(jobs.run(&pipeline, no_builtins).unwrap(), 0);
    assert!(jobs.table().get(FOREGROUND).is_none());
    assert_eq!(jobs.status(id(1)), Some(State::Stopped));
    assert_eq!(jobs.terminal().foreground(), Some(jobs.shell_pgid()));

    assert_eq!(jobs.resume(Some(id(1)), true).unwrap(), Some(3));
    assert!(jobs.table().get(FOREGROUND).is_none());
    assert!(jobs.table().get(id(1)).is_none());
    assert_eq!(jobs.terminal().foreground(), Some(jobs.shell_pgid()));
    jobs.shutdown().unwrap();
}

#[test]
fn malformed_pipeline_spawns_nothing() {
    let _g = serial();
    let mut jobs = jobs();
    assert!(matches!(run(&mut jobs, "true | | true"), Err(Error::MalformedPipeline)));
    assert!(matches!(run(&mut jobs, "> out"), Err(Error::MalformedPipeline)));
    assert!(jobs.table().is_empty());
    jobs.shutdown().unwrap();
}

#[test]
fn redirections_reach_the_stages() {
    let _g = serial();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    std::fs::write(&input, "b\na\nc\n").unwrap();

    let mut jobs = jobs();
    let line = format!("sort < {} | head -n 2 > {}", input.display(), output.display());
    assert_eq!(run(&mut jobs, &line).unwrap(), 0);
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "a\nb\n");

    let missing = dir.path().join("missing");
    let err = run(&mut jobs, &format!("cat < {}", missing.display())).unwrap_err();
    assert!(matches!(err, Error::Redirect { .. }));
    assert!(jobs.table().is_empty());
    jobs.shutdown().unwrap();
}

#[cfg(target_os = "linux")]
#[test]
fn pipelines_do_not_leak_descriptors() {
    fn open_fds() -> usize {
        std::fs::read_dir("/proc/self/fd").unwrap().count()
    }

    let _g = serial();
    let mut jobs = jobs();
    let before = open_fds();
    run(&mut jobs, "echo hi | cat | cat | wc -c").unwrap();
    run(&mut jobs, "sleep 100 | cat &").unwrap();
    assert_eq!(open_fds(), before);
    jobs.shutdown().unwrap();
}

#[test]
fn shutdown_terminates_every_job() {
    let _g = serial();
    let mut jobs = jobs();
    run(&mut jobs, "sleep 100 &").unwrap();
    run(&mut jobs, "sleep 100 &").unwrap();
    let groups = [pgid_of(&jobs, id(1)), pgid_of(&jobs, id(2))];
    jobs.shutdown().unwrap();
    for pgid in groups {
        assert_eq!(killpg(pgid, None), Err(Errno::ESRCH));
    }
}

#[test]
fn stage_builtins_leave_shell_jobs_alone() {
    let _g = serial();
    let mut jobs = jobs();
    run(&mut jobs, "sleep 100 &").unwrap();
    killpg(pgid_of(&jobs, id(1)), Signal::SIGSTOP).unwrap();
    wait_for(&mut jobs, id(1), |s| s == State::Stopped);

    assert_eq!(run_with_builtins(&mut jobs, "true | fg").unwrap(), 1);
    assert_eq!(run_with_builtins(&mut jobs, "fg | true").unwrap(), 0);
    assert_eq!(run_with_builtins(&mut jobs, "true | bg 1").unwrap(), 1);
    assert_eq!(run_with_builtins(&mut jobs, "true | kill %1").unwrap(), 1);
    assert_eq!(run_with_builtins(&mut jobs, "fg &").unwrap(), 0);
    let state = wait_for(&mut jobs, id(2), State::is_finished);
    assert_eq!(state, State::Finished(ExitCause::Exited(1)));

    assert_eq!(jobs.status(id(1)), Some(State::Stopped));
    assert!(jobs.table().get(FOREGROUND).is_none());
    jobs.shutdown().unwrap();
}

#[test]
fn jobs_listing_follows_redirection() {
    let _g = serial();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("jobs");
    let mut jobs = jobs();
    run(&mut jobs, "sleep 100 &").unwrap();

    let line = format!("jobs > {}", out.display());
    assert_eq!(run_with_builtins(&mut jobs, &line).unwrap(), 0);
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "[1] running 'sleep 100'\n");
    // the listing in the child reclaimed nothing here
    assert_eq!(jobs.status(id(1)), Some(State::Running));
    jobs.shutdown().unwrap();
}

#[cfg(target_os = "linux")]
mod pty {
    use std::{
        os::fd::{AsRawFd, OwnedFd},
        panic::{self, AssertUnwindSafe},
        process,
    };

    use nix::{
        libc,
        pty::openpty,
        sys::{
            signal::{signal, SigHandler, Signal},
            termios::{self, LocalFlags, SetArg},
            wait::{waitpid, WaitStatus},
        },
        unistd::{dup2, fork, setsid, ForkResult},
    };

    use super::*;

    /// Runs `f` in a child that leads a new session. The session's
    /// controlling terminal is a fresh pseudo-terminal, also on stdin.
    fn in_session(f: impl FnOnce(&OwnedFd)) {
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    setsid().unwrap();
                    let pty = openpty(None, None).unwrap();
                    let rc = unsafe { libc::ioctl(pty.slave.as_raw_fd(), libc::TIOCSCTTY, 0) };
                    assert_eq!(rc, 0, "TIOCSCTTY failed");
                    dup2(pty.slave.as_raw_fd(), libc::STDIN_FILENO).unwrap();
                    for sig in [Signal::SIGINT, Signal::SIGTSTP, Signal::SIGTTIN, Signal::SIGTTOU] {
                        unsafe { signal(sig, SigHandler::SigIgn) }.unwrap();
                    }
                    f(&pty.slave);
                    // Dropping the master hangs up our controlling tty.
                    unsafe { signal(Signal::SIGHUP, SigHandler::SigIgn) }.unwrap();
                }));
                process::exit(if outcome.is_ok() { 0 } else { 1 });
            }
            ForkResult::Parent { child } => {
                assert_eq!(waitpid(child, None).unwrap(), WaitStatus::Exited(child, 0));
            }
        }
    }

    #[test]
    fn job_and_shell_terminal_modes_stay_apart() {
        let _g = serial();
        in_session(|tty| {
            let echo = || {
                termios::tcgetattr(tty)
                    .unwrap()
                    .local_flags
                    .contains(LocalFlags::ECHO)
            };
            let terminal = Terminal::from_fd(tty.try_clone().unwrap()).unwrap();
            let mut jobs = JobControl::init(terminal).unwrap();
            assert!(echo());

            // Turns echo off, stops, and once continued checks that its
            // own modes are back.
            let script = r#"stty -echo; saved=$(stty -g); kill -STOP $$; test "$(stty -g)" = "$saved""#;
            let pipeline = Pipeline {
                stages: vec![Stage {
                    words: vec!["sh".into(), "-c".into(), script.into()],
                    ..Stage::default()
                }],
                background: false,
            };
            assert_eq!(jobs.run(&pipeline, no_builtins).unwrap(), 0);
            assert_eq!(jobs.status(id(1)), Some(State::Stopped));
            assert_eq!(jobs.terminal().foreground(), Some(jobs.shell_pgid()));
            assert!(echo(), "shell modes not back after the job stopped");

            assert_eq!(jobs.resume(Some(id(1)), true).unwrap(), Some(0));
            assert_eq!(jobs.terminal().foreground(), Some(jobs.shell_pgid()));
            assert!(echo(), "shell modes not back after the job finished");

            let mut attrs = termios::tcgetattr(tty).unwrap();
            attrs.local_flags.remove(LocalFlags::ECHO);
            termios::tcsetattr(tty, SetArg::TCSANOW, &attrs).unwrap();
            assert!(!echo());
            jobs.shutdown().unwrap();
            assert!(echo(), "shell modes not back after shutdown");
        });
    }
}
