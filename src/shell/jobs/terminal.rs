//! Controlling-terminal ownership.
//!
//! The terminal always has exactly one foreground process group; this
//! module is the only place that changes it.

use std::{
    cell::Cell,
    fmt,
    io::IsTerminal,
    os::fd::{AsFd, OwnedFd},
};

use nix::{
    sys::termios::{self, SetArg, Termios},
    unistd::{self, Pid},
};

use crate::error::{Error, Result};

/// Saved line-discipline attributes. Empty for a detached terminal.
#[derive(Clone, Default)]
pub struct Mode(Option<Termios>);

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("Mode(saved)"),
            None => f.write_str("Mode(none)"),
        }
    }
}

pub struct Terminal {
    tty: Option<OwnedFd>,
    shell_mode: Mode,
    foreground: Cell<Option<Pid>>,
}

impl Terminal {
    /// Takes control of the terminal on stdin for the calling process group.
    pub fn attach() -> Result<Self> {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            return Err(Error::NotInteractive);
        }
        // The duplicate is close-on-exec so jobs never inherit it.
        Self::from_fd(stdin.as_fd().try_clone_to_owned()?)
    }

    /// Takes control of `tty`, which must be the caller's controlling
    /// terminal.
    pub fn from_fd(tty: OwnedFd) -> Result<Self> {
        let pgrp = unistd::getpgrp();
        unistd::tcsetpgrp(tty.as_fd(), pgrp).map_err(Error::sys("tcsetpgrp"))?;
        let attrs = termios::tcgetattr(tty.as_fd()).map_err(Error::sys("tcgetattr"))?;
        tracing::debug!(%pgrp, "terminal attached");
        Ok(Terminal {
            tty: Some(tty),
            shell_mode: Mode(Some(attrs)),
            foreground: Cell::new(Some(pgrp)),
        })
    }

    /// A terminal that only records grants. Used when there is no tty.
    pub fn detached() -> Self {
        Terminal {
            tty: None,
            shell_mode: Mode::default(),
            foreground: Cell::new(Some(unistd::getpgrp())),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.tty.is_some()
    }

    pub fn grant_foreground(&self, pgid: Pid) -> Result<()> {
        if let Some(tty) = &self.tty {
            unistd::tcsetpgrp(tty.as_fd(), pgid).map_err(Error::sys("tcsetpgrp"))?;
        }
        tracing::debug!(%pgid, "terminal granted");
        self.foreground.set(Some(pgid));
        Ok(())
    }

    /// The group currently owning the terminal.
    pub fn foreground(&self) -> Option<Pid> {
        match &self.tty {
            Some(tty) => unistd::tcgetpgrp(tty.as_fd()).ok(),
            None => self.foreground.get(),
        }
    }

    pub fn save_mode(&self) -> Result<Mode> {
        match &self.tty {
            Some(tty) => {
                let attrs = termios::tcgetattr(tty.as_fd()).map_err(Error::sys("tcgetattr"))?;
                Ok(Mode(Some(attrs)))
            }
            None => Ok(Mode::default()),
        }
    }

    pub fn restore_mode(&self, mode: &Mode) -> Result<()> {
        if let (Some(tty), Some(attrs)) = (&self.tty, &mode.0) {
            termios::tcsetattr(tty.as_fd(), SetArg::TCSADRAIN, attrs)
                .map_err(Error::sys("tcsetattr"))?;
        }
        Ok(())
    }

    pub fn shell_mode(&self) -> &Mode {
        &self.shell_mode
    }

    /// Reapplies the shell's modes and closes the descriptor.
    pub fn release(self) -> Result<()> {
        self.restore_mode(&self.shell_mode)?;
        drop(self.tty);
        Ok(())
    }
}

impl fmt::Debug for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Terminal")
            .field("attached", &self.is_attached())
            .field("foreground", &self.foreground.get())
            .finish()
    }
}
