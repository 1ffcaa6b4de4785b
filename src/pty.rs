//! PTY allocation and child process spawning.
//!
//! The IO loop only needs a non-blocking byte-duplex fd with a resize
//! control (the [`crate::io_loop::PtyDevice`] trait); this module provides
//! the real thing: openpt/grantpt/unlockpt plus a forked login shell.

use std::ffi::CString;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use rustix::fs::{fcntl_setfl, OFlags};
use rustix::io::Errno;
use rustix::pty::{grantpt, openpt, ptsname, unlockpt, OpenptFlags};
use thiserror::Error;

use crate::io_loop::PtyDevice;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("failed to open pty master: {0}")]
    OpenMaster(#[source] rustix::io::Errno),
    #[error("failed to grant pty: {0}")]
    Grant(#[source] rustix::io::Errno),
    #[error("failed to unlock pty: {0}")]
    Unlock(#[source] rustix::io::Errno),
    #[error("failed to get pts name: {0}")]
    PtsName(#[source] rustix::io::Errno),
    #[error("failed to fork: {0}")]
    Fork(#[source] std::io::Error),
    #[error("i/o error: {0}")]
    Io(#[source] std::io::Error),
}

/// Window dimensions pushed to the kernel on resize.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PtySize {
    pub cols: u16,
    pub rows: u16,
    pub pixel_width: u16,
    pub pixel_height: u16,
}

/// The master side of a pty pair with a spawned child shell.
pub struct Pty {
    master: OwnedFd,
    child_pid: rustix::process::Pid,
}

impl Pty {
    /// Open a pty, spawn `shell` (or `$SHELL`, or `/bin/sh`) as a login
    /// shell on the slave side, and set the initial window size.
    pub fn spawn(shell: Option<&str>, size: PtySize) -> Result<Self, PtyError> {
        let master = openpt(OpenptFlags::RDWR | OpenptFlags::NOCTTY | OpenptFlags::CLOEXEC)
            .map_err(PtyError::OpenMaster)?;

        fcntl_setfl(&master, OFlags::NONBLOCK).map_err(|e| PtyError::Io(e.into()))?;

        grantpt(&master).map_err(PtyError::Grant)?;
        unlockpt(&master).map_err(PtyError::Unlock)?;

        let slave_name = ptsname(&master, Vec::new()).map_err(PtyError::PtsName)?;

        // SAFETY: the child only calls async-signal-safe functions before
        // exec.
        let fork_result = unsafe { libc::fork() };

        match fork_result {
            -1 => Err(PtyError::Fork(std::io::Error::last_os_error())),
            0 => Self::setup_child(&slave_name, shell),
            pid => {
                let child_pid = unsafe { rustix::process::Pid::from_raw_unchecked(pid) };
                let pty = Self { master, child_pid };
                let _ = pty.set_size(size);
                Ok(pty)
            }
        }
    }

    /// Child-side setup after fork: new session, controlling terminal,
    /// stdio on the slave, exec the shell.
    fn setup_child(slave_name: &CString, shell: Option<&str>) -> ! {
        unsafe { libc::setsid() };

        let slave_fd = unsafe { libc::open(slave_name.as_ptr(), libc::O_RDWR) };
        if slave_fd < 0 {
            unsafe { libc::_exit(1) };
        }

        unsafe {
            libc::ioctl(slave_fd, libc::TIOCSCTTY, 0);
            libc::dup2(slave_fd, 0);
            libc::dup2(slave_fd, 1);
            libc::dup2(slave_fd, 2);
        }
        if slave_fd > 2 {
            unsafe { libc::close(slave_fd) };
        }

        let shell_path = shell
            .map(String::from)
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/sh".to_string());

        let shell_cstr = match CString::new(shell_path.clone()) {
            Ok(c) => c,
            Err(_) => unsafe { libc::_exit(1) },
        };
        let shell_name = std::path::Path::new(&shell_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("sh");

        // Login shell convention: argv[0] prefixed with '-'.
        let login_arg = match CString::new(format!("-{}", shell_name)) {
            Ok(c) => c,
            Err(_) => unsafe { libc::_exit(1) },
        };
        let args = [login_arg.as_ptr(), std::ptr::null()];

        unsafe {
            libc::execvp(shell_cstr.as_ptr(), args.as_ptr());
            libc::_exit(1)
        }
    }

    pub fn master_fd(&self) -> BorrowedFd<'_> {
        self.master.as_fd()
    }

    pub fn child_pid(&self) -> rustix::process::Pid {
        self.child_pid
    }

    /// TIOCSWINSZ with cell and pixel dimensions.
    pub fn set_size(&self, size: PtySize) -> Result<(), PtyError> {
        let winsize = libc::winsize {
            ws_row: size.rows,
            ws_col: size.cols,
            ws_xpixel: size.pixel_width,
            ws_ypixel: size.pixel_height,
        };
        let result = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &winsize) };
        if result == -1 {
            Err(PtyError::Io(std::io::Error::last_os_error()))
        } else {
            Ok(())
        }
    }
}

impl PtyDevice for Pty {
    fn poll_fd(&self) -> BorrowedFd<'_> {
        self.master.as_fd()
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<Option<usize>> {
        match rustix::io::read(&self.master, buf) {
            Ok(n) => Ok(Some(n)),
            Err(Errno::AGAIN) => Ok(None),
            // A closed slave side reports EIO on Linux; treat it as EOF.
            Err(Errno::IO) => Ok(Some(0)),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> std::io::Result<Option<usize>> {
        match rustix::io::write(&self.master, buf) {
            Ok(n) => Ok(Some(n)),
            Err(Errno::AGAIN) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn resize(
        &mut self,
        cols: u16,
        rows: u16,
        pixel_width: u16,
        pixel_height: u16,
    ) -> std::io::Result<()> {
        self.set_size(PtySize {
            cols,
            rows,
            pixel_width,
            pixel_height,
        })
        .map_err(|e| std::io::Error::other(e.to_string()))
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        // The child follows the terminal down.
        unsafe {
            libc::kill(self.child_pid.as_raw_nonzero().get(), libc::SIGHUP);
        }
    }
}
