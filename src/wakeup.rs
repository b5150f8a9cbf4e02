//! Self-pipe wakeup channel.
//!
//! Converts "work pending" or "stop requested" on any thread into a wakeup
//! for the poll thread. The read end is multiplexed with the protocol
//! socket in the same `poll(2)` call; the write side is non-blocking, and a
//! full pipe means a wake is already pending, so EAGAIN counts as success.

use std::io;
use std::os::unix::io::RawFd;

pub(crate) struct WakeupChannel {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl WakeupChannel {
    pub fn new() -> io::Result<Self> {
        let mut fds = [0i32; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        for fd in fds {
            set_nonblocking_cloexec(fd)?;
        }
        Ok(Self {
            read_fd: fds[0],
            write_fd: fds[1],
        })
    }

    /// Wake the poll thread. Callable from any thread.
    pub fn wake(&self) -> io::Result<()> {
        let byte = 1u8;
        let ret = unsafe { libc::write(self.write_fd, &byte as *const u8 as *const libc::c_void, 1) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // Pipe full: a wake is already pending, nothing to add.
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    /// Discard all pending wake bytes. Poll-thread side.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            let ret = unsafe {
                libc::read(self.read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
            };
            if ret <= 0 {
                return;
            }
        }
    }

    /// The fd the poll thread multiplexes on.
    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }
}

fn set_nonblocking_cloexec(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd_flags = libc::fcntl(fd, libc::F_GETFD);
        if fd_flags < 0 || libc::fcntl(fd, libc::F_SETFD, fd_flags | libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

impl Drop for WakeupChannel {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}
