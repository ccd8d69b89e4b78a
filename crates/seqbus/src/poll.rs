//! Readiness descriptors and a small poll(2) reactor.

use std::os::unix::io::RawFd;

use crate::error::{DriverError, DriverResult};

/// A file descriptor plus the poll events it should be watched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollDescriptor {
    pub fd: RawFd,
    pub events: i16,
}

impl PollDescriptor {
    pub fn new(fd: RawFd, events: i16) -> Self {
        Self { fd, events }
    }

    pub fn wants_input(&self) -> bool {
        self.events & libc::POLLIN != 0
    }

    pub fn wants_output(&self) -> bool {
        self.events & libc::POLLOUT != 0
    }
}

/// Which readiness sets a caller is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Input,
    Output,
    Both,
}

impl Interest {
    /// Neither flag or both flags select both sets.
    pub fn from_flags(input: bool, output: bool) -> Self {
        match (input, output) {
            (true, false) => Interest::Input,
            (false, true) => Interest::Output,
            _ => Interest::Both,
        }
    }

    pub fn events(self) -> i16 {
        match self {
            Interest::Input => libc::POLLIN,
            Interest::Output => libc::POLLOUT,
            Interest::Both => libc::POLLIN | libc::POLLOUT,
        }
    }

    pub fn input(self) -> bool {
        self != Interest::Output
    }

    pub fn output(self) -> bool {
        self != Interest::Input
    }
}

/// Anything that can watch descriptors on our behalf.
pub trait Reactor {
    fn register(&mut self, fd: RawFd, events: i16);
}

/// A flat list of `pollfd`s polled together.
#[derive(Default)]
pub struct PollSet {
    fds: Vec<libc::pollfd>,
}

impl PollSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    pub fn descriptors(&self) -> Vec<PollDescriptor> {
        self.fds
            .iter()
            .map(|p| PollDescriptor::new(p.fd, p.events))
            .collect()
    }

    /// Poll every registered descriptor. Returns how many are ready.
    pub fn poll(&mut self, timeout_ms: i32) -> DriverResult<usize> {
        for p in &mut self.fds {
            p.revents = 0;
        }
        poll_fds(&mut self.fds, timeout_ms)
    }

    /// Descriptors that reported readiness in the last `poll`, with their
    /// returned events.
    pub fn ready(&self) -> impl Iterator<Item = PollDescriptor> + '_ {
        self.fds
            .iter()
            .filter(|p| p.revents != 0)
            .map(|p| PollDescriptor::new(p.fd, p.revents))
    }
}

impl Reactor for PollSet {
    fn register(&mut self, fd: RawFd, events: i16) {
        if let Some(existing) = self.fds.iter_mut().find(|p| p.fd == fd) {
            existing.events |= events;
            return;
        }
        self.fds.push(libc::pollfd {
            fd,
            events,
            revents: 0,
        });
    }
}

/// Poll `descriptors` once. Returns how many became ready, 0 on timeout.
pub fn wait(descriptors: &[PollDescriptor], timeout_ms: i32) -> DriverResult<usize> {
    let mut fds: Vec<libc::pollfd> = descriptors
        .iter()
        .map(|d| libc::pollfd {
            fd: d.fd,
            events: d.events,
            revents: 0,
        })
        .collect();
    poll_fds(&mut fds, timeout_ms)
}

fn poll_fds(fds: &mut [libc::pollfd], timeout_ms: i32) -> DriverResult<usize> {
    loop {
        // SAFETY: the pointer and length come from a live mutable slice.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc >= 0 {
            return Ok(rc as usize);
        }
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO);
        if errno != libc::EINTR {
            return Err(DriverError::from_errno(-errno));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (fds[0], fds[1])
    }

    fn close(fd: RawFd) {
        unsafe {
            libc::close(fd);
        }
    }

    #[test]
    fn test_interest_from_flags() {
        assert_eq!(Interest::from_flags(false, false), Interest::Both);
        assert_eq!(Interest::from_flags(true, true), Interest::Both);
        assert_eq!(Interest::from_flags(true, false), Interest::Input);
        assert_eq!(Interest::from_flags(false, true).events(), libc::POLLOUT);
        assert!(Interest::Both.input() && Interest::Both.output());
    }

    #[test]
    fn test_wait_times_out_on_empty_pipe() {
        let (r, w) = pipe();
        let ready = wait(&[PollDescriptor::new(r, libc::POLLIN)], 0).unwrap();
        assert_eq!(ready, 0);
        close(r);
        close(w);
    }

    #[test]
    fn test_poll_set_reports_ready_descriptor() {
        let (r, w) = pipe();
        let mut set = PollSet::new();
        set.register(r, libc::POLLIN);
        set.register(r, libc::POLLIN);
        assert_eq!(set.len(), 1);

        assert_eq!(set.poll(0).unwrap(), 0);
        assert_eq!(unsafe { libc::write(w, b"x".as_ptr() as *const libc::c_void, 1) }, 1);
        assert_eq!(set.poll(100).unwrap(), 1);

        let ready: Vec<_> = set.ready().collect();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].fd, r);
        assert!(ready[0].wants_input());
        close(r);
        close(w);
    }
}
