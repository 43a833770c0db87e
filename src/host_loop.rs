//! A minimal `poll(2)`-based host event loop.
//!
//! The engine adapter itself never runs an event loop; the host is expected
//! to supply one through [`crate::IoCallbacks`]. This module is a reference
//! implementation good enough to drive the demo binary and the integration
//! tests; real embedders are expected to plug the adapter into whatever loop
//! they already run (tokio, glib, a raw epoll wrapper, ...).

use crate::channel::Direction;
use crate::io_cbs::{Event, IoCallbacks, IoHandler, Tag};
use nix::poll::{poll, PollFd, PollFlags};
use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;

struct Registration {
    fd: RawFd,
    dir: Direction,
    handler: Box<dyn IoHandler>,
    tag: Tag,
}

/// A single-threaded, single-session `poll(2)` loop.
///
/// Dispatch never holds a registration borrowed while its handler runs:
/// `take_registration` pulls the entry out of `registrations` first, so a
/// handler that closes its own channel (and thus calls back into
/// [`IoCallbacks::remove`] for the tag currently being dispatched) doesn't
/// reenter the same `Vec` it's being iterated from. `remove` called for a
/// tag mid-dispatch lands in `pending_removals` instead; `return_registration`
/// consults that list to decide whether the entry comes back.
#[derive(Default)]
pub struct PollLoop {
    registrations: Vec<Registration>,
    pending_removals: Vec<Tag>,
    next_tag: u64,
    done: bool,
}

impl PollLoop {
    /// An empty loop with nothing registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// True once [`Event::Done`] has been delivered.
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn poll_fd_list(&self) -> Vec<PollFd> {
        self.registrations
            .iter()
            .map(|r| {
                let flags = match r.dir {
                    Direction::Inbound => PollFlags::POLLIN,
                    Direction::Outbound => PollFlags::POLLOUT,
                };
                PollFd::new(r.fd, flags)
            })
            .collect()
    }

    fn take_registration(&mut self, fd: RawFd) -> Option<Registration> {
        let pos = self.registrations.iter().position(|r| r.fd == fd)?;
        Some(self.registrations.remove(pos))
    }

    fn return_registration(&mut self, reg: Registration) {
        if let Some(pos) = self.pending_removals.iter().position(|t| *t == reg.tag) {
            self.pending_removals.remove(pos);
        } else {
            self.registrations.push(reg);
        }
    }

    /// Poll all registered fds once, dispatching ready handlers. Returns
    /// `Ok(true)` once `Done` has been observed.
    pub fn tick(&mut self) -> crate::error::Result<bool> {
        if self.registrations.is_empty() {
            return Ok(self.done);
        }
        let mut fds = self.poll_fd_list();
        poll(&mut fds, -1)?;

        let ready_fds: Vec<RawFd> = fds
            .iter()
            .filter(|pfd| pfd.revents().map(|r| !r.is_empty()).unwrap_or(false))
            .map(|pfd| pfd.fd())
            .collect();

        for fd in ready_fds {
            if let Some(mut reg) = self.take_registration(fd) {
                reg.handler.on_ready(fd);
                self.return_registration(reg);
            }
        }
        Ok(self.done)
    }

    /// Run [`Self::tick`] until `Done` is observed or nothing is left
    /// registered.
    pub fn run_until_done(&mut self) -> crate::error::Result<()> {
        while !self.done && !self.registrations.is_empty() {
            self.tick()?;
        }
        Ok(())
    }
}

impl IoCallbacks for PollLoop {
    fn add(&mut self, fd: RawFd, dir: Direction, handler: Box<dyn IoHandler>) -> Option<Tag> {
        let tag = Tag(self.next_tag);
        self.next_tag += 1;
        self.registrations.push(Registration { fd, dir, handler, tag });
        Some(tag)
    }

    fn remove(&mut self, tag: Tag) {
        if let Some(pos) = self.registrations.iter().position(|r| r.tag == tag) {
            self.registrations.remove(pos);
        } else {
            // Mid-dispatch: the registration is out of `registrations`
            // (held by `tick`'s local `reg`). Note it so
            // `return_registration` drops it instead of reinserting.
            self.pending_removals.push(tag);
        }
    }

    fn event(&mut self, kind: Event) {
        match kind {
            Event::Done => self.done = true,
        }
    }
}

/// A handle to a [`PollLoop`] shared between the [`crate::Session`] that
/// consumes it as a boxed [`IoCallbacks`] and the caller that wants to keep
/// driving `tick`/`run_until_done` after handing that box over.
///
/// Cloning shares the same underlying loop (an `Rc<RefCell<_>>` handle), so
/// every clone sees the same registrations and the same `done` flag.
#[derive(Clone, Default)]
pub struct SharedPollLoop(Rc<RefCell<PollLoop>>);

impl SharedPollLoop {
    /// A fresh, empty shared loop.
    pub fn new() -> Self {
        Self::default()
    }

    /// See [`PollLoop::tick`].
    ///
    /// Unlike [`PollLoop::tick`], this borrows the underlying loop only for
    /// the bookkeeping steps around each handler call, never for the
    /// duration of the call itself. A handler that closes its own channel
    /// calls back into [`IoCallbacks::remove`] on this same shared loop, and
    /// holding one long `RefCell` borrow across that reentry would panic.
    pub fn tick(&self) -> crate::error::Result<bool> {
        let mut fds = self.0.borrow().poll_fd_list();
        if fds.is_empty() {
            return Ok(self.0.borrow().is_done());
        }
        poll(&mut fds, -1)?;

        let ready_fds: Vec<RawFd> = fds
            .iter()
            .filter(|pfd| pfd.revents().map(|r| !r.is_empty()).unwrap_or(false))
            .map(|pfd| pfd.fd())
            .collect();

        for fd in ready_fds {
            let reg = self.0.borrow_mut().take_registration(fd);
            if let Some(mut reg) = reg {
                reg.handler.on_ready(fd);
                self.0.borrow_mut().return_registration(reg);
            }
        }
        Ok(self.0.borrow().is_done())
    }

    /// Run [`Self::tick`] until `Done` is observed or nothing is left
    /// registered.
    pub fn run_until_done(&self) -> crate::error::Result<()> {
        while !self.0.borrow().is_done() && !self.0.borrow().registrations.is_empty() {
            self.tick()?;
        }
        Ok(())
    }

    /// See [`PollLoop::is_done`].
    pub fn is_done(&self) -> bool {
        self.0.borrow().is_done()
    }
}

impl IoCallbacks for SharedPollLoop {
    fn add(&mut self, fd: RawFd, dir: Direction, handler: Box<dyn IoHandler>) -> Option<Tag> {
        self.0.borrow_mut().add(fd, dir, handler)
    }

    fn remove(&mut self, tag: Tag) {
        self.0.borrow_mut().remove(tag)
    }

    fn event(&mut self, kind: Event) {
        self.0.borrow_mut().event(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_loop_is_not_done() {
        let loop_ = PollLoop::new();
        assert!(!loop_.is_done());
    }

    #[test]
    fn remove_unknown_tag_is_a_no_op() {
        let mut loop_ = PollLoop::new();
        loop_.remove(Tag(42));
        assert!(loop_.registrations.is_empty());
    }

    #[test]
    fn shared_loop_starts_not_done() {
        let shared = SharedPollLoop::new();
        assert!(!shared.is_done());
    }
}
