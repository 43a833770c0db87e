//! The host's I/O callback registry: a narrow capability passed in at
//! session construction rather than a process-wide global.

use crate::channel::Direction;
use std::os::unix::io::RawFd;

/// Opaque handle identifying a registration made through [`IoCallbacks::add`].
///
/// The adapter never inspects the value; it only stores it and hands it
/// back to [`IoCallbacks::remove`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Tag(pub u64);

/// Events the adapter emits to the host, or forwards from the host.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    /// Emitted exactly once per session, after every channel has closed.
    Done,
}

/// A single inbound or outbound readiness notification for one fd.
///
/// `Inbound` means: read from `fd` into the channel's bound consumer.
/// `Outbound` means: write from the channel's bound producer into `fd`.
pub trait IoHandler {
    /// Called by the host when `fd` is ready per its registered direction.
    fn on_ready(&mut self, fd: RawFd);
}

/// The capability a [`crate::session::Session`] uses to plug into the
/// host's event loop. Implemented by the host (select/poll/epoll
/// equivalent); the adapter core never implements its own loop.
pub trait IoCallbacks {
    /// Register `fd` for readiness notifications in the given direction.
    /// Returns `None` on failure.
    fn add(
        &mut self,
        fd: RawFd,
        dir: Direction,
        handler: Box<dyn IoHandler>,
    ) -> Option<Tag>;

    /// Unregister a previous [`IoCallbacks::add`]. Idempotent: removing an
    /// already-removed or unknown tag is not an error.
    fn remove(&mut self, tag: Tag);

    /// Deliver an event to the host. The only event the adapter itself
    /// emits is [`Event::Done`]; other kinds are reserved for the host.
    fn event(&mut self, kind: Event);
}
