//! Channel records: the four logical streams a session wires to the helper.

use crate::data::DataHandle;
use crate::io_cbs::Tag;
use std::os::unix::io::RawFd;

/// Which of the four logical streams a channel record represents.
///
/// Kept as a fixed-size enum (rather than four loose struct fields, as the
/// original engine does) so the session can hold `[ChannelRecord; 4]` and
/// index uniformly in the close-notify cascade.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::EnumIter)]
pub enum ChannelKind {
    /// The control channel: command/response and status tokens.
    Status,
    /// Caller writes, helper reads (ciphertext, signature, key material, ...).
    Input,
    /// Helper writes, caller reads (plaintext, ciphertext, exported key, ...).
    Output,
    /// Caller writes, helper reads; used for detached-signature text.
    Message,
}

impl ChannelKind {
    /// Index into a `[T; 4]` array keyed by channel kind.
    pub fn index(self) -> usize {
        match self {
            ChannelKind::Status => 0,
            ChannelKind::Input => 1,
            ChannelKind::Output => 2,
            ChannelKind::Message => 3,
        }
    }

    /// All four kinds, in index order.
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Status,
        ChannelKind::Input,
        ChannelKind::Output,
        ChannelKind::Message,
    ];
}

/// The direction data flows on a channel, from the helper's perspective
/// (matching the wire protocol's naming: `INPUT`/`OUTPUT`/`MESSAGE` are
/// named as the *server* sees them).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Helper writes, caller reads.
    Inbound,
    /// Caller writes, helper reads.
    Outbound,
}

/// One caller-side descriptor plus the bookkeeping the close-notify
/// cascade and I/O broker need.
#[derive(Debug, Default)]
pub struct ChannelRecord {
    /// Caller-side descriptor; `None` when closed or never opened.
    pub fd: Option<RawFd>,
    /// Direction of flow, set once when the channel is created.
    pub dir: Option<Direction>,
    /// Producer/consumer bound to this channel for the current operation.
    pub data: Option<DataHandle>,
    /// Registration handle returned by `IoCallbacks::add`.
    pub tag: Option<Tag>,
    /// Bytes already pulled from the producer but not yet written to `fd`,
    /// left over from a non-blocking write that blocked or wrote short.
    pub pending_write: Vec<u8>,
}

impl ChannelRecord {
    /// A channel with no fd, no binding, and no registration.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True once the channel has been fully torn down.
    pub fn is_closed(&self) -> bool {
        self.fd.is_none()
    }
}
