//! The data-source abstraction consumed by the engine adapter.
//!
//! Producers/consumers of plaintext/ciphertext bytes are an external
//! collaborator owned by the surrounding library; this module defines only
//! the narrow interface the session core binds channels to.

use std::io::{Read, Write};

/// How the bytes on an INPUT channel are encoded, mirrors `map_input_enc`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Encoding {
    /// No encoding hint; the helper guesses.
    None,
    /// Raw binary, `--binary`.
    Binary,
    /// Base64, `--base64`.
    Base64,
    /// ASCII-armored, `--armor`.
    Armor,
}

impl Encoding {
    /// The command-line flag this encoding maps to on an `INPUT` line, or
    /// `None` when no flag is appended.
    pub fn input_flag(self) -> Option<&'static str> {
        match self {
            Encoding::None => None,
            Encoding::Binary => Some("--binary"),
            Encoding::Base64 => Some("--base64"),
            Encoding::Armor => Some("--armor"),
        }
    }
}

/// Whether a data object is being read from (produces bytes for the
/// helper) or written to (receives bytes from the helper).
///
/// Verify uses this to decide whether the "text" parameter is the inline
/// signature (`Read`, goes on OUTPUT) or the to-be-verified document for
/// a detached signature (`Write`, goes on MESSAGE).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    /// The data object is a source of bytes.
    Read,
    /// The data object is a sink for bytes.
    Write,
}

/// A producer of outbound bytes (caller → helper), e.g. ciphertext or key
/// material sitting in memory or on disk.
pub trait Producer: Read + Send {
    /// The encoding hint to report on the `INPUT`/`MESSAGE` line.
    fn encoding(&self) -> Encoding {
        Encoding::None
    }
}

/// A consumer of inbound bytes (helper → caller), e.g. a plaintext sink.
pub trait Consumer: Write + Send {}

impl<T: Read + Send> Producer for T {}
impl<T: Write + Send> Consumer for T {}

/// The object a channel is bound to for the duration of one operation.
///
/// Exactly one of `producer`/`consumer` is populated, depending on the
/// channel's [`crate::channel::Direction`].
pub enum DataHandle {
    /// Bytes flow from this object into the helper.
    Producer(Box<dyn Producer>, Encoding, Mode),
    /// Bytes flow from the helper into this object.
    Consumer(Box<dyn Consumer>),
}

impl DataHandle {
    /// Wrap a producer with an explicit encoding and mode.
    pub fn producer<P: Producer + 'static>(p: P, encoding: Encoding, mode: Mode) -> Self {
        DataHandle::Producer(Box::new(p), encoding, mode)
    }

    /// Wrap a consumer (always `Mode::Write` by construction).
    pub fn consumer<C: Consumer + 'static>(c: C) -> Self {
        DataHandle::Consumer(Box::new(c))
    }

    /// The encoding hint, if this handle is a producer.
    pub fn encoding(&self) -> Encoding {
        match self {
            DataHandle::Producer(_, enc, _) => *enc,
            DataHandle::Consumer(_) => Encoding::None,
        }
    }

    /// The read/write mode of the underlying data object, used by verify
    /// to pick OUTPUT vs. MESSAGE for the text parameter.
    pub fn mode(&self) -> Mode {
        match self {
            DataHandle::Producer(_, _, mode) => *mode,
            DataHandle::Consumer(_) => Mode::Write,
        }
    }
}

impl std::fmt::Debug for DataHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataHandle::Producer(_, enc, mode) => f
                .debug_struct("DataHandle::Producer")
                .field("encoding", enc)
                .field("mode", mode)
                .finish(),
            DataHandle::Consumer(_) => f.debug_struct("DataHandle::Consumer").finish(),
        }
    }
}
