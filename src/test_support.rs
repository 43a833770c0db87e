//! Test-only helpers for driving the line protocol over a real socket
//! pair, used by the unit tests in [`crate::protocol`]. Gated on
//! `cfg(test)`, so only visible to this crate's own unit test build, not
//! to the integration tests under `tests/`.

#![cfg(test)]

use crate::protocol::Control;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::io::IntoRawFd;
use std::os::unix::net::UnixStream;

/// One end of an in-memory socket pair standing in for a pipe, with
/// convenience methods for scripting a fake helper in tests.
pub struct TestEnd {
    stream: Option<UnixStream>,
}

impl TestEnd {
    /// Consume this end and wrap it as a [`Control`] for the code under test.
    pub fn take_control(&mut self) -> Control {
        let stream = self.stream.take().expect("already converted");
        let fd = stream.into_raw_fd();
        unsafe { Control::from_raw_fd(fd) }
    }

    /// Read one LF-terminated line (as a fake helper reading a command).
    pub fn read_line_for_test(&mut self) -> String {
        let stream = self.stream.as_ref().expect("not yet converted").try_clone().unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        line.trim_end_matches('\n').to_string()
    }

    /// Write raw bytes (as a fake helper answering a command).
    pub fn write_all_for_test(&mut self, bytes: &[u8]) {
        self.stream
            .as_ref()
            .expect("not yet converted")
            .try_clone()
            .unwrap()
            .write_all(bytes)
            .unwrap();
    }
}

/// Create a connected pair of [`TestEnd`]s standing in for a pipe.
pub fn socketpair() -> (TestEnd, TestEnd) {
    let (a, b) = UnixStream::pair().expect("socketpair");
    (
        TestEnd { stream: Some(a) },
        TestEnd { stream: Some(b) },
    )
}
