//! End-to-end scenarios driving a `Session` against an in-process fake
//! helper over real pipes, exercising the wire protocol without a real
//! `gpgsm` binary.

use gpgsm_engine::{decrypt, DataHandle, Direction, Event, IoCallbacks, IoHandler, Session, StatusCode, Tag};
use nix::unistd::{close, pipe, write as nix_write};
use std::cell::RefCell;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::io::{IntoRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

struct Registration {
    fd: RawFd,
    handler: Box<dyn IoHandler>,
    tag: Tag,
}

/// A trivial single-threaded loop good enough to drain a handful of fds in
/// a test without pulling in the library's own `PollLoop`: it round-robins
/// every registered fd instead of actually calling `poll(2)`.
///
/// Dispatch pulls a registration out of `regs` before calling its handler
/// and only puts it back afterward (mirroring `PollLoop`'s
/// take/return-registration split). A handler that closes its own channel
/// calls back into `remove` for the tag currently being dispatched, and
/// that must not alias the `Vec` the dispatch loop is iterating.
#[derive(Default)]
struct TestLoop {
    regs: Vec<Registration>,
    pending_removals: Vec<Tag>,
    next_tag: u64,
    done: bool,
}

impl IoCallbacks for TestLoop {
    fn add(&mut self, fd: RawFd, _dir: Direction, handler: Box<dyn IoHandler>) -> Option<Tag> {
        let tag = Tag(self.next_tag);
        self.next_tag += 1;
        self.regs.push(Registration { fd, handler, tag });
        Some(tag)
    }

    fn remove(&mut self, tag: Tag) {
        if let Some(pos) = self.regs.iter().position(|r| r.tag == tag) {
            self.regs.remove(pos);
        } else {
            self.pending_removals.push(tag);
        }
    }

    fn event(&mut self, kind: Event) {
        if let Event::Done = kind {
            self.done = true;
        }
    }
}

impl TestLoop {
    fn run_until_done(&mut self, max_iters: usize) {
        for _ in 0..max_iters {
            if self.done || self.regs.is_empty() {
                return;
            }
            let fds: Vec<RawFd> = self.regs.iter().map(|r| r.fd).collect();
            for fd in fds {
                let pos = match self.regs.iter().position(|r| r.fd == fd) {
                    Some(pos) => pos,
                    None => continue,
                };
                let mut reg = self.regs.remove(pos);
                reg.handler.on_ready(fd);
                if let Some(p) = self.pending_removals.iter().position(|t| *t == reg.tag) {
                    self.pending_removals.remove(p);
                } else {
                    self.regs.push(reg);
                }
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }
}

/// Delegates to a `TestLoop` owned by the test so the test can keep
/// driving it after handing a boxed copy into the `Session`.
struct Delegate(*mut TestLoop);

// Safety: the test drives the loop and the session handlers on the same
// thread; the raw pointer never crosses a thread boundary.
unsafe impl Send for Delegate {}

impl IoCallbacks for Delegate {
    fn add(&mut self, fd: RawFd, dir: Direction, handler: Box<dyn IoHandler>) -> Option<Tag> {
        unsafe { (*self.0).add(fd, dir, handler) }
    }
    fn remove(&mut self, tag: Tag) {
        unsafe { (*self.0).remove(tag) }
    }
    fn event(&mut self, kind: Event) {
        unsafe { (*self.0).event(kind) }
    }
}

fn make_pipe() -> (RawFd, RawFd) {
    pipe().expect("pipe")
}

struct FakeChannels {
    control_peer: UnixStream,
    input_read: RawFd,
    output_write: RawFd,
    message_read: RawFd,
}

fn build_session(loop_: &mut TestLoop) -> (Session, FakeChannels) {
    let (ctl_a, ctl_b) = UnixStream::pair().expect("socketpair");
    let (input_read, input_write) = make_pipe();
    let (output_read, output_write) = make_pipe();
    let (message_read, message_write) = make_pipe();

    let session = Session::from_channels(
        ctl_a.into_raw_fd(),
        input_write,
        output_read,
        message_write,
        Box::new(Delegate(loop_ as *mut TestLoop)),
    );

    (
        session,
        FakeChannels {
            control_peer: ctl_b,
            input_read,
            output_write,
            message_read,
        },
    )
}

struct SinkWriter(Rc<RefCell<Vec<u8>>>);
unsafe impl Send for SinkWriter {}
impl std::io::Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Decrypt happy path: the fake helper acks INPUT/OUTPUT, streams
/// plaintext on OUTPUT, then reports success.
#[test]
fn decrypt_happy_path() {
    let mut loop_ = TestLoop::default();
    let (mut session, fake) = build_session(&mut loop_);

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let statuses2 = Arc::clone(&statuses);
    session.set_status_handler(move |code, rest| {
        statuses2.lock().unwrap().push((code, rest.to_string()));
    });

    let plaintext_sink: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let plaintext = DataHandle::consumer(SinkWriter(Rc::clone(&plaintext_sink)));
    let ciphertext = DataHandle::producer(
        std::io::Cursor::new(b"ignored by the fake helper".to_vec()),
        gpgsm_engine::Encoding::None,
        gpgsm_engine::Mode::Read,
    );

    // `decrypt` synchronously writes INPUT/OUTPUT and waits for their
    // acks, so the fake helper must already be listening before we call it.
    let mut control_reader = BufReader::new(fake.control_peer.try_clone().unwrap());
    let mut control_writer = fake.control_peer.try_clone().unwrap();
    let output_write = fake.output_write;
    let handle = std::thread::spawn(move || {
        // INPUT FD=...
        let mut line = String::new();
        control_reader.read_line(&mut line).unwrap();
        control_writer.write_all(b"OK\n").unwrap();
        // OUTPUT FD=...
        line.clear();
        control_reader.read_line(&mut line).unwrap();
        control_writer.write_all(b"OK\n").unwrap();
        // DECRYPT, staged and written by `start()`.
        line.clear();
        control_reader.read_line(&mut line).unwrap();
        nix_write(output_write, b"hello world").unwrap();
        let _ = close(output_write);
        control_writer.write_all(b"S DECRYPTION_OKAY\n").unwrap();
        control_writer.write_all(b"OK\n").unwrap();
    });

    decrypt(&mut session, ciphertext, plaintext).expect("stage decrypt");
    session.start().expect("start");
    loop_.run_until_done(200);
    handle.join().unwrap();

    let got = statuses.lock().unwrap();
    assert_eq!(got[0], (StatusCode::DecryptionOkay, String::new()));
    assert_eq!(got.last().unwrap().0, StatusCode::Eof);
    assert_eq!(&plaintext_sink.borrow()[..], b"hello world");

    let _ = close(fake.input_read);
    let _ = close(fake.message_read);
}

/// The helper answers the primary command with `ERR` and then goes
/// silent. The control channel must still reach `Eof` with the mapped
/// error recorded.
#[test]
fn helper_error_on_primary_command_maps_error_and_emits_eof() {
    let mut loop_ = TestLoop::default();
    let (mut session, fake) = build_session(&mut loop_);
    // Nothing in this scenario reads or writes OUTPUT; close the helper's
    // end up front so the session's blocking OUTPUT read sees EOF instead
    // of hanging forever waiting for bytes that will never arrive.
    let _ = close(fake.output_write);

    let eof_seen = Rc::new(RefCell::new(false));
    let eof_seen2 = Rc::clone(&eof_seen);
    session.set_status_handler(move |code, _rest| {
        if code == StatusCode::Eof {
            *eof_seen2.borrow_mut() = true;
        }
    });

    let plaintext = DataHandle::consumer(SinkWriter(Rc::new(RefCell::new(Vec::new()))));
    let ciphertext = DataHandle::producer(
        std::io::Cursor::new(Vec::new()),
        gpgsm_engine::Encoding::None,
        gpgsm_engine::Mode::Read,
    );

    let mut control_reader = BufReader::new(fake.control_peer.try_clone().unwrap());
    let mut control_writer = fake.control_peer.try_clone().unwrap();
    let handle = std::thread::spawn(move || {
        let mut line = String::new();
        control_reader.read_line(&mut line).unwrap(); // INPUT FD=...
        control_writer.write_all(b"OK\n").unwrap();
        line.clear();
        control_reader.read_line(&mut line).unwrap(); // OUTPUT FD=...
        control_writer.write_all(b"OK\n").unwrap();
        line.clear();
        control_reader.read_line(&mut line).unwrap(); // DECRYPT
        control_writer.write_all(b"ERR 257 framing error\n").unwrap();
        // then the helper just goes away, dropping its end of the pair
    });

    decrypt(&mut session, ciphertext, plaintext).expect("stage decrypt");
    session.start().expect("start");
    loop_.run_until_done(200);
    handle.join().unwrap();

    assert!(*eof_seen.borrow());
    assert!(session.pending_error().is_some());

    let _ = close(fake.input_read);
    let _ = close(fake.message_read);
}
