//! The session object: owns the helper process, the four channels, and
//! drives the lifecycle New -> Staged -> Running -> Closing -> Done.

use crate::channel::{ChannelKind, ChannelRecord, Direction};
use crate::colon::ColonAccumulator;
use crate::data::DataHandle;
use crate::error::{EngineError, ErrorKind, Result};
use crate::io_cbs::{Event, IoCallbacks, IoHandler, Tag};
use crate::protocol::{simple_command, Control, Line};
use crate::status::{self, StatusCode};
use log::{debug, warn};
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::unistd::{close, dup2, execvp, fork, pipe2, ForkResult, Pid};
use std::cell::RefCell;
use std::ffi::CString;
use std::os::unix::io::{IntoRawFd, RawFd};
use std::rc::Rc;

/// Lifecycle state the session is in. Checked with `debug_assert!` at
/// transition points; not exposed for callers to branch on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleState {
    /// Freshly constructed; the helper is running but no operation staged.
    New,
    /// An operation has set `command` and bound its channels.
    Staged,
    /// Channels are registered with the host loop and the command written.
    Running,
    /// A terminal event has been seen; channels are being torn down.
    Closing,
    /// All channels closed and `Done` delivered.
    Done,
}

/// Shared session state, reachable both from [`Session`] methods and from
/// the small per-channel [`IoHandler`] impls registered with the host
/// loop. A single-threaded `Rc<RefCell<_>>` is appropriate here: everything
/// runs cooperatively on one event-loop thread.
pub(crate) struct Inner {
    pub(crate) control: Option<Control>,
    pub(crate) channels: [ChannelRecord; 4],
    pub(crate) command: Option<String>,
    status_handler: Option<Box<dyn FnMut(StatusCode, &str)>>,
    colon_handler: Option<Box<dyn FnMut(&[u8])>>,
    colon_buf: ColonAccumulator,
    io_cbs: Box<dyn IoCallbacks>,
    pending_error: Option<EngineError>,
    state: LifecycleState,
    done_emitted: bool,
    #[allow(dead_code)]
    child_pid: Pid,
}

impl Inner {
    fn channel(&self, kind: ChannelKind) -> &ChannelRecord {
        &self.channels[kind.index()]
    }

    fn channel_mut(&mut self, kind: ChannelKind) -> &mut ChannelRecord {
        &mut self.channels[kind.index()]
    }

    /// Close one of the four caller-side channels through the single
    /// close primitive, firing the close-notify cascade.
    pub(crate) fn close_channel(&mut self, kind: ChannelKind) {
        let fd = match self.channel(kind).fd {
            Some(fd) => fd,
            None => return,
        };
        if kind == ChannelKind::Status {
            self.control = None; // dropping the File closes the fd
        } else {
            let _ = close(fd);
        }
        if let Some(tag) = self.channel_mut(kind).tag.take() {
            self.io_cbs.remove(tag);
        }
        self.channel_mut(kind).fd = None;
        self.channel_mut(kind).data = None;
        self.channel_mut(kind).pending_write.clear();

        let all_closed = ChannelKind::ALL.iter().all(|k| self.channel(*k).fd.is_none());
        if all_closed {
            self.state = LifecycleState::Done;
            if !self.done_emitted {
                self.done_emitted = true;
                self.io_cbs.event(Event::Done);
            }
        }
    }

    fn close_all(&mut self) {
        self.state = LifecycleState::Closing;
        for kind in ChannelKind::ALL {
            self.close_channel(kind);
        }
    }

    fn stash_error(&mut self, err: EngineError) {
        if self.pending_error.is_none() {
            self.pending_error = Some(err);
        }
    }

    fn dispatch_status(&mut self, code: StatusCode, rest: &str) {
        if let Some(h) = self.status_handler.as_mut() {
            h(code, rest);
        }
    }

    fn dispatch_colon(&mut self, record: &[u8]) {
        if let Some(h) = self.colon_handler.as_mut() {
            h(record);
        }
    }

    /// Handle a terminal line (`OK`/`ERR`) or EOF on the control channel
    /// in async mode: stash an error if any, emit `Eof`, best-effort
    /// `BYE`, and close the control channel.
    fn handle_terminal(&mut self, err: Option<EngineError>) {
        if let Some(e) = err {
            self.stash_error(e);
        }
        self.dispatch_status(StatusCode::Eof, "");
        if self.pending_error.is_some() {
            if let Some(ctl) = self.control.as_mut() {
                let _ = ctl.write_line("BYE");
            }
        }
        self.colon_buf.discard_partial();
        self.close_channel(ChannelKind::Status);
    }

    /// Drain exactly one readiness notification's worth of data from the
    /// control channel: one `read(2)`, then process every complete line
    /// already buffered (never block past what's ready).
    pub(crate) fn pump_control(&mut self) {
        let n = match self.control.as_mut().map(|c| c.fill_once()) {
            Some(Ok(n)) => n,
            Some(Err(e)) => {
                warn!("control channel read failed: {}", e);
                self.handle_terminal(Some(e));
                return;
            }
            None => return, // already closed
        };

        loop {
            let line = match self.control.as_mut().and_then(|c| c.pop_buffered_line()) {
                Some(l) => l,
                None => break,
            };
            match crate::protocol::classify(&line) {
                Line::Ok(_) => {
                    self.handle_terminal(None);
                    return;
                }
                Line::Err(code, _) => {
                    let kind = crate::error::map_helper_error(code);
                    self.handle_terminal(Some(EngineError::new(kind)));
                    return;
                }
                Line::Status(name, rest) => match status::lookup(&name) {
                    Some(code) => self.dispatch_status(code, &rest),
                    None => warn!("unknown status name: {} {}", name, rest),
                },
                Line::Data(payload) => {
                    let mut records: Vec<Vec<u8>> = Vec::new();
                    let res = self.colon_buf.feed(&payload, |r| records.push(r.to_vec()));
                    if let Err(e) = res {
                        warn!("malformed D line: {}", e);
                        self.handle_terminal(Some(e));
                        return;
                    }
                    for record in &records {
                        self.dispatch_colon(record);
                    }
                }
                Line::CommentOrEmpty => {}
            }
        }

        if n == 0 {
            // EOF with no terminal OK/ERR seen: treat like an abrupt close.
            self.handle_terminal(Some(EngineError::with_detail(
                ErrorKind::GeneralError,
                "control channel closed unexpectedly",
            )));
        }
    }

    fn pump_inbound(&mut self, kind: ChannelKind) {
        let fd = match self.channel(kind).fd {
            Some(fd) => fd,
            None => return,
        };
        let mut buf = [0u8; 8192];
        let n = match nix::unistd::read(fd, &mut buf) {
            Ok(n) => n,
            Err(nix::errno::Errno::EAGAIN) => return,
            Err(e) => {
                warn!("read on {:?} failed: {}", kind, e);
                self.close_channel(kind);
                return;
            }
        };
        if n == 0 {
            self.close_channel(kind);
            return;
        }
        if let Some(DataHandle::Consumer(w)) = self.channel_mut(kind).data.as_mut() {
            use std::io::Write;
            if w.write_all(&buf[..n]).is_err() {
                self.close_channel(kind);
            }
        }
    }

    /// Write whatever bytes are queued for `kind` to its fd, retaining any
    /// unwritten tail (on `EAGAIN` or a short write) in the channel's
    /// `pending_write` buffer rather than dropping it. Returns `true` once
    /// the queue has fully drained.
    fn drain_pending_write(&mut self, kind: ChannelKind, fd: RawFd) -> bool {
        loop {
            let pending = &self.channel(kind).pending_write;
            if pending.is_empty() {
                return true;
            }
            match nix::unistd::write(fd, pending) {
                Ok(0) => return true,
                Ok(n) => {
                    self.channel_mut(kind).pending_write.drain(..n);
                }
                Err(nix::errno::Errno::EAGAIN) => return false,
                Err(e) => {
                    warn!("write on {:?} failed: {}", kind, e);
                    self.close_channel(kind);
                    return false;
                }
            }
        }
    }

    fn pump_outbound(&mut self, kind: ChannelKind) {
        use std::io::Read;

        let fd = match self.channel(kind).fd {
            Some(fd) => fd,
            None => return,
        };

        // Drain whatever is left over from a previous readiness notification
        // before pulling more from the producer, preserving per-channel
        // ordering.
        if !self.drain_pending_write(kind, fd) {
            return;
        }

        let mut buf = [0u8; 8192];
        let read_n = match self.channel_mut(kind).data.as_mut() {
            Some(DataHandle::Producer(r, _, _)) => match r.read(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!("producer read on {:?} failed: {}", kind, e);
                    self.close_channel(kind);
                    return;
                }
            },
            _ => return,
        };
        if read_n == 0 {
            self.close_channel(kind);
            return;
        }
        match nix::unistd::write(fd, &buf[..read_n]) {
            Ok(n) if n < read_n => {
                self.channel_mut(kind).pending_write.extend_from_slice(&buf[n..read_n]);
            }
            Ok(_) => {}
            Err(nix::errno::Errno::EAGAIN) => {
                self.channel_mut(kind).pending_write.extend_from_slice(&buf[..read_n]);
            }
            Err(e) => {
                warn!("write on {:?} failed: {}", kind, e);
                self.close_channel(kind);
            }
        }
    }
}

struct ChannelHandler {
    inner: Rc<RefCell<Inner>>,
    kind: ChannelKind,
}

impl IoHandler for ChannelHandler {
    fn on_ready(&mut self, _fd: RawFd) {
        let mut inner = self.inner.borrow_mut();
        match self.kind {
            ChannelKind::Status => inner.pump_control(),
            ChannelKind::Output => inner.pump_inbound(ChannelKind::Output),
            ChannelKind::Input | ChannelKind::Message => inner.pump_outbound(self.kind),
        }
    }
}

/// A single in-flight helper connection driving one operation at a time.
pub struct Session {
    pub(crate) inner: Rc<RefCell<Inner>>,
}

fn set_cloexec(fd: RawFd, on: bool) -> Result<()> {
    let mut flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD)?);
    flags.set(FdFlag::FD_CLOEXEC, on);
    fcntl(fd, FcntlArg::F_SETFD(flags))?;
    Ok(())
}

fn make_nonblocking(fd: RawFd) -> Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

impl Session {
    /// Spawn `helper_path --server`, wire the four channels, and run the
    /// environment-derived `OPTION` handshake.
    pub fn new(helper_path: &str, io_cbs: Box<dyn IoCallbacks>) -> Result<Self> {
        use std::os::unix::net::UnixStream;

        let (parent_ctl, child_ctl) = UnixStream::pair()?;

        let (input_read, input_write) = pipe2(OFlag::O_CLOEXEC)?;
        let (output_read, output_write) = pipe2(OFlag::O_CLOEXEC)?;
        let (message_read, message_write) = pipe2(OFlag::O_CLOEXEC)?;

        // The three data fds must survive exec on the child side.
        for fd in [input_read, output_write, message_read] {
            set_cloexec(fd, false)?;
        }

        let helper_cstr = CString::new(helper_path)
            .map_err(|_| EngineError::with_detail(ErrorKind::InvalidValue, "nul in helper path"))?;
        let server_arg = CString::new("--server").unwrap();

        // Safety: single-threaded fork immediately followed by exec or
        // _exit in the child, per the usual posix_spawn-adjacent caveats.
        match unsafe { fork()? } {
            ForkResult::Child => {
                let child_ctl_fd = child_ctl.into_raw_fd();
                let _ = dup2(child_ctl_fd, libc::STDIN_FILENO);
                let _ = dup2(child_ctl_fd, libc::STDOUT_FILENO);
                if let Ok(devnull) = nix::fcntl::open(
                    "/dev/null",
                    OFlag::O_WRONLY,
                    nix::sys::stat::Mode::empty(),
                ) {
                    let _ = dup2(devnull, libc::STDERR_FILENO);
                }
                let _ = close(input_write);
                let _ = close(output_read);
                let _ = close(message_write);
                let _ = execvp(&helper_cstr, &[helper_cstr.clone(), server_arg]);
                // exec only returns on failure.
                std::process::exit(127);
            }
            ForkResult::Parent { child } => {
                debug!("spawned helper {} as pid {}", helper_path, child);
                drop(child_ctl);
                let _ = close(input_read);
                let _ = close(output_write);
                let _ = close(message_read);

                let parent_ctl_fd = parent_ctl.into_raw_fd();
                let control = unsafe { Control::from_raw_fd(parent_ctl_fd) };

                let mut channels: [ChannelRecord; 4] = Default::default();
                channels[ChannelKind::Status.index()] = ChannelRecord {
                    fd: Some(parent_ctl_fd),
                    dir: Some(Direction::Inbound),
                    data: None,
                    tag: None,
                };
                channels[ChannelKind::Input.index()] = ChannelRecord {
                    fd: Some(input_write),
                    dir: Some(Direction::Outbound),
                    data: None,
                    tag: None,
                };
                channels[ChannelKind::Output.index()] = ChannelRecord {
                    fd: Some(output_read),
                    dir: Some(Direction::Inbound),
                    data: None,
                    tag: None,
                };
                channels[ChannelKind::Message.index()] = ChannelRecord {
                    fd: Some(message_write),
                    dir: Some(Direction::Outbound),
                    data: None,
                    tag: None,
                };
                let mut inner = Inner {
                    control: Some(control),
                    channels,
                    command: None,
                    status_handler: None,
                    colon_handler: None,
                    colon_buf: ColonAccumulator::new(),
                    io_cbs,
                    pending_error: None,
                    state: LifecycleState::New,
                    done_emitted: false,
                    child_pid: child,
                };

                if let Err(e) = Self::send_environment_options(&mut inner) {
                    inner.close_all();
                    return Err(e);
                }

                Ok(Session {
                    inner: Rc::new(RefCell::new(inner)),
                })
            }
        }
    }

    /// Adopt an already-connected helper's four fds directly, skipping
    /// spawn and the environment `OPTION` handshake. For embedders that
    /// have already arranged a connection (a helper reached over a
    /// pre-forked supervisor, or in tests, an in-process fake helper
    /// driving a socketpair).
    pub fn from_channels(
        control: RawFd,
        input: RawFd,
        output: RawFd,
        message: RawFd,
        io_cbs: Box<dyn IoCallbacks>,
    ) -> Self {
        let control_fd = control;
        let control = unsafe { Control::from_raw_fd(control) };
        let mut channels: [ChannelRecord; 4] = Default::default();
        channels[ChannelKind::Status.index()] = ChannelRecord {
            fd: Some(control_fd),
            dir: Some(Direction::Inbound),
            data: None,
            tag: None,
        };
        channels[ChannelKind::Input.index()] = ChannelRecord {
            fd: Some(input),
            dir: Some(Direction::Outbound),
            data: None,
            tag: None,
        };
        channels[ChannelKind::Output.index()] = ChannelRecord {
            fd: Some(output),
            dir: Some(Direction::Inbound),
            data: None,
            tag: None,
        };
        channels[ChannelKind::Message.index()] = ChannelRecord {
            fd: Some(message),
            dir: Some(Direction::Outbound),
            data: None,
            tag: None,
        };
        let inner = Inner {
            control: Some(control),
            channels,
            command: None,
            status_handler: None,
            colon_handler: None,
            colon_buf: ColonAccumulator::new(),
            io_cbs,
            pending_error: None,
            state: LifecycleState::New,
            done_emitted: false,
            child_pid: Pid::this(),
        };
        Session {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    fn send_environment_options(inner: &mut Inner) -> Result<()> {
        let ctl = inner.control.as_mut().ok_or_else(|| {
            EngineError::with_detail(ErrorKind::GeneralError, "control channel missing")
        })?;

        if let Ok(display) = std::env::var("DISPLAY") {
            simple_command(ctl, &format!("OPTION display={}", display))?;
        }

        if let Some(ttyname) = tty_name(1) {
            simple_command(ctl, &format!("OPTION ttyname={}", ttyname))?;

            if let Ok(term) = std::env::var("TERM") {
                simple_command(ctl, &format!("OPTION ttytype={}", term))?;
            }

            if let Some(lc_ctype) = probe_locale(libc::LC_CTYPE) {
                simple_command(ctl, &format!("OPTION lc-ctype={}", lc_ctype))?;
            }
            if let Some(lc_messages) = probe_locale(libc::LC_MESSAGES) {
                simple_command(ctl, &format!("OPTION lc-messages={}", lc_messages))?;
            }
        }
        Ok(())
    }

    /// Install the upcall for `S` status events.
    pub fn set_status_handler(&mut self, handler: impl FnMut(StatusCode, &str) + 'static) {
        self.inner.borrow_mut().status_handler = Some(Box::new(handler));
    }

    /// Install the upcall for reassembled `D` colon records.
    pub fn set_colon_handler(&mut self, handler: impl FnMut(&[u8]) + 'static) {
        self.inner.borrow_mut().colon_handler = Some(Box::new(handler));
    }

    /// Bind a data handle to a channel for the current operation.
    pub(crate) fn bind(&mut self, kind: ChannelKind, data: DataHandle) {
        self.inner.borrow_mut().channel_mut(kind).data = Some(data);
    }

    /// Close a channel that the staged operation does not use.
    pub(crate) fn close_unused(&mut self, kind: ChannelKind) {
        self.inner.borrow_mut().close_channel(kind);
    }

    /// Send a synchronous simple command over the control channel.
    pub(crate) fn simple(&mut self, cmd: &str) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let ctl = inner
            .control
            .as_mut()
            .ok_or_else(|| EngineError::with_detail(ErrorKind::GeneralError, "no control channel"))?;
        simple_command(ctl, cmd)
    }

    /// Stage the primary command line for the operation.
    pub(crate) fn stage_command(&mut self, command: impl Into<String>) {
        let mut inner = self.inner.borrow_mut();
        inner.command = Some(command.into());
        inner.state = LifecycleState::Staged;
    }

    /// Fetch the fd for a channel, for building `INPUT FD=<n>` etc.
    pub(crate) fn channel_fd(&self, kind: ChannelKind) -> Option<RawFd> {
        self.inner.borrow().channel(kind).fd
    }

    /// The raw server-visible fd a channel uses on the wire is the same
    /// as the caller-side fd recorded here (the session only ever tells
    /// the helper about its own end via the fd number it already knows
    /// from the pipe it created).
    pub(crate) fn server_fd(&self, kind: ChannelKind) -> Option<RawFd> {
        self.channel_fd(kind)
    }

    /// Emit the NO_RECP / INV_RECP status lines used by recipient
    /// submission without going through `status_handler` typing.
    pub(crate) fn emit_status(&mut self, code: StatusCode, rest: &str) {
        self.inner.borrow_mut().dispatch_status(code, rest);
    }

    /// Register all open channels with the host loop and write the
    /// staged command.
    pub fn start(&mut self) -> Result<()> {
        let command = {
            let inner = self.inner.borrow();
            inner
                .command
                .clone()
                .ok_or_else(|| EngineError::with_detail(ErrorKind::InvalidValue, "no command staged"))?
        };

        for kind in ChannelKind::ALL {
            let fd = match self.channel_fd(kind) {
                Some(fd) => fd,
                None => continue,
            };
            let dir = match kind {
                ChannelKind::Status => Direction::Inbound,
                ChannelKind::Output => Direction::Inbound,
                ChannelKind::Input | ChannelKind::Message => Direction::Outbound,
            };
            if dir == Direction::Outbound {
                make_nonblocking(fd)?;
            }
            let handler = Box::new(ChannelHandler {
                inner: Rc::clone(&self.inner),
                kind,
            });
            let tag = {
                let mut inner = self.inner.borrow_mut();
                inner.io_cbs.add(fd, dir, handler)
            };
            let tag = tag.ok_or_else(|| {
                EngineError::with_detail(ErrorKind::GeneralError, "io_cbs.add failed")
            })?;
            self.inner.borrow_mut().channel_mut(kind).tag = Some(tag);
        }

        {
            let mut inner = self.inner.borrow_mut();
            inner.state = LifecycleState::Running;
            let ctl = inner
                .control
                .as_mut()
                .ok_or_else(|| EngineError::with_detail(ErrorKind::GeneralError, "no control channel"))?;
            ctl.write_line(&command)?;
        }
        Ok(())
    }

    /// Current lifecycle state, mostly useful for tests and assertions.
    pub fn state(&self) -> LifecycleState {
        self.inner.borrow().state
    }

    /// The first asynchronous error observed on the control channel, if any.
    pub fn pending_error(&self) -> Option<ErrorKind> {
        self.inner.borrow().pending_error.as_ref().map(|e| e.kind())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // `close_all` is idempotent (each `close_channel` call is a no-op
        // once a channel's fd is already `None`), so an early or abnormal
        // drop always drives the full cascade, tearing down whatever
        // channel handlers the host loop still has registered.
        self.inner.borrow_mut().close_all();
    }
}

fn tty_name(fd: RawFd) -> Option<String> {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::ttyname_r(fd, buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return None;
    }
    let cstr = unsafe { std::ffi::CStr::from_ptr(buf.as_ptr() as *const libc::c_char) };
    cstr.to_str().ok().map(|s| s.to_string())
}

/// Temporarily set `category` to the user's default locale, read the
/// resulting name, and restore the prior value before returning.
fn probe_locale(category: libc::c_int) -> Option<String> {
    unsafe {
        let old = libc::setlocale(category, std::ptr::null());
        let old_owned = if old.is_null() {
            None
        } else {
            Some(std::ffi::CStr::from_ptr(old).to_owned())
        };

        let dft = libc::setlocale(category, b"\0".as_ptr() as *const libc::c_char);
        let result = if dft.is_null() {
            None
        } else {
            std::ffi::CStr::from_ptr(dft).to_str().ok().map(|s| s.to_string())
        };

        if let Some(old_owned) = old_owned {
            libc::setlocale(category, old_owned.as_ptr());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_states_are_distinct() {
        assert_ne!(LifecycleState::New, LifecycleState::Done);
        assert_ne!(LifecycleState::Staged, LifecycleState::Running);
    }
}
