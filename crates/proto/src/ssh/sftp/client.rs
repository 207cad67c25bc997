//! SFTP client over a dedicated session channel.
//!
//! The client keeps one in-flight request at a time. Each operation builds
//! its request packet once, then drives it through the channel under the
//! non-blocking retry contract: a retried call resumes the partial send or
//! keeps waiting for the response, it never resubmits. Responses are matched
//! to the pending request by id; a mismatch is a protocol violation.

use crate::ssh::channel::Channel;
use crate::ssh::session::Session;
use crate::ssh::sftp::message::{self, packet_type, Frame, StatusBody, SFTP_VERSION};
use crate::ssh::sftp::types::{DirEntry, SftpAttributes};
use crate::ssh::wire;
use bytes::{Buf, BufMut, BytesMut};
use hawser_platform::{code, ErrorKind, HawserError, HawserResult};
use tracing::debug;

use super::types::status;

/// What a remote handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleKind {
    File,
    Dir,
}

/// An opaque server-issued handle for an open file or directory.
#[derive(Debug)]
pub struct SftpHandle {
    raw: Vec<u8>,
    kind: HandleKind,
    closed: bool,
}

impl SftpHandle {
    /// True once [`Sftp::close`] has completed for this handle.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Subsystem bring-up progress, resumable under Incomplete.
enum Phase {
    OpenChannel,
    Subsystem,
    SendInit { packet: Vec<u8>, sent: usize },
    AwaitVersion,
    Ready,
}

/// The single in-flight request.
struct Pending {
    id: u32,
    op: &'static str,
    packet: Vec<u8>,
    sent: usize,
}

/// An SFTP v3 session over its own channel.
///
/// Obtain via [`Session::sftp`], then drive [`handshake`](Sftp::handshake)
/// to completion before issuing operations.
pub struct Sftp {
    session: Session,
    channel: Option<Channel>,
    phase: Phase,
    next_request_id: u32,
    version: u32,
    pending: Option<Pending>,
    inbuf: BytesMut,
}

impl Sftp {
    pub(crate) fn new(session: Session) -> Self {
        Self {
            session,
            channel: None,
            phase: Phase::OpenChannel,
            next_request_id: 0,
            version: 0,
            pending: None,
            inbuf: BytesMut::new(),
        }
    }

    /// Brings up the SFTP subsystem: opens the channel, requests the
    /// "sftp" subsystem and exchanges INIT/VERSION. Retryable; each call
    /// resumes where the previous one stopped. A no-op once ready.
    pub fn handshake(&mut self) -> HawserResult<()> {
        loop {
            match &mut self.phase {
                Phase::OpenChannel => {
                    let channel = self.session.channel_session()?;
                    self.channel = Some(channel);
                    self.phase = Phase::Subsystem;
                }
                Phase::Subsystem => {
                    self.channel_mut()?.subsystem("sftp")?;
                    let packet = message::build_packet(packet_type::INIT, |b| {
                        b.put_u32(SFTP_VERSION);
                    });
                    self.phase = Phase::SendInit { packet, sent: 0 };
                }
                Phase::SendInit { packet, sent } => {
                    let packet = packet.clone();
                    let mut done = *sent;
                    let channel = self.channel.as_mut().ok_or_else(handshake_incomplete)?;
                    while done < packet.len() {
                        match channel.write(&packet[done..]) {
                            Ok(n) => done += n,
                            Err(err) => {
                                if let Phase::SendInit { sent, .. } = &mut self.phase {
                                    *sent = done;
                                }
                                return Err(err);
                            }
                        }
                    }
                    self.phase = Phase::AwaitVersion;
                }
                Phase::AwaitVersion => {
                    let frame = match self.next_frame()? {
                        Some(frame) => frame,
                        None => return Err(HawserError::incomplete()),
                    };
                    if frame.ptype != packet_type::VERSION {
                        return Err(self.fail(HawserError::protocol(
                            code::SFTP_PROTOCOL,
                            format!("expected VERSION, got packet type {}", frame.ptype),
                        )));
                    }
                    let mut payload = frame.payload;
                    self.version = wire::get_u32(&mut payload).map_err(|err| self.fail(err))?;
                    debug!(version = self.version, "sftp subsystem ready");
                    self.phase = Phase::Ready;
                }
                Phase::Ready => return Ok(()),
            }
        }
    }

    /// The server's negotiated protocol version. 0 before the handshake.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Opens a file. `flags` is a combination of
    /// [`open_flags`](crate::ssh::sftp::types::open_flags); `attrs` applies
    /// to files created by the call.
    pub fn open(
        &mut self,
        path: &str,
        flags: u32,
        attrs: &SftpAttributes,
    ) -> HawserResult<SftpHandle> {
        let frame = self.roundtrip("open", |id| {
            message::build_packet(packet_type::OPEN, |b| {
                b.put_u32(id);
                wire::put_string(b, path.as_bytes());
                b.put_u32(flags);
                attrs.encode(b);
            })
        })?;
        self.expect_handle(frame, HandleKind::File)
    }

    /// Opens a directory for listing.
    pub fn opendir(&mut self, path: &str) -> HawserResult<SftpHandle> {
        let frame = self.roundtrip("opendir", |id| {
            message::build_packet(packet_type::OPENDIR, |b| {
                b.put_u32(id);
                wire::put_string(b, path.as_bytes());
            })
        })?;
        self.expect_handle(frame, HandleKind::Dir)
    }

    /// Reads up to `max` bytes at `offset`. Returns `None` at end of file.
    pub fn read(
        &mut self,
        handle: &SftpHandle,
        offset: u64,
        max: u32,
    ) -> HawserResult<Option<Vec<u8>>> {
        check_handle(handle, HandleKind::File)?;
        let raw = handle.raw.clone();
        let frame = self.roundtrip("read", |id| {
            message::build_packet(packet_type::READ, |b| {
                b.put_u32(id);
                wire::put_string(b, &raw);
                b.put_u64(offset);
                b.put_u32(max);
            })
        })?;
        match frame.ptype {
            packet_type::DATA => {
                let mut payload = frame.payload;
                Ok(Some(
                    wire::get_string(&mut payload).map_err(|err| self.fail(err))?,
                ))
            }
            packet_type::STATUS => {
                let mut payload = frame.payload;
                let body = StatusBody::decode(&mut payload).map_err(|err| self.fail(err))?;
                if body.status == status::EOF {
                    Ok(None)
                } else {
                    Err(self.fail(status_error(&body)))
                }
            }
            other => Err(self.fail(unexpected_packet(other))),
        }
    }

    /// Writes `data` at `offset`. The whole buffer is covered by one
    /// request; success means the server acknowledged all of it.
    pub fn write(&mut self, handle: &SftpHandle, offset: u64, data: &[u8]) -> HawserResult<()> {
        check_handle(handle, HandleKind::File)?;
        let raw = handle.raw.clone();
        let frame = self.roundtrip("write", |id| {
            message::build_packet(packet_type::WRITE, |b| {
                b.put_u32(id);
                wire::put_string(b, &raw);
                b.put_u64(offset);
                wire::put_string(b, data);
            })
        })?;
        self.expect_ok_status(frame)
    }

    /// Reads the next directory batch. Returns `None` once the listing is
    /// exhausted.
    pub fn readdir(&mut self, handle: &SftpHandle) -> HawserResult<Option<Vec<DirEntry>>> {
        check_handle(handle, HandleKind::Dir)?;
        let raw = handle.raw.clone();
        let frame = self.roundtrip("readdir", |id| {
            message::build_packet(packet_type::READDIR, |b| {
                b.put_u32(id);
                wire::put_string(b, &raw);
            })
        })?;
        match frame.ptype {
            packet_type::NAME => {
                let mut payload = frame.payload;
                let count = wire::get_u32(&mut payload).map_err(|err| self.fail(err))?;
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let filename = wire::get_text(&mut payload).map_err(|err| self.fail(err))?;
                    let longname = wire::get_text(&mut payload).map_err(|err| self.fail(err))?;
                    let attrs =
                        SftpAttributes::decode(&mut payload).map_err(|err| self.fail(err))?;
                    entries.push(DirEntry {
                        filename,
                        longname,
                        attrs,
                    });
                }
                Ok(Some(entries))
            }
            packet_type::STATUS => {
                let mut payload = frame.payload;
                let body = StatusBody::decode(&mut payload).map_err(|err| self.fail(err))?;
                if body.status == status::EOF {
                    Ok(None)
                } else {
                    Err(self.fail(status_error(&body)))
                }
            }
            other => Err(self.fail(unexpected_packet(other))),
        }
    }

    /// Closes a handle. On success the handle is marked closed and further
    /// use of it is a Resource error.
    pub fn close(&mut self, handle: &mut SftpHandle) -> HawserResult<()> {
        if handle.closed {
            return Err(HawserError::resource("sftp handle already closed"));
        }
        let raw = handle.raw.clone();
        let frame = self.roundtrip("close", |id| {
            message::build_packet(packet_type::CLOSE, |b| {
                b.put_u32(id);
                wire::put_string(b, &raw);
            })
        })?;
        self.expect_ok_status(frame)?;
        handle.closed = true;
        Ok(())
    }

    /// Stats a path, following symlinks.
    pub fn stat(&mut self, path: &str) -> HawserResult<SftpAttributes> {
        self.path_attrs_op("stat", packet_type::STAT, path)
    }

    /// Stats a path without following a final symlink.
    pub fn lstat(&mut self, path: &str) -> HawserResult<SftpAttributes> {
        self.path_attrs_op("lstat", packet_type::LSTAT, path)
    }

    /// Stats an open handle.
    pub fn fstat(&mut self, handle: &SftpHandle) -> HawserResult<SftpAttributes> {
        if handle.closed {
            return Err(HawserError::resource("sftp handle already closed"));
        }
        let raw = handle.raw.clone();
        let frame = self.roundtrip("fstat", |id| {
            message::build_packet(packet_type::FSTAT, |b| {
                b.put_u32(id);
                wire::put_string(b, &raw);
            })
        })?;
        self.expect_attrs(frame)
    }

    /// Sets attributes on a path.
    pub fn setstat(&mut self, path: &str, attrs: &SftpAttributes) -> HawserResult<()> {
        let frame = self.roundtrip("setstat", |id| {
            message::build_packet(packet_type::SETSTAT, |b| {
                b.put_u32(id);
                wire::put_string(b, path.as_bytes());
                attrs.encode(b);
            })
        })?;
        self.expect_ok_status(frame)
    }

    /// Sets attributes on an open handle.
    pub fn fsetstat(&mut self, handle: &SftpHandle, attrs: &SftpAttributes) -> HawserResult<()> {
        if handle.closed {
            return Err(HawserError::resource("sftp handle already closed"));
        }
        let raw = handle.raw.clone();
        let frame = self.roundtrip("fsetstat", |id| {
            message::build_packet(packet_type::FSETSTAT, |b| {
                b.put_u32(id);
                wire::put_string(b, &raw);
                attrs.encode(b);
            })
        })?;
        self.expect_ok_status(frame)
    }

    /// Creates a directory.
    pub fn mkdir(&mut self, path: &str, attrs: &SftpAttributes) -> HawserResult<()> {
        let frame = self.roundtrip("mkdir", |id| {
            message::build_packet(packet_type::MKDIR, |b| {
                b.put_u32(id);
                wire::put_string(b, path.as_bytes());
                attrs.encode(b);
            })
        })?;
        self.expect_ok_status(frame)
    }

    /// Removes an empty directory.
    pub fn rmdir(&mut self, path: &str) -> HawserResult<()> {
        self.path_status_op("rmdir", packet_type::RMDIR, path)
    }

    /// Removes a file.
    pub fn unlink(&mut self, path: &str) -> HawserResult<()> {
        self.path_status_op("unlink", packet_type::REMOVE, path)
    }

    /// Renames a file or directory.
    pub fn rename(&mut self, src: &str, dest: &str) -> HawserResult<()> {
        let frame = self.roundtrip("rename", |id| {
            message::build_packet(packet_type::RENAME, |b| {
                b.put_u32(id);
                wire::put_string(b, src.as_bytes());
                wire::put_string(b, dest.as_bytes());
            })
        })?;
        self.expect_ok_status(frame)
    }

    /// Creates a symlink at `link` pointing at `target`.
    pub fn symlink(&mut self, target: &str, link: &str) -> HawserResult<()> {
        let frame = self.roundtrip("symlink", |id| {
            message::build_packet(packet_type::SYMLINK, |b| {
                b.put_u32(id);
                wire::put_string(b, target.as_bytes());
                wire::put_string(b, link.as_bytes());
            })
        })?;
        self.expect_ok_status(frame)
    }

    /// Reads a symlink's target.
    pub fn readlink(&mut self, path: &str) -> HawserResult<String> {
        self.path_name_op("readlink", packet_type::READLINK, path)
    }

    /// Canonicalizes a path on the server.
    pub fn realpath(&mut self, path: &str) -> HawserResult<String> {
        self.path_name_op("realpath", packet_type::REALPATH, path)
    }

    fn path_attrs_op(
        &mut self,
        op: &'static str,
        ptype: u8,
        path: &str,
    ) -> HawserResult<SftpAttributes> {
        let frame = self.roundtrip(op, |id| {
            message::build_packet(ptype, |b| {
                b.put_u32(id);
                wire::put_string(b, path.as_bytes());
            })
        })?;
        self.expect_attrs(frame)
    }

    fn path_status_op(&mut self, op: &'static str, ptype: u8, path: &str) -> HawserResult<()> {
        let frame = self.roundtrip(op, |id| {
            message::build_packet(ptype, |b| {
                b.put_u32(id);
                wire::put_string(b, path.as_bytes());
            })
        })?;
        self.expect_ok_status(frame)
    }

    fn path_name_op(&mut self, op: &'static str, ptype: u8, path: &str) -> HawserResult<String> {
        let frame = self.roundtrip(op, |id| {
            message::build_packet(ptype, |b| {
                b.put_u32(id);
                wire::put_string(b, path.as_bytes());
            })
        })?;
        match frame.ptype {
            packet_type::NAME => {
                let mut payload = frame.payload;
                let count = wire::get_u32(&mut payload).map_err(|err| self.fail(err))?;
                if count != 1 {
                    return Err(self.fail(HawserError::protocol(
                        code::SFTP_PROTOCOL,
                        format!("expected one name, got {count}"),
                    )));
                }
                wire::get_text(&mut payload).map_err(|err| self.fail(err))
            }
            packet_type::STATUS => {
                let mut payload = frame.payload;
                Err(self.fail(status_error(
                    &StatusBody::decode(&mut payload).map_err(|err| self.fail(err))?,
                )))
            }
            other => Err(self.fail(unexpected_packet(other))),
        }
    }

    /// Drives one request/response exchange.
    ///
    /// The packet is built exactly once per logical operation; a retried
    /// call after Incomplete resumes the pending exchange. Calling a
    /// different operation while one is pending is misuse.
    fn roundtrip(
        &mut self,
        op: &'static str,
        build: impl FnOnce(u32) -> Vec<u8>,
    ) -> HawserResult<Frame> {
        if !matches!(self.phase, Phase::Ready) {
            return Err(HawserError::resource(
                "sftp handshake not complete; drive handshake() first",
            ));
        }
        match &self.pending {
            None => {
                let id = self.next_request_id;
                self.next_request_id = self.next_request_id.wrapping_add(1);
                let packet = build(id);
                self.pending = Some(Pending {
                    id,
                    op,
                    packet,
                    sent: 0,
                });
            }
            Some(pending) if pending.op != op => {
                return Err(HawserError::resource(format!(
                    "sftp operation '{}' is pending; retry it before issuing '{op}'",
                    pending.op
                )));
            }
            Some(_) => {}
        }

        // Finish the partial send, if any.
        loop {
            let (remaining, from) = {
                let pending = self.pending.as_ref().ok_or_else(handshake_incomplete)?;
                (pending.packet.len() - pending.sent, pending.sent)
            };
            if remaining == 0 {
                break;
            }
            let chunk = {
                let pending = self.pending.as_ref().ok_or_else(handshake_incomplete)?;
                pending.packet[from..].to_vec()
            };
            let n = self.channel_mut()?.write(&chunk)?;
            if let Some(pending) = self.pending.as_mut() {
                pending.sent += n;
            }
        }

        // Await the correlated response.
        let frame = match self.next_frame()? {
            Some(frame) => frame,
            None => return Err(HawserError::incomplete()),
        };
        let expected = self.pending.as_ref().map(|p| p.id).unwrap_or(0);
        let mut payload = frame.payload.clone();
        let id = wire::get_u32(&mut payload).map_err(|err| self.fail(err))?;
        if id != expected {
            return Err(self.fail(HawserError::protocol(
                code::SFTP_PROTOCOL,
                format!("response id {id} does not match request id {expected}"),
            )));
        }
        self.pending = None;
        Ok(Frame {
            ptype: frame.ptype,
            payload: payload.copy_to_bytes(payload.remaining()),
        })
    }

    /// Pulls channel data into the frame buffer and extracts one frame if
    /// complete. `Ok(None)` means more bytes are needed.
    fn next_frame(&mut self) -> HawserResult<Option<Frame>> {
        loop {
            match message::take_frame(&mut self.inbuf) {
                Ok(Some(frame)) => return Ok(Some(frame)),
                Ok(None) => {}
                Err(err) => return Err(self.fail(err)),
            }
            let mut chunk = [0u8; 32 * 1024];
            let n = match self.channel_mut()?.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.is_incomplete() => return Ok(None),
                Err(err) => return Err(err),
            };
            if n == 0 {
                return Err(self.fail(HawserError::protocol(
                    code::SFTP_PROTOCOL,
                    "sftp channel closed mid-exchange",
                )));
            }
            self.inbuf.extend_from_slice(&chunk[..n]);
        }
    }

    fn channel_mut(&mut self) -> HawserResult<&mut Channel> {
        self.channel.as_mut().ok_or_else(handshake_incomplete)
    }

    /// Applies the session propagation policy to an error raised inside
    /// this subsystem: fatal errors close the owning session.
    fn fail(&self, err: HawserError) -> HawserError {
        self.session.core().borrow_mut().record_failure(err)
    }

    fn expect_handle(&mut self, frame: Frame, kind: HandleKind) -> HawserResult<SftpHandle> {
        match frame.ptype {
            packet_type::HANDLE => {
                let mut payload = frame.payload;
                Ok(SftpHandle {
                    raw: wire::get_string(&mut payload).map_err(|err| self.fail(err))?,
                    kind,
                    closed: false,
                })
            }
            packet_type::STATUS => {
                let mut payload = frame.payload;
                Err(self.fail(status_error(
                    &StatusBody::decode(&mut payload).map_err(|err| self.fail(err))?,
                )))
            }
            other => Err(self.fail(unexpected_packet(other))),
        }
    }

    fn expect_attrs(&mut self, frame: Frame) -> HawserResult<SftpAttributes> {
        match frame.ptype {
            packet_type::ATTRS => {
                let mut payload = frame.payload;
                SftpAttributes::decode(&mut payload).map_err(|err| self.fail(err))
            }
            packet_type::STATUS => {
                let mut payload = frame.payload;
                Err(self.fail(status_error(
                    &StatusBody::decode(&mut payload).map_err(|err| self.fail(err))?,
                )))
            }
            other => Err(self.fail(unexpected_packet(other))),
        }
    }

    fn expect_ok_status(&mut self, frame: Frame) -> HawserResult<()> {
        match frame.ptype {
            packet_type::STATUS => {
                let mut payload = frame.payload;
                let body = StatusBody::decode(&mut payload).map_err(|err| self.fail(err))?;
                if body.status == status::OK {
                    Ok(())
                } else {
                    Err(self.fail(status_error(&body)))
                }
            }
            other => Err(self.fail(unexpected_packet(other))),
        }
    }
}

fn check_handle(handle: &SftpHandle, kind: HandleKind) -> HawserResult<()> {
    if handle.closed {
        return Err(HawserError::resource("sftp handle already closed"));
    }
    if handle.kind != kind {
        return Err(HawserError::resource(match kind {
            HandleKind::File => "directory handle used for a file operation",
            HandleKind::Dir => "file handle used for a directory operation",
        }));
    }
    Ok(())
}

/// Server-reported failures are local to the call, never session-fatal.
fn status_error(body: &StatusBody) -> HawserError {
    HawserError::new(
        ErrorKind::Resource,
        code::SFTP_PROTOCOL,
        format!("sftp status {}: {}", body.status, body.message),
    )
}

fn unexpected_packet(ptype: u8) -> HawserError {
    HawserError::protocol(
        code::SFTP_PROTOCOL,
        format!("unexpected sftp packet type {ptype}"),
    )
}

fn handshake_incomplete() -> HawserError {
    HawserError::resource("sftp handshake not complete; drive handshake() first")
}
