//! SFTP v3 packet framing.
//!
//! Every packet is `u32 length | u8 type | payload`, where `length` counts
//! the type byte and payload. Responses carry the request id of the request
//! they answer (except SSH_FXP_VERSION).

use crate::ssh::wire;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use hawser_platform::{code, HawserError, HawserResult};

/// Negotiated protocol version. Version 3 is the widely deployed baseline.
pub const SFTP_VERSION: u32 = 3;

/// Packet type bytes (SSH_FXP_*).
pub mod packet_type {
    /// Client hello.
    pub const INIT: u8 = 1;
    /// Server hello.
    pub const VERSION: u8 = 2;
    /// Open a file.
    pub const OPEN: u8 = 3;
    /// Close a handle.
    pub const CLOSE: u8 = 4;
    /// Read from a file handle.
    pub const READ: u8 = 5;
    /// Write to a file handle.
    pub const WRITE: u8 = 6;
    /// Stat by path, following symlinks' target handle semantics.
    pub const LSTAT: u8 = 7;
    /// Stat an open handle.
    pub const FSTAT: u8 = 8;
    /// Set attributes by path.
    pub const SETSTAT: u8 = 9;
    /// Set attributes on an open handle.
    pub const FSETSTAT: u8 = 10;
    /// Open a directory for listing.
    pub const OPENDIR: u8 = 11;
    /// Read a directory batch.
    pub const READDIR: u8 = 12;
    /// Remove a file.
    pub const REMOVE: u8 = 13;
    /// Create a directory.
    pub const MKDIR: u8 = 14;
    /// Remove a directory.
    pub const RMDIR: u8 = 15;
    /// Canonicalize a path.
    pub const REALPATH: u8 = 16;
    /// Stat by path, following symlinks.
    pub const STAT: u8 = 17;
    /// Rename a file or directory.
    pub const RENAME: u8 = 18;
    /// Read a symlink's target.
    pub const READLINK: u8 = 19;
    /// Create a symlink.
    pub const SYMLINK: u8 = 20;
    /// Status response.
    pub const STATUS: u8 = 101;
    /// Handle response.
    pub const HANDLE: u8 = 102;
    /// Data response.
    pub const DATA: u8 = 103;
    /// Name-list response.
    pub const NAME: u8 = 104;
    /// Attributes response.
    pub const ATTRS: u8 = 105;
}

/// Builds one framed packet from a type byte and payload builder.
pub fn build_packet(ptype: u8, payload: impl FnOnce(&mut BytesMut)) -> Vec<u8> {
    let mut body = BytesMut::new();
    payload(&mut body);
    let mut packet = BytesMut::with_capacity(5 + body.len());
    packet.put_u32(1 + body.len() as u32);
    packet.put_u8(ptype);
    packet.put_slice(&body);
    packet.to_vec()
}

/// One parsed response frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Packet type byte.
    pub ptype: u8,
    /// Payload after the type byte, starting with the request id for all
    /// response types except VERSION.
    pub payload: Bytes,
}

/// Extracts the next complete frame from `buf`, if one has accumulated.
///
/// Consumes the frame's bytes on success; leaves `buf` untouched when the
/// frame is still partial. An over-long or zero-length header is a
/// protocol violation.
pub fn take_frame(buf: &mut BytesMut) -> HawserResult<Option<Frame>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len == 0 || len > MAX_PACKET_LEN {
        return Err(HawserError::protocol(
            code::SFTP_PROTOCOL,
            format!("invalid sftp packet length {len}"),
        ));
    }
    if buf.len() < 4 + len {
        return Ok(None);
    }
    buf.advance(4);
    let mut payload = buf.split_to(len).freeze();
    let ptype = payload.get_u8();
    Ok(Some(Frame { ptype, payload }))
}

/// Upper bound on a single packet, per the v3 draft's 256 KiB guidance.
const MAX_PACKET_LEN: usize = 256 * 1024;

/// A parsed SSH_FXP_STATUS body (after the request id).
#[derive(Debug, Clone)]
pub struct StatusBody {
    /// SSH_FX_* status code.
    pub status: u32,
    /// Server-supplied message.
    pub message: String,
}

impl StatusBody {
    /// Decodes status code, message and (ignored) language tag.
    pub fn decode(buf: &mut impl Buf) -> HawserResult<Self> {
        let status = wire::get_u32(buf)?;
        let message = wire::get_text(buf)?;
        let _lang = wire::get_string(buf)?;
        Ok(Self { status, message })
    }
}
