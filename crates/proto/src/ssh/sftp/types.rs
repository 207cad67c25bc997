//! SFTP v3 data types: attributes, open flags and status codes.

use crate::ssh::wire;
use bytes::{Buf, BufMut};
use hawser_platform::HawserResult;

/// Attribute presence flags (SSH_FILEXFER_ATTR_*).
pub mod attr_flags {
    /// `size` is present.
    pub const SIZE: u32 = 0x0000_0001;
    /// `uid`/`gid` are present.
    pub const UIDGID: u32 = 0x0000_0002;
    /// `permissions` is present.
    pub const PERMISSIONS: u32 = 0x0000_0004;
    /// `atime`/`mtime` are present.
    pub const ACMODTIME: u32 = 0x0000_0008;
}

/// File open flags (SSH_FXF_*). Combine with bitwise or.
pub mod open_flags {
    /// Open for reading.
    pub const READ: u32 = 0x0000_0001;
    /// Open for writing.
    pub const WRITE: u32 = 0x0000_0002;
    /// Writes append to the end of the file.
    pub const APPEND: u32 = 0x0000_0004;
    /// Create the file if it does not exist.
    pub const CREAT: u32 = 0x0000_0008;
    /// Truncate an existing file. Requires [`CREAT`].
    pub const TRUNC: u32 = 0x0000_0010;
    /// Fail if the file already exists. Requires [`CREAT`].
    pub const EXCL: u32 = 0x0000_0020;
}

/// Server status codes (SSH_FX_*) carried in SSH_FXP_STATUS responses.
pub mod status {
    /// Success.
    pub const OK: u32 = 0;
    /// End of file or directory listing.
    pub const EOF: u32 = 1;
    /// Path does not exist.
    pub const NO_SUCH_FILE: u32 = 2;
    /// Insufficient rights.
    pub const PERMISSION_DENIED: u32 = 3;
    /// Catch-all failure.
    pub const FAILURE: u32 = 4;
    /// Malformed request.
    pub const BAD_MESSAGE: u32 = 5;
    /// No SFTP connection.
    pub const NO_CONNECTION: u32 = 6;
    /// Connection to the server was lost.
    pub const CONNECTION_LOST: u32 = 7;
    /// Operation unsupported by the server.
    pub const OP_UNSUPPORTED: u32 = 8;
}

/// File attributes as carried by SFTP v3 messages.
///
/// Fields are optional; the wire encoding carries a flag word naming which
/// are present. Absent fields are `None` after decoding and omitted when
/// encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SftpAttributes {
    /// File size in bytes.
    pub size: Option<u64>,
    /// Owner uid.
    pub uid: Option<u32>,
    /// Owner gid.
    pub gid: Option<u32>,
    /// POSIX permission bits (including the file type bits).
    pub permissions: Option<u32>,
    /// Access time, seconds since the epoch.
    pub atime: Option<u32>,
    /// Modification time, seconds since the epoch.
    pub mtime: Option<u32>,
}

impl SftpAttributes {
    /// Encodes the attributes with their presence flag word.
    pub fn encode(&self, buf: &mut impl BufMut) {
        let mut flags = 0u32;
        if self.size.is_some() {
            flags |= attr_flags::SIZE;
        }
        if self.uid.is_some() || self.gid.is_some() {
            flags |= attr_flags::UIDGID;
        }
        if self.permissions.is_some() {
            flags |= attr_flags::PERMISSIONS;
        }
        if self.atime.is_some() || self.mtime.is_some() {
            flags |= attr_flags::ACMODTIME;
        }
        buf.put_u32(flags);
        if let Some(size) = self.size {
            buf.put_u64(size);
        }
        if flags & attr_flags::UIDGID != 0 {
            buf.put_u32(self.uid.unwrap_or(0));
            buf.put_u32(self.gid.unwrap_or(0));
        }
        if let Some(perm) = self.permissions {
            buf.put_u32(perm);
        }
        if flags & attr_flags::ACMODTIME != 0 {
            buf.put_u32(self.atime.unwrap_or(0));
            buf.put_u32(self.mtime.unwrap_or(0));
        }
    }

    /// Decodes attributes, tolerating flag bits this version does not know.
    pub fn decode(buf: &mut impl Buf) -> HawserResult<Self> {
        let flags = wire::get_u32(buf)?;
        let mut attrs = Self::default();
        if flags & attr_flags::SIZE != 0 {
            attrs.size = Some(wire::get_u64(buf)?);
        }
        if flags & attr_flags::UIDGID != 0 {
            attrs.uid = Some(wire::get_u32(buf)?);
            attrs.gid = Some(wire::get_u32(buf)?);
        }
        if flags & attr_flags::PERMISSIONS != 0 {
            attrs.permissions = Some(wire::get_u32(buf)?);
        }
        if flags & attr_flags::ACMODTIME != 0 {
            attrs.atime = Some(wire::get_u32(buf)?);
            attrs.mtime = Some(wire::get_u32(buf)?);
        }
        Ok(attrs)
    }

    /// True if the permission bits mark a directory.
    pub fn is_dir(&self) -> bool {
        self.permissions
            .map(|p| p & 0o170000 == 0o040000)
            .unwrap_or(false)
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Bare file name.
    pub filename: String,
    /// `ls -l` style long name, as produced by the server.
    pub longname: String,
    /// Entry attributes.
    pub attrs: SftpAttributes,
}
