//! SFTP v3 over a dedicated session channel.
//!
//! SFTP runs as the "sftp" subsystem on its own channel:
//!
//! ```text
//! Client                          Server
//!   |-- channel open ------------->|
//!   |-- subsystem "sftp" --------->|
//!   |-- SSH_FXP_INIT ------------->|
//!   |<- SSH_FXP_VERSION -----------|
//!   |                              |
//!   |-- SSH_FXP_OPEN ------------->|
//!   |<- SSH_FXP_HANDLE ------------|
//!   |-- SSH_FXP_READ ------------->|
//!   |<- SSH_FXP_DATA --------------|
//!   |-- SSH_FXP_CLOSE ------------>|
//!   |<- SSH_FXP_STATUS ------------|
//! ```
//!
//! The client issues one request at a time and correlates the response by
//! request id. All calls follow the session layer's non-blocking retry
//! contract; a retried call resumes its in-flight request, it never sends
//! it twice.

mod client;
mod message;
mod types;

pub use client::{Sftp, SftpHandle};
pub use message::SFTP_VERSION;
pub use types::{attr_flags, open_flags, status, DirEntry, SftpAttributes};
