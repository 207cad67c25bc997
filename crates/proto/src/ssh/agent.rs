//! SSH agent client.
//!
//! Speaks the ssh-agent wire protocol over a caller-provided stream (a Unix
//! socket to `$SSH_AUTH_SOCK`, or a pipe equivalent). The agent lists the
//! identities it holds and signs authentication challenges with keys that
//! never leave the agent process.
//!
//! Failures here are authentication-class: a refused signature carries
//! [`code::AUTH_FAILED`], while a broken or misbehaving agent connection
//! carries [`code::AGENT_PROTOCOL`] so callers can tell "bad credential"
//! from "no usable agent".

use crate::ssh::backend::RawError;
use crate::ssh::session::Session;
use crate::ssh::wire;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use hawser_platform::{code, HawserError, HawserResult};
use std::io::{Read, Write};
use tracing::debug;

const SSH_AGENT_FAILURE: u8 = 5;
const SSH_AGENTC_REQUEST_IDENTITIES: u8 = 11;
const SSH_AGENT_IDENTITIES_ANSWER: u8 = 12;
const SSH_AGENTC_SIGN_REQUEST: u8 = 13;
const SSH_AGENT_SIGN_RESPONSE: u8 = 14;

/// One public key held by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    /// Public key blob in SSH wire format.
    pub blob: Vec<u8>,
    /// Human-readable comment, typically the key's origin.
    pub comment: String,
}

/// A connection to a running SSH agent.
pub struct Agent<S> {
    stream: Option<S>,
    identities: Vec<AgentIdentity>,
}

impl<S: Read + Write> Agent<S> {
    /// Wraps an established agent connection.
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
            identities: Vec::new(),
        }
    }

    /// Asks the agent for its identities, replacing any cached list.
    pub fn list_identities(&mut self) -> HawserResult<()> {
        let mut packet = BytesMut::new();
        packet.put_u8(SSH_AGENTC_REQUEST_IDENTITIES);
        let (rtype, mut payload) = self.request(&packet)?;
        if rtype != SSH_AGENT_IDENTITIES_ANSWER {
            return Err(protocol_violation(format!(
                "expected identities answer, got message type {rtype}"
            )));
        }
        let count = wire::get_u32(&mut payload).map_err(reframe)?;
        let mut identities = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let blob = wire::get_string(&mut payload).map_err(reframe)?;
            let comment = wire::get_text(&mut payload).map_err(reframe)?;
            identities.push(AgentIdentity { blob, comment });
        }
        debug!(count = identities.len(), "agent identities listed");
        self.identities = identities;
        Ok(())
    }

    /// The identities from the last [`list_identities`](Agent::list_identities).
    pub fn identities(&self) -> &[AgentIdentity] {
        &self.identities
    }

    /// Asks the agent to sign `data` with the given identity's key.
    pub fn sign(&mut self, identity: &AgentIdentity, data: &[u8]) -> HawserResult<Vec<u8>> {
        let mut packet = BytesMut::new();
        packet.put_u8(SSH_AGENTC_SIGN_REQUEST);
        wire::put_string(&mut packet, &identity.blob);
        wire::put_string(&mut packet, data);
        packet.put_u32(0);
        let (rtype, mut payload) = self.request(&packet)?;
        match rtype {
            SSH_AGENT_SIGN_RESPONSE => wire::get_string(&mut payload).map_err(reframe),
            SSH_AGENT_FAILURE => Err(HawserError::auth(
                code::AUTH_FAILED,
                "agent refused to sign with this identity",
            )),
            other => Err(protocol_violation(format!(
                "expected sign response, got message type {other}"
            ))),
        }
    }

    /// Authenticates `session` as `username` using one agent identity: the
    /// session runs the public-key exchange and delegates the signature to
    /// this agent.
    pub fn authenticate(
        &mut self,
        username: &str,
        identity: &AgentIdentity,
        session: &mut Session,
    ) -> HawserResult<()> {
        let identity = identity.clone();
        let mut sign = |data: &[u8]| -> Result<Vec<u8>, RawError> {
            self.sign(&identity, data)
                .map_err(|err| RawError::new(err.code(), err.message()))
        };
        session.userauth_publickey_with(username, &identity.blob, &mut sign)
    }

    /// Drops the agent connection. The cached identity list survives but
    /// signing requests will fail.
    pub fn disconnect(&mut self) {
        self.stream = None;
    }

    /// One framed request/response exchange: `u32 length | u8 type | body`.
    fn request(&mut self, payload: &[u8]) -> HawserResult<(u8, Bytes)> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| HawserError::auth(code::AGENT_PROTOCOL, "agent is disconnected"))?;

        let mut framed = BytesMut::with_capacity(4 + payload.len());
        framed.put_u32(payload.len() as u32);
        framed.put_slice(payload);
        stream.write_all(&framed).map_err(io_error)?;
        stream.flush().map_err(io_error)?;

        let mut len_bytes = [0u8; 4];
        stream.read_exact(&mut len_bytes).map_err(io_error)?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len == 0 || len > MAX_AGENT_REPLY {
            return Err(protocol_violation(format!("invalid agent reply length {len}")));
        }
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).map_err(io_error)?;
        let mut body = Bytes::from(body);
        let rtype = body.get_u8();
        Ok((rtype, body))
    }
}

const MAX_AGENT_REPLY: usize = 256 * 1024;

fn io_error(err: std::io::Error) -> HawserError {
    if err.kind() == std::io::ErrorKind::WouldBlock {
        return HawserError::incomplete();
    }
    HawserError::auth(
        code::AGENT_PROTOCOL,
        format!("agent connection failed: {err}"),
    )
}

fn protocol_violation(message: String) -> HawserError {
    HawserError::auth(code::AGENT_PROTOCOL, message)
}

/// Wire decode errors surface as agent protocol failures, not session-fatal
/// protocol errors: the agent connection is separate from the transport.
fn reframe(err: HawserError) -> HawserError {
    HawserError::auth(code::AGENT_PROTOCOL, err.message().to_string())
}
