//! Scripted backend double for session-layer tests.
//!
//! `MockState` holds per-call scripts (queues of results) and records what
//! the session layer asked the engine to do. Empty queues mean success, so
//! tests only script the interesting calls. The state is shared through an
//! `Rc<RefCell<..>>` so a test can keep scripting after the session has
//! taken ownership of the backend.

use crate::ssh::backend::{
    AuthOutcome, Backend, ChannelHandle, ChannelRequest, ExtendedDataMode, KeyboardInteractive,
    ListenerHandle, RawError, RawResult, ReadResult, ScpFileInfo, Signer,
};
use crate::ssh::session::Session;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

enum ReadItem {
    Data(Vec<u8>),
    Eof,
}

#[derive(Default)]
struct ChannelScript {
    reads: HashMap<u32, VecDeque<ReadItem>>,
    written: Vec<u8>,
    requests: Vec<String>,
    request_results: VecDeque<RawResult<()>>,
    close_results: VecDeque<RawResult<()>>,
    pending_grant: u64,
    peer_eof: bool,
    exit_status: i32,
}

#[derive(Default)]
struct ListenerScript {
    accept_results: VecDeque<RawResult<()>>,
    cancel_results: VecDeque<RawResult<()>>,
}

/// Shared scripting state behind a [`MockBackend`].
pub struct MockState {
    /// Scripted handshake outcomes; empty means immediate success.
    pub handshake_results: VecDeque<RawResult<()>>,
    /// Scripted auth outcomes; empty means `Complete`.
    pub auth_results: VecDeque<RawResult<AuthOutcome>>,
    /// Last blocking mode forwarded by the session.
    pub blocking: bool,
    /// Last timeout forwarded by the session.
    pub timeout: Duration,
    /// Host key reported after the handshake.
    pub host_key: (String, Vec<u8>),
    /// Send window for newly opened channels.
    pub initial_send_window: u64,
    /// Receive window for newly opened channels.
    pub initial_recv_window: u64,
    /// Max packet size for newly opened channels.
    pub max_packet: u32,
    /// Port reported when a forward request asks for port 0.
    pub assigned_forward_port: u16,
    channels: HashMap<u32, ChannelScript>,
    listeners: HashMap<u32, ListenerScript>,
    forward_pending: usize,
    next_channel_id: u32,
    next_listener_id: u32,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            handshake_results: VecDeque::new(),
            auth_results: VecDeque::new(),
            blocking: true,
            timeout: Duration::ZERO,
            host_key: ("ssh-ed25519".to_string(), vec![0x42; 32]),
            initial_send_window: 2 * 1024 * 1024,
            initial_recv_window: 2 * 1024 * 1024,
            max_packet: 32 * 1024,
            assigned_forward_port: 0,
            channels: HashMap::new(),
            listeners: HashMap::new(),
            forward_pending: 0,
            next_channel_id: 1,
            next_listener_id: 0,
        }
    }
}

impl MockState {
    /// The id the next opened channel will get.
    pub fn next_channel_id(&self) -> u32 {
        self.next_channel_id
    }

    /// Queues inbound data on a channel stream.
    pub fn push_read_data(&mut self, id: u32, stream: u32, data: Vec<u8>) {
        self.channels
            .entry(id)
            .or_default()
            .reads
            .entry(stream)
            .or_default()
            .push_back(ReadItem::Data(data));
    }

    /// Queues end-of-stream on a channel stream and marks peer EOF.
    pub fn push_read_eof(&mut self, id: u32, stream: u32) {
        let script = self.channels.entry(id).or_default();
        script.peer_eof = true;
        script.reads.entry(stream).or_default().push_back(ReadItem::Eof);
    }

    /// Simulates a peer window adjust granting `amount` send credit.
    pub fn grant_window(&mut self, id: u32, amount: u64) {
        self.channels.entry(id).or_default().pending_grant += amount;
    }

    /// Scripts the next channel request outcome (exec, pty, etc.).
    pub fn push_request_result(&mut self, id: u32, result: RawResult<()>) {
        self.channels
            .entry(id)
            .or_default()
            .request_results
            .push_back(result);
    }

    /// Scripts the next channel close outcome.
    pub fn push_close_result(&mut self, id: u32, result: RawResult<()>) {
        self.channels
            .entry(id)
            .or_default()
            .close_results
            .push_back(result);
    }

    /// Sets the exit status the peer reported for a channel.
    pub fn set_exit_status(&mut self, id: u32, status: i32) {
        self.channels.entry(id).or_default().exit_status = status;
    }

    /// Total bytes the session layer wrote to a channel.
    pub fn written_len(&self, id: u32) -> usize {
        self.channels.get(&id).map(|s| s.written.len()).unwrap_or(0)
    }

    /// Bytes the session layer wrote to a channel.
    pub fn written(&self, id: u32) -> &[u8] {
        self.channels
            .get(&id)
            .map(|s| s.written.as_slice())
            .unwrap_or(&[])
    }

    /// Request names issued on a channel, in order.
    pub fn requests(&self, id: u32) -> Vec<String> {
        self.channels
            .get(&id)
            .map(|s| s.requests.clone())
            .unwrap_or_default()
    }

    /// Queues one inbound forwarded connection for the next accept.
    pub fn queue_forward_connection(&mut self) {
        self.forward_pending += 1;
    }

    /// Scripts the next accept outcome for a listener. `Ok(())` stands for
    /// "no connection pending".
    pub fn push_accept_result(&mut self, id: u32, result: RawResult<()>) {
        self.listeners
            .entry(id)
            .or_default()
            .accept_results
            .push_back(result);
    }

    /// Scripts the next cancel outcome for a listener.
    pub fn push_cancel_result(&mut self, id: u32, result: RawResult<()>) {
        self.listeners
            .entry(id)
            .or_default()
            .cancel_results
            .push_back(result);
    }

    fn open_channel(&mut self) -> ChannelHandle {
        let id = self.next_channel_id;
        self.next_channel_id += 1;
        self.channels.entry(id).or_default();
        ChannelHandle {
            id,
            send_window: self.initial_send_window,
            recv_window: self.initial_recv_window,
            max_packet: self.max_packet,
        }
    }
}

/// A [`Backend`] whose behavior is driven entirely by a shared
/// [`MockState`].
pub struct MockBackend {
    state: Rc<RefCell<MockState>>,
}

impl MockBackend {
    /// Creates a backend over shared scripting state.
    pub fn new(state: Rc<RefCell<MockState>>) -> Self {
        Self { state }
    }
}

impl Backend for MockBackend {
    fn set_blocking(&mut self, blocking: bool) {
        self.state.borrow_mut().blocking = blocking;
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.state.borrow_mut().timeout = timeout;
    }

    fn handshake(&mut self) -> RawResult<()> {
        self.state
            .borrow_mut()
            .handshake_results
            .pop_front()
            .unwrap_or(Ok(()))
    }

    fn host_key(&self) -> RawResult<(String, Vec<u8>)> {
        Ok(self.state.borrow().host_key.clone())
    }

    fn auth_methods(&mut self, _username: &str) -> RawResult<Vec<String>> {
        Ok(vec!["password".to_string(), "publickey".to_string()])
    }

    fn auth_password(&mut self, _username: &str, _password: &str) -> RawResult<AuthOutcome> {
        self.next_auth()
    }

    fn auth_pubkey_file(
        &mut self,
        _username: &str,
        _pubkey: Option<&Path>,
        _privkey: &Path,
        _passphrase: Option<&str>,
    ) -> RawResult<AuthOutcome> {
        self.next_auth()
    }

    fn auth_pubkey_memory(
        &mut self,
        _username: &str,
        _pubkey: Option<&str>,
        _privkey: &str,
        _passphrase: Option<&str>,
    ) -> RawResult<AuthOutcome> {
        self.next_auth()
    }

    fn auth_hostbased(
        &mut self,
        _username: &str,
        _pubkey: &Path,
        _privkey: &Path,
        _passphrase: Option<&str>,
        _hostname: &str,
        _local_username: &str,
    ) -> RawResult<AuthOutcome> {
        self.next_auth()
    }

    fn auth_keyboard_interactive(
        &mut self,
        _username: &str,
        responder: &mut dyn KeyboardInteractive,
    ) -> RawResult<AuthOutcome> {
        let _ = responder.respond(
            "",
            "",
            &[crate::ssh::backend::Prompt {
                text: "Password: ".to_string(),
                echo: false,
            }],
        );
        self.next_auth()
    }

    fn auth_publickey_with(
        &mut self,
        _username: &str,
        _pubkey_blob: &[u8],
        sign: &mut Signer<'_>,
    ) -> RawResult<AuthOutcome> {
        let _signature = sign(b"challenge")?;
        self.next_auth()
    }

    fn disconnect(&mut self, _description: &str) -> RawResult<()> {
        Ok(())
    }

    fn shutdown(&mut self) {}

    fn channel_open(&mut self, _kind: &str, _params: &[u8]) -> RawResult<ChannelHandle> {
        Ok(self.state.borrow_mut().open_channel())
    }

    fn channel_request(&mut self, id: u32, request: &ChannelRequest<'_>) -> RawResult<()> {
        let mut state = self.state.borrow_mut();
        let script = state.channels.entry(id).or_default();
        let result = script.request_results.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            script.requests.push(request.name().to_string());
        }
        result
    }

    fn channel_read(&mut self, id: u32, stream: u32, max: usize) -> RawResult<ReadResult> {
        let mut state = self.state.borrow_mut();
        let script = state.channels.entry(id).or_default();
        let queue = script.reads.entry(stream).or_default();
        match queue.pop_front() {
            Some(ReadItem::Data(mut data)) => {
                if data.len() > max {
                    let rest = data.split_off(max);
                    queue.push_front(ReadItem::Data(rest));
                }
                Ok(ReadResult::Data(data))
            }
            Some(ReadItem::Eof) => Ok(ReadResult::Eof),
            None => Err(RawError::eagain()),
        }
    }

    fn channel_write(&mut self, id: u32, _stream: u32, data: &[u8]) -> RawResult<usize> {
        let mut state = self.state.borrow_mut();
        let script = state.channels.entry(id).or_default();
        script.written.extend_from_slice(data);
        Ok(data.len())
    }

    fn channel_take_window_grant(&mut self, id: u32) -> u64 {
        let mut state = self.state.borrow_mut();
        let script = state.channels.entry(id).or_default();
        std::mem::take(&mut script.pending_grant)
    }

    fn channel_receive_window_adjust(&mut self, _id: u32, _adjustment: u64) -> RawResult<()> {
        Ok(())
    }

    fn channel_handle_extended_data(&mut self, _id: u32, _mode: ExtendedDataMode) -> RawResult<()> {
        Ok(())
    }

    fn channel_send_eof(&mut self, _id: u32) -> RawResult<()> {
        Ok(())
    }

    fn channel_peer_eof(&self, id: u32) -> bool {
        self.state
            .borrow()
            .channels
            .get(&id)
            .map(|s| s.peer_eof)
            .unwrap_or(false)
    }

    fn channel_close(&mut self, id: u32) -> RawResult<()> {
        let mut state = self.state.borrow_mut();
        let script = state.channels.entry(id).or_default();
        script.close_results.pop_front().unwrap_or(Ok(()))
    }

    fn channel_free(&mut self, _id: u32) {}

    fn channel_exit_status(&self, id: u32) -> i32 {
        self.state
            .borrow()
            .channels
            .get(&id)
            .map(|s| s.exit_status)
            .unwrap_or(0)
    }

    fn scp_send(&mut self, _path: &str, _mode: u32, _size: u64) -> RawResult<ChannelHandle> {
        Ok(self.state.borrow_mut().open_channel())
    }

    fn scp_recv(&mut self, _path: &str) -> RawResult<(ChannelHandle, ScpFileInfo)> {
        let handle = self.state.borrow_mut().open_channel();
        Ok((
            handle,
            ScpFileInfo {
                mode: 0o644,
                size: 0,
                mtime: 0,
                atime: 0,
            },
        ))
    }

    fn listen(&mut self, _host: &str, port: u16) -> RawResult<ListenerHandle> {
        let mut state = self.state.borrow_mut();
        let id = state.next_listener_id;
        state.next_listener_id += 1;
        state.listeners.entry(id).or_default();
        let bound_port = if port != 0 {
            port
        } else {
            state.assigned_forward_port
        };
        Ok(ListenerHandle { id, bound_port })
    }

    fn listener_accept(&mut self, id: u32) -> RawResult<Option<ChannelHandle>> {
        let mut state = self.state.borrow_mut();
        if let Some(result) = state
            .listeners
            .entry(id)
            .or_default()
            .accept_results
            .pop_front()
        {
            return result.map(|_| None);
        }
        if state.forward_pending > 0 {
            state.forward_pending -= 1;
            return Ok(Some(state.open_channel()));
        }
        Ok(None)
    }

    fn listener_cancel(&mut self, id: u32) -> RawResult<()> {
        let mut state = self.state.borrow_mut();
        state
            .listeners
            .entry(id)
            .or_default()
            .cancel_results
            .pop_front()
            .unwrap_or(Ok(()))
    }
}

impl MockBackend {
    fn next_auth(&mut self) -> RawResult<AuthOutcome> {
        self.state
            .borrow_mut()
            .auth_results
            .pop_front()
            .unwrap_or(Ok(AuthOutcome::Complete))
    }
}

/// A fresh session over a scripted backend, plus the shared script state.
pub fn scripted_session() -> (Session, Rc<RefCell<MockState>>) {
    let state = Rc::new(RefCell::new(MockState::default()));
    let session = Session::new(MockBackend::new(Rc::clone(&state)));
    (session, state)
}

/// A session already handshaken and authenticated, for channel-level tests.
pub fn authenticated_session() -> (Session, Rc<RefCell<MockState>>) {
    let (mut session, state) = scripted_session();
    session.handshake().expect("scripted handshake");
    session
        .userauth_password("test", "test")
        .expect("scripted auth");
    (session, state)
}
