//! Treasure manager client
//!
//! Session lifecycle (create, resume, destroy) and the resource commands run
//! inside a session. Every call is one request/response round trip on the
//! owned [`Connection`].
//!
//! Where the manager reports its status differs per command and is part of
//! the wire contract:
//!
//! | call | slot 0 | slot 1 | status |
//! |---|---|---|---|
//! | create_session | memref out (256) | value out | slot 1 |
//! | resume_session | memref in (256) | value out | slot 1 |
//! | destroy_session | value out | none | slot 0 |
//! | open | memref in (256) | value out | slot 1 |
//! | store | memref in (len) | value out | slot 1 |
//! | retrieve | memref out (n) | value out | slot 1 |
//! | map / check / close | value out | none | slot 0 |

use std::fmt;

use bytes::Bytes;
use thiserror::Error;

use super::connection::{Connection, ConnectionError};
use super::Transport;
use crate::protocol::{
    CodecError, Command, Direction, Frame, Message, Param, SessionCommand, PRIVATE_ID_LEN,
    PRIVATE_ID_OFFSET, PUBLIC_ID_LEN, SCRATCH_SIZE,
};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("No active session")]
    NoActiveSession,

    #[error("Session already active")]
    SessionAlreadyActive,

    #[error("Invalid resource name: {0}")]
    InvalidResourceName(String),

    #[error("Invalid session credentials: {0}")]
    InvalidCredentials(String),

    #[error("Manager returned status {0}")]
    RemoteStatus(u64),
}

impl From<CodecError> for ClientError {
    fn from(e: CodecError) -> Self {
        ClientError::Connection(ConnectionError::Protocol(e))
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Status code reported by the manager, passed through uninterpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(u64);

impl Status {
    pub fn new(code: u64) -> Self {
        Status(code)
    }

    pub fn code(self) -> u64 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Turn a nonzero status into [`ClientError::RemoteStatus`]
    pub fn into_result(self) -> ClientResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(ClientError::RemoteStatus(self.0))
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The public/private id pair that names a session on the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    public_id: [u8; PUBLIC_ID_LEN],
    private_id: [u8; PRIVATE_ID_LEN],
}

impl SessionCredentials {
    /// Build credentials from stored bytes, checking their fixed lengths
    pub fn new(public_id: &[u8], private_id: &[u8]) -> ClientResult<Self> {
        let public_id: [u8; PUBLIC_ID_LEN] = public_id.try_into().map_err(|_| {
            ClientError::InvalidCredentials(format!(
                "public id must be {} bytes, got {}",
                PUBLIC_ID_LEN,
                public_id.len()
            ))
        })?;
        let private_id: [u8; PRIVATE_ID_LEN] = private_id.try_into().map_err(|_| {
            ClientError::InvalidCredentials(format!(
                "private id must be {} bytes, got {}",
                PRIVATE_ID_LEN,
                private_id.len()
            ))
        })?;

        if public_id.contains(&0) || private_id.contains(&0) {
            return Err(ClientError::InvalidCredentials(
                "ids must not contain NUL bytes".to_string(),
            ));
        }

        Ok(Self {
            public_id,
            private_id,
        })
    }

    /// Extract the ids from the scratch buffer returned on session creation.
    /// They must pass the same checks as [`SessionCredentials::new`].
    fn from_scratch(scratch: &[u8]) -> ClientResult<Self> {
        if scratch.len() < PRIVATE_ID_OFFSET + PRIVATE_ID_LEN {
            return Err(ClientError::InvalidCredentials(format!(
                "scratch buffer too short: {} bytes",
                scratch.len()
            )));
        }

        Self::new(
            &scratch[..PUBLIC_ID_LEN],
            &scratch[PRIVATE_ID_OFFSET..PRIVATE_ID_OFFSET + PRIVATE_ID_LEN],
        )
    }

    /// `public || NUL || private || NUL`, zero-padded to the scratch size
    pub fn to_scratch(&self) -> [u8; SCRATCH_SIZE] {
        let mut scratch = [0u8; SCRATCH_SIZE];
        scratch[..PUBLIC_ID_LEN].copy_from_slice(&self.public_id);
        scratch[PRIVATE_ID_OFFSET..PRIVATE_ID_OFFSET + PRIVATE_ID_LEN]
            .copy_from_slice(&self.private_id);
        scratch
    }

    pub fn public_id(&self) -> &[u8] {
        &self.public_id
    }

    pub fn private_id(&self) -> &[u8] {
        &self.private_id
    }
}

/// Session state of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    Active,
}

/// A session-capable client that exclusively owns its connection
pub struct Client<S> {
    connection: Connection<S>,
    state: SessionState,
}

impl<S: Transport> Client<S> {
    pub fn new(connection: Connection<S>) -> Self {
        Self {
            connection,
            state: SessionState::NoSession,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn connection(&self) -> &Connection<S> {
        &self.connection
    }

    pub fn into_connection(self) -> Connection<S> {
        self.connection
    }

    /// Create a new session.
    ///
    /// Credentials are only returned on a zero status.
    pub async fn create_session(&mut self) -> ClientResult<(Status, Option<SessionCredentials>)> {
        self.ensure_idle()?;

        let request = Frame::new(Message::session(
            SessionCommand::Open,
            [
                Param::memref(Direction::Output, SCRATCH_SIZE as u64),
                Param::value_output(),
            ],
        ));
        let reply = self.connection.call(&request).await?;
        let status = status_in(&reply, 1)?;

        if !status.is_success() {
            tracing::debug!("Session creation refused with status {}", status);
            return Ok((status, None));
        }

        let credentials = SessionCredentials::from_scratch(reply.payload(0))?;
        self.state = SessionState::Active;
        tracing::info!(
            "Session {} created",
            String::from_utf8_lossy(credentials.public_id())
        );

        Ok((status, Some(credentials)))
    }

    /// Resume a session created earlier
    pub async fn resume_session(&mut self, credentials: &SessionCredentials) -> ClientResult<Status> {
        self.ensure_idle()?;

        let request = Frame::new(Message::session(
            SessionCommand::Open,
            [
                Param::memref(Direction::Input, SCRATCH_SIZE as u64),
                Param::value_output(),
            ],
        ))
        .with_payload(0, Bytes::copy_from_slice(&credentials.to_scratch()));

        let reply = self.connection.call(&request).await?;
        let status = status_in(&reply, 1)?;

        if status.is_success() {
            self.state = SessionState::Active;
            tracing::info!(
                "Session {} resumed",
                String::from_utf8_lossy(credentials.public_id())
            );
        } else {
            tracing::debug!("Session resume refused with status {}", status);
        }

        Ok(status)
    }

    /// Destroy the active session. The client leaves the session whatever
    /// the outcome.
    pub async fn destroy_session(&mut self) -> ClientResult<Status> {
        self.ensure_active()?;
        self.state = SessionState::NoSession;

        let request = Frame::new(Message::session(
            SessionCommand::Close,
            [Param::value_output(), Param::None],
        ));
        let reply = self.connection.call(&request).await?;
        let status = status_in(&reply, 0)?;

        tracing::info!("Session destroyed (status {})", status);
        Ok(status)
    }

    /// Select the resource `name` as the session's current target
    pub async fn open(&mut self, name: &[u8]) -> ClientResult<Status> {
        let scratch = name_scratch(name)?;
        let request = Frame::new(Message::invoke(
            Command::Open,
            [
                Param::memref(Direction::Input, SCRATCH_SIZE as u64),
                Param::value_output(),
            ],
        ))
        .with_payload(0, Bytes::copy_from_slice(&scratch));

        let reply = self.invoke(&request).await?;
        let status = status_in(&reply, 1)?;
        if status.is_success() {
            tracing::debug!("Opened {}", String::from_utf8_lossy(name));
        }
        Ok(status)
    }

    /// Write `data` into the open resource
    pub async fn store(&mut self, data: &[u8]) -> ClientResult<Status> {
        let request = Frame::new(Message::invoke(
            Command::Store,
            [
                Param::memref(Direction::Input, data.len() as u64),
                Param::value_output(),
            ],
        ))
        .with_payload(0, Bytes::copy_from_slice(data));

        let reply = self.invoke(&request).await?;
        status_in(&reply, 1)
    }

    /// Read `len` bytes from the open resource.
    ///
    /// The manager always sends exactly `len` bytes; use [`Client::check`]
    /// first when the stored size is unknown.
    pub async fn retrieve(&mut self, len: usize) -> ClientResult<(Status, Bytes)> {
        let request = Frame::new(Message::invoke(
            Command::Retrieve,
            [
                Param::memref(Direction::Output, len as u64),
                Param::value_output(),
            ],
        ));

        let mut reply = self.invoke(&request).await?;
        let status = status_in(&reply, 1)?;
        Ok((status, std::mem::take(&mut reply.payloads[0])))
    }

    /// Ask the manager to render the aggregate map view
    pub async fn map(&mut self) -> ClientResult<Status> {
        self.invoke_status_only(Command::Map).await
    }

    /// Query the open resource. The returned value is the manager's raw
    /// answer: a size for the map flow, a failure indicator elsewhere.
    pub async fn check(&mut self) -> ClientResult<u64> {
        Ok(self.invoke_status_only(Command::Check).await?.code())
    }

    /// Release the open resource
    pub async fn close(&mut self) -> ClientResult<Status> {
        self.invoke_status_only(Command::Close).await
    }

    async fn invoke_status_only(&mut self, command: Command) -> ClientResult<Status> {
        let request = Frame::new(Message::invoke(
            command,
            [Param::value_output(), Param::None],
        ));
        let reply = self.invoke(&request).await?;
        status_in(&reply, 0)
    }

    async fn invoke(&mut self, request: &Frame) -> ClientResult<Frame> {
        self.ensure_active()?;
        let reply = self.connection.call(request).await?;
        Ok(reply)
    }

    fn ensure_active(&self) -> ClientResult<()> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::NoSession => Err(ClientError::NoActiveSession),
        }
    }

    fn ensure_idle(&self) -> ClientResult<()> {
        match self.state {
            SessionState::NoSession => Ok(()),
            SessionState::Active => Err(ClientError::SessionAlreadyActive),
        }
    }
}

fn status_in(reply: &Frame, slot: usize) -> ClientResult<Status> {
    let (a, _) = reply.message.param(slot).as_value()?;
    Ok(Status::new(a))
}

/// Resource names travel NUL-terminated in the scratch buffer
fn name_scratch(name: &[u8]) -> ClientResult<[u8; SCRATCH_SIZE]> {
    if name.is_empty() {
        return Err(ClientError::InvalidResourceName("empty name".to_string()));
    }
    if name.len() >= SCRATCH_SIZE {
        return Err(ClientError::InvalidResourceName(format!(
            "name is {} bytes, limit is {}",
            name.len(),
            SCRATCH_SIZE - 1
        )));
    }
    if name.contains(&0) {
        return Err(ClientError::InvalidResourceName(
            "name contains a NUL byte".to_string(),
        ));
    }

    let mut scratch = [0u8; SCRATCH_SIZE];
    scratch[..name.len()].copy_from_slice(name);
    Ok(scratch)
}
