//! Connection handling for the treasure manager
//!
//! A [`Connection`] owns its stream exclusively and performs one strict
//! request/response exchange at a time:
//! - write the request header and its input payloads
//! - read the 38-byte response header
//! - read every output payload the request declared
//!
//! There is no resynchronization. Once any read or write fails the
//! connection is latched as desynchronized and refuses further calls.

use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::Transport;
use crate::protocol::{self, CodecError, Frame, Message, HEADER_SIZE, NUM_PARAMS};

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),

    #[error("Stream closed before the expected bytes arrived")]
    EndOfStream,

    #[error("Connection timeout")]
    Timeout,

    #[error("Failed to spawn manager: {0}")]
    Spawn(#[source] io::Error),

    #[error("Response does not match request: {0}")]
    ResponseMismatch(String),

    #[error("Connection is desynchronized after an earlier failure")]
    Desynchronized,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// State of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Frame boundaries are intact, calls are allowed
    Ready,
    /// A read or write failed; the stream position is unknown
    Desynchronized,
}

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Requests fully written
    pub frames_sent: u64,
    /// Responses fully read
    pub frames_received: u64,
    /// Bytes written, headers included
    pub bytes_sent: u64,
    /// Bytes read, headers included
    pub bytes_received: u64,
}

/// Exclusive owner of a stream to the manager
pub struct Connection<S> {
    stream: S,
    /// Write buffer
    write_buf: BytesMut,
    /// Deadline for each read or write
    io_timeout: Option<Duration>,
    state: ConnectionState,
    stats: ConnectionStats,
}

impl<S: Transport> Connection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            write_buf: BytesMut::with_capacity(HEADER_SIZE + protocol::SCRATCH_SIZE),
            io_timeout: None,
            state: ConnectionState::Ready,
            stats: ConnectionStats::default(),
        }
    }

    /// Bound every read and write by `timeout`; an expiry is fatal
    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Send one request and wait for its complete response.
    ///
    /// Encoding problems are caught before anything is written and leave the
    /// connection usable. Any failure after that latches it.
    pub async fn call(&mut self, request: &Frame) -> ConnectionResult<Frame> {
        if self.state == ConnectionState::Desynchronized {
            return Err(ConnectionError::Desynchronized);
        }

        self.write_buf.clear();
        protocol::encode_request(request, &mut self.write_buf)?;
        let output = protocol::output_lengths(&request.message)?;

        match self.exchange(&request.message, output).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                tracing::warn!(
                    "Exchange for {} failed, connection unusable: {}",
                    request.message.label(),
                    e
                );
                self.state = ConnectionState::Desynchronized;
                Err(e)
            }
        }
    }

    async fn exchange(
        &mut self,
        request: &Message,
        output: [usize; NUM_PARAMS],
    ) -> ConnectionResult<Frame> {
        tracing::debug!(
            "-> {} types={:#06x} bytes={}",
            request.label(),
            request.param_types(),
            self.write_buf.len()
        );

        with_deadline(self.io_timeout, async {
            self.stream.write_all(&self.write_buf).await?;
            self.stream.flush().await
        })
        .await?;
        self.stats.frames_sent += 1;
        self.stats.bytes_sent += self.write_buf.len() as u64;

        let mut header = [0u8; HEADER_SIZE];
        with_deadline(self.io_timeout, self.stream.read_exact(&mut header)).await?;
        self.stats.bytes_received += HEADER_SIZE as u64;

        let message = protocol::decode_header(&header)?;
        check_response(request, &message)?;

        let mut reply = Frame::new(message);
        for (slot, len) in output.into_iter().enumerate() {
            if len == 0 {
                continue;
            }
            let mut payload = vec![0u8; len];
            with_deadline(self.io_timeout, self.stream.read_exact(&mut payload)).await?;
            self.stats.bytes_received += len as u64;
            reply.payloads[slot] = Bytes::from(payload);
        }
        self.stats.frames_received += 1;

        tracing::debug!(
            "<- {} payload={:?}",
            reply.message.label(),
            output
        );

        Ok(reply)
    }

    /// Give up the stream, e.g. to tear down a spawned manager
    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// The manager echoes the request header, memref sizes included; anything
/// else means the two sides disagree about frame boundaries.
fn check_response(request: &Message, response: &Message) -> ConnectionResult<()> {
    if response.session_command != request.session_command {
        return Err(ConnectionError::ResponseMismatch(format!(
            "session command {:?}, expected {:?}",
            response.session_command, request.session_command
        )));
    }
    if response.command != request.command {
        return Err(ConnectionError::ResponseMismatch(format!(
            "command {:?}, expected {:?}",
            response.command, request.command
        )));
    }
    if response.param_types() != request.param_types() {
        return Err(ConnectionError::ResponseMismatch(format!(
            "parameter types {:#06x}, expected {:#06x}",
            response.param_types(),
            request.param_types()
        )));
    }
    for (slot, (sent, received)) in request.params.iter().zip(&response.params).enumerate() {
        if sent.output_len() != received.output_len() {
            return Err(ConnectionError::ResponseMismatch(format!(
                "slot {} declares {} output bytes, expected {}",
                slot,
                received.output_len(),
                sent.output_len()
            )));
        }
    }
    Ok(())
}

async fn with_deadline<F, T>(timeout: Option<Duration>, io: F) -> ConnectionResult<T>
where
    F: Future<Output = io::Result<T>>,
{
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, io)
            .await
            .map_err(|_| ConnectionError::Timeout)?,
        None => io.await,
    };

    result.map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => ConnectionError::EndOfStream,
        _ => ConnectionError::Io(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, Direction, Param, SessionCommand};
    use tokio_test::io::Builder;

    fn encode(frame: &Frame) -> Vec<u8> {
        let mut buf = BytesMut::new();
        protocol::encode_request(frame, &mut buf).unwrap();
        buf.to_vec()
    }

    fn response_bytes(message: &Message) -> Vec<u8> {
        let mut buf = BytesMut::new();
        protocol::encode_header(message, &mut buf);
        buf.to_vec()
    }

    #[tokio::test]
    async fn test_call_reads_declared_output() {
        let request = Frame::new(Message::invoke(
            Command::Retrieve,
            [Param::memref(Direction::Output, 4), Param::value_output()],
        ));
        let mut response = response_bytes(&request.message);
        response.extend_from_slice(b"gold");

        let mock = Builder::new()
            .write(&encode(&request))
            .read(&response[..10])
            .read(&response[10..])
            .build();
        let mut conn = Connection::new(mock);

        let reply = conn.call(&request).await.unwrap();
        assert_eq!(reply.payload(0).as_ref(), b"gold");
        assert!(reply.payload(1).is_empty());
        assert_eq!(conn.stats().frames_sent, 1);
        assert_eq!(conn.stats().frames_received, 1);
        assert_eq!(conn.stats().bytes_received, (HEADER_SIZE + 4) as u64);
    }

    #[tokio::test]
    async fn test_truncated_payload_is_end_of_stream() {
        let request = Frame::new(Message::invoke(
            Command::Retrieve,
            [Param::memref(Direction::Output, 8), Param::value_output()],
        ));
        let mut response = response_bytes(&request.message);
        response.extend_from_slice(b"half");

        let mock = Builder::new()
            .write(&encode(&request))
            .read(&response)
            .build();
        let mut conn = Connection::new(mock);

        let err = conn.call(&request).await.unwrap_err();
        assert!(matches!(err, ConnectionError::EndOfStream));
        assert_eq!(conn.state(), ConnectionState::Desynchronized);

        // Latched: nothing more is written
        let err = conn.call(&request).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Desynchronized));
    }

    #[tokio::test]
    async fn test_truncated_header_is_end_of_stream() {
        let request = Frame::new(Message::session(
            SessionCommand::Close,
            [Param::value_output(), Param::None],
        ));
        let response = response_bytes(&request.message);

        let mock = Builder::new()
            .write(&encode(&request))
            .read(&response[..HEADER_SIZE - 1])
            .build();
        let mut conn = Connection::new(mock);

        assert!(matches!(
            conn.call(&request).await,
            Err(ConnectionError::EndOfStream)
        ));
    }

    #[tokio::test]
    async fn test_mismatched_response_latches() {
        let request = Frame::new(Message::invoke(
            Command::Map,
            [Param::value_output(), Param::None],
        ));
        let other = Message::invoke(Command::Check, [Param::value_output(), Param::None]);

        let mock = Builder::new()
            .write(&encode(&request))
            .read(&response_bytes(&other))
            .build();
        let mut conn = Connection::new(mock);

        assert!(matches!(
            conn.call(&request).await,
            Err(ConnectionError::ResponseMismatch(_))
        ));
        assert_eq!(conn.state(), ConnectionState::Desynchronized);
    }

    #[tokio::test]
    async fn test_resized_output_is_rejected() {
        let request = Frame::new(Message::invoke(
            Command::Retrieve,
            [Param::memref(Direction::Output, 5), Param::value_output()],
        ));
        let shrunk = Message::invoke(
            Command::Retrieve,
            [Param::memref(Direction::Output, 2), Param::value_output()],
        );

        // Nothing past the header may be consumed
        let mock = Builder::new()
            .write(&encode(&request))
            .read(&response_bytes(&shrunk))
            .build();
        let mut conn = Connection::new(mock);

        assert!(matches!(
            conn.call(&request).await,
            Err(ConnectionError::ResponseMismatch(_))
        ));
        assert_eq!(conn.state(), ConnectionState::Desynchronized);
        assert_eq!(conn.stats().frames_received, 0);
    }

    #[tokio::test]
    async fn test_malformed_response_header_latches() {
        let request = Frame::new(Message::invoke(
            Command::Map,
            [Param::value_output(), Param::None],
        ));

        let mut reserved = response_bytes(&request.message);
        reserved[5] = 0x01;
        let mut unknown_tag = response_bytes(&request.message);
        unknown_tag[4] = 0x04;

        for response in [reserved, unknown_tag] {
            let mock = Builder::new()
                .write(&encode(&request))
                .read(&response)
                .build();
            let mut conn = Connection::new(mock);

            assert!(matches!(
                conn.call(&request).await,
                Err(ConnectionError::Protocol(CodecError::MalformedHeader(_)))
            ));
            assert_eq!(conn.state(), ConnectionState::Desynchronized);
        }
    }

    #[tokio::test]
    async fn test_local_encoding_error_keeps_connection() {
        let bad = Frame::new(Message::invoke(
            Command::Store,
            [Param::memref(Direction::Input, 3), Param::value_output()],
        ));
        let mock = Builder::new().build();
        let mut conn = Connection::new(mock);

        let err = conn.call(&bad).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Protocol(CodecError::PayloadLengthMismatch { .. })
        ));
        assert_eq!(conn.state(), ConnectionState::Ready);
        assert_eq!(conn.stats().frames_sent, 0);
    }

    #[tokio::test]
    async fn test_read_deadline() {
        let request = Frame::new(Message::invoke(
            Command::Close,
            [Param::value_output(), Param::None],
        ));
        let mock = Builder::new()
            .write(&encode(&request))
            .wait(Duration::from_secs(5))
            .build();
        let mut conn = Connection::new(mock).with_io_timeout(Some(Duration::from_millis(20)));

        assert!(matches!(
            conn.call(&request).await,
            Err(ConnectionError::Timeout)
        ));
        assert_eq!(conn.state(), ConnectionState::Desynchronized);
    }
}
