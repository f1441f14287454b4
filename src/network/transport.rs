//! Transport provisioning
//!
//! The protocol runs over any ordered byte stream. Two are provided:
//! a TCP connection to the manager's port, or the stdin/stdout pipes of a
//! manager process spawned locally.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::connection::{ConnectionError, ConnectionResult};
use super::NetworkConfig;

/// Time a spawned manager gets to exit after being killed
const REAP_TIMEOUT: Duration = Duration::from_secs(3);

/// Any ordered, reliable, bidirectional byte stream
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Connect to the manager over TCP
pub async fn connect_tcp(config: &NetworkConfig) -> ConnectionResult<TcpStream> {
    let addr = super::resolve_host(&config.host, config.port).await?;

    tracing::info!("Connecting to {}", addr);

    let stream = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(addr))
        .await
        .map_err(|_| ConnectionError::Timeout)??;
    stream.set_nodelay(true)?;

    Ok(stream)
}

/// A locally spawned manager, spoken to over its stdin and stdout
pub struct ProcessStream {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl ProcessStream {
    /// Spawn `program` with piped stdin/stdout. The manager keeps its data
    /// relative to its working directory, which defaults to the directory
    /// containing the executable.
    pub fn spawn(program: &Path, working_dir: Option<&Path>) -> ConnectionResult<Self> {
        let mut command = Command::new(program);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let dir = working_dir.or_else(|| program.parent().filter(|p| !p.as_os_str().is_empty()));
        if let Some(dir) = dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(ConnectionError::Spawn)?;
        let stdin = child.stdin.take().ok_or_else(|| {
            ConnectionError::Spawn(io::Error::new(io::ErrorKind::Other, "stdin not piped"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ConnectionError::Spawn(io::Error::new(io::ErrorKind::Other, "stdout not piped"))
        })?;

        tracing::info!("Spawned manager {} (pid {:?})", program.display(), child.id());

        Ok(Self {
            child,
            stdin,
            stdout,
        })
    }

    /// Close both pipes, kill the manager and reap it
    pub async fn terminate(self) -> ConnectionResult<()> {
        let Self {
            mut child,
            mut stdin,
            stdout,
        } = self;

        let _ = stdin.shutdown().await;
        drop(stdin);
        drop(stdout);

        child.start_kill()?;
        match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
            Ok(status) => {
                tracing::debug!("Manager exited: {}", status?);
                Ok(())
            }
            Err(_) => Err(ConnectionError::Timeout),
        }
    }
}

impl AsyncRead for ProcessStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for ProcessStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stdin).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdin).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdin).poll_shutdown(cx)
    }
}

/// The stream chosen by configuration
pub enum ManagerStream {
    Tcp(TcpStream),
    Process(ProcessStream),
}

impl ManagerStream {
    /// Spawn the configured executable, or connect over TCP when none is set
    pub async fn open(config: &NetworkConfig) -> ConnectionResult<Self> {
        match &config.executable {
            Some(program) => Ok(ManagerStream::Process(ProcessStream::spawn(
                program,
                config.working_dir.as_deref(),
            )?)),
            None => Ok(ManagerStream::Tcp(connect_tcp(config).await?)),
        }
    }

    /// Flush and close the stream, reaping a spawned manager
    pub async fn teardown(self) -> ConnectionResult<()> {
        match self {
            ManagerStream::Tcp(mut stream) => {
                stream.shutdown().await?;
                Ok(())
            }
            ManagerStream::Process(process) => process.terminate().await,
        }
    }
}

impl AsyncRead for ManagerStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ManagerStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            ManagerStream::Process(process) => Pin::new(process).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ManagerStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ManagerStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            ManagerStream::Process(process) => Pin::new(process).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ManagerStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            ManagerStream::Process(process) => Pin::new(process).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ManagerStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            ManagerStream::Process(process) => Pin::new(process).poll_shutdown(cx),
        }
    }
}
