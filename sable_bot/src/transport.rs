use crate::{ThrottleSettings, Throttler, TransportError};

use async_trait::async_trait;
use std::{net::SocketAddr, time::Duration};
use tokio::time::Instant;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        lookup_host,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// The outcome of one bounded wait for input
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete line, without its terminator
    Line(String),
    /// Nothing arrived before the timeout
    Empty,
    /// The connection is finished
    Closed(TransportError),
}

/// The connection to the server.
///
/// There is only ever one live connection per transport; `reset` discards it so
/// that the supervisor can connect again.
#[async_trait]
pub trait Transport: Send {
    async fn resolve(
        &mut self,
        address: &str,
        port: u16,
    ) -> Result<Vec<SocketAddr>, TransportError>;

    async fn connect(&mut self, addrs: &[SocketAddr]) -> Result<(), TransportError>;

    async fn send_line(&mut self, line: &str) -> Result<(), TransportError>;

    /// Wait at most `timeout` for the next line. Must be safe to call again after
    /// returning [`ReadOutcome::Empty`] without losing partially received data.
    async fn read_line(&mut self, timeout: Duration) -> ReadOutcome;

    fn is_connected(&self) -> bool;

    fn reset(&mut self);
}

/// A plain TCP connection carrying CRLF-terminated lines
pub struct TcpTransport {
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<OwnedWriteHalf>,
    // Bytes of a line that has not been completely received yet
    pending: Vec<u8>,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self {
            reader: None,
            writer: None,
            pending: Vec::new(),
            connect_timeout,
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    #[tracing::instrument(skip(self))]
    async fn resolve(
        &mut self,
        address: &str,
        port: u16,
    ) -> Result<Vec<SocketAddr>, TransportError> {
        let addrs: Vec<_> = lookup_host((address, port))
            .await
            .map_err(|e| TransportError::Resolve(address.to_string(), e))?
            .collect();

        if addrs.is_empty() {
            return Err(TransportError::NoAddresses(address.to_string()));
        }

        tracing::debug!(?addrs, "Resolved");
        Ok(addrs)
    }

    async fn connect(&mut self, addrs: &[SocketAddr]) -> Result<(), TransportError> {
        let mut last_error = None;

        for addr in addrs {
            tracing::info!("Connecting to {}", addr);

            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    let (reader, writer) = stream.into_split();
                    self.reader = Some(BufReader::new(reader));
                    self.writer = Some(writer);
                    self.pending.clear();
                    return Ok(());
                }
                Ok(Err(e)) => {
                    tracing::warn!("Connection to {} failed: {}", addr, e);
                    last_error = Some(TransportError::Connect(e));
                }
                Err(_) => {
                    tracing::warn!("Connection to {} timed out", addr);
                    last_error = Some(TransportError::ConnectTimeout);
                }
            }
        }

        Err(last_error.unwrap_or(TransportError::NotConnected))
    }

    async fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::NotConnected)?;

        let mut bytes = Vec::with_capacity(line.len() + 2);
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(b"\r\n");

        writer.write_all(&bytes).await?;
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> ReadOutcome {
        let Some(reader) = self.reader.as_mut() else {
            return ReadOutcome::Closed(TransportError::NotConnected);
        };

        // read_until appends to `pending`, so a timeout here loses nothing
        match tokio::time::timeout(timeout, reader.read_until(b'\n', &mut self.pending)).await {
            Err(_) => ReadOutcome::Empty,
            Ok(Ok(0)) => ReadOutcome::Closed(TransportError::Closed),
            Ok(Ok(_)) => {
                if self.pending.last() != Some(&b'\n') {
                    // EOF in the middle of a line
                    return ReadOutcome::Closed(TransportError::Closed);
                }
                let bytes = std::mem::take(&mut self.pending);
                let line = String::from_utf8_lossy(&bytes);
                ReadOutcome::Line(line.trim_end_matches(['\r', '\n']).to_string())
            }
            Ok(Err(e)) => ReadOutcome::Closed(TransportError::Io(e)),
        }
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    fn reset(&mut self) {
        self.reader = None;
        self.writer = None;
        self.pending.clear();
    }
}

/// One live connection: the transport plus its per-connection throttle queue
pub struct Connection<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    throttler: Throttler,
}

impl<'a, T: Transport + ?Sized> Connection<'a, T> {
    pub fn new(transport: &'a mut T, throttle: ThrottleSettings) -> Self {
        Self {
            transport,
            throttler: Throttler::new(throttle),
        }
    }

    pub fn transport(&mut self) -> &mut T {
        &mut *self.transport
    }

    pub fn throttler(&self) -> &Throttler {
        &self.throttler
    }

    /// Queue a line behind the throttle and send whatever the bucket permits now
    pub async fn send_throttled(&mut self, line: String) -> Result<(), TransportError> {
        self.throttler.enqueue(line);
        self.flush_ready().await?;
        Ok(())
    }

    /// Send queued lines until the queue is empty or the bucket is full.
    ///
    /// Returns how many lines were sent.
    pub async fn flush_ready(&mut self) -> Result<usize, TransportError> {
        let mut sent = 0;
        while let Some(line) = self.throttler.pop_permitted(Instant::now()) {
            self.transport.send_line(&line).await?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Lines still waiting for the bucket
    pub fn queued(&self) -> usize {
        self.throttler.queued()
    }

    /// How long until the next queued line may be sent, if any are queued
    pub fn throttle_wait(&self) -> Option<Duration> {
        self.throttler.next_permitted_in(Instant::now())
    }

    /// Send a line straight to the transport, ahead of anything queued
    pub async fn send_immediate(&mut self, line: &str) -> Result<(), TransportError> {
        self.transport.send_line(line).await
    }

    pub async fn read_line(&mut self, timeout: Duration) -> ReadOutcome {
        self.transport.read_line(timeout).await
    }
}
