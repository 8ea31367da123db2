//! A communication channel used to send/receive messages to/from the other party.

use std::{future::Future, io, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::mpsc,
    time::timeout,
};
use tracing::{debug, info};

/// Errors related to sending / receiving messages over a [`Channel`].
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Binding, connecting, reading or writing failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// The other party did not respond in time.
    #[error("no response within {0:?}")]
    Timeout(Duration),
    /// A message exceeded the maximum frame size.
    #[error("frame of {size} bytes exceeds the limit of {max} bytes")]
    FrameTooLarge {
        /// Size of the offending frame.
        size: usize,
        /// The configured maximum.
        max: usize,
    },
    /// The channel was closed by either party.
    #[error("the channel has been closed")]
    Closed,
}

/// A bidirectional, message-oriented connection to the other party.
pub trait Channel {
    /// Sends a single message to the other party.
    fn send_bytes(&mut self, msg: Vec<u8>) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Awaits the next message from the other party.
    fn recv_bytes(&mut self) -> impl Future<Output = Result<Vec<u8>, ChannelError>> + Send;

    /// Closes the channel, after which no further messages can be sent.
    fn close(&mut self) -> impl Future<Output = Result<(), ChannelError>> + Send;
}

/// A TCP connection carrying messages prefixed by their length as a big-endian `u32`.
#[derive(Debug)]
pub struct TcpChannel {
    stream: TcpStream,
    timeout: Duration,
    max_frame: usize,
}

impl TcpChannel {
    /// Binds to `addr` and waits for exactly one peer to connect.
    pub async fn listen(
        addr: impl ToSocketAddrs,
        timeout: Duration,
        max_frame: usize,
    ) -> Result<Self, ChannelError> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {}", listener.local_addr()?);
        Self::accept(&listener, timeout, max_frame).await
    }

    /// Accepts exactly one peer on an already bound listener.
    pub async fn accept(
        listener: &TcpListener,
        timeout_after: Duration,
        max_frame: usize,
    ) -> Result<Self, ChannelError> {
        let (stream, peer) = timeout(timeout_after, listener.accept())
            .await
            .map_err(|_| ChannelError::Timeout(timeout_after))??;
        info!("accepted connection from {peer}");
        Self::from_stream(stream, timeout_after, max_frame)
    }

    /// Connects to a listening peer, without retrying.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        timeout_after: Duration,
        max_frame: usize,
    ) -> Result<Self, ChannelError> {
        let stream = timeout(timeout_after, TcpStream::connect(addr))
            .await
            .map_err(|_| ChannelError::Timeout(timeout_after))??;
        info!("connected to {}", stream.peer_addr()?);
        Self::from_stream(stream, timeout_after, max_frame)
    }

    fn from_stream(
        stream: TcpStream,
        timeout: Duration,
        max_frame: usize,
    ) -> Result<Self, ChannelError> {
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            timeout,
            max_frame,
        })
    }

    async fn write_frame(&mut self, msg: &[u8]) -> Result<(), ChannelError> {
        let len = u32::try_from(msg.len()).map_err(|_| ChannelError::FrameTooLarge {
            size: msg.len(),
            max: self.max_frame,
        })?;
        self.stream.write_all(&len.to_be_bytes()).await?;
        self.stream.write_all(msg).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>, ChannelError> {
        let mut len = [0u8; 4];
        match self.stream.read_exact(&mut len).await {
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(ChannelError::Closed),
            r => r?,
        };
        let len = u32::from_be_bytes(len) as usize;
        if len > self.max_frame {
            return Err(ChannelError::FrameTooLarge {
                size: len,
                max: self.max_frame,
            });
        }
        let mut msg = vec![0; len];
        match self.stream.read_exact(&mut msg).await {
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ChannelError::Closed),
            r => {
                r?;
                Ok(msg)
            }
        }
    }
}

impl Channel for TcpChannel {
    async fn send_bytes(&mut self, msg: Vec<u8>) -> Result<(), ChannelError> {
        if msg.len() > self.max_frame {
            return Err(ChannelError::FrameTooLarge {
                size: msg.len(),
                max: self.max_frame,
            });
        }
        let timeout_after = self.timeout;
        timeout(timeout_after, self.write_frame(&msg))
            .await
            .map_err(|_| ChannelError::Timeout(timeout_after))??;
        debug!(bytes = msg.len(), "sent frame");
        Ok(())
    }

    async fn recv_bytes(&mut self) -> Result<Vec<u8>, ChannelError> {
        let timeout_after = self.timeout;
        let msg = timeout(timeout_after, self.read_frame())
            .await
            .map_err(|_| ChannelError::Timeout(timeout_after))??;
        debug!(bytes = msg.len(), "received frame");
        Ok(msg)
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// An in-process channel using [`mpsc::Sender`] and [`mpsc::Receiver`].
#[derive(Debug)]
pub struct MemoryChannel {
    s: Option<mpsc::Sender<Vec<u8>>>,
    r: mpsc::Receiver<Vec<u8>>,
    timeout: Duration,
}

impl MemoryChannel {
    /// Creates 2 connected channels, one for each party.
    pub fn pair() -> (Self, Self) {
        let buffer_capacity = 16;
        let (send_a_to_b, recv_a_to_b) = mpsc::channel(buffer_capacity);
        let (send_b_to_a, recv_b_to_a) = mpsc::channel(buffer_capacity);
        let timeout = Duration::from_secs(60);
        (
            MemoryChannel {
                s: Some(send_a_to_b),
                r: recv_b_to_a,
                timeout,
            },
            MemoryChannel {
                s: Some(send_b_to_a),
                r: recv_a_to_b,
                timeout,
            },
        )
    }

    /// Sets the time after which a pending `recv_bytes` fails.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Channel for MemoryChannel {
    async fn send_bytes(&mut self, msg: Vec<u8>) -> Result<(), ChannelError> {
        match &self.s {
            Some(s) => s.send(msg).await.map_err(|_| ChannelError::Closed),
            None => Err(ChannelError::Closed),
        }
    }

    async fn recv_bytes(&mut self) -> Result<Vec<u8>, ChannelError> {
        match timeout(self.timeout, self.r.recv()).await {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(ChannelError::Closed),
            Err(_) => Err(ChannelError::Timeout(self.timeout)),
        }
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.s = None;
        Ok(())
    }
}
