//! Socket transports carrying checksummed datagrams to and from a lite server.
//!
//! A connection is split into a [`FrameReader`] and a [`FrameWriter`] so the
//! engine can own the read half in its receive loop while a separate task drains
//! outgoing packets into the write half.

pub mod datagram;
pub mod peer;

use bytes::Bytes;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub use peer::{PeerAddress, PeerAddressError, TransportKind};

/// WebSocket stream type used by both the client and test servers.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors raised by the socket layer. All of them end the current connection.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The socket could not be opened.
    #[error("connect to {peer} failed: {reason}")]
    Connect { peer: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A frame arrived that does not follow the datagram format.
    #[error("malformed datagram: {0}")]
    Malformed(String),

    /// The peer answered the handshake with something other than an empty datagram,
    /// or did not answer in time.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// Read half of a connection, yielding datagram payloads.
pub enum FrameReader {
    Tcp(BufReader<OwnedReadHalf>),
    Ws(SplitStream<WsStream>),
}

/// Write half of a connection, accepting datagram payloads.
pub enum FrameWriter {
    Tcp(OwnedWriteHalf),
    Ws(SplitSink<WsStream, Message>),
}

/// Opens a socket to `peer` using its transport kind.
///
/// # Errors
///
/// Returns [`TransportError::Connect`] if the TCP connection or WebSocket upgrade fails.
pub async fn connect(peer: &PeerAddress) -> Result<(FrameReader, FrameWriter), TransportError> {
    match peer.kind {
        TransportKind::Tcp => {
            let stream = TcpStream::connect(peer.socket_addr()).await.map_err(|e| {
                TransportError::Connect { peer: peer.to_string(), reason: e.to_string() }
            })?;
            stream.set_nodelay(true)?;
            Ok(split_tcp(stream))
        }
        TransportKind::Ws => {
            let (stream, _response) = tokio_tungstenite::connect_async(peer.ws_url())
                .await
                .map_err(|e| TransportError::Connect {
                    peer: peer.to_string(),
                    reason: e.to_string(),
                })?;
            Ok(split_ws(stream))
        }
    }
}

/// Splits an established TCP stream into datagram halves.
#[must_use]
pub fn split_tcp(stream: TcpStream) -> (FrameReader, FrameWriter) {
    let (read, write) = stream.into_split();
    (FrameReader::Tcp(BufReader::new(read)), FrameWriter::Tcp(write))
}

/// Splits an established WebSocket stream into datagram halves.
#[must_use]
pub fn split_ws(stream: WsStream) -> (FrameReader, FrameWriter) {
    let (write, read) = stream.split();
    (FrameReader::Ws(read), FrameWriter::Ws(write))
}

impl FrameReader {
    /// Reads the next datagram payload.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly.
    ///
    /// # Errors
    ///
    /// Returns an error on socket failure or when a frame fails validation.
    pub async fn next_payload(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self {
            Self::Tcp(reader) => {
                let len = match reader.read_u32_le().await {
                    Ok(len) => len as usize,
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                    Err(e) => return Err(e.into()),
                };
                datagram::check_len(len)?;

                let mut body = vec![0u8; len];
                reader.read_exact(&mut body).await?;
                datagram::decode_body(&body).map(Some)
            }
            Self::Ws(stream) => loop {
                let Some(message) = stream.next().await else {
                    return Ok(None);
                };
                match message? {
                    Message::Binary(frame) => return datagram::decode(&frame).map(Some),
                    Message::Close(_) => return Ok(None),
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                    Message::Text(_) => {
                        return Err(TransportError::Malformed(
                            "unexpected text message".to_string(),
                        ))
                    }
                }
            },
        }
    }
}

impl FrameWriter {
    /// Frames `payload` as a datagram and writes it out.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket write fails.
    pub async fn send_payload(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let frame = datagram::encode(payload);
        match self {
            Self::Tcp(writer) => {
                writer.write_all(&frame).await?;
                writer.flush().await?;
            }
            Self::Ws(sink) => sink.send(Message::Binary(frame.into())).await?,
        }
        Ok(())
    }

    /// Closes the write side of the socket.
    pub async fn shutdown(&mut self) {
        let result = match self {
            Self::Tcp(writer) => writer.shutdown().await.map_err(TransportError::from),
            Self::Ws(sink) => sink.close().await.map_err(TransportError::from),
        };
        if let Err(e) = result {
            tracing::trace!(error = %e, "socket shutdown failed");
        }
    }
}

/// Sends the key-id datagram and waits for the peer's empty acknowledgement.
///
/// # Errors
///
/// Returns [`TransportError::Handshake`] if the peer closes the socket or sends a
/// non-empty datagram first.
pub async fn handshake(
    peer: &PeerAddress,
    reader: &mut FrameReader,
    writer: &mut FrameWriter,
) -> Result<(), TransportError> {
    writer.send_payload(&peer.key_id()).await?;
    match reader.next_payload().await? {
        Some(payload) if payload.is_empty() => Ok(()),
        Some(payload) => Err(TransportError::Handshake(format!(
            "expected empty acknowledgement, got {} bytes",
            payload.len()
        ))),
        None => Err(TransportError::Handshake("connection closed during handshake".to_string())),
    }
}
