//! Networking primitives.
//!
//! Goals:
//! - One persistent, reliable (TCP) connection per simulated body.
//! - Length-prefixed JSON frames, so a malformed payload never desynchronizes
//!   the stream and can be skipped.
//! - Signal and snapshot message types shared by client and server.
//!
//! Frame layout: `u32` big-endian payload length, then the JSON payload.

use std::{
    io,
    net::SocketAddr,
    sync::atomic::{AtomicU32, Ordering},
};

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    net::{TcpListener, TcpStream},
};
use tracing::trace;

use crate::math::Vec2;

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted frame payload.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

static NEXT_BODY_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies a simulated body and, 1:1, its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyId(pub u32);

impl BodyId {
    pub fn new_unique() -> Self {
        BodyId(NEXT_BODY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Transport and codec failures.
#[derive(Debug, Error)]
pub enum NetError {
    /// The payload was framed correctly but is not a valid message.
    /// The stream is still aligned on the next frame.
    #[error("decode: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("encode: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("frame of {0} bytes exceeds limit of {max}", max = MAX_FRAME_LEN)]
    FrameTooLarge(usize),
    #[error("connection closed")]
    Closed,
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl NetError {
    /// Whether the connection can keep being read after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, NetError::Decode(_))
    }
}

/// Throttle command carried by a [`Signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Throttle {
    Accelerate,
    Decelerate,
}

/// Client -> server control signal, consumed at most once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Steering delta in radians, counter-clockwise positive.
    pub angle: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle: Option<Throttle>,
}

impl Signal {
    pub fn steer(angle: f64) -> Self {
        Self {
            angle,
            throttle: None,
        }
    }
}

/// Server -> client per-tick body state.
///
/// `engineForce` and `forcePoint` are optional on the wire: older peers only
/// sent position and angle, and such payloads still decode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub x: f64,
    pub y: f64,
    pub angle: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_force: Option<Vec2>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_point: Option<Vec2>,
}

impl Snapshot {
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}

/// Client -> server, first frame on a new connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientHello {
    pub protocol: u32,
}

/// Server -> client reply to [`ClientHello`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerWelcome {
    pub body_id: BodyId,
    pub protocol: u32,
}

/// Writes one frame.
pub async fn write_frame<W, T>(w: &mut W, msg: &T) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize + ?Sized,
{
    let payload = serde_json::to_vec(msg).map_err(NetError::Encode)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(NetError::FrameTooLarge(payload.len()));
    }
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    w.write_all(&buf).await?;
    w.flush().await?;
    Ok(())
}

/// Reads one frame. A clean EOF before the length prefix is [`NetError::Closed`].
pub async fn read_frame<R, T>(r: &mut R) -> Result<T, NetError>
where
    R: AsyncRead + Unpin + ?Sized,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(NetError::Closed),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(NetError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await?;
    serde_json::from_slice(&payload).map_err(NetError::Decode)
}

/// Reliable framed connection.
#[derive(Debug)]
pub struct ReliableConn<S = TcpStream> {
    stream: S,
}

impl<S> ReliableConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub async fn send<T: Serialize + ?Sized>(&mut self, msg: &T) -> Result<(), NetError> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T, NetError> {
        read_frame(&mut self.stream).await
    }

    /// Splits into independently owned read and write halves.
    pub fn into_split(self) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>) {
        let (r, w) = tokio::io::split(self.stream);
        (FrameReader { inner: r }, FrameWriter { inner: w })
    }
}

impl ReliableConn<TcpStream> {
    pub fn peer_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.stream.peer_addr()?)
    }
}

/// Read half of a [`ReliableConn`].
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T, NetError> {
        read_frame(&mut self.inner).await
    }
}

/// Write half of a [`ReliableConn`].
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    pub async fn send<T: Serialize + ?Sized + Sync>(&mut self, msg: &T) -> Result<(), NetError> {
        write_frame(&mut self.inner, msg).await
    }
}

/// Source of inbound control signals for one body.
#[async_trait]
pub trait SignalSource: Send {
    async fn next_signal(&mut self) -> Result<Signal, NetError>;
}

/// Sink for outbound snapshots of one body.
#[async_trait]
pub trait SnapshotSink: Send {
    async fn send_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), NetError>;
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> SignalSource for FrameReader<R> {
    async fn next_signal(&mut self) -> Result<Signal, NetError> {
        self.recv().await
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> SnapshotSink for FrameWriter<W> {
    async fn send_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), NetError> {
        self.send(snapshot).await
    }
}

/// A per-body connection that can be split into its two exchange directions.
pub trait Connection: Send + 'static {
    type Source: SignalSource + 'static;
    type Sink: SnapshotSink + 'static;

    fn split(self) -> (Self::Source, Self::Sink);
}

impl<S> Connection for ReliableConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Source = FrameReader<ReadHalf<S>>;
    type Sink = FrameWriter<WriteHalf<S>>;

    fn split(self) -> (Self::Source, Self::Sink) {
        self.into_split()
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, NetError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> Result<(ReliableConn, SocketAddr), NetError> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        trace!(peer = %addr, "Accepted TCP connection");
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.listener.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_wire_shape() {
        let s: Signal = serde_json::from_str(r#"{"angle": 0.25}"#).unwrap();
        assert_eq!(s, Signal::steer(0.25));

        let s: Signal = serde_json::from_str(r#"{"angle": -1.0, "throttle": "accelerate"}"#).unwrap();
        assert_eq!(s.throttle, Some(Throttle::Accelerate));

        assert_eq!(serde_json::to_string(&Signal::steer(0.5)).unwrap(), r#"{"angle":0.5}"#);
    }

    #[test]
    fn snapshot_uses_camel_case_force_fields() {
        let snap = Snapshot {
            x: 1.0,
            y: 2.0,
            angle: 0.5,
            engine_force: Some(Vec2::new(1000.0, -100.0)),
            force_point: Some(Vec2::new(2.0, 0.0)),
        };
        let v: serde_json::Value = serde_json::to_value(snap).unwrap();
        assert_eq!(v["engineForce"]["x"], 1000.0);
        assert_eq!(v["forcePoint"]["x"], 2.0);
    }

    #[test]
    fn legacy_snapshot_without_force_fields_decodes() {
        let snap: Snapshot = serde_json::from_str(r#"{"x": 500.0, "y": 500.0, "angle": 0.0}"#).unwrap();
        assert_eq!(snap.position(), Vec2::new(500.0, 500.0));
        assert!(snap.engine_force.is_none());
        assert!(snap.force_point.is_none());
    }

    #[tokio::test]
    async fn malformed_frame_is_recoverable() -> anyhow::Result<()> {
        let (a, b) = tokio::io::duplex(1024);
        let mut tx = ReliableConn::new(a);
        let mut rx = ReliableConn::new(b);

        tx.send(&serde_json::json!({ "angle": "left" })).await?;
        tx.send(&Signal::steer(0.1)).await?;

        let err = rx.recv::<Signal>().await.unwrap_err();
        assert!(err.is_recoverable(), "{err}");
        assert_eq!(rx.recv::<Signal>().await?, Signal::steer(0.1));
        Ok(())
    }

    #[tokio::test]
    async fn eof_is_closed() {
        let (a, b) = tokio::io::duplex(64);
        drop(a);
        let mut rx = ReliableConn::new(b);
        assert!(matches!(rx.recv::<Signal>().await, Err(NetError::Closed)));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() -> anyhow::Result<()> {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_all(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes()).await?;
        let mut rx = ReliableConn::new(b);
        let err = rx.recv::<Signal>().await.unwrap_err();
        assert!(matches!(err, NetError::FrameTooLarge(_)));
        assert!(!err.is_recoverable());
        Ok(())
    }
}
