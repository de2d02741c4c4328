//! Client implementation.
//!
//! The client maintains:
//! - One framed TCP connection to the server (its car)
//! - A background task reading snapshots off that connection
//! - Snapshot history for interpolation
//! - Pending operator input, sent as one signal per tick

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};
use gcars_shared::{
    config::EngineConfig,
    net::{
        BodyId, ClientHello, FrameReader, FrameWriter, NetError, ReliableConn, ServerWelcome,
        Signal, Snapshot, Throttle, PROTOCOL_VERSION,
    },
};
use tokio::{
    io::{ReadHalf, WriteHalf},
    net::TcpStream,
    sync::mpsc::{self, error::TryRecvError},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    input::{build_signal, InputState},
    interp::SnapshotBuffer,
};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// The server closed the connection or it failed.
    Disconnected,
    /// Handshake done; snapshots are flowing.
    Connected,
}

/// High-level game client.
pub struct GameClient {
    pub body_id: BodyId,
    pub state: ClientState,
    pub snaps: SnapshotBuffer,

    server: SocketAddr,
    writer: FrameWriter<WriteHalf<TcpStream>>,
    snapshot_rx: mpsc::Receiver<Snapshot>,
    reader: JoinHandle<()>,
    tick: u64,
    pending: InputState,
}

impl GameClient {
    /// Connects to a server and performs handshake.
    pub async fn connect(cfg: &EngineConfig) -> anyhow::Result<Self> {
        let server: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        info!(%server, "Connecting to server");

        let stream = TcpStream::connect(server).await.context("tcp connect")?;
        stream.set_nodelay(true).context("set nodelay")?;
        let mut conn = ReliableConn::new(stream);

        conn.send(&ClientHello {
            protocol: PROTOCOL_VERSION,
        })
        .await?;
        let welcome: ServerWelcome = tokio::time::timeout(cfg.handshake_timeout(), conn.recv())
            .await
            .context("welcome timed out")??;
        if welcome.protocol != PROTOCOL_VERSION {
            bail!(
                "protocol mismatch: server {} client {}",
                welcome.protocol,
                PROTOCOL_VERSION
            );
        }
        info!(body_id = ?welcome.body_id, "Connected to server");

        let (reader, writer) = conn.into_split();
        let (snapshot_tx, snapshot_rx) = mpsc::channel(64);
        let reader = tokio::spawn(read_snapshots(reader, snapshot_tx));

        Ok(Self {
            body_id: welcome.body_id,
            state: ClientState::Connected,
            snaps: SnapshotBuffer::new(32),
            server,
            writer,
            snapshot_rx,
            reader,
            tick: 0,
            pending: InputState::default(),
        })
    }

    /// Advances one client tick: sends `input` as a signal.
    pub async fn tick(&mut self, input: InputState) -> anyhow::Result<Signal> {
        let signal = build_signal(input);
        if let Err(e) = self.writer.send(&signal).await {
            self.state = ClientState::Disconnected;
            return Err(e).context("send signal");
        }
        self.tick += 1;
        Ok(signal)
    }

    /// Input queued by console commands since the last call.
    pub fn take_pending_input(&mut self) -> InputState {
        std::mem::take(&mut self.pending)
    }

    /// Waits briefly for the next snapshot, then drains any backlog.
    ///
    /// Returns how many snapshots were buffered.
    pub async fn recv_snapshots(&mut self) -> usize {
        match tokio::time::timeout(Duration::from_millis(20), self.snapshot_rx.recv()).await {
            Ok(Some(snap)) => self.snaps.push(snap),
            Ok(None) => {
                self.state = ClientState::Disconnected;
                return 0;
            }
            Err(_) => return 0,
        }

        let mut received = 1;
        loop {
            match self.snapshot_rx.try_recv() {
                Ok(snap) => {
                    self.snaps.push(snap);
                    received += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.state = ClientState::Disconnected;
                    break;
                }
            }
        }
        received
    }

    /// Executes a console command.
    pub fn exec_console(&mut self, line: &str) -> Vec<String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(cmd) = tokens.first() else {
            return Vec::new();
        };

        match *cmd {
            "steer" => match tokens.get(1).map(|t| t.parse::<f64>()) {
                Some(Ok(rad)) if rad.is_finite() => {
                    self.pending.steer += rad;
                    vec![format!("Steering {rad} rad")]
                }
                _ => vec!["Usage: steer <radians>".to_string()],
            },
            "accelerate" => {
                self.pending.throttle = Some(Throttle::Accelerate);
                vec![]
            }
            "decelerate" => {
                self.pending.throttle = Some(Throttle::Decelerate);
                vec![]
            }
            "status" => {
                let mut out = vec![
                    format!("State: {:?}", self.state),
                    format!("Server: {}", self.server),
                    format!("Body ID: {:?}", self.body_id),
                    format!("Signals sent: {}", self.tick),
                    format!("Snapshots buffered: {}", self.snaps.len()),
                ];
                if let Some(s) = self.snaps.last_snapshot() {
                    out.push(format!("Position: ({:.2}, {:.2}) angle {:.3}", s.x, s.y, s.angle));
                }
                if let Some((pos, angle)) = self.snaps.interp(0.5) {
                    out.push(format!("Smoothed: ({:.2}, {:.2}) angle {:.3}", pos.x, pos.y, angle));
                }
                out
            }
            "disconnect" | "quit" | "exit" => {
                self.state = ClientState::Disconnected;
                vec!["Disconnected".to_string()]
            }
            other => vec![format!("Unknown command: {other}")],
        }
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_snapshots(mut reader: FrameReader<ReadHalf<TcpStream>>, tx: mpsc::Sender<Snapshot>) {
    loop {
        match reader.recv::<Snapshot>().await {
            Ok(snap) => {
                if tx.send(snap).await.is_err() {
                    break;
                }
            }
            Err(e) if e.is_recoverable() => warn!(error = %e, "Malformed snapshot skipped"),
            Err(NetError::Closed) => {
                info!("Server closed connection");
                break;
            }
            Err(e) => {
                debug!(error = %e, "Snapshot read failed");
                break;
            }
        }
    }
}
