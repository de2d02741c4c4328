//! Server implementation.
//!
//! Accepts TCP connections, performs the hello/welcome handshake, and binds
//! each connection to a new body in the session. It supports:
//! - Handshake with protocol version check and timeout
//! - Operator console commands (status, stop, quit)
//! - Ephemeral binding for tests
//!
//! A failed handshake only discards that connection; the session and the
//! other bodies are unaffected. Handshakes run as their own tasks, so a peer
//! that never says hello does not hold up the accept loop.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context};
use gcars_shared::{
    config::EngineConfig,
    math::Vec2,
    net::{BodyId, ClientHello, ReliableConn, ReliableListener, ServerWelcome, PROTOCOL_VERSION},
};
use tokio::{sync::mpsc, task::JoinSet};
use tracing::{info, warn};

use crate::session::{Session, SessionConfig, SessionStatus};

/// Game server: one listener feeding one session.
pub struct GameServer {
    pub cfg: EngineConfig,
    listener: ReliableListener,
    session: Arc<Session>,

    /// Channel for console commands from stdin.
    console_rx: Option<mpsc::Receiver<String>>,
}

impl GameServer {
    /// Binds the listener for the given config.
    pub async fn new(cfg: EngineConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = ReliableListener::bind(addr).await.context("tcp bind")?;
        let session = Arc::new(Session::new(SessionConfig::from(&cfg)));
        Ok(Self {
            cfg,
            listener,
            session,
            console_rx: None,
        })
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Accepts one connection and, if its handshake succeeds, adds its body.
    pub async fn accept_one(&self) -> anyhow::Result<BodyId> {
        let (conn, peer) = self.listener.accept().await?;
        self.admission().admit(conn, peer).await
    }

    fn admission(&self) -> Admission {
        Admission {
            session: Arc::clone(&self.session),
            timeout: self.cfg.handshake_timeout(),
            spawn: self.cfg.spawn,
        }
    }

    /// Serves connections and console commands until the session stops.
    pub async fn serve(&mut self) -> anyhow::Result<()> {
        let mut console_rx = self.console_rx.take();
        let mut stopped = self.session.subscribe_status();
        let mut handshakes = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((conn, peer)) => {
                        let admission = self.admission();
                        handshakes.spawn(async move { (peer, admission.admit(conn, peer).await) });
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                Some(joined) = handshakes.join_next() => match joined {
                    Ok((peer, Ok(id))) => info!(body_id = ?id, %peer, "Client connected"),
                    Ok((peer, Err(e))) => warn!(%peer, error = %e, "Discarding connection"),
                    Err(e) => warn!(error = %e, "Handshake task failed"),
                },
                Some(line) = recv_line(&mut console_rx) => {
                    for out in self.exec_console(&line) {
                        println!("{out}");
                    }
                }
                _ = stopped.changed() => {}
            }
            if self.session.status() == SessionStatus::Stopped {
                break;
            }
        }
        handshakes.abort_all();
        self.session.wait_stopped().await?;
        info!("Server shut down");
        Ok(())
    }

    /// Executes an operator console command.
    pub fn exec_console(&self, line: &str) -> Vec<String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(cmd) = tokens.first() else {
            return Vec::new();
        };

        match *cmd {
            "status" => {
                let stats = self.session.stats();
                vec![
                    format!("Session state: {:?}", self.session.status()),
                    format!("Ticks: {}", stats.ticks()),
                    format!("Bodies: {}", stats.bodies()),
                    format!("Tick interval: {} ms", self.cfg.tick_ms),
                ]
            }
            "stop" | "quit" | "exit" => {
                info!("Stopping session");
                self.session.stop();
                vec!["Session stopping".to_string()]
            }
            other => vec![format!("Unknown command: {other}")],
        }
    }
}

/// What a handshake task needs to turn a connection into a body.
struct Admission {
    session: Arc<Session>,
    timeout: Duration,
    spawn: Vec2,
}

impl Admission {
    async fn admit(self, mut conn: ReliableConn, peer: SocketAddr) -> anyhow::Result<BodyId> {
        let hello: ClientHello = tokio::time::timeout(self.timeout, conn.recv())
            .await
            .context("handshake timed out")?
            .context("read hello")?;
        if hello.protocol != PROTOCOL_VERSION {
            bail!(
                "protocol mismatch: client {} server {}",
                hello.protocol,
                PROTOCOL_VERSION
            );
        }

        let id = BodyId::new_unique();
        conn.send(&ServerWelcome {
            body_id: id,
            protocol: PROTOCOL_VERSION,
        })
        .await
        .context("send welcome")?;

        self.session
            .add_body_as(id, self.spawn.x, self.spawn.y, conn)
            .with_context(|| format!("add body for {peer}"))?;
        Ok(id)
    }
}

async fn recv_line(rx: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(tick_ms: u64) -> anyhow::Result<(GameServer, EngineConfig)> {
    let cfg = EngineConfig {
        server_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).to_string(),
        tick_ms,
        ..Default::default()
    };
    let mut server = GameServer::new(cfg).await?;
    server.cfg.server_addr = server.local_addr()?.to_string();
    let cfg = server.cfg.clone();
    Ok((server, cfg))
}
