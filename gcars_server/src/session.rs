//! Session scheduler.
//!
//! A session owns an ordered set of bodies and advances them on a fixed tick:
//! `Idle --run()--> Running --stop()--> Stopped`. `Stopped` is terminal.
//!
//! Ownership model:
//! - The scheduler task is the only owner of every [`RigidBody`]. Nothing
//!   else reads or writes physics state.
//! - [`Session::add_body`] builds the body and hands it to the scheduler
//!   over a channel; disconnects and faults request removal the same way.
//!   Both are applied at the start of the next tick.
//! - Status lives in a `watch` channel, so `stop()` wakes a sleeping loop and
//!   [`Session::wait_stopped`] can join it.
//!
//! Cadence: the loop sleeps a fixed interval *after* each tick's work, so a
//! slow tick delays every following one (drift accumulates against wall-clock
//! time).

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex, PoisonError,
};
use std::time::Duration;

use gcars_shared::{
    config::EngineConfig,
    math::Vec2,
    net::{BodyId, Connection},
    physics::{BodyParams, PhysicsError, RigidBody},
    slot::Offer,
};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time,
};
use tracing::{debug, info, trace, warn};

use crate::exchange::{spawn_exchange, BodyLink, ExchangeHandle, RemovalReason, RemovalSender};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is stopped")]
    Stopped,
    #[error("invalid body: {0}")]
    InvalidBody(#[from] PhysicsError),
    #[error("scheduler task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// Sleep between ticks.
    pub tick_interval: Duration,
    /// Simulated seconds per tick.
    pub dt: f64,
    /// Parameters of bodies created by [`Session::add_body`].
    pub body: BodyParams,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for SessionConfig {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            tick_interval: cfg.tick_interval(),
            dt: cfg.tick_dt(),
            body: cfg.body,
        }
    }
}

/// Counters published by the scheduler.
#[derive(Debug, Default)]
pub struct SessionStats {
    ticks: AtomicU64,
    bodies: AtomicUsize,
}

impl SessionStats {
    /// Completed ticks.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Bodies currently simulated.
    pub fn bodies(&self) -> usize {
        self.bodies.load(Ordering::Acquire)
    }
}

struct BodyEntry {
    id: BodyId,
    body: RigidBody,
    link: BodyLink,
    _exchange: ExchangeHandle,
}

/// A game session: one scheduler loop driving many bodies.
pub struct Session {
    cfg: SessionConfig,
    status: watch::Sender<SessionStatus>,
    inserts: mpsc::UnboundedSender<BodyEntry>,
    removals: RemovalSender,
    /// Taken by the one `run()` call that starts the loop.
    pending: Mutex<Option<SchedulerInbox>>,
    task: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<SessionStats>,
    has_bodies: AtomicBool,
}

impl Session {
    pub fn new(cfg: SessionConfig) -> Self {
        let (status, _) = watch::channel(SessionStatus::Idle);
        let (inserts, insert_rx) = mpsc::unbounded_channel();
        let (removals, removal_rx) = mpsc::unbounded_channel();
        Self {
            cfg,
            status,
            inserts,
            removals,
            pending: Mutex::new(Some(SchedulerInbox {
                inserts: insert_rx,
                removals: removal_rx,
            })),
            task: Mutex::new(None),
            stats: Arc::new(SessionStats::default()),
            has_bodies: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.cfg
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Observes status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Starts the tick loop if the session is idle.
    ///
    /// Returns `true` only for the call that spawned the loop; calls while
    /// running, or after stop, do nothing. Must be called from within a
    /// Tokio runtime.
    pub fn run(&self) -> bool {
        let started = self.status.send_if_modified(|s| {
            if *s == SessionStatus::Idle {
                *s = SessionStatus::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return false;
        }

        let Some(inbox) = lock(&self.pending).take() else {
            return false;
        };
        let scheduler = Scheduler {
            cfg: self.cfg,
            bodies: Vec::new(),
            inbox,
            status: self.status.subscribe(),
            stats: Arc::clone(&self.stats),
        };
        *lock(&self.task) = Some(tokio::spawn(scheduler.run()));
        true
    }

    /// Creates a body at `(x, y)` bound to `conn`, and starts the session on
    /// its first body.
    pub fn add_body<C: Connection>(&self, x: f64, y: f64, conn: C) -> Result<BodyId, SessionError> {
        self.insert_body(BodyId::new_unique(), x, y, self.cfg.body, conn)
    }

    /// [`Session::add_body`] with per-body parameters.
    pub fn add_body_with<C: Connection>(
        &self,
        x: f64,
        y: f64,
        params: BodyParams,
        conn: C,
    ) -> Result<BodyId, SessionError> {
        self.insert_body(BodyId::new_unique(), x, y, params, conn)
    }

    /// [`Session::add_body`] under an id the caller already handed out.
    pub fn add_body_as<C: Connection>(
        &self,
        id: BodyId,
        x: f64,
        y: f64,
        conn: C,
    ) -> Result<BodyId, SessionError> {
        self.insert_body(id, x, y, self.cfg.body, conn)
    }

    fn insert_body<C: Connection>(
        &self,
        id: BodyId,
        x: f64,
        y: f64,
        params: BodyParams,
        conn: C,
    ) -> Result<BodyId, SessionError> {
        if self.status() == SessionStatus::Stopped {
            return Err(SessionError::Stopped);
        }
        let body = RigidBody::new(Vec2::new(x, y), params)?;
        let (link, exchange) = spawn_exchange(id, conn, self.removals.clone());

        let entry = BodyEntry {
            id,
            body,
            link,
            _exchange: exchange,
        };
        // Fails only once the scheduler has exited; the entry (and its
        // connection) is dropped with the error.
        if self.inserts.send(entry).is_err() {
            return Err(SessionError::Stopped);
        }
        info!(body_id = ?id, x, y, "Body added");

        if !self.has_bodies.swap(true, Ordering::AcqRel) {
            self.run();
        }
        Ok(id)
    }

    /// Requests shutdown and returns immediately.
    ///
    /// The loop exits at its next wake-up; use [`Session::wait_stopped`] to
    /// wait for that.
    pub fn stop(&self) {
        let changed = self.status.send_if_modified(|s| {
            if *s != SessionStatus::Stopped {
                *s = SessionStatus::Stopped;
                true
            } else {
                false
            }
        });
        if changed {
            debug!("Session stop requested");
        }
    }

    /// Waits for the tick loop to exit. Returns at once if it never ran.
    pub async fn wait_stopped(&self) -> Result<(), SessionError> {
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            handle.await?;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SchedulerInbox {
    inserts: mpsc::UnboundedReceiver<BodyEntry>,
    removals: mpsc::UnboundedReceiver<(BodyId, RemovalReason)>,
}

/// The single task that owns all bodies of a session.
struct Scheduler {
    cfg: SessionConfig,
    bodies: Vec<BodyEntry>,
    inbox: SchedulerInbox,
    status: watch::Receiver<SessionStatus>,
    stats: Arc<SessionStats>,
}

impl Scheduler {
    async fn run(mut self) {
        info!(
            tick_ms = self.cfg.tick_interval.as_millis() as u64,
            dt = self.cfg.dt,
            "Session started"
        );
        loop {
            tokio::select! {
                _ = time::sleep(self.cfg.tick_interval) => {}
                changed = self.status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *self.status.borrow() != SessionStatus::Running {
                break;
            }
            self.apply_commands();
            self.tick();
        }
        info!(ticks = self.stats.ticks(), bodies = self.bodies.len(), "Session stopped");
    }

    /// Inserts first, so a body that connected and vanished between two
    /// ticks is still removed.
    fn apply_commands(&mut self) {
        while let Ok(entry) = self.inbox.inserts.try_recv() {
            debug!(body_id = ?entry.id, "Body joined scheduler");
            self.bodies.push(entry);
        }
        while let Ok((id, reason)) = self.inbox.removals.try_recv() {
            self.remove(id, &reason);
        }
        self.stats.bodies.store(self.bodies.len(), Ordering::Release);
    }

    fn remove(&mut self, id: BodyId, reason: &RemovalReason) {
        let before = self.bodies.len();
        self.bodies.retain(|e| e.id != id);
        if self.bodies.len() != before {
            info!(body_id = ?id, ?reason, "Body removed");
        }
    }

    /// One pass over every body, in insertion order.
    fn tick(&mut self) {
        let dt = self.cfg.dt;
        let mut faulted = Vec::new();

        for entry in &mut self.bodies {
            if let Some(signal) = entry.link.take_signal() {
                if let Err(e) = entry.body.apply_signal(&signal) {
                    warn!(body_id = ?entry.id, error = %e, "Signal rejected");
                }
            }
            match entry.body.integrate(dt) {
                Ok(_) => {
                    if entry.link.offer_snapshot(entry.body.snapshot()) == Offer::Dropped {
                        trace!(body_id = ?entry.id, "Outbound slot full, snapshot dropped");
                    }
                }
                Err(e) => {
                    warn!(body_id = ?entry.id, error = %e, "Integration failed");
                    faulted.push((entry.id, RemovalReason::PhysicsFault(e.to_string())));
                }
            }
        }

        for (id, reason) in faulted {
            self.remove(id, &reason);
        }
        self.stats.bodies.store(self.bodies.len(), Ordering::Release);
        self.stats.ticks.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gcars_shared::net::{ReliableConn, Signal, Snapshot};
    use tokio::{io::DuplexStream, time::timeout};

    use super::*;

    fn fast_config() -> SessionConfig {
        SessionConfig {
            tick_interval: Duration::from_millis(5),
            dt: 0.02,
            body: BodyParams::default(),
        }
    }

    fn pipe() -> (ReliableConn<DuplexStream>, ReliableConn<DuplexStream>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (ReliableConn::new(a), ReliableConn::new(b))
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cond()
    }

    #[tokio::test(start_paused = true)]
    async fn run_is_idempotent() {
        let session = Session::new(SessionConfig::default());
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(session.run());
        assert!(!session.run());
        assert_eq!(session.status(), SessionStatus::Running);

        // 20 ms ticks over 200 ms: a second loop would double the count.
        tokio::time::sleep(Duration::from_millis(210)).await;
        let ticks = session.stats().ticks();
        assert!((9..=11).contains(&ticks), "ticks = {ticks}");

        session.stop();
        session.wait_stopped().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_returns_before_the_loop_exits() {
        let session = Session::new(SessionConfig::default());
        session.run();
        tokio::time::sleep(Duration::from_millis(50)).await;

        session.stop();
        assert_eq!(session.status(), SessionStatus::Stopped);
        // The loop task has not been polled since the request.
        assert!(lock(&session.task).as_ref().is_some_and(|h| !h.is_finished()));

        session.wait_stopped().await.unwrap();
        assert!(lock(&session.task).is_none());
        let ticks = session.stats().ticks();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(session.stats().ticks(), ticks);
    }

    #[tokio::test]
    async fn stopped_session_does_not_restart() {
        let session = Session::new(fast_config());
        session.stop();
        assert!(!session.run());
        assert_eq!(session.status(), SessionStatus::Stopped);
        session.wait_stopped().await.unwrap();

        let (conn, _peer) = pipe();
        assert!(matches!(session.add_body(0.0, 0.0, conn), Err(SessionError::Stopped)));
    }

    #[tokio::test]
    async fn first_body_starts_the_session_and_snapshots_arrive() -> anyhow::Result<()> {
        let session = Session::new(fast_config());
        let (conn, mut peer) = pipe();

        session.add_body(2000.0, 5000.0, conn)?;
        assert_eq!(session.status(), SessionStatus::Running);

        let snap: Snapshot = timeout(Duration::from_secs(2), peer.recv()).await??;
        assert!((snap.x - 2000.0).abs() < 1.0);
        assert!(snap.engine_force.is_some());
        assert!(wait_until(|| session.stats().bodies() == 1).await);

        session.stop();
        session.wait_stopped().await?;
        Ok(())
    }

    #[tokio::test]
    async fn steering_signal_changes_the_drive() -> anyhow::Result<()> {
        let session = Session::new(fast_config());
        let (conn, mut peer) = pipe();
        session.add_body(0.0, 0.0, conn)?;

        let first: Snapshot = timeout(Duration::from_secs(2), peer.recv()).await??;
        let initial = first.engine_force.expect("engine force");

        peer.send(&serde_json::json!({ "angle": "garbage" })).await?;
        peer.send(&Signal::steer(std::f64::consts::FRAC_PI_2)).await?;

        let mut turned = false;
        for _ in 0..100 {
            let snap: Snapshot = timeout(Duration::from_secs(2), peer.recv()).await??;
            let force = snap.engine_force.expect("engine force");
            // Steering rotates the drive by a quarter turn; the slow body
            // rotation adds far less than that.
            if force.dot(initial) < 0.5 * initial.len_sq() {
                turned = true;
                break;
            }
        }
        assert!(turned, "steering signal never took effect");
        assert_eq!(session.stats().bodies(), 1);

        session.stop();
        session.wait_stopped().await?;
        Ok(())
    }

    #[tokio::test]
    async fn disconnected_body_is_removed() -> anyhow::Result<()> {
        let session = Session::new(fast_config());
        let (conn_a, peer_a) = pipe();
        let (conn_b, mut peer_b) = pipe();
        session.add_body(0.0, 0.0, conn_a)?;
        session.add_body(10.0, 0.0, conn_b)?;
        assert!(wait_until(|| session.stats().bodies() == 2).await);

        drop(peer_a);
        assert!(wait_until(|| session.stats().bodies() == 1).await);

        // The remaining body keeps ticking.
        let snap: Snapshot = timeout(Duration::from_secs(2), peer_b.recv()).await??;
        assert!((snap.x - 10.0).abs() < 1.0);

        session.stop();
        session.wait_stopped().await?;
        Ok(())
    }

    #[tokio::test]
    async fn invalid_body_params_are_rejected() {
        let session = Session::new(SessionConfig {
            body: BodyParams {
                mass: 0.0,
                ..BodyParams::default()
            },
            ..fast_config()
        });
        let (conn, _peer) = pipe();
        assert!(matches!(
            session.add_body(0.0, 0.0, conn),
            Err(SessionError::InvalidBody(PhysicsError::NonPositiveMass(_)))
        ));
        assert_eq!(session.status(), SessionStatus::Idle);
    }

    #[tokio::test]
    async fn faulted_body_is_isolated() -> anyhow::Result<()> {
        let session = Session::new(SessionConfig {
            dt: 1e200,
            ..fast_config()
        });
        let runaway = BodyParams {
            mass: 1.0,
            engine_force: Vec2::new(0.0, 1e200),
            ..BodyParams::default()
        };
        let parked = BodyParams {
            engine_force: Vec2::ZERO,
            ..BodyParams::default()
        };
        let (conn_a, _peer_a) = pipe();
        let (conn_b, mut peer_b) = pipe();
        session.add_body_with(0.0, 0.0, runaway, conn_a)?;
        session.add_body_with(7.0, 0.0, parked, conn_b)?;

        // The runaway body overflows on its first step and is dropped.
        assert!(wait_until(|| session.stats().ticks() > 2 && session.stats().bodies() == 1).await);
        assert_eq!(session.status(), SessionStatus::Running);

        let snap: Snapshot = timeout(Duration::from_secs(2), peer_b.recv()).await??;
        assert_eq!(snap.position(), Vec2::new(7.0, 0.0));

        session.stop();
        session.wait_stopped().await?;
        Ok(())
    }
}
