//! Per-body exchange between the scheduler and the body's connection.
//!
//! Each body gets two tasks that run independently of the tick cadence:
//! - a read task that waits on the connection for the next [`Signal`] and
//!   offers it to the inbound slot (dropped if the slot is still full);
//! - a write task that waits on the outbound slot and writes each
//!   [`Snapshot`] to the connection.
//!
//! The scheduler only ever touches the [`BodyLink`] end: `take_signal` and
//! `offer_snapshot` never wait.

use gcars_shared::{
    net::{BodyId, Connection, NetError, Signal, SignalSource, Snapshot, SnapshotSink},
    slot::{slot, Offer, SlotReader, SlotWriter},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, trace, warn};

/// Why a body left the session.
#[derive(Debug, Clone, PartialEq)]
pub enum RemovalReason {
    /// The peer closed the connection or it failed.
    Disconnected(String),
    /// The body's integration step failed.
    PhysicsFault(String),
}

/// Notifies the scheduler that a body must be dropped.
pub(crate) type RemovalSender = mpsc::UnboundedSender<(BodyId, RemovalReason)>;

/// Scheduler-side end of a body's exchange.
#[derive(Debug)]
pub struct BodyLink {
    inbound: SlotReader<Signal>,
    outbound: SlotWriter<Snapshot>,
}

impl BodyLink {
    /// Takes the pending signal, if any.
    pub fn take_signal(&mut self) -> Option<Signal> {
        self.inbound.take()
    }

    /// Offers a snapshot; dropped if the previous one is still unsent.
    pub fn offer_snapshot(&self, snapshot: Snapshot) -> Offer {
        self.outbound.offer(snapshot)
    }
}

/// Owns the exchange tasks of one body. Dropping it aborts both.
#[derive(Debug)]
pub struct ExchangeHandle {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Drop for ExchangeHandle {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Splits `conn` and spawns its read and write tasks.
///
/// Must be called from within a Tokio runtime.
pub(crate) fn spawn_exchange<C: Connection>(
    id: BodyId,
    conn: C,
    removals: RemovalSender,
) -> (BodyLink, ExchangeHandle) {
    let (source, sink) = conn.split();
    let (signal_tx, signal_rx) = slot();
    let (snapshot_tx, snapshot_rx) = slot();

    let reader = tokio::spawn(read_signals(id, source, signal_tx, removals.clone()));
    let writer = tokio::spawn(write_snapshots(id, sink, snapshot_rx, removals));

    (
        BodyLink {
            inbound: signal_rx,
            outbound: snapshot_tx,
        },
        ExchangeHandle { reader, writer },
    )
}

async fn read_signals<S: SignalSource>(
    id: BodyId,
    mut source: S,
    inbound: SlotWriter<Signal>,
    removals: RemovalSender,
) {
    loop {
        match source.next_signal().await {
            Ok(signal) => match inbound.offer(signal) {
                Offer::Accepted => trace!(body_id = ?id, ?signal, "Signal buffered"),
                Offer::Dropped => trace!(body_id = ?id, "Inbound slot full, signal dropped"),
                Offer::Closed => break,
            },
            Err(e) if e.is_recoverable() => {
                warn!(body_id = ?id, error = %e, "Malformed signal skipped");
            }
            Err(NetError::Closed) => {
                info!(body_id = ?id, "Peer closed connection");
                let _ = removals.send((id, RemovalReason::Disconnected("closed by peer".into())));
                break;
            }
            Err(e) => {
                info!(body_id = ?id, error = %e, "Connection read failed");
                let _ = removals.send((id, RemovalReason::Disconnected(e.to_string())));
                break;
            }
        }
    }
}

async fn write_snapshots<K: SnapshotSink>(
    id: BodyId,
    mut sink: K,
    mut outbound: SlotReader<Snapshot>,
    removals: RemovalSender,
) {
    while let Some(snapshot) = outbound.recv().await {
        if let Err(e) = sink.send_snapshot(&snapshot).await {
            debug!(body_id = ?id, error = %e, "Snapshot write failed");
            let _ = removals.send((id, RemovalReason::Disconnected(e.to_string())));
            return;
        }
    }
    trace!(body_id = ?id, "Snapshot writer finished");
}
