//! `gcars_server`
//!
//! Server-side systems:
//! - Fixed-tick session scheduler owning every rigid body
//! - Per-body exchange tasks (inbound signals, outbound snapshots)
//! - TCP accept loop with handshake and operator console
//!
//! Networking model:
//! - One TCP connection per body, length-prefixed JSON frames
//! - Capacity-1 slots between the scheduler and each exchange

pub mod exchange;
pub mod server;
pub mod session;

pub use server::GameServer;
pub use session::{Session, SessionConfig, SessionError, SessionStatus};
