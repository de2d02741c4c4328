//! `gcars_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - Deterministic rigid-body integration with explicit errors instead of
//!   silent NaN/Inf.
//! - Clear separation of concerns (math, physics, net, slot, config).
//! - Traits at the connection seam so sessions can run over TCP or in-memory
//!   pipes.
//! - No `unsafe`.

pub mod config;
pub mod math;
pub mod net;
pub mod physics;
pub mod slot;
