//! `gcars_client`
//!
//! Client-side systems:
//! - Connection and handshake
//! - Input capture and per-tick signal generation
//! - Background snapshot reception
//! - Interpolation between received snapshots

pub mod client;
pub mod input;
pub mod interp;

pub use client::GameClient;
