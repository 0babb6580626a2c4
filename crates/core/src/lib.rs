//! Shared domain types for the qpulse dashboard backend.
//!
//! - [`snapshot::QueueSnapshot`] -- one sampling pass of queue/worker counts.
//! - [`messages::ViewerMessage`] -- the single envelope pushed to viewers.
//! - [`keys::KeyPatterns`] -- the store key-pattern contract.
//! - [`config`] -- environment parsing helpers shared by every crate.

pub mod config;
pub mod keys;
pub mod messages;
pub mod snapshot;
pub mod types;
