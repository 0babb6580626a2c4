//! qpulse API server library.
//!
//! Exposes the building blocks (config, state, error handling, routes,
//! viewer transports, the sampler) so integration tests and the binary
//! entrypoint can both access them.

pub mod background;
pub mod config;
pub mod error;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
