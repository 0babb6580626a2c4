//! Viewer transport and fan-out.
//!
//! Session bookkeeping ([`SessionRegistry`]), the fan-out over it
//! ([`BroadcastHub`]), the WebSocket upgrade handler, the long-polling
//! fallback and the heartbeat that keeps sockets alive.

mod handler;
mod heartbeat;
pub mod hub;
pub mod poll;
pub mod registry;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use hub::BroadcastHub;
pub use poll::PollSessions;
pub use registry::{SessionReceiver, SessionRegistry, SessionSender, Transport};
