//! BeatBridge Core - JACK transport / peer timeline reconciliation engine
//!
//! Keeps a JACK transport and a network-synchronized peer timeline in
//! agreement on tempo, quantum grid and play state. Three execution contexts
//! cooperate around one shared record:
//!
//! - the realtime adapter ([`adapter`]) stamps musical positions on the audio
//!   thread with try-locks only
//! - the reconciliation worker ([`worker`]) polls the host transport and
//!   publishes genuine divergences to the peers
//! - the peer library's callbacks ([`bridge`]) fold remote changes back into
//!   the shared record, with echo suppression for round-trips of our own
//!   requests

pub mod adapter;
pub mod bridge;
pub mod clock;
pub mod host;
pub mod state;
pub mod timeline;
pub mod worker;

pub use bridge::Bridge;
pub use state::{LinkState, SharedState};
pub use timeline::{LoopbackHandle, LoopbackTimeline, PeerTimeline, SessionSnapshot};
pub use worker::{DEFAULT_POLL_INTERVAL, SYNC_TOLERANCE};
