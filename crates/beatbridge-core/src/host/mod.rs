//! Transport host seam
//!
//! The realtime audio host (JACK in production) consumed at its interface
//! boundary: position/transport queries, transport commands issued back from
//! non-realtime contexts, and acquisition of the timebase role. The
//! reconciliation worker and the peer-callback handlers only ever see this
//! trait, which keeps the engine testable without a running host.

mod error;

#[cfg(feature = "jack-backend")]
pub mod jack_backend;

pub use error::{HostError, HostResult};

/// BBT metadata observed on the host transport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportBbt {
    pub bar: i32,
    pub beat: i32,
    pub tick: i32,
    pub beats_per_bar: f64,
    pub ticks_per_beat: f64,
    pub beats_per_minute: f64,
    pub beat_type: f32,
}

/// Snapshot of the host transport as observed by one query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportSnapshot {
    /// Raw frame position
    pub frame: u64,
    /// Host frame rate in Hz
    pub frame_rate: f64,
    /// True when the transport is rolling or starting (anything but stopped)
    pub rolling: bool,
    /// Musical metadata, present only when a timebase master has stamped it
    pub bbt: Option<TransportBbt>,
}

/// Non-realtime interface to the host audio engine
///
/// All methods may be called from the worker thread or from the peer
/// library's callback context. None of them are realtime entry points; the
/// realtime callbacks are wired directly inside the backend.
pub trait TransportHost: Send + Sync {
    /// Host sample rate in Hz
    fn sample_rate(&self) -> f64;

    /// Query the current transport state and position
    fn query(&self) -> TransportSnapshot;

    /// Ask the host to start rolling
    fn start(&self) -> HostResult<()>;

    /// Ask the host to stop
    fn stop(&self) -> HostResult<()>;

    /// Relocate the transport to a raw frame position
    fn locate(&self, frame: u32) -> HostResult<()>;

    /// Assert the timebase role for this process. Idempotent: acquiring a
    /// role already held is a no-op.
    fn acquire_timebase(&self) -> HostResult<()>;

    /// Release the timebase role if held
    fn release_timebase(&self) -> HostResult<()>;

    /// True once the host has signalled asynchronous shutdown; continued
    /// operation is meaningless and the owning process should terminate
    fn is_shut_down(&self) -> bool {
        false
    }
}
