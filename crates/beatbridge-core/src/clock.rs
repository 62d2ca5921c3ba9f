//! Musical position codec
//!
//! Pure math converting between a raw transport frame count and bar/beat/tick
//! musical coordinates, plus the signed beat phase used to align the local
//! transport to the shared quantum grid. No shared state, no I/O.
//!
//! Phase convention: phase lies in `[-quantum, 0)` with 0 representing the
//! next downbeat. Both the position-derived and frame-derived paths follow
//! this convention and agree at quantum boundaries to within one tick.

/// Tempo fallback, in bpm, when a non-positive value is supplied
pub const DEFAULT_TEMPO: f64 = 120.0;

/// Ticks per beat reported to the host when it never supplied a valid value
pub const DEFAULT_TICKS_PER_BEAT: f64 = 960.0;

/// Beat type (time-signature denominator) fallback
pub const DEFAULT_BEAT_TYPE: f32 = 4.0;

/// Bar/beat/tick tuple as reported to the host (bar and beat are 1-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MusicalPosition {
    pub bar: i32,
    pub beat: i32,
    pub tick: i32,
}

/// Elapsed microseconds for a frame count, rounded to the nearest integer
fn micros_from_frame(frame: u64, frame_rate: f64) -> i64 {
    (1.0e6 * frame as f64 / frame_rate).round() as i64
}

/// Total elapsed beats for a frame count at the given tempo
pub fn beats_from_frame(frame: u64, frame_rate: f64, tempo: f64) -> f64 {
    tempo * micros_from_frame(frame, frame_rate) as f64 / 60.0e6
}

/// Derive the musical position for a raw frame count
///
/// `quantum` is floored at 1.0 to avoid division degeneracy. Caller contract:
/// `frame_rate > 0`.
pub fn position_from_frame(
    frame: u64,
    frame_rate: f64,
    tempo: f64,
    quantum: f64,
    ticks_per_beat: f64,
) -> MusicalPosition {
    let beats_per_bar = quantum.max(1.0);
    let beats = beats_from_frame(frame, frame_rate, tempo);

    let bar = (beats / beats_per_bar).floor();
    let beat = beats - bar * beats_per_bar;

    MusicalPosition {
        bar: bar as i32 + 1,
        beat: beat as i32 + 1,
        tick: (ticks_per_beat * beat.fract()) as i32,
    }
}

/// Beat phase from a valid (quantized) musical position
///
/// `beat` and `tick` are the 1-indexed host values.
pub fn beat_phase_from_position(beat: i32, tick: i32, ticks_per_beat: f64, quantum: f64) -> f64 {
    let quantum = quantum.max(1.0);
    f64::from(beat - 1) + f64::from(tick) / ticks_per_beat - quantum
}

/// Beat phase derived directly from the raw frame count
///
/// Fallback for when no valid musical position is available from the host.
pub fn beat_phase_from_frame(frame: u64, frame_rate: f64, tempo: f64, quantum: f64) -> f64 {
    let quantum = quantum.max(1.0);
    beats_from_frame(frame, frame_rate, tempo).rem_euclid(quantum) - quantum
}
