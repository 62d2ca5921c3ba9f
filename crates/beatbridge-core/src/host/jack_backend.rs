//! Native JACK transport backend
//!
//! Connects a JACK client and wires the two realtime entry points of the
//! engine into it: the timebase callback (position stamping via
//! [`TransportAdapter`]) and the slow-sync callback (start gating via
//! [`transport_start_gate`]). The safe `jack` crate drives client lifetime
//! and notifications; timebase, sync and transport control go through
//! `jack-sys`, which the safe wrapper does not expose.
//!
//! The realtime callbacks receive a raw pointer to an [`RtContext`] owned by
//! the host. The context is reclaimed only after the client is deactivated,
//! so the callbacks can never observe it dangling.

use std::os::raw::{c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use jack::{AsyncClient, Client, ClientOptions, Control, ProcessScope};
use jack_sys as j;

use super::{HostError, HostResult, TransportBbt, TransportHost, TransportSnapshot};
use crate::adapter::{transport_start_gate, HostBbt, QuantizedPosition, TransportAdapter};
use crate::state::SharedState;
use crate::timeline::PeerTimeline;

// jack_transport_state_t values from <jack/types.h>
const TRANSPORT_STOPPED: j::jack_transport_state_t = 0;
const TRANSPORT_STARTING: j::jack_transport_state_t = 3;

/// State reachable from the realtime callbacks
struct RtContext {
    adapter: TransportAdapter,
    shared: Arc<SharedState>,
    timeline: Arc<Mutex<Box<dyn PeerTimeline>>>,
}

/// Per-cycle process entry. The engine produces no audio; the callback only
/// keeps the client a full JACK citizen.
struct Processor;

impl jack::ProcessHandler for Processor {
    fn process(&mut self, _client: &Client, _ps: &ProcessScope) -> Control {
        Control::Continue
    }
}

struct Notifications {
    shut_down: Arc<AtomicBool>,
}

impl jack::NotificationHandler for Notifications {
    fn sample_rate(&mut self, _client: &Client, srate: jack::Frames) -> Control {
        log::info!("JACK sample rate changed to: {}", srate);
        Control::Continue
    }

    fn xrun(&mut self, _client: &Client) -> Control {
        log::warn!("JACK xrun detected");
        Control::Continue
    }

    fn shutdown(&mut self, _status: jack::ClientStatus, reason: &str) {
        log::error!("JACK server shut down: {}", reason);
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

/// JACK-backed [`TransportHost`]
///
/// Keeps the async client alive for its own lifetime. Drop disconnects from
/// JACK and reclaims the realtime callback context.
pub struct JackHost {
    raw: *mut j::jack_client_t,
    async_client: Option<AsyncClient<Notifications, Processor>>,
    rt: *mut RtContext,
    sample_rate: f64,
    timebase_held: AtomicBool,
    shut_down: Arc<AtomicBool>,
}

// The raw client pointer stays valid while the async client is alive, and
// libjack's transport and callback-registration entry points are safe to
// call from any thread.
unsafe impl Send for JackHost {}
unsafe impl Sync for JackHost {}

impl JackHost {
    /// Connect to the JACK server and activate the client
    ///
    /// Registers the slow-sync callback before activation; the timebase role
    /// is acquired separately, on demand, via
    /// [`acquire_timebase`](TransportHost::acquire_timebase).
    pub fn connect(
        client_name: &str,
        shared: Arc<SharedState>,
        timeline: Arc<Mutex<Box<dyn PeerTimeline>>>,
    ) -> HostResult<Arc<Self>> {
        let (client, _status) = Client::new(client_name, ClientOptions::NO_START_SERVER)
            .map_err(|e| HostError::ConnectionFailed(e.to_string()))?;

        let sample_rate = client.sample_rate() as f64;
        let raw = client.raw() as *mut j::jack_client_t;
        log::info!(
            "JACK client '{}' created (sample rate: {}Hz)",
            client.name(),
            sample_rate
        );

        let rt = Box::into_raw(Box::new(RtContext {
            adapter: TransportAdapter::new(shared.clone()),
            shared,
            timeline,
        }));

        let rc = unsafe { j::jack_set_sync_callback(raw, Some(sync_callback), rt as *mut c_void) };
        if rc != 0 {
            unsafe { drop(Box::from_raw(rt)) };
            return Err(HostError::ActivationFailed(format!(
                "sync callback registration returned {}",
                rc
            )));
        }

        let shut_down = Arc::new(AtomicBool::new(false));
        let notifications = Notifications {
            shut_down: shut_down.clone(),
        };

        let async_client = match client.activate_async(notifications, Processor) {
            Ok(active) => active,
            Err(e) => {
                unsafe { drop(Box::from_raw(rt)) };
                return Err(HostError::ActivationFailed(e.to_string()));
            }
        };
        log::info!("JACK client activated");

        Ok(Arc::new(Self {
            raw,
            async_client: Some(async_client),
            rt,
            sample_rate,
            timebase_held: AtomicBool::new(false),
            shut_down,
        }))
    }
}

impl TransportHost for JackHost {
    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn query(&self) -> TransportSnapshot {
        let mut pos = std::mem::MaybeUninit::<j::jack_position_t>::zeroed();
        let state = unsafe { j::jack_transport_query(self.raw, pos.as_mut_ptr()) };
        let pos = unsafe { pos.assume_init() };

        let bbt = if pos.valid & j::JackPositionBBT != 0 {
            Some(TransportBbt {
                bar: pos.bar,
                beat: pos.beat,
                tick: pos.tick,
                beats_per_bar: pos.beats_per_bar as f64,
                ticks_per_beat: pos.ticks_per_beat,
                beats_per_minute: pos.beats_per_minute,
                beat_type: pos.beat_type,
            })
        } else {
            None
        };

        TransportSnapshot {
            frame: pos.frame as u64,
            frame_rate: pos.frame_rate as f64,
            rolling: state != TRANSPORT_STOPPED,
            bbt,
        }
    }

    fn start(&self) -> HostResult<()> {
        if self.is_shut_down() {
            return Err(HostError::TransportCommand("client shut down".into()));
        }
        unsafe { j::jack_transport_start(self.raw) };
        Ok(())
    }

    fn stop(&self) -> HostResult<()> {
        if self.is_shut_down() {
            return Err(HostError::TransportCommand("client shut down".into()));
        }
        unsafe { j::jack_transport_stop(self.raw) };
        Ok(())
    }

    fn locate(&self, frame: u32) -> HostResult<()> {
        let rc = unsafe { j::jack_transport_locate(self.raw, frame) };
        if rc != 0 {
            return Err(HostError::TransportCommand(format!(
                "locate to frame {} returned {}",
                frame, rc
            )));
        }
        Ok(())
    }

    fn acquire_timebase(&self) -> HostResult<()> {
        if self.timebase_held.load(Ordering::SeqCst) {
            return Ok(());
        }
        let rc = unsafe {
            j::jack_set_timebase_callback(
                self.raw,
                0, // unconditional: take over from any current master
                Some(timebase_callback),
                self.rt as *mut c_void,
            )
        };
        if rc != 0 {
            return Err(HostError::Timebase(format!(
                "timebase registration returned {}",
                rc
            )));
        }
        self.timebase_held.store(true, Ordering::SeqCst);
        log::info!("timebase role acquired");
        Ok(())
    }

    fn release_timebase(&self) -> HostResult<()> {
        if !self.timebase_held.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let rc = unsafe { j::jack_release_timebase(self.raw) };
        if rc != 0 {
            return Err(HostError::Timebase(format!(
                "timebase release returned {}",
                rc
            )));
        }
        log::info!("timebase role released");
        Ok(())
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Drop for JackHost {
    fn drop(&mut self) {
        if let Err(err) = self.release_timebase() {
            log::warn!("{}", err);
        }
        unsafe { j::jack_set_sync_callback(self.raw, None, ptr::null_mut()) };

        // Deactivate before reclaiming the callback context
        if let Some(active) = self.async_client.take() {
            if let Err(err) = active.deactivate() {
                log::warn!("JACK deactivate failed: {}", err);
            }
        }
        unsafe { drop(Box::from_raw(self.rt)) };
    }
}

/// Timebase entry: stamps bar/beat/tick into the position record
unsafe extern "C" fn timebase_callback(
    _state: j::jack_transport_state_t,
    _nframes: j::jack_nframes_t,
    pos: *mut j::jack_position_t,
    new_pos: c_int,
    arg: *mut c_void,
) {
    let ctx = &mut *(arg as *mut RtContext);
    let pos = &mut *pos;

    let host_bbt = if pos.valid & j::JackPositionBBT != 0 {
        Some(HostBbt {
            ticks_per_beat: pos.ticks_per_beat,
            beat_type: pos.beat_type,
        })
    } else {
        None
    };

    let stamp = ctx.adapter.stamp_position(
        pos.frame as u64,
        pos.frame_rate as f64,
        host_bbt,
        new_pos != 0,
    );

    pos.valid = j::JackPositionBBT;
    pos.bar = stamp.bar;
    pos.beat = stamp.beat;
    pos.tick = stamp.tick;
    pos.beats_per_bar = stamp.beats_per_bar;
    pos.ticks_per_beat = stamp.ticks_per_beat;
    pos.beats_per_minute = stamp.beats_per_minute;
    pos.beat_type = stamp.beat_type;
}

/// Slow-sync entry: gates the transition from starting to rolling until the
/// peer session is phase-locked
unsafe extern "C" fn sync_callback(
    state: j::jack_transport_state_t,
    pos: *mut j::jack_position_t,
    arg: *mut c_void,
) -> c_int {
    if state != TRANSPORT_STARTING {
        return 1;
    }

    let ctx = &*(arg as *mut RtContext);
    let pos = &*pos;

    let position = if pos.valid & j::JackPositionBBT != 0 {
        Some(QuantizedPosition {
            beat: pos.beat,
            tick: pos.tick,
            ticks_per_beat: pos.ticks_per_beat,
        })
    } else {
        None
    };

    let ready = transport_start_gate(
        &ctx.shared,
        &ctx.timeline,
        pos.frame as u64,
        pos.frame_rate as f64,
        position,
    );
    ready as c_int
}
