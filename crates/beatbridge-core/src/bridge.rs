//! Bridge façade
//!
//! Owns the pieces of the reconciliation engine (shared state, host handle,
//! peer timeline, worker) and wires the peer library's callbacks into the
//! shared state. This is the surface the daemon drives; everything underneath
//! stays internal to the engine.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::host::TransportHost;
use crate::state::SharedState;
use crate::timeline::PeerTimeline;
use crate::worker::ReconciliationWorker;

/// Re-evaluate whether this process should hold the host timebase role
///
/// With peers on the session the engine stamps musical time into the host;
/// alone it steps aside so another client can. Failures are logged and
/// retried on the next peer-count change.
fn refresh_timebase_role(host: &dyn TransportHost, peers: usize) {
    let result = if peers > 0 {
        host.acquire_timebase()
    } else {
        host.release_timebase()
    };
    if let Err(err) = result {
        log::warn!("timebase role change failed: {}", err);
    }
}

/// Reconciliation engine between a host transport and a peer timeline
pub struct Bridge {
    shared: Arc<SharedState>,
    host: Arc<dyn TransportHost>,
    timeline: Arc<Mutex<Box<dyn PeerTimeline>>>,
    poll_interval: Duration,
    worker: Option<ReconciliationWorker>,
}

impl Bridge {
    /// Assemble the engine around an already-connected host and timeline
    ///
    /// The same `shared` and `timeline` handles must be the ones the host
    /// backend stamps and gates against; the bridge does not start anything
    /// until [`start`](Self::start).
    pub fn new(
        shared: Arc<SharedState>,
        host: Arc<dyn TransportHost>,
        timeline: Arc<Mutex<Box<dyn PeerTimeline>>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            shared,
            host,
            timeline,
            poll_interval,
            worker: None,
        }
    }

    /// Install the peer callbacks, join the session and start reconciling
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }

        self.install_callbacks();

        lock_timeline(&self.timeline).enable(true);

        self.worker = Some(ReconciliationWorker::start(
            self.shared.clone(),
            self.host.clone(),
            self.timeline.clone(),
            self.poll_interval,
        ));
        log::info!("bridge started");
    }

    /// Stop reconciling, leave the session and release the timebase role
    pub fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }

        lock_timeline(&self.timeline).enable(false);

        if let Err(err) = self.host.release_timebase() {
            log::warn!("timebase release failed: {}", err);
        }
        log::info!("bridge stopped");
    }

    /// Started and the host still answers
    pub fn is_active(&self) -> bool {
        self.worker.is_some() && !self.host.is_shut_down()
    }

    pub fn tempo(&self) -> f64 {
        self.shared.lock().tempo
    }

    /// Request a tempo change, applied on the next realtime stamp and then
    /// published to the peers by the reconciliation pass
    pub fn set_tempo(&self, bpm: f64) {
        if bpm <= 0.0 {
            log::warn!("ignoring non-positive tempo request: {}", bpm);
            return;
        }
        self.shared.lock().tempo_pending = bpm;
        self.shared.notify_all();
    }

    pub fn quantum(&self) -> f64 {
        self.shared.lock().quantum
    }

    pub fn is_playing(&self) -> bool {
        self.shared.lock().playing
    }

    /// Ask the host transport to start or stop; the state change itself is
    /// observed and published by the reconciliation pass
    pub fn set_playing(&self, playing: bool) {
        let result = if playing {
            self.host.start()
        } else {
            self.host.stop()
        };
        if let Err(err) = result {
            log::warn!("transport command failed: {}", err);
        }
    }

    /// Relocate the host transport to a raw frame position; the timebase
    /// stamp for the new position follows on the next cycle
    pub fn locate(&self, frame: u32) {
        if let Err(err) = self.host.locate(frame) {
            log::warn!("transport relocate failed: {}", err);
        }
    }

    pub fn num_peers(&self) -> usize {
        self.shared.lock().peer_count
    }

    pub fn sample_rate(&self) -> f64 {
        self.host.sample_rate()
    }

    /// Peer-callback wiring: each handler runs in the peer library's own
    /// callback context, takes the blocking lock, records the change and
    /// wakes the worker so it reacts before the next poll tick.
    fn install_callbacks(&self) {
        let mut timeline = lock_timeline(&self.timeline);

        let shared = self.shared.clone();
        let host = self.host.clone();
        timeline.set_num_peers_callback(Box::new(move |peers| {
            log::info!("session peers: {}", peers);
            shared.lock().peer_count = peers;
            refresh_timebase_role(host.as_ref(), peers);
            shared.notify_all();
        }));

        let shared = self.shared.clone();
        let host = self.host.clone();
        timeline.set_tempo_callback(Box::new(move |bpm| {
            log::info!("session tempo: {:.2} bpm", bpm);
            if bpm <= 0.0 {
                return;
            }
            let mut state = shared.lock();
            state.tempo_pending = bpm;
            let peers = state.peer_count;
            drop(state);
            refresh_timebase_role(host.as_ref(), peers);
            shared.notify_all();
        }));

        let shared = self.shared.clone();
        let host = self.host.clone();
        timeline.set_start_stop_callback(Box::new(move |playing| {
            let mut state = shared.lock();
            if state.playing_pending && state.playing == playing {
                // Round-trip of our own transition, not a peer's
                log::debug!("session transport echo absorbed");
                state.playing_pending = false;
                drop(state);
                shared.notify_all();
                return;
            }

            log::info!(
                "session transport {}",
                if playing { "start" } else { "stop" }
            );
            state.playing = playing;
            state.playing_pending = false;

            // Issued under the lock so the worker never observes the new
            // play state before the host command lands
            let result = if playing { host.start() } else { host.stop() };
            if let Err(err) = result {
                log::warn!("transport command failed: {}", err);
            }
            drop(state);
            shared.notify_all();
        }));
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
        }
    }
}

fn lock_timeline<'a>(
    timeline: &'a Mutex<Box<dyn PeerTimeline>>,
) -> std::sync::MutexGuard<'a, Box<dyn PeerTimeline>> {
    match timeline.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostResult, TransportBbt, TransportSnapshot};
    use crate::timeline::{
        LoopbackHandle, LoopbackTimeline, PeersCallback, SessionSnapshot, StartStopCallback,
        TempoCallback,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    /// Host double that rolls when started, like the real transport
    struct FakeHost {
        snapshot: Mutex<TransportSnapshot>,
        starts: AtomicUsize,
        stops: AtomicUsize,
        acquires: AtomicUsize,
        releases: AtomicUsize,
        locates: Mutex<Vec<u32>>,
    }

    impl FakeHost {
        fn new(bbt: Option<TransportBbt>) -> Arc<Self> {
            Arc::new(Self {
                snapshot: Mutex::new(TransportSnapshot {
                    frame: 0,
                    frame_rate: 48_000.0,
                    rolling: false,
                    bbt,
                }),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                acquires: AtomicUsize::new(0),
                releases: AtomicUsize::new(0),
                locates: Mutex::new(Vec::new()),
            })
        }

        fn set_rolling(&self, rolling: bool) {
            self.snapshot.lock().unwrap().rolling = rolling;
        }
    }

    impl TransportHost for FakeHost {
        fn sample_rate(&self) -> f64 {
            48_000.0
        }
        fn query(&self) -> TransportSnapshot {
            *self.snapshot.lock().unwrap()
        }
        fn start(&self) -> HostResult<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.set_rolling(true);
            Ok(())
        }
        fn stop(&self) -> HostResult<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.set_rolling(false);
            Ok(())
        }
        fn locate(&self, frame: u32) -> HostResult<()> {
            self.locates.lock().unwrap().push(frame);
            Ok(())
        }
        fn acquire_timebase(&self) -> HostResult<()> {
            self.acquires.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn release_timebase(&self) -> HostResult<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Loopback wrapper counting commits
    struct CountingLoopback {
        inner: LoopbackTimeline,
        commits: Arc<AtomicUsize>,
    }

    impl PeerTimeline for CountingLoopback {
        fn enable(&mut self, enabled: bool) {
            self.inner.enable(enabled);
        }
        fn is_enabled(&self) -> bool {
            self.inner.is_enabled()
        }
        fn num_peers(&self) -> usize {
            self.inner.num_peers()
        }
        fn clock_micros(&self) -> i64 {
            self.inner.clock_micros()
        }
        fn capture(&self) -> SessionSnapshot {
            self.inner.capture()
        }
        fn commit(&mut self, snapshot: SessionSnapshot) {
            self.commits.fetch_add(1, Ordering::SeqCst);
            self.inner.commit(snapshot);
        }
        fn set_num_peers_callback(&mut self, callback: PeersCallback) {
            self.inner.set_num_peers_callback(callback);
        }
        fn set_tempo_callback(&mut self, callback: TempoCallback) {
            self.inner.set_tempo_callback(callback);
        }
        fn set_start_stop_callback(&mut self, callback: StartStopCallback) {
            self.inner.set_start_stop_callback(callback);
        }
    }

    struct Fixture {
        bridge: Bridge,
        shared: Arc<SharedState>,
        host: Arc<FakeHost>,
        timeline: Arc<Mutex<Box<dyn PeerTimeline>>>,
        handle: LoopbackHandle,
        commits: Arc<AtomicUsize>,
    }

    fn fixture(bbt: Option<TransportBbt>) -> Fixture {
        let shared = Arc::new(SharedState::new(120.0, 4.0));
        let host = FakeHost::new(bbt);
        let inner = LoopbackTimeline::new(120.0);
        let handle = inner.handle();
        let commits = Arc::new(AtomicUsize::new(0));
        let timeline: Arc<Mutex<Box<dyn PeerTimeline>>> =
            Arc::new(Mutex::new(Box::new(CountingLoopback {
                inner,
                commits: commits.clone(),
            })));
        let host_dyn: Arc<dyn TransportHost> = host.clone();
        let bridge = Bridge::new(
            shared.clone(),
            host_dyn,
            timeline.clone(),
            Duration::from_millis(10),
        );
        Fixture {
            bridge,
            shared,
            host,
            timeline,
            handle,
            commits,
        }
    }

    fn bbt(tempo: f64) -> TransportBbt {
        TransportBbt {
            bar: 1,
            beat: 1,
            tick: 0,
            beats_per_bar: 4.0,
            ticks_per_beat: 960.0,
            beats_per_minute: tempo,
            beat_type: 4.0,
        }
    }

    fn wait_for(predicate: impl Fn() -> bool) {
        for _ in 0..200 {
            if predicate() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached within timeout");
    }

    #[test]
    fn test_first_peer_triggers_tempo_publish() {
        // Host transport already stamped at 128 bpm, session still at 120
        let mut f = fixture(Some(bbt(128.0)));
        f.bridge.start();
        assert!(f.bridge.is_active());

        f.handle.set_num_peers(1);

        wait_for(|| f.bridge.tempo() == 128.0);
        assert_eq!(f.bridge.num_peers(), 1);
        // Timebase role claimed on the peer-count change
        assert!(f.host.acquires.load(Ordering::SeqCst) >= 1);
        // The session received exactly one correcting commit
        thread::sleep(Duration::from_millis(50));
        assert_eq!(f.commits.load(Ordering::SeqCst), 1);
        assert_eq!(f.timeline.lock().unwrap().capture().tempo(), 128.0);

        f.bridge.stop();
    }

    #[test]
    fn test_local_play_publishes_once_and_echo_is_absorbed() {
        let mut f = fixture(Some(bbt(120.0)));
        f.bridge.start();
        f.handle.set_num_peers(1);
        wait_for(|| f.bridge.num_peers() == 1);

        // Play started on the host side (not through the bridge)
        f.host.set_rolling(true);

        wait_for(|| f.bridge.is_playing());
        // The loopback echo of our commit must clear the pending flag
        wait_for(|| !f.shared.lock().playing_pending);

        thread::sleep(Duration::from_millis(50));
        // One publishing commit, and no host command issued back
        assert_eq!(f.commits.load(Ordering::SeqCst), 1);
        assert_eq!(f.host.starts.load(Ordering::SeqCst), 0);
        assert!(f.timeline.lock().unwrap().capture().is_playing());

        f.bridge.stop();
    }

    #[test]
    fn test_peer_play_issues_one_host_command() {
        let mut f = fixture(Some(bbt(120.0)));
        f.bridge.start();
        f.handle.set_num_peers(1);
        wait_for(|| f.bridge.num_peers() == 1);

        // A remote peer starts the session
        {
            let mut timeline = f.timeline.lock().unwrap();
            let now = timeline.clock_micros();
            let mut snap = timeline.capture();
            snap.set_is_playing(true, now);
            timeline.commit(snap);
        }

        wait_for(|| f.bridge.is_playing());
        wait_for(|| f.host.starts.load(Ordering::SeqCst) == 1);

        // Converged: no stop bounces back, no extra start
        thread::sleep(Duration::from_millis(50));
        assert_eq!(f.host.starts.load(Ordering::SeqCst), 1);
        assert_eq!(f.host.stops.load(Ordering::SeqCst), 0);

        f.bridge.stop();
    }

    #[test]
    fn test_set_tempo_records_pending_request() {
        let f = fixture(None);
        f.bridge.set_tempo(132.0);
        assert_eq!(f.shared.lock().tempo_pending, 132.0);
        // Invalid requests are dropped
        f.bridge.set_tempo(0.0);
        assert_eq!(f.shared.lock().tempo_pending, 132.0);
    }

    #[test]
    fn test_set_playing_drives_the_host() {
        let f = fixture(None);
        f.bridge.set_playing(true);
        assert_eq!(f.host.starts.load(Ordering::SeqCst), 1);
        assert!(f.host.query().rolling);
        f.bridge.set_playing(false);
        assert_eq!(f.host.stops.load(Ordering::SeqCst), 1);
        assert!(!f.host.query().rolling);
    }

    #[test]
    fn test_locate_forwards_to_host() {
        let f = fixture(None);
        f.bridge.locate(96_000);
        assert_eq!(*f.host.locates.lock().unwrap(), vec![96_000]);
    }

    #[test]
    fn test_stop_releases_timebase_and_leaves_session() {
        let mut f = fixture(None);
        f.bridge.start();
        assert!(f.timeline.lock().unwrap().is_enabled());

        f.bridge.stop();
        assert!(!f.bridge.is_active());
        assert!(!f.timeline.lock().unwrap().is_enabled());
        assert!(f.host.releases.load(Ordering::SeqCst) >= 1);
        assert!(!f.shared.lock().running);
    }
}
