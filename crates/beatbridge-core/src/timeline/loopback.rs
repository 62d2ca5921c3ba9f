//! In-process peer timeline
//!
//! A [`PeerTimeline`] implementation backed by nothing but local state. It
//! behaves like a session with no network underneath: commits take effect
//! immediately, and commits that change tempo or play state are echoed back
//! through the registered callbacks from a dedicated dispatch thread, the
//! same way a real synchronization library reflects a committed change to
//! every participant (including the committer).
//!
//! This is what the daemon runs when no networked session library is linked
//! in, and what the engine tests use to exercise the echo-suppression
//! protocol end to end.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{unbounded, Sender};

use super::{PeersCallback, PeerTimeline, SessionSnapshot, StartStopCallback, TempoCallback};

/// Changes echoed to the registered callbacks after a commit
enum Echo {
    Peers(usize),
    Tempo(f64),
    StartStop(bool),
}

#[derive(Default)]
struct Callbacks {
    peers: Option<PeersCallback>,
    tempo: Option<TempoCallback>,
    start_stop: Option<StartStopCallback>,
}

/// Controller for a [`LoopbackTimeline`] that has been handed off
///
/// Lets tests and demos simulate session events (peers joining or leaving)
/// after the timeline itself is owned by the bridge.
#[derive(Clone)]
pub struct LoopbackHandle {
    peers: Arc<AtomicUsize>,
    echo_tx: Sender<Echo>,
}

impl LoopbackHandle {
    /// Simulate peers joining or leaving the session
    pub fn set_num_peers(&self, peers: usize) {
        self.peers.store(peers, Ordering::SeqCst);
        let _ = self.echo_tx.send(Echo::Peers(peers));
    }
}

pub struct LoopbackTimeline {
    enabled: bool,
    committed: SessionSnapshot,
    peers: Arc<AtomicUsize>,
    epoch: Instant,
    callbacks: Arc<Mutex<Callbacks>>,
    echo_tx: Option<Sender<Echo>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl LoopbackTimeline {
    pub fn new(tempo: f64) -> Self {
        let callbacks = Arc::new(Mutex::new(Callbacks::default()));
        let (echo_tx, echo_rx) = unbounded::<Echo>();

        // Callback-invocation context: mirrors the external library's own
        // thread, so callbacks never run while the committer still holds its
        // locks.
        let dispatch_callbacks = callbacks.clone();
        let dispatcher = thread::Builder::new()
            .name("timeline-echo".into())
            .spawn(move || {
                while let Ok(echo) = echo_rx.recv() {
                    let mut callbacks = match dispatch_callbacks.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    match echo {
                        Echo::Peers(n) => {
                            if let Some(callback) = callbacks.peers.as_mut() {
                                callback(n);
                            }
                        }
                        Echo::Tempo(bpm) => {
                            if let Some(callback) = callbacks.tempo.as_mut() {
                                callback(bpm);
                            }
                        }
                        Echo::StartStop(playing) => {
                            if let Some(callback) = callbacks.start_stop.as_mut() {
                                callback(playing);
                            }
                        }
                    }
                }
            })
            .expect("Failed to spawn timeline echo thread");

        Self {
            enabled: false,
            committed: SessionSnapshot::new(tempo),
            peers: Arc::new(AtomicUsize::new(0)),
            epoch: Instant::now(),
            callbacks,
            echo_tx: Some(echo_tx),
            dispatcher: Some(dispatcher),
        }
    }

    /// Controller handle, valid for the timeline's lifetime
    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            peers: self.peers.clone(),
            // Present until drop, and handles are created before hand-off
            echo_tx: self.echo_tx.clone().expect("timeline already shut down"),
        }
    }

    fn echo(&self, echo: Echo) {
        if let Some(tx) = &self.echo_tx {
            // Receiver only disappears during drop
            let _ = tx.send(echo);
        }
    }

    fn lock_callbacks(&self) -> MutexGuard<'_, Callbacks> {
        match self.callbacks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl PeerTimeline for LoopbackTimeline {
    fn enable(&mut self, enabled: bool) {
        log::info!("loopback timeline {}", if enabled { "enabled" } else { "disabled" });
        self.enabled = enabled;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn num_peers(&self) -> usize {
        self.peers.load(Ordering::SeqCst)
    }

    fn clock_micros(&self) -> i64 {
        self.epoch.elapsed().as_micros() as i64
    }

    fn capture(&self) -> SessionSnapshot {
        self.committed
    }

    fn commit(&mut self, snapshot: SessionSnapshot) {
        let previous = self.committed;
        self.committed = snapshot;

        if (snapshot.tempo() - previous.tempo()).abs() > f64::EPSILON {
            self.echo(Echo::Tempo(snapshot.tempo()));
        }
        if snapshot.is_playing() != previous.is_playing() {
            self.echo(Echo::StartStop(snapshot.is_playing()));
        }
    }

    fn set_num_peers_callback(&mut self, callback: PeersCallback) {
        self.lock_callbacks().peers = Some(callback);
    }

    fn set_tempo_callback(&mut self, callback: TempoCallback) {
        self.lock_callbacks().tempo = Some(callback);
    }

    fn set_start_stop_callback(&mut self, callback: StartStopCallback) {
        self.lock_callbacks().start_stop = Some(callback);
    }
}

impl Drop for LoopbackTimeline {
    fn drop(&mut self) {
        // Closing the channel ends the dispatch loop; outstanding handles
        // keep the channel open, their sends go nowhere
        drop(self.echo_tx.take());
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }
}
