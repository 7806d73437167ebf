//! Fixed-rate driver for every running session
//!
//! The scheduler keeps the set of running sessions keyed by id. On each tick
//! boundary every idle session gets its own task, so sessions tick in
//! parallel and a slow one only delays itself. A session still busy with its
//! previous tick is marked behind and ticks again as soon as that tick
//! finishes; at most one boundary is carried over. A session whose tick
//! fails or panics is force-ended and dropped without affecting the rest.

use crate::registry::{SessionRegistry, SharedSession};
use crate::session::SessionError;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use shared::{PlayerId, Score, SessionId};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Receives session lifecycle notifications, e.g. for score history.
pub trait SessionObserver: Send + Sync {
    fn session_started(&self, session: SessionId, code: &str, players: usize);
    fn session_ended(&self, session: SessionId, final_scores: &[Score], winner: Option<PlayerId>);
}

/// Observer that only writes to the log
pub struct LogObserver;

impl SessionObserver for LogObserver {
    fn session_started(&self, session: SessionId, code: &str, players: usize) {
        info!(
            "Session {} ({}) started with {} players",
            session, code, players
        );
    }

    fn session_ended(&self, session: SessionId, final_scores: &[Score], winner: Option<PlayerId>) {
        let scores: Vec<String> = final_scores
            .iter()
            .map(|s| format!("{}={}", s.player, s.score))
            .collect();
        info!(
            "Session {} ended, winner {:?}, scores [{}]",
            session,
            winner,
            scores.join(", ")
        );
    }
}

const IDLE: u8 = 0;
const BUSY: u8 = 1;
/// Busy, and a boundary passed while it was.
const BEHIND: u8 = 2;

struct ActiveSession {
    session: SharedSession,
    state: Arc<AtomicU8>,
}

pub struct TickScheduler {
    interval: Duration,
    registry: Arc<SessionRegistry>,
    observer: Arc<dyn SessionObserver>,
    active: Mutex<HashMap<SessionId, ActiveSession>>,
}

impl TickScheduler {
    pub fn new(
        interval: Duration,
        registry: Arc<SessionRegistry>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            interval,
            registry,
            observer,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a waiting session and registers it for ticking
    ///
    /// The state change and the registration happen together: a session is
    /// running if and only if the scheduler drives it.
    pub fn start_session(
        &self,
        session: &SharedSession,
        requester: PlayerId,
    ) -> Result<(), SessionError> {
        let (id, code, players) = {
            let mut guard = session.lock();
            guard.start(requester)?;
            (guard.id(), guard.code().to_string(), guard.player_count())
        };
        self.active.lock().insert(
            id,
            ActiveSession {
                session: Arc::clone(session),
                state: Arc::new(AtomicU8::new(IDLE)),
            },
        );
        self.observer.session_started(id, &code, players);
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_active(&self, id: SessionId) -> bool {
        self.active.lock().contains_key(&id)
    }

    /// Claims every idle session; busy ones are marked behind instead.
    fn due_sessions(&self) -> Vec<(SessionId, SharedSession, Arc<AtomicU8>)> {
        let active = self.active.lock();
        let mut due = Vec::with_capacity(active.len());
        for (id, entry) in active.iter() {
            match entry
                .state
                .compare_exchange(IDLE, BUSY, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => due.push((*id, Arc::clone(&entry.session), Arc::clone(&entry.state))),
                Err(_) => {
                    if entry
                        .state
                        .compare_exchange(BUSY, BEHIND, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        warn!("Session {} overran its tick", id);
                    }
                }
            }
        }
        due
    }

    /// Runs a claimed session, ticking once more if it fell behind meanwhile.
    fn drive(&self, id: SessionId, session: &SharedSession, state: &AtomicU8) {
        loop {
            self.tick_one(id, session);
            if !self.is_active(id) {
                state.store(IDLE, Ordering::Release);
                return;
            }
            match state.compare_exchange(BUSY, IDLE, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(_) => {
                    state.store(BUSY, Ordering::Release);
                    debug!("Session {} catching up on a missed boundary", id);
                }
            }
        }
    }

    /// Ticks one session, isolating any failure to that session
    fn tick_one(&self, id: SessionId, session: &SharedSession) {
        let ended = {
            let mut guard = session.lock();
            let result = panic::catch_unwind(AssertUnwindSafe(|| guard.tick()));
            match result {
                Ok(Ok(report)) => report.ended,
                Ok(Err(SessionError::NotRunning(state))) => {
                    debug!("Session {} is {:?}, deregistering", id, state);
                    true
                }
                Ok(Err(err)) => {
                    error!(
                        "[{}] Tick {} failed: {}. State: {:?}",
                        guard.code(),
                        guard.tick_count(),
                        err,
                        guard.snapshot()
                    );
                    guard.force_end(&err.to_string());
                    true
                }
                Err(_) => {
                    error!(
                        "[{}] Tick {} panicked. State: {:?}",
                        guard.code(),
                        guard.tick_count(),
                        guard.snapshot()
                    );
                    guard.force_end("internal server error");
                    true
                }
            }
        };

        if ended {
            self.retire(id, session);
        }
    }

    /// Deregisters an ended session and reports its result.
    fn retire(&self, id: SessionId, session: &SharedSession) {
        let (scores, winner) = {
            let guard = session.lock();
            (guard.scores(), guard.winner())
        };
        self.active.lock().remove(&id);
        self.registry.remove(id);
        self.observer.session_ended(id, &scores, winner);
    }

    /// Ticks every due session once on the calling thread. Returns how many ran.
    pub fn tick_now(&self) -> usize {
        let due = self.due_sessions();
        for (id, session, state) in &due {
            self.drive(*id, session, state);
        }
        due.len()
    }

    /// Drives all running sessions until the task is dropped
    ///
    /// Cadence follows the wall clock. An overrun session ticks again right
    /// after it finishes; there is never a burst of catch-up ticks.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Tick scheduler running every {:?}", self.interval);

        loop {
            ticker.tick().await;
            for (id, session, state) in self.due_sessions() {
                let scheduler = Arc::clone(&self);
                tokio::spawn(async move {
                    scheduler.drive(id, &session, &state);
                });
            }
        }
    }
}
