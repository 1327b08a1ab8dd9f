//! Middleware connection bootstrap.
//!
//! The [`ConnectionGate`] starts at most one probe thread per attempt. The
//! probe polls the service locator once per cycle until the middleware
//! answers or the cycle budget runs out. Any number of callers may block in
//! [`ConnectionGate::request_connection`] meanwhile; they are registered as
//! waiters of the running attempt and all receive that attempt's outcome.
//!
//! ```text
//!            request_connection            probe succeeds
//!  Unknown ----------------------> Connecting ---------------> Connected
//!     ^                                |                           |
//!     +---- probe fails / reset -------+---------- reset ----------+
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};

use crate::channel::ChannelStore;
use crate::engine::DtvEngine;
use crate::error::EngineError;
use crate::middleware::ServiceLocator;

/// Probe cycle length and budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    pub interval: Duration,
    pub cycles: u32,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            cycles: 100_000,
        }
    }
}

type Outcome = Result<Arc<DtvEngine>, EngineError>;

enum Phase {
    Unknown,
    Connecting { attempt: u64 },
    Connected(Arc<DtvEngine>),
}

/// Outcome of a finished attempt, kept until each of its waiters took it.
struct Release {
    outcome: Outcome,
    remaining: usize,
}

struct GateState {
    phase: Phase,
    attempts: u64,
    /// Callers blocked on the current attempt.
    waiters: usize,
    released: HashMap<u64, Release>,
}

impl GateState {
    fn is_current(&self, attempt: u64) -> bool {
        matches!(self.phase, Phase::Connecting { attempt: a } if a == attempt)
    }

    /// Hand out the finished outcome of `attempt`, if any.
    fn take_release(&mut self, attempt: u64) -> Option<Outcome> {
        let release = self.released.get_mut(&attempt)?;
        release.remaining -= 1;
        let outcome = release.outcome.clone();
        if release.remaining == 0 {
            self.released.remove(&attempt);
        }
        Some(outcome)
    }

    /// Publish `outcome` to every waiter of `attempt` and zero the tally.
    fn release(&mut self, attempt: u64, outcome: Outcome) -> usize {
        let waiters = std::mem::take(&mut self.waiters);
        if waiters > 0 {
            self.released.insert(
                attempt,
                Release {
                    outcome,
                    remaining: waiters,
                },
            );
        }
        waiters
    }
}

struct Shared {
    state: Mutex<GateState>,
    cond: Condvar,
}

/// Connects to the middleware once and shares the engine with every caller.
pub struct ConnectionGate {
    shared: Arc<Shared>,
    locator: Arc<dyn ServiceLocator>,
    store: Arc<dyn ChannelStore>,
    policy: ProbePolicy,
}

impl ConnectionGate {
    pub fn new(
        locator: Arc<dyn ServiceLocator>,
        store: Arc<dyn ChannelStore>,
        policy: ProbePolicy,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(GateState {
                    phase: Phase::Unknown,
                    attempts: 0,
                    waiters: 0,
                    released: HashMap::new(),
                }),
                cond: Condvar::new(),
            }),
            locator,
            store,
            policy,
        }
    }

    /// Non-blocking readiness check.
    pub fn connection_ready(&self) -> bool {
        matches!(self.shared.state.lock().phase, Phase::Connected(_))
    }

    /// The engine, if connected.
    pub fn engine(&self) -> Option<Arc<DtvEngine>> {
        match &self.shared.state.lock().phase {
            Phase::Connected(engine) => Some(engine.clone()),
            _ => None,
        }
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self.shared.state.lock().phase, Phase::Connecting { .. })
    }

    /// Callers currently blocked on the running attempt.
    pub fn waiting(&self) -> usize {
        self.shared.state.lock().waiters
    }

    /// Probe attempts started so far.
    pub fn attempts(&self) -> u64 {
        self.shared.state.lock().attempts
    }

    /// Return the engine, connecting first if needed.
    ///
    /// Blocks until the running probe attempt finishes, or until `timeout`
    /// expires. An expired wait returns [`EngineError::WaitTimeout`] and
    /// leaves the probe running.
    pub fn request_connection(&self, timeout: Option<Duration>) -> Result<Arc<DtvEngine>, EngineError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.state.lock();

        let running = match &state.phase {
            Phase::Connected(engine) => return Ok(engine.clone()),
            Phase::Connecting { attempt } => Some(*attempt),
            Phase::Unknown => None,
        };
        let attempt = match running {
            Some(attempt) => attempt,
            None => self.launch_probe(&mut state)?,
        };
        state.waiters += 1;
        debug!(
            "[Gate] waiting on attempt {} ({} waiters)",
            attempt, state.waiters
        );

        loop {
            if let Some(outcome) = state.take_release(attempt) {
                return outcome;
            }
            match deadline {
                Some(deadline) => {
                    if self.shared.cond.wait_until(&mut state, deadline).timed_out() {
                        if let Some(outcome) = state.take_release(attempt) {
                            return outcome;
                        }
                        // Not released yet, so still counted for this attempt.
                        state.waiters -= 1;
                        debug!("[Gate] wait on attempt {} timed out", attempt);
                        return Err(EngineError::WaitTimeout);
                    }
                }
                None => self.shared.cond.wait(&mut state),
            }
        }
    }

    fn launch_probe(&self, state: &mut GateState) -> Result<u64, EngineError> {
        state.attempts += 1;
        let attempt = state.attempts;

        let shared = self.shared.clone();
        let locator = self.locator.clone();
        let store = self.store.clone();
        let policy = self.policy;
        let spawned = thread::Builder::new()
            .name(format!("tvbridge-probe-{}", attempt))
            .spawn(move || run_probe(shared, locator, store, policy, attempt));

        if let Err(e) = spawned {
            warn!("[Gate] failed to spawn probe thread: {}", e);
            return Err(EngineError::ProbeSpawn(e.to_string()));
        }
        state.phase = Phase::Connecting { attempt };
        info!(
            "[Gate] probe attempt {} started ({} x {:?})",
            attempt, policy.cycles, policy.interval
        );
        Ok(attempt)
    }

    /// Return to `Unknown`.
    ///
    /// A running probe is stopped and its waiters fail with
    /// [`EngineError::ConnectionReset`]; a connected engine is deinitialized.
    pub fn reset(&self) {
        let mut state = self.shared.state.lock();
        match std::mem::replace(&mut state.phase, Phase::Unknown) {
            Phase::Connecting { attempt } => {
                let released = state.release(attempt, Err(EngineError::ConnectionReset));
                self.shared.cond.notify_all();
                drop(state);
                info!(
                    "[Gate] reset during attempt {}, {} waiters released",
                    attempt, released
                );
            }
            Phase::Connected(engine) => {
                drop(state);
                engine.deinit();
                info!("[Gate] reset, engine discarded");
            }
            Phase::Unknown => {}
        }
    }
}

impl Drop for ConnectionGate {
    fn drop(&mut self) {
        self.reset();
    }
}

fn run_probe(
    shared: Arc<Shared>,
    locator: Arc<dyn ServiceLocator>,
    store: Arc<dyn ChannelStore>,
    policy: ProbePolicy,
    attempt: u64,
) {
    let outcome = probe(&shared, locator.as_ref(), &store, policy, attempt);

    let mut state = shared.state.lock();
    if !state.is_current(attempt) {
        drop(state);
        debug!("[Gate] attempt {} superseded, discarding result", attempt);
        if let Ok(engine) = outcome {
            engine.deinit();
        }
        return;
    }

    match &outcome {
        Ok(engine) => state.phase = Phase::Connected(engine.clone()),
        Err(_) => state.phase = Phase::Unknown,
    }
    let released = state.release(attempt, outcome.clone());
    shared.cond.notify_all();
    drop(state);

    match outcome {
        Ok(_) => info!(
            "[Gate] attempt {} connected, {} waiters released",
            attempt, released
        ),
        Err(e) => warn!(
            "[Gate] attempt {} failed: {} ({} waiters released)",
            attempt, e, released
        ),
    }
}

fn probe(
    shared: &Shared,
    locator: &dyn ServiceLocator,
    store: &Arc<dyn ChannelStore>,
    policy: ProbePolicy,
    attempt: u64,
) -> Outcome {
    for cycle in 0..policy.cycles {
        let started = Instant::now();
        if let Some(middleware) = locator.connect(policy.interval) {
            info!("[Gate] middleware reachable after {} cycles", cycle + 1);
            return DtvEngine::connect(middleware, store.clone()).map(Arc::new);
        }

        // Sleep out the rest of the cycle; reset wakes us early.
        let deadline = started + policy.interval;
        let mut state = shared.state.lock();
        while state.is_current(attempt) {
            if shared.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        if !state.is_current(attempt) {
            return Err(EngineError::ConnectionReset);
        }
    }
    Err(EngineError::ConnectionTimeout {
        cycles: policy.cycles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crate::channel::MemoryChannelStore;
    use crate::middleware::Middleware;
    use crate::profile::{DeviceProfile, ProfileMiddleware};

    /// Locator that answers only once opened.
    struct ScriptedLocator {
        open: AtomicBool,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        middleware: Arc<ProfileMiddleware>,
    }

    impl ScriptedLocator {
        fn new(middleware: ProfileMiddleware) -> Arc<Self> {
            Arc::new(Self {
                open: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                middleware: Arc::new(middleware),
            })
        }

        fn open(&self) {
            self.open.store(true, Ordering::SeqCst);
        }
    }

    impl ServiceLocator for ScriptedLocator {
        fn connect(&self, _timeout: Duration) -> Option<Arc<dyn Middleware>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            let result = if self.open.load(Ordering::SeqCst) {
                let middleware: Arc<dyn Middleware> = self.middleware.clone();
                Some(middleware)
            } else {
                None
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn gate(locator: Arc<ScriptedLocator>, cycles: u32) -> ConnectionGate {
        ConnectionGate::new(
            locator,
            Arc::new(MemoryChannelStore::new()),
            ProbePolicy {
                interval: Duration::from_millis(5),
                cycles,
            },
        )
    }

    fn wait_for(what: &str, condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(1));
        }
    }

    const LONG: Option<Duration> = Some(Duration::from_secs(10));

    #[test]
    fn test_concurrent_callers_share_one_probe() {
        let locator = ScriptedLocator::new(ProfileMiddleware::new(DeviceProfile::demo()));
        let gate = Arc::new(gate(locator.clone(), 100_000));

        let callers: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                thread::spawn(move || gate.request_connection(LONG))
            })
            .collect();

        wait_for("8 waiters", || gate.waiting() == 8);
        assert!(!gate.connection_ready());
        locator.open();

        let engines: Vec<Arc<DtvEngine>> = callers
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();
        assert!(engines.iter().all(|e| Arc::ptr_eq(e, &engines[0])));
        assert_eq!(gate.attempts(), 1);
        assert_eq!(locator.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(gate.waiting(), 0);

        // Later callers do not block.
        assert!(gate.connection_ready());
        let later = gate.request_connection(Some(Duration::ZERO)).unwrap();
        assert!(Arc::ptr_eq(&later, &engines[0]));
        assert!(Arc::ptr_eq(&gate.engine().unwrap(), &engines[0]));
    }

    /// Locator whose successful connect blocks until `proceed` is set.
    struct HeldLocator {
        entered: AtomicBool,
        proceed: AtomicBool,
        middleware: Arc<ProfileMiddleware>,
    }

    impl ServiceLocator for HeldLocator {
        fn connect(&self, _timeout: Duration) -> Option<Arc<dyn Middleware>> {
            self.entered.store(true, Ordering::SeqCst);
            while !self.proceed.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            let middleware: Arc<dyn Middleware> = self.middleware.clone();
            Some(middleware)
        }
    }

    #[test]
    fn test_caller_joining_while_engine_is_built() {
        let locator = Arc::new(HeldLocator {
            entered: AtomicBool::new(false),
            proceed: AtomicBool::new(false),
            middleware: Arc::new(ProfileMiddleware::new(DeviceProfile::demo())),
        });
        let gate = Arc::new(ConnectionGate::new(
            locator.clone(),
            Arc::new(MemoryChannelStore::new()),
            ProbePolicy {
                interval: Duration::from_millis(5),
                cycles: 10,
            },
        ));

        let first = {
            let gate = gate.clone();
            thread::spawn(move || gate.request_connection(LONG))
        };
        wait_for("probe inside connect", || locator.entered.load(Ordering::SeqCst));

        // The middleware answered but the engine is not published yet.
        let late = {
            let gate = gate.clone();
            thread::spawn(move || gate.request_connection(LONG))
        };
        wait_for("2 waiters", || gate.waiting() == 2);
        assert!(gate.is_connecting());
        locator.proceed.store(true, Ordering::SeqCst);

        let first = first.join().unwrap().unwrap();
        let late = late.join().unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &late));
        assert_eq!(gate.attempts(), 1);
        assert_eq!(gate.waiting(), 0);

        let after = gate.request_connection(Some(Duration::ZERO)).unwrap();
        assert!(Arc::ptr_eq(&after, &first));
    }

    #[test]
    fn test_caller_after_failed_release_starts_new_attempt() {
        let middleware = ProfileMiddleware::new(DeviceProfile::demo());
        middleware.fail_route_requests(true);
        let locator = ScriptedLocator::new(middleware);
        locator.open();
        let gate = gate(locator.clone(), 10);

        assert!(gate.request_connection(LONG).is_err());
        locator.middleware.fail_route_requests(false);

        assert!(gate.request_connection(LONG).is_ok());
        assert_eq!(gate.attempts(), 2);
        assert!(gate.connection_ready());
    }

    #[test]
    fn test_probe_exhaustion_is_reported() {
        let locator = ScriptedLocator::new(ProfileMiddleware::new(DeviceProfile::demo()));
        let gate = gate(locator.clone(), 3);

        let result = gate.request_connection(LONG);
        assert_eq!(result.err(), Some(EngineError::ConnectionTimeout { cycles: 3 }));
        assert_eq!(locator.calls.load(Ordering::SeqCst), 3);
        assert!(!gate.connection_ready());
        assert!(!gate.is_connecting());

        // A later request starts a fresh attempt.
        locator.open();
        assert!(gate.request_connection(LONG).is_ok());
        assert_eq!(gate.attempts(), 2);
    }

    #[test]
    fn test_caller_timeout_keeps_probe_running() {
        let locator = ScriptedLocator::new(ProfileMiddleware::new(DeviceProfile::demo()));
        let gate = gate(locator.clone(), 100_000);

        let result = gate.request_connection(Some(Duration::from_millis(30)));
        assert_eq!(result.err(), Some(EngineError::WaitTimeout));
        assert!(gate.is_connecting());
        assert_eq!(gate.waiting(), 0);

        locator.open();
        assert!(gate.request_connection(LONG).is_ok());
        assert_eq!(gate.attempts(), 1);
    }

    #[test]
    fn test_reset_releases_waiters() {
        let locator = ScriptedLocator::new(ProfileMiddleware::new(DeviceProfile::demo()));
        let gate = Arc::new(gate(locator.clone(), 100_000));

        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.request_connection(LONG))
        };
        wait_for("waiter", || gate.waiting() == 1);

        gate.reset();
        assert_eq!(waiter.join().unwrap().err(), Some(EngineError::ConnectionReset));
        assert!(!gate.is_connecting());
        assert!(!gate.connection_ready());

        locator.open();
        assert!(gate.request_connection(LONG).is_ok());
        assert_eq!(gate.attempts(), 2);
    }

    #[test]
    fn test_reset_discards_engine() {
        let locator = ScriptedLocator::new(ProfileMiddleware::new(DeviceProfile::demo()));
        locator.open();
        let gate = gate(locator, 10);

        let first = gate.request_connection(LONG).unwrap();
        gate.reset();
        assert!(!first.is_active());
        assert!(gate.engine().is_none());

        let second = gate.request_connection(LONG).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_active());
    }

    #[test]
    fn test_engine_build_failure_is_reported() {
        let middleware = ProfileMiddleware::new(DeviceProfile::demo());
        middleware.fail_route_requests(true);
        let locator = ScriptedLocator::new(middleware);
        locator.open();
        let gate = gate(locator, 10);

        let result = gate.request_connection(LONG);
        assert!(matches!(
            result,
            Err(EngineError::CapabilitySourceUnavailable(_))
        ));
        assert!(!gate.connection_ready());
        assert!(!gate.is_connecting());
    }
}
