//! Idle-lock session holding the derived key
//!
//! The session is the only owner of the resident [`DerivedKey`]. Store and
//! rotation operations borrow it through a [`KeyLease`] for the length of one
//! call. Locking drops the session's reference; a lease already handed out
//! stays valid until its operation finishes, and the key is zeroized when the
//! last reference goes away.
//!
//! State machine:
//! - `Locked -> Unlocked` when a verified key is admitted
//! - `Unlocked -> Locked` on explicit lock, idle timeout, too many failed
//!   unlock attempts at the lock prompt, shutdown, or when another session
//!   rotated the master key out from under this one

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::crypto::DerivedKey;
use crate::error::{Result, VaultError};

/// Default inactivity period before the session locks itself
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Default interval between idle checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of consecutive failed unlocks before the session terminates
pub const DEFAULT_MAX_FAILED_UNLOCKS: u32 = 3;

/// Shortest poll interval the idle timer will run with
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Session tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Lock after this much inactivity (`None` = never)
    pub idle_timeout: Option<Duration>,
    /// How often the background timer checks for idleness
    pub poll_interval: Duration,
    /// Consecutive failed unlocks that terminate the session (0 = unlimited)
    pub max_failed_unlocks: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_failed_unlocks: DEFAULT_MAX_FAILED_UNLOCKS,
        }
    }
}

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Locked,
    Unlocked { since: DateTime<Utc> },
}

/// Why the session last went from unlocked to locked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    Explicit,
    IdleTimeout,
    TooManyAttempts,
    Shutdown,
    /// The master key was rotated by another session
    KeyChanged,
}

/// A derived key lent to a single operation
pub(crate) struct KeyLease {
    key: Arc<DerivedKey>,
}

impl KeyLease {
    pub(crate) fn key(&self) -> &DerivedKey {
        &self.key
    }
}

impl std::fmt::Debug for KeyLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLease")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

struct Resident {
    key: Arc<DerivedKey>,
    since: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

#[derive(Default)]
struct Guarded {
    resident: Option<Resident>,
    failed_unlocks: u32,
    terminated: bool,
    last_lock: Option<LockReason>,
}

/// State shared between the session handle and its idle timer task
struct Shared {
    guarded: Mutex<Guarded>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
}

impl Shared {
    fn lock(&self, reason: LockReason) -> bool {
        let mut guarded = self.guarded.lock();
        Self::discard_key(&mut guarded, reason)
    }

    fn discard_key(guarded: &mut Guarded, reason: LockReason) -> bool {
        let was_unlocked = guarded.resident.take().is_some();
        if was_unlocked {
            guarded.last_lock = Some(reason);
        }
        was_unlocked
    }

    /// Lock if the resident key has been idle for the configured timeout
    fn expire_if_idle(&self, guarded: &mut Guarded, now: DateTime<Utc>) -> bool {
        let (Some(timeout), Some(resident)) = (self.config.idle_timeout, guarded.resident.as_ref())
        else {
            return false;
        };

        let idle = now
            .signed_duration_since(resident.last_activity)
            .to_std()
            .unwrap_or_default();
        if idle < timeout {
            return false;
        }

        Self::discard_key(guarded, LockReason::IdleTimeout);
        info!(idle_secs = idle.as_secs(), "Idle timeout elapsed, session locked");
        true
    }

    fn poll_idle(&self) -> bool {
        let now = self.clock.now();
        let mut guarded = self.guarded.lock();
        self.expire_if_idle(&mut guarded, now)
    }

    /// Record activity and return the resident key, or `Locked`
    fn with_resident<T>(&self, f: impl FnOnce(&mut Resident) -> T) -> Result<T> {
        let now = self.clock.now();
        let mut guarded = self.guarded.lock();
        self.expire_if_idle(&mut guarded, now);

        match guarded.resident.as_mut() {
            Some(resident) => {
                resident.last_activity = now;
                Ok(f(resident))
            }
            None => Err(VaultError::Locked),
        }
    }
}

struct IdleTimer {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Caller-owned session; pass it by reference to every vault operation
pub struct Session {
    shared: Arc<Shared>,
    idle_timer: Mutex<Option<IdleTimer>>,
}

impl Session {
    /// Create a locked session using the wall clock
    pub fn new(config: SessionConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a locked session with a custom time source
    pub fn with_clock(config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                guarded: Mutex::new(Guarded::default()),
                clock,
                config,
            }),
            idle_timer: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        match self.shared.guarded.lock().resident.as_ref() {
            Some(resident) => SessionState::Unlocked {
                since: resident.since,
            },
            None => SessionState::Locked,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        matches!(self.state(), SessionState::Unlocked { .. })
    }

    /// Whether repeated unlock failures have shut the session for good
    pub fn is_terminated(&self) -> bool {
        self.shared.guarded.lock().terminated
    }

    pub fn last_lock_reason(&self) -> Option<LockReason> {
        self.shared.guarded.lock().last_lock
    }

    /// Timestamp of the last recorded activity while unlocked
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.shared
            .guarded
            .lock()
            .resident
            .as_ref()
            .map(|resident| resident.last_activity)
    }

    pub fn failed_unlocks(&self) -> u32 {
        self.shared.guarded.lock().failed_unlocks
    }

    /// Lock now, discarding the resident key
    pub fn lock(&self) {
        if self.shared.lock(LockReason::Explicit) {
            info!("Session locked");
        }
    }

    /// Record user activity; fails with `Locked` if no key is resident
    pub fn touch(&self) -> Result<()> {
        self.shared.with_resident(|_| ())
    }

    /// Check idleness once, as the background timer does
    ///
    /// Returns `true` if this call locked the session.
    pub fn poll_idle(&self) -> bool {
        self.shared.poll_idle()
    }

    /// Spawn the background idle timer. Must be called within a Tokio runtime.
    pub fn start_idle_timer(&self) {
        let mut slot = self.idle_timer.lock();
        if slot.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let interval = shared.config.poll_interval.max(MIN_POLL_INTERVAL);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(interval_ms = interval.as_millis() as u64, "Idle timer started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        shared.poll_idle();
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("Idle timer stopped");
                            return;
                        }
                    }
                }
            }
        });

        *slot = Some(IdleTimer {
            handle,
            shutdown_tx,
        });
    }

    /// Stop the background idle timer if it is running
    pub fn stop_idle_timer(&self) {
        if let Some(timer) = self.idle_timer.lock().take() {
            let _ = timer.shutdown_tx.send(true);
        }
    }

    pub fn idle_timer_running(&self) -> bool {
        self.idle_timer
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.handle.is_finished())
    }

    /// Stop the idle timer and discard the key
    pub fn shutdown(&self) {
        self.stop_idle_timer();
        if self.shared.lock(LockReason::Shutdown) {
            info!("Session shut down");
        }
    }

    /// Lend the resident key to one operation and record activity
    pub(crate) fn lease(&self) -> Result<KeyLease> {
        self.shared.with_resident(|resident| KeyLease {
            key: Arc::clone(&resident.key),
        })
    }

    /// Refuse unlock attempts once the session has terminated
    pub(crate) fn ensure_accepting_unlocks(&self) -> Result<()> {
        if self.is_terminated() {
            return Err(VaultError::TooManyAttempts);
        }
        Ok(())
    }

    /// Make a verified key resident
    pub(crate) fn admit(&self, key: DerivedKey) -> Result<()> {
        let now = self.shared.clock.now();
        let mut guarded = self.shared.guarded.lock();
        if guarded.terminated {
            return Err(VaultError::TooManyAttempts);
        }

        guarded.failed_unlocks = 0;
        guarded.resident = Some(Resident {
            key: Arc::new(key),
            since: now,
            last_activity: now,
        });
        Ok(())
    }

    /// Count a rejected password and return the error to report for it
    ///
    /// Only attempts made while locked count toward termination; a wrong
    /// password typed into an unlocked session leaves its key alone.
    pub(crate) fn record_failed_unlock(&self) -> VaultError {
        let max = self.shared.config.max_failed_unlocks;
        let now = self.shared.clock.now();
        let mut guarded = self.shared.guarded.lock();
        self.shared.expire_if_idle(&mut guarded, now);
        if guarded.resident.is_some() {
            return VaultError::InvalidMasterPassword;
        }

        guarded.failed_unlocks += 1;

        if max == 0 || guarded.failed_unlocks < max {
            return VaultError::InvalidMasterPassword;
        }

        guarded.terminated = true;
        guarded.resident = None;
        guarded.last_lock = Some(LockReason::TooManyAttempts);
        warn!(
            attempts = guarded.failed_unlocks,
            "Too many failed unlock attempts, session terminated"
        );
        VaultError::TooManyAttempts
    }

    /// Lock the session if it still holds the key behind `lease`
    ///
    /// A key admitted after the lease was taken is left in place.
    pub(crate) fn revoke(&self, lease: &KeyLease, reason: LockReason) -> bool {
        let mut guarded = self.shared.guarded.lock();
        let holds_lease = guarded
            .resident
            .as_ref()
            .is_some_and(|resident| Arc::ptr_eq(&resident.key, &lease.key));
        if !holds_lease {
            return false;
        }

        Shared::discard_key(&mut guarded, reason);
        info!(?reason, "Session key revoked");
        true
    }

    /// Swap in a rotated key if the session is still unlocked
    pub(crate) fn replace_key(&self, key: DerivedKey) -> bool {
        let now = self.shared.clock.now();
        let mut guarded = self.shared.guarded.lock();

        match guarded.resident.as_mut() {
            Some(resident) => {
                resident.key = Arc::new(key);
                resident.last_activity = now;
                true
            }
            None => false,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .finish()
    }
}
