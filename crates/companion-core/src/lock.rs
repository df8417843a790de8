//! Distributed singleton lock for scheduler leadership.
//!
//! Exactly one process at a time may run the cron planners. The lock is a
//! single item in the shared store at `system#scheduler/lock#main`:
//!
//! 1. Acquisition writes a lease record with a `DoesNotExist` precondition —
//!    only one writer can win
//! 2. If a lease exists but has expired, the caller takes it over with a
//!    version-bound write, so two takeover attempts cannot both succeed
//! 3. Refresh extends `expires_at` with a version-bound write; a failed
//!    refresh means leadership was lost
//! 4. Release CAS-writes an already-expired lease record instead of deleting,
//!    which cannot clobber a new holder's lease
//!
//! A crashed leader is recovered by TTL expiry alone; no operator action is
//! needed.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::storage::{StorageBackend, WritePrecondition, WriteResult};

/// Storage key of the scheduler lock item.
pub const SCHEDULER_LOCK_KEY: &str = "system#scheduler/lock#main";

/// Default lease TTL (90 seconds).
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(90);

/// Identifying metadata about the process holding the lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    /// OS process ID.
    pub pid: u32,
    /// Hostname, if known.
    pub hostname: String,
}

impl InstanceInfo {
    /// Captures the current process's identity.
    #[must_use]
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
        }
    }
}

/// The persisted lease record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseInfo {
    /// Unique holder identity (`"{pid}-{ulid}"`).
    pub process_id: String,
    /// When the lease was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lease expires.
    pub expires_at: DateTime<Utc>,
    /// Holder process metadata for debugging.
    pub instance_info: InstanceInfo,
}

impl LeaseInfo {
    fn new(process_id: &str, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            process_id: process_id.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(90)),
            instance_info: InstanceInfo::current(),
        }
    }

    /// Returns whether this lease has expired at the given instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of a lease refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The lease was extended.
    Refreshed,
    /// Leadership was lost to another process.
    Lost,
}

struct HolderState {
    version: Option<String>,
}

/// Process-wide singleton lock over the shared store.
///
/// One instance per process; `is_leader` is cheap enough to check before
/// every planner tick.
pub struct SingletonLock {
    storage: Arc<dyn StorageBackend>,
    key: String,
    process_id: String,
    leader: AtomicBool,
    state: Mutex<HolderState>,
}

impl SingletonLock {
    /// Creates a lock handle with a fresh process identity.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self::at_key(storage, SCHEDULER_LOCK_KEY)
    }

    /// Creates a lock handle at an explicit storage key.
    #[must_use]
    pub fn at_key(storage: Arc<dyn StorageBackend>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            process_id: format!("{}-{}", std::process::id(), Ulid::new()),
            leader: AtomicBool::new(false),
            state: Mutex::new(HolderState { version: None }),
        }
    }

    /// Returns this process's lock identity.
    #[must_use]
    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// Returns whether this process currently believes it is leader.
    ///
    /// Kept accurate by `try_acquire`/`refresh`/`release`; between refreshes
    /// it may lag reality by at most one refresh interval, which the TTL is
    /// sized to absorb.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    /// Attempts to acquire the lock.
    ///
    /// Succeeds if no lease exists or the existing lease has expired.
    /// Returns `true` when this process is now the leader.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures; losing the race is a
    /// normal `false`.
    pub async fn try_acquire(&self, ttl: Duration, now: DateTime<Utc>) -> Result<bool> {
        let lease = LeaseInfo::new(&self.process_id, ttl, now);
        let body = encode_lease(&lease)?;

        match self
            .storage
            .put(&self.key, body.clone(), WritePrecondition::DoesNotExist)
            .await?
        {
            WriteResult::Success { version } => {
                self.record_acquired(version);
                return Ok(true);
            }
            WriteResult::PreconditionFailed { .. } => {}
        }

        // A lease exists. Bind the expiry decision to a version token so a
        // concurrent takeover invalidates our write.
        let Some(meta) = self.storage.head(&self.key).await? else {
            // Disappeared between the write and the head; next attempt wins.
            return Ok(false);
        };

        let existing = match self.read_lease().await? {
            Some(info) => info,
            None => return Ok(false),
        };

        if !existing.is_expired_at(now) {
            return Ok(false);
        }

        match self
            .storage
            .put(&self.key, body, WritePrecondition::MatchesVersion(meta.version))
            .await?
        {
            WriteResult::Success { version } => {
                tracing::info!(
                    process_id = %self.process_id,
                    previous_holder = %existing.process_id,
                    "took over expired scheduler lease"
                );
                self.record_acquired(version);
                Ok(true)
            }
            WriteResult::PreconditionFailed { .. } => Ok(false),
        }
    }

    /// Extends the lease if this process still holds it.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures; a lost lease is the
    /// `Lost` outcome.
    pub async fn refresh(&self, ttl: Duration, now: DateTime<Utc>) -> Result<RefreshOutcome> {
        let Some(held_version) = self.held_version() else {
            return Ok(RefreshOutcome::Lost);
        };

        let mut lease = LeaseInfo::new(&self.process_id, ttl, now);
        // Preserve the original acquisition time across refreshes.
        if let Some(existing) = self.read_lease().await? {
            if existing.process_id == self.process_id {
                lease.acquired_at = existing.acquired_at;
            }
        }
        let body = encode_lease(&lease)?;

        match self
            .storage
            .put(&self.key, body, WritePrecondition::MatchesVersion(held_version))
            .await?
        {
            WriteResult::Success { version } => {
                self.record_acquired(version);
                Ok(RefreshOutcome::Refreshed)
            }
            WriteResult::PreconditionFailed { .. } => {
                tracing::warn!(process_id = %self.process_id, "lost scheduler lease");
                self.record_lost();
                Ok(RefreshOutcome::Lost)
            }
        }
    }

    /// Releases the lease if held.
    ///
    /// Writes an already-expired lease record under our version token; if a
    /// new holder has taken over, the CAS fails and their lease is left
    /// intact.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage failures.
    pub async fn release(&self, now: DateTime<Utc>) -> Result<()> {
        let Some(held_version) = self.held_version() else {
            return Ok(());
        };

        let expired = LeaseInfo {
            process_id: self.process_id.clone(),
            acquired_at: now,
            expires_at: now - chrono::Duration::seconds(1),
            instance_info: InstanceInfo::current(),
        };
        let body = encode_lease(&expired)?;

        let _ = self
            .storage
            .put(&self.key, body, WritePrecondition::MatchesVersion(held_version))
            .await?;
        self.record_lost();
        Ok(())
    }

    /// Reads the current lease record, if any (debugging/status surface).
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read or parsed.
    pub async fn read_lease(&self) -> Result<Option<LeaseInfo>> {
        match self.storage.get(&self.key).await {
            Ok(data) => {
                let info: LeaseInfo = serde_json::from_slice(&data)
                    .map_err(|e| Error::serialization(format!("parse lease: {e}")))?;
                Ok(Some(info))
            }
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn record_acquired(&self, version: String) {
        self.state.lock().expect("lock state poisoned").version = Some(version);
        self.leader.store(true, Ordering::SeqCst);
    }

    fn record_lost(&self) {
        self.state.lock().expect("lock state poisoned").version = None;
        self.leader.store(false, Ordering::SeqCst);
    }

    fn held_version(&self) -> Option<String> {
        self.state.lock().expect("lock state poisoned").version.clone()
    }
}

fn encode_lease(lease: &LeaseInfo) -> Result<Bytes> {
    serde_json::to_vec(lease)
        .map(Bytes::from)
        .map_err(|e| Error::serialization(format!("serialize lease: {e}")))
}
