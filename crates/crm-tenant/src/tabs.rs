//! Cross-Tab Coordination - advisory TTL-lease mutex
//!
//! Same-origin execution contexts (tabs) run as independent single-threaded
//! event loops; the lease board is the only state they share. The mutex is
//! advisory: a context that crashes mid-critical-section cannot strand peers
//! past the lease TTL.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use crm_common::ContextId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Lock name guarding tenant switches
pub const TENANT_SELECTION_LOCK: &str = "tenant_selection";

/// Poll interval while waiting for a lease
const ACQUIRE_POLL: Duration = Duration::from_millis(25);

/// One lease record on the board
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    /// Context holding the lease
    pub holder: ContextId,
    /// Expiry; a lease past this instant is dead even without release
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Not yet expired at `now`
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Shared lease board the contexts coordinate through.
///
/// The storage mechanism is a pluggable transport; [`InMemoryLeaseBoard`]
/// backs tests and embedded hosts, a browser host plugs in its own.
pub trait LeaseBoard: Send + Sync {
    /// Current lease for a lock name, if any
    fn read(&self, lock_name: &str) -> Option<Lease>;

    /// Install `lease` only if the slot is empty, holds a lease dead at
    /// `now`, or already belongs to `lease.holder`. Returns whether the
    /// lease was installed.
    ///
    /// The check and the write must be one atomic step: two contexts
    /// claiming an open slot at once must not both succeed.
    fn claim_if_free(&self, lock_name: &str, lease: Lease, now: DateTime<Utc>) -> bool;

    /// Remove the lease for a lock name only while `holder` owns it
    fn clear_if_holder(&self, lock_name: &str, holder: &ContextId);
}

/// In-memory lease board shared between contexts in one process
pub struct InMemoryLeaseBoard {
    leases: DashMap<String, Lease>,
}

impl InMemoryLeaseBoard {
    /// Empty board
    pub fn new() -> Self {
        Self { leases: DashMap::new() }
    }
}

impl Default for InMemoryLeaseBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseBoard for InMemoryLeaseBoard {
    fn read(&self, lock_name: &str) -> Option<Lease> {
        self.leases.get(lock_name).map(|l| l.clone())
    }

    fn claim_if_free(&self, lock_name: &str, lease: Lease, now: DateTime<Utc>) -> bool {
        // The entry guard holds the shard lock, making check-and-write atomic
        match self.leases.entry(lock_name.to_string()) {
            Entry::Occupied(mut slot) => {
                let current = slot.get();
                if current.is_live(now) && current.holder != lease.holder {
                    false
                } else {
                    slot.insert(lease);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(lease);
                true
            }
        }
    }

    fn clear_if_holder(&self, lock_name: &str, holder: &ContextId) {
        self.leases.remove_if(lock_name, |_, lease| &lease.holder == holder);
    }
}

/// Advisory cross-context mutex over a [`LeaseBoard`].
///
/// `acquire` returning `false` means "another context is handling it" and
/// callers skip the operation; it is never an error.
pub struct TabMutex {
    context_id: ContextId,
    board: Arc<dyn LeaseBoard>,
    ttl: ChronoDuration,
}

impl TabMutex {
    /// Default lease TTL. No renewal: guarded operations are expected to
    /// complete well under this.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

    /// Mutex for one context with the default TTL
    pub fn new(board: Arc<dyn LeaseBoard>, context_id: ContextId) -> Self {
        Self::with_ttl(board, context_id, Self::DEFAULT_TTL)
    }

    /// Mutex with an explicit TTL
    pub fn with_ttl(board: Arc<dyn LeaseBoard>, context_id: ContextId, ttl: Duration) -> Self {
        Self {
            context_id,
            board,
            ttl: ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(30)),
        }
    }

    /// Identity of the owning context
    pub fn context_id(&self) -> &ContextId {
        &self.context_id
    }

    /// Claim the lease for `lock_name`, waiting up to `timeout`.
    ///
    /// Succeeds iff no live foreign lease exists; a re-claim by this context
    /// refreshes its own lease. Returns `false` once the timeout elapses.
    pub async fn acquire(&self, lock_name: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.try_claim(lock_name) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::debug!(lock = lock_name, "lease contended past timeout, skipping");
                return false;
            }
            tokio::time::sleep(ACQUIRE_POLL).await;
        }
    }

    /// Drop this context's lease on `lock_name`. Idempotent; a foreign lease
    /// is left untouched.
    pub fn release(&self, lock_name: &str) {
        self.board.clear_if_holder(lock_name, &self.context_id);
    }

    fn try_claim(&self, lock_name: &str) -> bool {
        let now = Utc::now();
        let lease = Lease {
            holder: self.context_id.clone(),
            expires_at: now + self.ttl,
        };
        self.board.claim_if_free(lock_name, lease, now)
    }
}
