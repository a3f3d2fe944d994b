//! In-memory named leases.
//!
//! Single-process stand-in for the cluster lease table: one holder per
//! name, expiry-based reclamation, compare-on-renew so a holder that
//! lost its lease finds out on the next renewal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use sluice_core::error::LeaseError;
use sluice_core::lease::{LeaseHandle, Leases};

/// Default lease duration.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct Claim {
    holder: u64,
    expires: Instant,
}

type ClaimTable = Arc<Mutex<HashMap<String, Claim>>>;

/// In-memory implementation of [`Leases`].
#[derive(Debug, Clone)]
pub struct MemoryLeases {
    claims: ClaimTable,
    duration: Duration,
    next_holder: Arc<Mutex<u64>>,
}

impl Default for MemoryLeases {
    fn default() -> Self {
        Self::new(DEFAULT_LEASE_DURATION)
    }
}

impl MemoryLeases {
    /// Creates a lease table granting `duration` per acquire/renew.
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self {
            claims: Arc::new(Mutex::new(HashMap::new())),
            duration,
            next_holder: Arc::new(Mutex::new(0)),
        }
    }

    /// Forcibly expires `name`. Test helper standing in for the passage
    /// of time or an administrative revocation.
    pub fn revoke(&self, name: &str) {
        self.claims.lock().remove(name);
    }

    /// Returns `true` while `name` is held and unexpired.
    #[must_use]
    pub fn is_held(&self, name: &str) -> bool {
        self.claims
            .lock()
            .get(name)
            .is_some_and(|c| c.expires > Instant::now())
    }
}

#[async_trait]
impl Leases for MemoryLeases {
    fn lease_duration(&self) -> Duration {
        self.duration
    }

    async fn acquire(&self, name: &str) -> Result<Box<dyn LeaseHandle>, LeaseError> {
        let holder = {
            let mut next = self.next_holder.lock();
            *next += 1;
            *next
        };
        let expires = Instant::now() + self.duration;

        let mut claims = self.claims.lock();
        match claims.get(name) {
            Some(existing) if existing.expires > Instant::now() => Err(LeaseError::Busy {
                name: name.to_string(),
            }),
            _ => {
                claims.insert(name.to_string(), Claim { holder, expires });
                Ok(Box::new(MemoryLeaseHandle {
                    name: name.to_string(),
                    holder,
                    expires,
                    duration: self.duration,
                    claims: Arc::clone(&self.claims),
                }))
            }
        }
    }
}

struct MemoryLeaseHandle {
    name: String,
    holder: u64,
    expires: Instant,
    duration: Duration,
    claims: ClaimTable,
}

#[async_trait]
impl LeaseHandle for MemoryLeaseHandle {
    fn expires(&self) -> Instant {
        self.expires
    }

    async fn renew(&mut self) -> Result<(), LeaseError> {
        let mut claims = self.claims.lock();
        match claims.get_mut(&self.name) {
            Some(claim) if claim.holder == self.holder => {
                claim.expires = Instant::now() + self.duration;
                self.expires = claim.expires;
                Ok(())
            }
            _ => Err(LeaseError::Busy {
                name: self.name.clone(),
            }),
        }
    }

    async fn release(self: Box<Self>) {
        let mut claims = self.claims.lock();
        if claims.get(&self.name).is_some_and(|c| c.holder == self.holder) {
            claims.remove(&self.name);
        }
    }
}
