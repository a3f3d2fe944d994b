//! Named exclusive leases.
//!
//! A lease is a time-bounded exclusive claim on a name. The sequencer
//! takes one lease per sweeper group so exactly one process sweeps a
//! given set of tables; per-row leases inside the stager are a separate
//! mechanism (see [`crate::stage`]).

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::LeaseError;

/// An acquired lease.
///
/// The holder must renew before [`expires`](LeaseHandle::expires) or
/// stop the work the lease guards. Dropping the handle without
/// releasing lets the lease lapse at its expiry.
#[async_trait]
pub trait LeaseHandle: Send + Sync {
    /// The current expiry deadline.
    fn expires(&self) -> Instant;

    /// Extends the lease.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Busy`] when the lease was lost to another
    /// holder, in which case guarded work must stop.
    async fn renew(&mut self) -> Result<(), LeaseError>;

    /// Releases the lease immediately.
    async fn release(self: Box<Self>);
}

/// Grants named exclusive leases.
#[async_trait]
pub trait Leases: Send + Sync {
    /// The duration granted to new and renewed leases.
    fn lease_duration(&self) -> Duration;

    /// Attempts to acquire `name`.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Busy`] while another holder owns the name,
    /// or [`LeaseError::Backend`] on store failure.
    async fn acquire(&self, name: &str) -> Result<Box<dyn LeaseHandle>, LeaseError>;
}
