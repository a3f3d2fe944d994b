//! Group-lease scaffolding.
//!
//! [`lease_group`] keeps a named lease held for as long as the caller's
//! context lives: acquire (retrying while contested), run the guarded
//! work under a child context, renew in the background, and tear the
//! child down if the lease is ever lost. Exactly one process runs a
//! group's sweepers at a time.

use std::cmp::max;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use sluice_core::error::LeaseError;
use sluice_core::lease::Leases;
use sluice_core::stopper::Context;

/// Runs `body` exclusively under the named lease until `ctx` stops.
///
/// `body` is invoked once per successful acquisition with a child
/// context; it should spawn its long-lived work on that context and
/// return. Losing the lease cancels the child context (bounded by
/// `grace`) and goes back to acquiring.
pub(crate) async fn lease_group<F>(
    ctx: &Context,
    leases: Arc<dyn Leases>,
    name: String,
    grace: Duration,
    body: F,
) where
    F: Fn(&Context) + Send + Sync,
{
    let duration = leases.lease_duration();
    let renew_every = max(duration / 3, Duration::from_millis(100));
    let retry_busy = max(duration / 4, Duration::from_millis(100));

    while !ctx.is_stopping() {
        let mut handle = match leases.acquire(&name).await {
            Ok(handle) => handle,
            Err(LeaseError::Busy { .. }) => {
                tokio::select! {
                    () = ctx.stopping() => return,
                    () = tokio::time::sleep(retry_busy) => continue,
                }
            }
            Err(err) => {
                warn!(lease = %name, error = %err, "lease backend error; retrying");
                tokio::select! {
                    () = ctx.stopping() => return,
                    () = tokio::time::sleep(retry_busy) => continue,
                }
            }
        };
        debug!(lease = %name, "acquired group lease");

        let guarded = ctx.child();
        body(&guarded);

        // Hold the lease until shutdown or loss.
        let lost = loop {
            tokio::select! {
                () = ctx.stopping() => break false,
                () = tokio::time::sleep(renew_every) => {
                    if let Err(err) = handle.renew().await {
                        warn!(lease = %name, error = %err, "lost group lease; stopping sweepers");
                        break true;
                    }
                }
            }
        };

        if !guarded.stop_and_wait(grace).await {
            warn!(lease = %name, "sweepers did not stop within grace period");
        }
        handle.release().await;
        if !lost {
            // Clean shutdown.
            return;
        }
    }
}
