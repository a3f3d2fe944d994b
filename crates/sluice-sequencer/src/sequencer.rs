//! The sequencer contract.
//!
//! A sequencer takes ownership of a group of tables: it returns the
//! acceptor incoming mutations should be routed through and an
//! observable progress stat, and keeps background machinery (sweepers,
//! leases, generations) running until the caller's context stops.

use std::sync::Arc;

use async_trait::async_trait;

use sluice_core::accept::{MultiAcceptor, TableAcceptor};
use sluice_core::hlc::HlcRange;
use sluice_core::ident::TableId;
use sluice_core::notify::Var;
use sluice_core::stopper::Context;

use crate::errors::SequencerError;
use crate::stat::Stat;

/// A named set of tables processed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableGroup {
    /// The group name; doubles as the lease name.
    pub name: String,
    /// Member tables. For component groups the order is topological,
    /// parents first.
    pub tables: Vec<TableId>,
}

impl TableGroup {
    /// Creates a group.
    pub fn new(name: impl Into<String>, tables: Vec<TableId>) -> Self {
        Self {
            name: name.into(),
            tables,
        }
    }
}

/// Options for [`Sequencer::start`].
#[derive(Clone)]
pub struct StartOptions {
    /// The tables to take ownership of.
    pub group: TableGroup,
    /// Resolved timestamp bounds: staged mutations inside the range are
    /// eligible for sweeping.
    pub bounds: Arc<Var<HlcRange>>,
    /// The downstream acceptor that actually applies mutations to the
    /// target.
    pub delegate: Arc<dyn TableAcceptor>,
    /// Limit on distinct deferred timestamps per sweep page.
    pub max_deferred: usize,
}

impl std::fmt::Debug for StartOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartOptions")
            .field("group", &self.group)
            .field("max_deferred", &self.max_deferred)
            .finish_non_exhaustive()
    }
}

/// Starts background processing for a group of tables.
#[async_trait]
pub trait Sequencer: Send + Sync {
    /// Launches the sequencer's machinery under `ctx` and returns the
    /// acceptor to route mutations through plus the observable progress
    /// stat.
    ///
    /// # Errors
    ///
    /// Start-time failures (no stager, schema unavailable) propagate
    /// synchronously; runtime failures are absorbed and retried by the
    /// background loops.
    async fn start(
        &self,
        ctx: &Context,
        opts: StartOptions,
    ) -> Result<(Arc<dyn MultiAcceptor>, Arc<Var<Stat>>), SequencerError>;
}
