//! A recording, scriptable target database.
//!
//! [`RecordingTarget`] captures every statement the applier emits and
//! lets tests inject backend failures (a foreign-key violation for one
//! table until its parent row lands, a timeout on the third call, and
//! so on) without a live database.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use sluice_core::target::{SqlParam, TargetError, TargetQuerier};

/// One captured statement execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStatement {
    /// The SQL text.
    pub sql: String,
    /// The bind parameters, in order.
    pub params: Vec<SqlParam>,
}

type Handler = dyn FnMut(&str, &[SqlParam]) -> Result<u64, TargetError> + Send;

/// In-memory implementation of [`TargetQuerier`] for tests.
#[derive(Clone, Default)]
pub struct RecordingTarget {
    executed: Arc<Mutex<Vec<ExecutedStatement>>>,
    handler: Arc<Mutex<Option<Box<Handler>>>>,
}

impl RecordingTarget {
    /// Creates a target where every statement succeeds, affecting one
    /// row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a handler deciding each statement's outcome. The
    /// handler sees the SQL and parameters and may consult shared
    /// state; returning an error simulates a backend rejection.
    pub fn set_handler(
        &self,
        handler: impl FnMut(&str, &[SqlParam]) -> Result<u64, TargetError> + Send + 'static,
    ) {
        *self.handler.lock() = Some(Box::new(handler));
    }

    /// Every statement executed so far, including failed ones.
    #[must_use]
    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.executed.lock().clone()
    }

    /// The SQL texts of successful and failed executions, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.executed.lock().iter().map(|e| e.sql.clone()).collect()
    }

    /// Drops the capture history.
    pub fn clear(&self) {
        self.executed.lock().clear();
    }
}

#[async_trait]
impl TargetQuerier for RecordingTarget {
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<u64, TargetError> {
        self.executed.lock().push(ExecutedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        let mut handler = self.handler.lock();
        match handler.as_mut() {
            Some(f) => f(sql, params),
            None => Ok(1),
        }
    }
}
