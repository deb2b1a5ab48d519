//! Administrative backend operations
//!
//! Name suggestion, UID renames and cache flushes. Unlike the query path
//! these calls are retried (see [`RetryPolicy`](super::RetryPolicy)) and
//! report failures as errors. Renames run concurrently and stream one
//! [`RenameProgress`] per finished task, in completion order.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::FanoutExecutor;
use crate::backend::wire::{rename_body, suggest_params, unescape, UidKind};
use crate::backend::{DROP_CACHES_PATH, RENAME_PATH, SUGGEST_PATH};
use crate::error::Result;

/// One UID rename
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRequest {
    /// Kind of UID
    pub kind: UidKind,
    /// Current name
    pub from: String,
    /// New name
    pub to: String,
}

impl RenameRequest {
    /// Create a rename request
    pub fn new(kind: UidKind, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            kind,
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Report of one finished rename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameProgress {
    /// The rename that finished
    pub request: RenameRequest,
    /// Number of renames finished so far, this one included
    pub completed: usize,
    /// Number of renames submitted
    pub total: usize,
    /// Failure message, `None` on success
    pub error: Option<String>,
}

impl RenameProgress {
    /// Whether the rename succeeded
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// One-line human-readable report
    pub fn message(&self) -> String {
        let RenameRequest { kind, from, to } = &self.request;
        match &self.error {
            None => format!(
                "[{}/{}] renamed {} '{}' to '{}'",
                self.completed, self.total, kind, from, to
            ),
            Some(e) => format!(
                "[{}/{}] failed to rename {} '{}' to '{}': {}",
                self.completed, self.total, kind, from, to, e
            ),
        }
    }
}

/// Aggregate outcome of a rename batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenameSummary {
    /// Renames submitted
    pub total: usize,
    /// Renames that succeeded
    pub succeeded: usize,
    /// Failed renames with their error
    pub failed: Vec<(RenameRequest, String)>,
    /// Tasks that panicked or were cancelled before reporting
    pub aborted: usize,
}

impl FanoutExecutor {
    /// Names of a UID kind starting with `prefix`, at most `max`
    pub fn suggest(&self, kind: UidKind, prefix: &str, max: usize) -> Result<Vec<String>> {
        let runtime = self.runtime()?;
        let policy = self.retry_policy(self.admin.retry_count);
        let params = suggest_params(kind, prefix, max);
        let transport = Arc::clone(&self.transport);

        let response = runtime.block_on(
            policy.execute("suggest", || transport.get(SUGGEST_PATH, &params)),
        )?;

        let names: Vec<String> = serde_json::from_str(&response.body)?;
        Ok(names.iter().map(|n| unescape(n)).collect())
    }

    /// Apply renames concurrently, reporting each as it finishes
    pub fn rename<F>(
        &self,
        renames: Vec<RenameRequest>,
        mut on_progress: F,
    ) -> Result<RenameSummary>
    where
        F: FnMut(&RenameProgress),
    {
        let runtime = self.runtime()?;
        let total = renames.len();
        let mut join_set = JoinSet::new();

        for request in renames {
            let transport = Arc::clone(&self.transport);
            let permits = Arc::clone(&self.permits);
            let policy = self.retry_policy(self.admin.retry_count);

            join_set.spawn_on(
                async move {
                    let _permit = permits.acquire_owned().await;
                    let body = rename_body(request.kind, &request.from, &request.to);
                    let outcome = policy
                        .execute("rename", || transport.post_json(RENAME_PATH, body.clone()))
                        .await;
                    (request, outcome.err().map(|e| e.to_string()))
                },
                runtime.handle(),
            );
        }

        let mut summary = RenameSummary {
            total,
            ..Default::default()
        };

        runtime.block_on(async {
            let mut completed = 0;
            while let Some(joined) = join_set.join_next().await {
                completed += 1;
                let (request, error) = match joined {
                    Ok(done) => done,
                    Err(e) => {
                        warn!(error = %e, "Rename task aborted");
                        summary.aborted += 1;
                        continue;
                    }
                };

                let progress = RenameProgress {
                    request,
                    completed,
                    total,
                    error,
                };
                on_progress(&progress);

                match progress.error {
                    None => summary.succeeded += 1,
                    Some(e) => summary.failed.push((progress.request, e)),
                }
            }
        });

        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed.len(),
            "Rename batch complete"
        );
        Ok(summary)
    }

    /// Ask the backend to flush its caches
    pub fn drop_caches(&self) -> Result<()> {
        let runtime = self.runtime()?;
        let policy = self.retry_policy(self.admin.drop_cache_retry_count);
        let transport = Arc::clone(&self.transport);

        runtime.block_on(
            policy.execute("drop_caches", || transport.get(DROP_CACHES_PATH, &[])),
        )?;
        info!("Backend caches dropped");
        Ok(())
    }
}
