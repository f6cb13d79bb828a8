//! Leftover-run reconciliation for the thread protocol.
//!
//! The upstream rejects new messages while a run is active on the thread.
//! Before each turn the reconciler waits out any leftover run within a
//! bounded budget and cancels whatever is still in flight after it. A
//! leftover run's output is never read back; this is cleanup, not a fetch.

use crate::error::{Error, Result};
use crate::poll::{poll_until, PollBudget, PollOutcome};
use crate::provider::{Provider, Run};
use std::sync::Arc;

pub struct RunReconciler {
    provider: Arc<dyn Provider>,
    budget: PollBudget,
}

impl RunReconciler {
    pub fn new(provider: Arc<dyn Provider>, budget: PollBudget) -> Self {
        Self { provider, budget }
    }

    /// Ensure no run is active on `thread_id` before new input is added.
    ///
    /// Listing and polling failures propagate; cancellation failures are
    /// logged and swallowed, since the next submission supersedes a stuck
    /// run anyway.
    pub async fn settle(&self, thread_id: &str) -> Result<()> {
        let runs = self.provider.list_runs(thread_id).await?;

        for run in runs {
            if run.status.is_terminal() {
                continue;
            }
            self.settle_run(thread_id, run).await?;
        }

        Ok(())
    }

    async fn settle_run(&self, thread_id: &str, run: Run) -> Result<()> {
        tracing::debug!(thread_id, run_id = %run.id, status = %run.status, "Waiting out leftover run");

        let provider = Arc::clone(&self.provider);
        let thread = thread_id.to_string();
        let run_id = run.id.clone();

        let outcome = poll_until(self.budget, move || {
            let provider = Arc::clone(&provider);
            let thread = thread.clone();
            let run_id = run_id.clone();
            async move {
                let current = provider.retrieve_run(&thread, &run_id).await?;
                Ok::<_, Error>(current.status.is_terminal().then_some(current))
            }
        })
        .await?;

        match outcome {
            PollOutcome::Completed(current) => {
                tracing::debug!(run_id = %current.id, status = %current.status, "Leftover run finished");
            }
            PollOutcome::TimedOut => {
                if let Err(e) = self.provider.cancel_run(thread_id, &run.id).await {
                    tracing::warn!(thread_id, run_id = %run.id, error = %e, "Failed to cancel leftover run");
                }
            }
        }

        Ok(())
    }
}
