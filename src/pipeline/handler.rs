//! Pipeline handler — runs the stage chain for one invocation.

use std::sync::Arc;

use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::ForwardingConfig;
use crate::error::RelayError;
use crate::mailer::Mailer;
use crate::pipeline::stages::default_stages;
use crate::pipeline::types::{MessageContext, Outcome, RelayDeps, Stage, StageFlow};
use crate::storage::ObjectStore;

/// Runs the forwarding pipeline.
///
/// Holds the immutable configuration template and the two collaborator
/// handles. Every invocation clones the template into a fresh context,
/// so concurrent invocations share nothing mutable.
pub struct RelayHandler {
    config: Arc<ForwardingConfig>,
    deps: RelayDeps,
    stages: Vec<Stage>,
}

impl RelayHandler {
    pub fn new(
        config: Arc<ForwardingConfig>,
        store: Arc<dyn ObjectStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            config,
            deps: RelayDeps { store, mailer },
            stages: default_stages(),
        }
    }

    /// Replace the stage list. For tests.
    pub fn with_stages(mut self, stages: Vec<Stage>) -> Self {
        self.stages = stages;
        self
    }

    /// Run one trigger payload through the stage chain.
    ///
    /// Stages execute strictly in order; the first failure aborts the
    /// rest. A stage returning `Done` finishes the run successfully
    /// without the remaining stages.
    pub async fn handle(&self, event: serde_json::Value) -> Result<Outcome, RelayError> {
        let invocation = Uuid::new_v4();
        let mut ctx = MessageContext::new(event, (*self.config).clone());

        for stage in &self.stages {
            debug!(%invocation, stage = stage.name, "Running pipeline stage");
            match (stage.run)(&mut ctx, &self.deps).await {
                Ok(StageFlow::Continue) => {}
                Ok(StageFlow::Done) => {
                    info!(
                        %invocation,
                        stage = stage.name,
                        "Process finished early with nothing to forward"
                    );
                    return Ok(Outcome::NoRecipients);
                }
                Err(e) => {
                    error!(
                        %invocation,
                        stage = stage.name,
                        error = %e,
                        "Pipeline stage failed"
                    );
                    return Err(e);
                }
            }
        }

        info!(
            %invocation,
            destinations = ctx.recipients.len(),
            "Process finished successfully"
        );
        Ok(Outcome::Forwarded {
            destinations: ctx.recipients,
        })
    }
}
