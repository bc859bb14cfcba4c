//! `group`: run children sequentially or all at once.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::orchestrator::NodeScope;
use crate::params::{ErrorStrategy, GroupMode, GroupParams};
use crate::registry::{NodeExecutor, Outputs};
use crate::types::Parameters;

use super::pool::WorkerPool;

/// Executor for `group` nodes
///
/// Children's outputs land in the shared context; the group itself
/// returns nothing. In parallel mode each child's writes, nested ones
/// included, are merged back in child order once all have finished.
#[derive(Debug, Default)]
pub struct GroupExecutor;

#[async_trait]
impl NodeExecutor for GroupExecutor {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        params: Parameters,
        scope: &mut NodeScope<'_>,
    ) -> Result<Outputs> {
        let node = scope.node;
        let dispatcher = scope.dispatcher();
        let GroupParams { mode } = GroupParams::parse(&params)?;

        match mode {
            GroupMode::Sequential => {
                dispatcher.run_sequence(&node.nodes, cancel, scope.context).await?;
            }
            GroupMode::Parallel => {
                let pool = WorkerPool::new(node.nodes.len(), ErrorStrategy::FailFast);
                let outcome = dispatcher
                    .run_concurrent(&node.nodes, cancel, scope.context, &pool)
                    .await?;
                for branch in outcome.results.into_iter().flatten() {
                    scope.context.merge(branch.changes);
                }
            }
        }

        Ok(Outputs::new())
    }
}
