//! Process-wide services, constructed once at startup and shared by reference.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::checkpoint::CheckpointStore;
use crate::config::RefereedConfig;
use crate::error::ApiError;
use crate::policy::PolicyTable;
use crate::provider::CapabilityRegistry;
use crate::status::{StatusHub, WorkflowStore};
use crate::workflow::{StagePlan, StageRegistry};

/// Everything a workflow needs from its environment.
///
/// There are no globals: the pool and each state machine hold an `Arc<Services>`.
pub struct Services {
    pub config: RefereedConfig,
    pub registry: CapabilityRegistry,
    pub policies: PolicyTable,
    pub checkpoints: CheckpointStore,
    pub status: StatusHub,
    pub stages: StageRegistry,
}

impl Services {
    /// Validate config and build provider clients from it.
    pub fn from_config(config: RefereedConfig, workspace_root: &Path) -> Result<Arc<Self>, ApiError> {
        config.ensure_valid()?;
        let registry = CapabilityRegistry::from_config(&config)?;
        Self::new(config, registry, workspace_root)
    }

    /// Build services around an explicit capability registry.
    pub fn new(
        config: RefereedConfig,
        registry: CapabilityRegistry,
        workspace_root: &Path,
    ) -> Result<Arc<Self>, ApiError> {
        let (results_dir, store_dir) = config.storage.resolve_paths(workspace_root);
        let checkpoints = CheckpointStore::new(&results_dir)?;
        let store = Arc::new(WorkflowStore::open(&store_dir)?);
        let policies = PolicyTable::from_overrides(&config.policies);

        info!(
            results_dir = %results_dir.display(),
            store_dir = %store_dir.display(),
            tiers = ?registry.tiers(),
            "Services initialized"
        );

        Ok(Arc::new(Self {
            config,
            registry,
            policies,
            checkpoints,
            status: StatusHub::new(store),
            stages: StageRegistry::standard(),
        }))
    }

    pub fn stage_plan(&self) -> StagePlan {
        StagePlan::from_config(&self.config.pipeline)
    }
}
