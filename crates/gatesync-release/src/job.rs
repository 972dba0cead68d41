//! One publish task run against one target cluster.

use std::sync::Arc;

use gatesync_convert::{ConvertOptions, ConvertedResources, CustomResourceConvertor, ReleaseSnapshot};
use gatesync_core::GatesyncConfig;
use gatesync_registry::{RegistryProvider, RegistryScope, SyncReport};
use gatesync_state::{PublishId, PublishStep, PublishTask, StateResult, StateStore};
use tracing::{error, info};

use crate::event::{PublishState, PublishTracker, StepPlan};

/// What a finished job did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub publish_id: PublishId,
    pub state: PublishState,
    /// Present once the registry sync ran.
    pub sync: Option<SyncReport>,
}

pub struct PublishJob {
    store: StateStore,
    config: Arc<GatesyncConfig>,
    registries: Arc<dyn RegistryProvider>,
    task: PublishTask,
}

impl PublishJob {
    pub fn new(
        store: StateStore,
        config: Arc<GatesyncConfig>,
        registries: Arc<dyn RegistryProvider>,
        task: PublishTask,
    ) -> Self {
        Self {
            store,
            config,
            registries,
            task,
        }
    }

    /// Drive the task through the control-plane steps. Blocking.
    pub fn run(self) -> JobReport {
        let publish_id = self.task.publish_id;
        let reports_status = match self.store.get_micro_gateway(self.task.micro_gateway_id) {
            Ok(Some(micro_gateway)) => micro_gateway.config.reports_status,
            _ => false,
        };
        let tracker = PublishTracker::new(&self.store, publish_id, StepPlan::for_cluster(reports_status));

        let mut sync = None;
        let state = match self.drive(&tracker, &mut sync) {
            Ok(state) => state,
            Err(e) => {
                error!(publish_id, error = %e, "publish job could not record its progress");
                PublishState::Failed {
                    step: PublishStep::DistributeConfiguration,
                    detail: Some(e.to_string()),
                }
            }
        };

        info!(
            publish_id,
            stage_id = self.task.stage_id,
            micro_gateway_id = self.task.micro_gateway_id,
            revoke = self.task.revoke,
            state = ?state,
            "publish job done"
        );
        JobReport {
            publish_id,
            state,
            sync,
        }
    }

    fn drive(
        &self,
        tracker: &PublishTracker<'_>,
        sync: &mut Option<SyncReport>,
    ) -> StateResult<PublishState> {
        tracker.succeed(PublishStep::ValidateConfiguration, None)?;

        tracker.start(PublishStep::GenerateTask)?;
        let (scope, desired) = match self.generate() {
            Ok(generated) => generated,
            Err(detail) => {
                tracker.fail(PublishStep::GenerateTask, detail)?;
                return tracker.state();
            }
        };
        tracker.succeed(
            PublishStep::GenerateTask,
            Some(format!("{} resources", desired.resources.len())),
        )?;

        tracker.start(PublishStep::DistributeConfiguration)?;
        let registry = self.registries.registry(scope);
        let report = registry.sync_resources_by_key_prefix(&desired);
        if report.is_success() {
            tracker.succeed(
                PublishStep::DistributeConfiguration,
                Some(format!(
                    "created={} updated={} unchanged={} deleted={}",
                    report.created, report.updated, report.unchanged, report.deleted
                )),
            )?;
        } else {
            tracker.fail(PublishStep::DistributeConfiguration, report.failure_summary())?;
        }
        *sync = Some(report);

        tracker.state()
    }

    fn generate(&self) -> Result<(RegistryScope, ConvertedResources), String> {
        if self.task.revoke {
            return self.revocation();
        }
        let snapshot =
            ReleaseSnapshot::load(&self.store, &self.task, &self.config).map_err(|e| e.to_string())?;
        let desired = CustomResourceConvertor::new(&snapshot, ConvertOptions::default())
            .convert()
            .map_err(|e| e.to_string())?;
        let scope = RegistryScope::for_stage(
            &snapshot.micro_gateway.config.key_prefix,
            &snapshot.gateway.name,
            &snapshot.stage.name,
        );
        Ok((scope, desired))
    }

    /// An empty desired set over the stage-owned kinds. Syncing it deletes
    /// every key the stage owns on the cluster without touching the version.
    fn revocation(&self) -> Result<(RegistryScope, ConvertedResources), String> {
        let task = &self.task;
        let missing = |what: String| format!("{what} not found");
        let gateway = self
            .store
            .get_gateway(task.gateway_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| missing(format!("gateway {}", task.gateway_id)))?;
        let stage = self
            .store
            .get_stage(task.gateway_id, task.stage_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| missing(format!("stage {}", task.stage_id)))?;
        let micro_gateway = self
            .store
            .get_micro_gateway(task.micro_gateway_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| missing(format!("micro-gateway {}", task.micro_gateway_id)))?;

        let scope = RegistryScope::for_stage(
            &micro_gateway.config.key_prefix,
            &gateway.name,
            &stage.name,
        );
        let desired = ConvertedResources {
            kinds: ConvertOptions::revoke().kinds(),
            resources: Vec::new(),
        };
        Ok((scope, desired))
    }
}
