//! Publish request path.
//!
//! Requests are validated against the store, recorded in a single write
//! transaction, and handed to background jobs, one per target cluster.
//! The request never waits on the data plane.

use std::sync::Arc;

use gatesync_core::GatesyncConfig;
use gatesync_registry::{RegistryProvider, RegistryScope};
use gatesync_state::{
    EventStatus, GatewayId, MicroGatewayId, PublishEvent, PublishId, PublishStep, PublishTask,
    ReleaseHistory, ReleaseIntent, ResourceVersionId, Stage, StageId, StateError, StateStore,
    epoch_secs,
};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{ExecutionError, PublishResult, ValidationError};
use crate::event::{PublishState, StepPlan};
use crate::job::{JobReport, PublishJob};

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub gateway_id: GatewayId,
    pub stage_ids: Vec<StageId>,
    pub resource_version_id: ResourceVersionId,
    pub user: String,
    pub comment: String,
}

#[derive(Debug, Clone)]
pub struct RevokeRequest {
    pub gateway_id: GatewayId,
    pub stage_id: StageId,
    pub user: String,
    pub comment: String,
}

/// Returned as soon as the request is recorded.
pub struct PublishOutcome {
    pub history: ReleaseHistory,
    pub jobs: Vec<JoinHandle<JobReport>>,
}

impl PublishOutcome {
    pub fn history_id(&self) -> u64 {
        self.history.id
    }

    pub fn tasks(&self) -> &[PublishTask] {
        &self.history.tasks
    }

    /// Wait for every job. A job that panicked is reported as failed.
    pub async fn wait(self) -> Vec<JobReport> {
        let mut reports = Vec::with_capacity(self.jobs.len());
        for (task, job) in self.history.tasks.iter().zip(self.jobs) {
            match job.await {
                Ok(report) => reports.push(report),
                Err(e) => reports.push(JobReport {
                    publish_id: task.publish_id,
                    state: PublishState::Failed {
                        step: PublishStep::DistributeConfiguration,
                        detail: Some(e.to_string()),
                    },
                    sync: None,
                }),
            }
        }
        reports
    }
}

/// Events and derived state of one publish.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishStatus {
    pub task: PublishTask,
    pub terminal: PublishStep,
    pub events: Vec<PublishEvent>,
    pub state: PublishState,
}

#[derive(Clone)]
pub struct Publisher {
    store: StateStore,
    config: Arc<GatesyncConfig>,
    registries: Arc<dyn RegistryProvider>,
}

impl Publisher {
    pub fn new(
        store: StateStore,
        config: Arc<GatesyncConfig>,
        registries: Arc<dyn RegistryProvider>,
    ) -> Self {
        Self {
            store,
            config,
            registries,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Bind stages to a resource version and push it to their clusters.
    ///
    /// Must be called from within a tokio runtime; jobs run on its blocking
    /// pool.
    pub fn publish(&self, request: &PublishRequest) -> PublishResult<PublishOutcome> {
        if request.stage_ids.is_empty() {
            return Err(ValidationError::EmptyStages.into());
        }
        self.require_gateway(request.gateway_id)?;
        self.require_version(request.gateway_id, request.resource_version_id)?;

        let mut targets = Vec::with_capacity(request.stage_ids.len());
        for stage_id in &request.stage_ids {
            let stage = self.require_stage(request.gateway_id, *stage_id)?;
            targets.push((stage.id, self.resolve_targets(&stage)?));
        }

        self.record_and_spawn(ReleaseIntent {
            gateway_id: request.gateway_id,
            resource_version_id: request.resource_version_id,
            targets,
            user: request.user.clone(),
            comment: request.comment.clone(),
            revoke: false,
        })
    }

    /// Remove a stage's resources from its clusters and drop its release.
    pub fn revoke(&self, request: &RevokeRequest) -> PublishResult<PublishOutcome> {
        self.require_gateway(request.gateway_id)?;
        let stage = self.require_stage(request.gateway_id, request.stage_id)?;
        let release = self
            .store
            .get_release(request.gateway_id, stage.id)?
            .ok_or(ValidationError::NotReleased { stage_id: stage.id })?;
        let targets = vec![(stage.id, self.resolve_targets(&stage)?)];

        self.record_and_spawn(ReleaseIntent {
            gateway_id: request.gateway_id,
            resource_version_id: release.resource_version_id,
            targets,
            user: request.user.clone(),
            comment: request.comment.clone(),
            revoke: true,
        })
    }

    /// Record a step the data plane reports back.
    pub fn report_event(
        &self,
        publish_id: PublishId,
        step: PublishStep,
        status: EventStatus,
        detail: Option<String>,
    ) -> PublishResult<PublishEvent> {
        let task = self.require_task(publish_id)?;
        let plan = self.plan_for(task.micro_gateway_id)?;
        if !plan.accepts_report(step) {
            return Err(ValidationError::NotReportable(step.as_str()).into());
        }

        let mut event = PublishEvent::new(publish_id, step, status, epoch_secs());
        event.detail = detail;
        match self.store.record_publish_event(&event) {
            Ok(stored) => Ok(stored),
            Err(StateError::EventRegression { publish_id, reason }) => {
                Err(ValidationError::Regression { publish_id, reason }.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn publish_status(&self, publish_id: PublishId) -> PublishResult<PublishStatus> {
        let task = self.require_task(publish_id)?;
        let plan = self.plan_for(task.micro_gateway_id)?;
        let events = self.store.list_publish_events(publish_id)?;
        let state = plan.derive_state(&events);
        Ok(PublishStatus {
            task,
            terminal: plan.terminal(),
            events,
            state,
        })
    }

    /// Wipe everything a cluster holds. Returns the number of keys removed.
    pub fn decommission(&self, micro_gateway_name: &str) -> PublishResult<usize> {
        let micro_gateway = self
            .store
            .get_micro_gateway_by_name(micro_gateway_name)?
            .ok_or_else(|| ValidationError::UnknownMicroGateway(micro_gateway_name.to_string()))?;
        let registry = self
            .registries
            .registry(RegistryScope::cluster(&micro_gateway.config.key_prefix));
        let removed = registry.delete_resources_by_key_prefix()?;
        info!(
            micro_gateway = %micro_gateway.name,
            key_prefix = %micro_gateway.config.key_prefix,
            removed,
            "micro-gateway decommissioned"
        );
        Ok(removed)
    }

    /// Drop old resource versions beyond the configured retention.
    pub fn cleanup(&self, gateway_id: GatewayId) -> PublishResult<Vec<ResourceVersionId>> {
        self.require_gateway(gateway_id)?;
        Ok(self
            .store
            .cleanup_resource_versions(gateway_id, self.config.retention.keep_versions)?)
    }

    fn record_and_spawn(&self, intent: ReleaseIntent) -> PublishResult<PublishOutcome> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ExecutionError::NoRuntime(e.to_string()))?;

        let history = self.store.record_release(&intent)?;
        if let Some(failure) = &history.failure {
            warn!(gateway_id = intent.gateway_id, history_id = history.id, %failure, "release partly unscheduled");
        }

        let jobs = history
            .tasks
            .iter()
            .map(|task| {
                let job = PublishJob::new(
                    self.store.clone(),
                    self.config.clone(),
                    self.registries.clone(),
                    task.clone(),
                );
                runtime.spawn_blocking(move || job.run())
            })
            .collect();

        Ok(PublishOutcome { history, jobs })
    }

    /// The stage's dedicated clusters, else the configured shared cluster.
    fn resolve_targets(&self, stage: &Stage) -> PublishResult<Vec<MicroGatewayId>> {
        if !stage.micro_gateway_ids.is_empty() {
            for id in &stage.micro_gateway_ids {
                let micro_gateway = self
                    .store
                    .get_micro_gateway(*id)?
                    .ok_or_else(|| ValidationError::UnknownMicroGateway(id.to_string()))?;
                if micro_gateway.gateway_id.is_some_and(|owner| owner != stage.gateway_id) {
                    return Err(ValidationError::ForeignMicroGateway {
                        name: micro_gateway.name,
                        gateway_id: stage.gateway_id,
                    }
                    .into());
                }
            }
            return Ok(stage.micro_gateway_ids.clone());
        }

        let Some(shared_name) = &self.config.publish.shared_micro_gateway else {
            return Ok(Vec::new());
        };
        match self.store.get_micro_gateway_by_name(shared_name)? {
            Some(shared) => Ok(vec![shared.id]),
            None => {
                warn!(shared = %shared_name, stage = %stage.name, "shared micro-gateway is not registered");
                Ok(Vec::new())
            }
        }
    }

    fn plan_for(&self, micro_gateway_id: MicroGatewayId) -> PublishResult<StepPlan> {
        let reports_status = self
            .store
            .get_micro_gateway(micro_gateway_id)?
            .is_some_and(|m| m.config.reports_status);
        Ok(StepPlan::for_cluster(reports_status))
    }

    fn require_gateway(&self, gateway_id: GatewayId) -> PublishResult<()> {
        match self.store.get_gateway(gateway_id)? {
            Some(_) => Ok(()),
            None => Err(ValidationError::UnknownGateway(gateway_id).into()),
        }
    }

    fn require_stage(&self, gateway_id: GatewayId, stage_id: StageId) -> PublishResult<Stage> {
        self.store
            .get_stage(gateway_id, stage_id)?
            .ok_or_else(|| ValidationError::UnknownStage { gateway_id, stage_id }.into())
    }

    fn require_version(&self, gateway_id: GatewayId, version_id: ResourceVersionId) -> PublishResult<()> {
        match self.store.get_resource_version(gateway_id, version_id)? {
            Some(_) => Ok(()),
            None => Err(ValidationError::UnknownVersion {
                gateway_id,
                version_id,
            }
            .into()),
        }
    }

    fn require_task(&self, publish_id: PublishId) -> PublishResult<PublishTask> {
        self.store
            .get_publish_task(publish_id)?
            .ok_or_else(|| ValidationError::UnknownPublish(publish_id).into())
    }
}
