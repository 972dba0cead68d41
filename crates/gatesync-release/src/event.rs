//! Publish event state machine.
//!
//! Each publish walks an ordered list of steps; every step moves
//! PENDING → DOING → {SUCCESS, FAILURE}. Where the walk ends depends on the
//! target cluster: clusters that report data-plane status end at
//! `load_configuration`, others end once configuration is distributed.

use gatesync_state::{
    EventStatus, PublishEvent, PublishId, PublishStep, StateResult, StateStore, epoch_secs,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Overall state of one publish, derived from its events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishState {
    Running,
    Succeeded,
    Failed { step: PublishStep, detail: Option<String> },
}

impl PublishState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, PublishState::Running)
    }
}

/// The ordered steps of one publish and the step that ends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPlan {
    steps: Vec<PublishStep>,
    terminal: PublishStep,
}

impl StepPlan {
    pub fn for_cluster(reports_status: bool) -> Self {
        let terminal = if reports_status {
            PublishStep::LoadConfiguration
        } else {
            PublishStep::DistributeConfiguration
        };
        Self {
            steps: PublishStep::ALL
                .into_iter()
                .take_while(|step| *step <= terminal)
                .collect(),
            terminal,
        }
    }

    pub fn steps(&self) -> &[PublishStep] {
        &self.steps
    }

    pub fn terminal(&self) -> PublishStep {
        self.terminal
    }

    /// Steps recorded by the control plane itself.
    pub fn is_control_plane_step(step: PublishStep) -> bool {
        step <= PublishStep::DistributeConfiguration
    }

    /// Whether the data plane may report `step` under this plan.
    pub fn accepts_report(&self, step: PublishStep) -> bool {
        !Self::is_control_plane_step(step) && self.steps.contains(&step)
    }

    /// Derive the overall state from recorded events.
    pub fn derive_state(&self, events: &[PublishEvent]) -> PublishState {
        if let Some(failed) = events.iter().find(|e| e.status == EventStatus::Failure) {
            return PublishState::Failed {
                step: failed.step,
                detail: failed.detail.clone(),
            };
        }
        let terminal_done = events
            .iter()
            .any(|e| e.step == self.terminal && e.status == EventStatus::Success);
        if terminal_done {
            PublishState::Succeeded
        } else {
            PublishState::Running
        }
    }
}

/// Records step transitions of one publish.
pub struct PublishTracker<'a> {
    store: &'a StateStore,
    publish_id: PublishId,
    plan: StepPlan,
}

impl<'a> PublishTracker<'a> {
    pub fn new(store: &'a StateStore, publish_id: PublishId, plan: StepPlan) -> Self {
        Self {
            store,
            publish_id,
            plan,
        }
    }

    pub fn plan(&self) -> &StepPlan {
        &self.plan
    }

    pub fn start(&self, step: PublishStep) -> StateResult<PublishEvent> {
        self.record(step, EventStatus::Doing, None)
    }

    pub fn succeed(&self, step: PublishStep, detail: Option<String>) -> StateResult<PublishEvent> {
        let event = self.record(step, EventStatus::Success, detail)?;
        if step == self.plan.terminal() {
            info!(publish_id = self.publish_id, step = step.as_str(), "publish finished");
        }
        Ok(event)
    }

    pub fn fail(&self, step: PublishStep, detail: String) -> StateResult<PublishEvent> {
        warn!(
            publish_id = self.publish_id,
            step = step.as_str(),
            %detail,
            "publish step failed"
        );
        self.record(step, EventStatus::Failure, Some(detail))
    }

    /// Current state as seen by the store.
    pub fn state(&self) -> StateResult<PublishState> {
        let events = self.store.list_publish_events(self.publish_id)?;
        Ok(self.plan.derive_state(&events))
    }

    fn record(
        &self,
        step: PublishStep,
        status: EventStatus,
        detail: Option<String>,
    ) -> StateResult<PublishEvent> {
        let mut event = PublishEvent::new(self.publish_id, step, status, epoch_secs());
        event.detail = detail;
        let stored = self.store.record_publish_event(&event)?;
        debug!(
            publish_id = self.publish_id,
            step = step.as_str(),
            status = ?status,
            "step transition"
        );
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(step: PublishStep, status: EventStatus) -> PublishEvent {
        PublishEvent::new(1, step, status, 0)
    }

    #[test]
    fn plan_terminal_depends_on_status_reporting() {
        let reporting = StepPlan::for_cluster(true);
        assert_eq!(reporting.terminal(), PublishStep::LoadConfiguration);
        assert_eq!(reporting.steps(), PublishStep::ALL);

        let silent = StepPlan::for_cluster(false);
        assert_eq!(silent.terminal(), PublishStep::DistributeConfiguration);
        assert_eq!(silent.steps().len(), 3);
        assert!(!silent.accepts_report(PublishStep::ParseConfiguration));
        assert!(reporting.accepts_report(PublishStep::ApplyConfiguration));
        assert!(!reporting.accepts_report(PublishStep::GenerateTask));
    }

    #[test]
    fn state_follows_terminal_step() {
        let plan = StepPlan::for_cluster(false);
        let mut events = vec![
            event(PublishStep::ValidateConfiguration, EventStatus::Success),
            event(PublishStep::GenerateTask, EventStatus::Success),
            event(PublishStep::DistributeConfiguration, EventStatus::Doing),
        ];
        assert_eq!(plan.derive_state(&events), PublishState::Running);

        events[2].status = EventStatus::Success;
        assert_eq!(plan.derive_state(&events), PublishState::Succeeded);
        assert_eq!(
            StepPlan::for_cluster(true).derive_state(&events),
            PublishState::Running
        );
    }

    #[test]
    fn any_failure_fails_the_publish() {
        let plan = StepPlan::for_cluster(true);
        let events = vec![
            event(PublishStep::ValidateConfiguration, EventStatus::Success),
            event(PublishStep::GenerateTask, EventStatus::Failure).with_detail("bad host"),
        ];
        let state = plan.derive_state(&events);
        assert_eq!(
            state,
            PublishState::Failed {
                step: PublishStep::GenerateTask,
                detail: Some("bad host".to_string()),
            }
        );
        assert!(state.is_finished());
    }
}
