//! Releases, release histories, publish tasks, and publish events.

use tracing::{debug, info};

use super::{epoch_secs, get_json, map_err, next_id, put_json, remove_key, scan_json, StateStore};
use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Everything the store needs to record one publish (or revoke) request.
#[derive(Debug, Clone)]
pub struct ReleaseIntent {
    pub gateway_id: GatewayId,
    pub resource_version_id: ResourceVersionId,
    /// Stages to release, each with its resolved target clusters.
    pub targets: Vec<(StageId, Vec<MicroGatewayId>)>,
    pub user: String,
    pub comment: String,
    pub revoke: bool,
}

impl StateStore {
    /// Record a publish request in a single write transaction.
    ///
    /// Re-checks that the version and every stage belong to the gateway; on
    /// any mismatch the transaction is dropped uncommitted. Otherwise upserts
    /// one release row per stage (or removes it when revoking), appends one
    /// history row, and allocates one publish task per (stage, cluster).
    pub fn record_release(&self, intent: &ReleaseIntent) -> StateResult<ReleaseHistory> {
        let txn = self.begin_write()?;
        let gateway_id = intent.gateway_id;

        let version: ResourceVersion = get_json(
            &txn,
            RESOURCE_VERSIONS,
            &child_key(gateway_id, intent.resource_version_id),
        )?
        .ok_or_else(|| {
            StateError::NotFound(format!(
                "resource version {} of gateway {gateway_id}",
                intent.resource_version_id
            ))
        })?;

        for (stage_id, _) in &intent.targets {
            let stage: Option<Stage> = get_json(&txn, STAGES, &child_key(gateway_id, *stage_id))?;
            if stage.is_none() {
                return Err(StateError::NotFound(format!(
                    "stage {stage_id} of gateway {gateway_id}"
                )));
            }
        }

        let now = epoch_secs();
        for (stage_id, _) in &intent.targets {
            let key = child_key(gateway_id, *stage_id);
            if intent.revoke {
                remove_key(&txn, RELEASES, &key)?;
            } else {
                let release = Release {
                    gateway_id,
                    stage_id: *stage_id,
                    resource_version_id: version.id,
                    updated_by: intent.user.clone(),
                    updated_at: now,
                };
                put_json(&txn, RELEASES, &key, &release)?;
            }
        }

        let history_id = next_id(&txn, "release_history")?;
        let mut tasks = Vec::new();
        let mut untargeted = Vec::new();
        for (stage_id, micro_gateways) in &intent.targets {
            if micro_gateways.is_empty() {
                untargeted.push(stage_id.to_string());
            }
            for micro_gateway_id in micro_gateways {
                let task = PublishTask {
                    publish_id: next_id(&txn, "publish")?,
                    history_id,
                    gateway_id,
                    stage_id: *stage_id,
                    micro_gateway_id: *micro_gateway_id,
                    resource_version_id: version.id,
                    revoke: intent.revoke,
                };
                put_json(&txn, PUBLISH_TASKS, &id_key(task.publish_id), &task)?;
                tasks.push(task);
            }
        }

        let history = ReleaseHistory {
            id: history_id,
            gateway_id,
            stage_ids: intent.targets.iter().map(|(id, _)| *id).collect(),
            resource_version_id: version.id,
            version: version.version.clone(),
            created_by: intent.user.clone(),
            comment: intent.comment.clone(),
            revoke: intent.revoke,
            tasks,
            failure: (!untargeted.is_empty())
                .then(|| format!("no target cluster for stage(s) {}", untargeted.join(", "))),
            created_at: now,
        };
        put_json(&txn, RELEASE_HISTORIES, &history.table_key(), &history)?;
        txn.commit().map_err(map_err!(Transaction))?;

        info!(
            gateway_id,
            history_id,
            version = %history.version,
            stages = history.stage_ids.len(),
            tasks = history.tasks.len(),
            revoke = history.revoke,
            "release recorded"
        );
        Ok(history)
    }

    pub fn get_release(&self, gateway_id: GatewayId, stage_id: StageId) -> StateResult<Option<Release>> {
        self.read_one(RELEASES, &child_key(gateway_id, stage_id))
    }

    pub fn list_releases(&self, gateway_id: GatewayId) -> StateResult<Vec<Release>> {
        self.read_prefix(RELEASES, &child_prefix(gateway_id))
    }

    pub fn get_release_history(
        &self,
        gateway_id: GatewayId,
        history_id: HistoryId,
    ) -> StateResult<Option<ReleaseHistory>> {
        self.read_one(RELEASE_HISTORIES, &child_key(gateway_id, history_id))
    }

    /// List release histories of a gateway, oldest first.
    pub fn list_release_histories(&self, gateway_id: GatewayId) -> StateResult<Vec<ReleaseHistory>> {
        self.read_prefix(RELEASE_HISTORIES, &child_prefix(gateway_id))
    }

    pub fn get_publish_task(&self, publish_id: PublishId) -> StateResult<Option<PublishTask>> {
        self.read_one(PUBLISH_TASKS, &id_key(publish_id))
    }

    // ── Publish events ─────────────────────────────────────────────

    /// Record a step status for a publish.
    ///
    /// A row is keyed by (publish id, step ordinal); a later status for the
    /// same step updates the row in place. Rejects anything that would move
    /// the publish backwards: an ordinal below the latest one, a status
    /// transition that is not forward, or any step after a failure.
    pub fn record_publish_event(&self, event: &PublishEvent) -> StateResult<PublishEvent> {
        let publish_id = event.publish_id;
        let txn = self.begin_write()?;

        let task: Option<PublishTask> = get_json(&txn, PUBLISH_TASKS, &id_key(publish_id))?;
        if task.is_none() {
            return Err(StateError::NotFound(format!("publish {publish_id}")));
        }

        let regression = |reason: String| StateError::EventRegression { publish_id, reason };
        let existing: Vec<PublishEvent> =
            scan_json(&txn, PUBLISH_EVENTS, &format!("{publish_id:020}/"))?;
        let mut stored = event.clone();
        if let Some(latest) = existing.last() {
            if event.ordinal < latest.ordinal {
                return Err(regression(format!(
                    "step {} is before current step {}",
                    event.step.as_str(),
                    latest.step.as_str()
                )));
            }
            if event.ordinal == latest.ordinal {
                if !latest.status.can_transition_to(event.status) {
                    return Err(regression(format!(
                        "step {} cannot move from {:?} to {:?}",
                        event.step.as_str(),
                        latest.status,
                        event.status
                    )));
                }
                stored.created_at = latest.created_at;
            } else if latest.status == EventStatus::Failure {
                return Err(regression(format!(
                    "publish already failed at step {}",
                    latest.step.as_str()
                )));
            }
        }

        put_json(&txn, PUBLISH_EVENTS, &stored.table_key(), &stored)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            publish_id,
            step = stored.step.as_str(),
            status = ?stored.status,
            "publish event recorded"
        );
        Ok(stored)
    }

    /// List the events of one publish in ordinal order.
    pub fn list_publish_events(&self, publish_id: PublishId) -> StateResult<Vec<PublishEvent>> {
        self.read_prefix(PUBLISH_EVENTS, &format!("{publish_id:020}/"))
    }
}
