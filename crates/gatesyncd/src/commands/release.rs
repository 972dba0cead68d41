use anyhow::Context as _;
use gatesync_release::{JobReport, PublishRequest, PublishState, RevokeRequest};
use gatesync_state::GatewayId;

use super::Context;

pub async fn publish(
    ctx: &Context,
    gateway_id: GatewayId,
    stages: &[String],
    resource_version_id: u64,
    user: String,
    comment: String,
) -> anyhow::Result<()> {
    let stage_ids = stages
        .iter()
        .map(|name| ctx.stage_by_name(gateway_id, name).map(|s| s.id))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let request = PublishRequest {
        gateway_id,
        stage_ids,
        resource_version_id,
        user,
        comment,
    };
    let outcome = ctx.publisher.publish(&request).context("publish rejected")?;

    println!("release history {}", outcome.history_id());
    if let Some(failure) = &outcome.history.failure {
        println!("  warning: {failure}");
    }
    let reports = outcome.wait().await;
    print_reports(&reports);
    finish(&reports)
}

pub async fn revoke(
    ctx: &Context,
    gateway_id: GatewayId,
    stage: &str,
    user: String,
    comment: String,
) -> anyhow::Result<()> {
    let stage = ctx.stage_by_name(gateway_id, stage)?;
    let request = RevokeRequest {
        gateway_id,
        stage_id: stage.id,
        user,
        comment,
    };
    let outcome = ctx.publisher.revoke(&request).context("revoke rejected")?;
    println!("revoke history {}", outcome.history_id());
    let reports = outcome.wait().await;
    print_reports(&reports);
    finish(&reports)
}

pub fn status(ctx: &Context, publish_id: u64) -> anyhow::Result<()> {
    let status = ctx.publisher.publish_status(publish_id)?;
    println!(
        "publish {} (stage {}, micro-gateway {}, revoke={})",
        status.task.publish_id, status.task.stage_id, status.task.micro_gateway_id, status.task.revoke
    );
    for event in &status.events {
        println!("{}", serde_json::to_string(event)?);
    }
    println!("state: {}", serde_json::to_string(&status.state)?);
    println!("terminal step: {}", status.terminal.as_str());
    Ok(())
}

fn print_reports(reports: &[JobReport]) {
    for report in reports {
        match &report.state {
            PublishState::Succeeded => println!("✓ publish {} succeeded", report.publish_id),
            PublishState::Running => println!(
                "… publish {} distributed, waiting for the data plane",
                report.publish_id
            ),
            PublishState::Failed { step, detail } => println!(
                "✗ publish {} failed at {}: {}",
                report.publish_id,
                step.as_str(),
                detail.as_deref().unwrap_or("no detail")
            ),
        }
        if let Some(sync) = &report.sync {
            println!(
                "  created={} updated={} unchanged={} deleted={} failures={}",
                sync.created,
                sync.updated,
                sync.unchanged,
                sync.deleted,
                sync.failures.len()
            );
        }
    }
}

fn finish(reports: &[JobReport]) -> anyhow::Result<()> {
    let failed = reports
        .iter()
        .filter(|r| matches!(r.state, PublishState::Failed { .. }))
        .count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} publish jobs failed", reports.len());
    }
    Ok(())
}
