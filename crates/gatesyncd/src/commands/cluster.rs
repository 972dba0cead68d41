use gatesync_state::GatewayId;

use super::Context;

pub fn decommission(ctx: &Context, micro_gateway: &str) -> anyhow::Result<()> {
    let removed = ctx.publisher.decommission(micro_gateway)?;
    println!("✓ removed {removed} keys of micro-gateway {micro_gateway}");
    Ok(())
}

pub fn cleanup(ctx: &Context, gateway_id: GatewayId) -> anyhow::Result<()> {
    let deleted = ctx.publisher.cleanup(gateway_id)?;
    if deleted.is_empty() {
        println!("nothing to clean up (keeping {} versions)", ctx.config.retention.keep_versions);
    } else {
        let ids: Vec<String> = deleted.iter().map(u64::to_string).collect();
        println!("✓ deleted resource versions {}", ids.join(", "));
    }
    Ok(())
}
