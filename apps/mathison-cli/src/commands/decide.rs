// decide.rs - Run one action request through the governed gate.

use clap::Args;
use mathison_gateway::{GovernanceConfig, Substrate};
use mathison_governance::ActionContext;

#[derive(Args)]
pub struct DecideArgs {
    /// Who is asking.
    #[arg(long)]
    actor: String,
    /// Action name checked against the capability ceiling.
    #[arg(long)]
    action: String,
    /// Registered action id to mint a token for on ALLOW.
    #[arg(long)]
    action_id: Option<String>,
    /// Target identifier (node id, tool name, ...).
    #[arg(long)]
    target: Option<String>,
    /// Payload as a JSON document.
    #[arg(long)]
    payload: Option<String>,
    /// Route the token is bound to.
    #[arg(long, requires = "method")]
    route: Option<String>,
    /// HTTP-style method the token is bound to.
    #[arg(long, requires = "route")]
    method: Option<String>,
    /// Request hash the token is bound to.
    #[arg(long)]
    request_hash: Option<String>,
    /// Print the full result as JSON.
    #[arg(long)]
    json: bool,
}

pub fn execute(args: &DecideArgs, config: &GovernanceConfig) -> anyhow::Result<()> {
    let ctx = build_context(args)?;
    let substrate = Substrate::boot(config.clone())?;
    let result = substrate.gate().evaluate(&ctx)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("Verdict:    {}", result.verdict);
    println!("Decided by: {}", result.decided_by);
    println!("Reason:     {}", result.reason);
    if let Some(alt) = &result.suggested_alternative {
        println!("Suggestion: {}", alt);
    }
    if let Some(payload) = &result.transformed_payload {
        println!("Transformed payload:");
        println!("{}", serde_json::to_string_pretty(payload)?);
    }
    if let Some(token) = &result.capability_token {
        println!("Token:");
        println!("{}", serde_json::to_string_pretty(token)?);
    }
    Ok(())
}

fn build_context(args: &DecideArgs) -> anyhow::Result<ActionContext> {
    let mut ctx = ActionContext::new(&args.actor, &args.action);
    if let Some(id) = &args.action_id {
        ctx = ctx.with_action_id(id);
    }
    if let Some(target) = &args.target {
        ctx = ctx.with_target(target);
    }
    if let Some(payload) = &args.payload {
        let value = serde_json::from_str(payload)
            .map_err(|e| anyhow::anyhow!("--payload is not valid JSON: {}", e))?;
        ctx = ctx.with_payload(value);
    }
    if let (Some(route), Some(method)) = (&args.route, &args.method) {
        ctx = ctx.with_route(route, method);
    }
    if let Some(hash) = &args.request_hash {
        ctx = ctx.with_request_hash(hash);
    }
    Ok(ctx)
}
