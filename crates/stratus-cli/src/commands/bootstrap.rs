use super::{json_pretty, with_spinner, Invocation, EXIT_SUCCESS};
use stratus_remote::BootstrapOutcome;

pub fn run(invocation: &Invocation, json: bool) -> Result<u8, String> {
    let orch = invocation.orchestrator()?;
    let toolkit = orch.resolver().toolkit_stack_name();

    let outcome = with_spinner("bootstrapping…", "bootstrap complete", "bootstrap failed", || {
        orch.bootstrap().map_err(|e| e.to_string())
    })?;
    let target = orch.environment().map_err(|e| e.to_string())?.target.clone();

    if json {
        let payload = serde_json::json!({
            "toolkit_stack": toolkit,
            "target": target,
            "outcome": outcome,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        let verb = match outcome {
            BootstrapOutcome::Created => "created",
            BootstrapOutcome::Updated => "updated",
            BootstrapOutcome::AlreadyCurrent => "already current",
        };
        println!("toolkit stack {toolkit} {verb} in {target}");
    }
    Ok(EXIT_SUCCESS)
}
