use super::{json_pretty, with_spinner, Invocation, EXIT_SUCCESS};

pub fn run(invocation: &Invocation, json: bool) -> Result<u8, String> {
    let orch = invocation.orchestrator()?;
    with_spinner("removing…", "remove complete", "remove failed", || {
        orch.destroy().map_err(|e| e.to_string())
    })?;
    let env = orch.environment().map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "stack_name": env.stack_name,
            "target": env.target,
            "removed": true,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("removed {} from {}", env.stack_name, env.target);
    }
    Ok(EXIT_SUCCESS)
}
