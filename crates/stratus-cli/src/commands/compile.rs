use super::{json_pretty, Invocation, EXIT_SUCCESS};

pub fn run(invocation: &Invocation, json: bool) -> Result<u8, String> {
    let orch = invocation.orchestrator()?;
    orch.compile().map_err(|e| e.to_string())?;
    let config_path = orch.resolver().build_config_path();

    if json {
        let payload = serde_json::json!({ "built": true, "build_config": config_path });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("built {} ({})", orch.service().service, config_path.display());
    }
    Ok(EXIT_SUCCESS)
}
