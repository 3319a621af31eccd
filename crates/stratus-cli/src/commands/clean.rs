use super::{json_pretty, Invocation, EXIT_SUCCESS};

pub fn run(invocation: &Invocation, json: bool) -> Result<u8, String> {
    let orch = invocation.orchestrator()?;
    orch.clean().map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&serde_json::json!({ "cleaned": true }))?);
    } else {
        println!("cleaned {}", orch.service().service);
    }
    Ok(EXIT_SUCCESS)
}
