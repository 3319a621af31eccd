use super::{assembly_summary, json_pretty, with_spinner, Invocation, EXIT_SUCCESS};

pub fn run(invocation: &Invocation, json: bool) -> Result<u8, String> {
    let orch = invocation.orchestrator()?;

    if let Some(function) = invocation.options.function.as_deref() {
        let update = with_spinner(
            &format!("updating function {function}…"),
            "function updated",
            "function update failed",
            || orch.update_function(function).map_err(|e| e.to_string()),
        )?;
        if json {
            println!("{}", json_pretty(&update)?);
        } else {
            println!(
                "updated {} from s3://{}/{}",
                update.identifier, update.bucket, update.key
            );
        }
        return Ok(EXIT_SUCCESS);
    }

    let assembly = with_spinner("deploying…", "deploy complete", "deploy failed", || {
        orch.deploy().map_err(|e| e.to_string())
    })?;
    if json {
        println!("{}", json_pretty(&assembly_summary(&assembly)?)?);
    } else {
        for (name, stack) in &assembly.stacks {
            println!("deployed {name} to {}", stack.target);
        }
    }
    Ok(EXIT_SUCCESS)
}
