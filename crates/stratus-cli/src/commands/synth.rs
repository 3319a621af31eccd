use super::{assembly_summary, json_pretty, with_spinner, Invocation, EXIT_SUCCESS};

pub fn run(invocation: &Invocation, json: bool) -> Result<u8, String> {
    let orch = invocation.orchestrator()?;
    let assembly = with_spinner("synthesizing…", "synthesis complete", "synthesis failed", || {
        orch.synthesize().map_err(|e| e.to_string())
    })?;

    if json {
        println!("{}", json_pretty(&assembly_summary(&assembly)?)?);
    } else {
        for (name, stack) in &assembly.stacks {
            println!(
                "synthesized {name} ({} resources, {} outputs) into {}",
                stack.resources.len(),
                stack.outputs.len(),
                assembly.template_path(name).display()
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
