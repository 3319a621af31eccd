use super::{colorize_change, json_pretty, with_spinner, Invocation, EXIT_FAILURE, EXIT_SUCCESS};

pub fn run(invocation: &Invocation, fail_on_changes: bool, json: bool) -> Result<u8, String> {
    let orch = invocation.orchestrator()?;
    let diffs = with_spinner("comparing…", "diff complete", "diff failed", || {
        orch.diff().map_err(|e| e.to_string())
    })?;

    if json {
        println!("{}", json_pretty(&diffs)?);
    } else {
        for diff in &diffs {
            if !diff.has_changes {
                println!("no changes in stack {}", diff.stack_name);
                continue;
            }
            println!("stack {}:", diff.stack_name);
            for id in &diff.added {
                println!("  {}", colorize_change('+', id));
            }
            for id in &diff.modified {
                println!("  {}", colorize_change('~', id));
            }
            for id in &diff.removed {
                println!("  {}", colorize_change('-', id));
            }
            if diff.metadata_changed {
                println!("  tags or outputs changed");
            }
        }
    }

    if fail_on_changes && diffs.iter().any(|d| d.has_changes) {
        return Ok(EXIT_FAILURE);
    }
    Ok(EXIT_SUCCESS)
}
