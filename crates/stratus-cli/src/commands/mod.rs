pub mod bootstrap;
pub mod clean;
pub mod compile;
pub mod completions;
pub mod deploy;
pub mod diff;
pub mod man_pages;
pub mod remove;
pub mod synth;

use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stratus_core::{InvocationOptions, Orchestrator, SessionConfig};
use stratus_remote::HttpConnector;
use stratus_schema::Assembly;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
pub const EXIT_REMOTE_ERROR: u8 = 3;

/// Everything a lifecycle command needs to build its orchestrator.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub config: PathBuf,
    pub options: InvocationOptions,
    pub remote: Option<String>,
    pub remote_token: Option<String>,
}

impl Invocation {
    pub fn orchestrator(&self) -> Result<Orchestrator, String> {
        let connector = HttpConnector::new(self.remote.as_deref())
            .with_auth_token(self.remote_token.clone());
        Orchestrator::load(
            &self.config,
            self.options.clone(),
            SessionConfig::from_env(),
            Arc::new(connector),
        )
        .map_err(|e| e.to_string())
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// Per-stack summary of a synthesized assembly.
pub fn assembly_summary(assembly: &Assembly) -> Result<serde_json::Value, String> {
    let mut stacks = Vec::with_capacity(assembly.stacks.len());
    for (name, stack) in &assembly.stacks {
        let fingerprint = stack
            .fingerprint()
            .map_err(|e| format!("failed to fingerprint {name}: {e}"))?;
        stacks.push(serde_json::json!({
            "stack_name": name,
            "target": stack.target,
            "fingerprint": fingerprint,
            "template": assembly.template_path(name),
            "resources": stack.resources.keys().map(ToString::to_string).collect::<Vec<_>>(),
            "outputs": stack.outputs.keys().map(ToString::to_string).collect::<Vec<_>>(),
        }));
    }
    Ok(serde_json::json!({
        "outdir": assembly.outdir,
        "stacks": stacks,
    }))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Run `op` under a spinner, finishing it with `done` or `failed`.
pub fn with_spinner<T>(
    msg: &str,
    done: &str,
    failed: &str,
    op: impl FnOnce() -> Result<T, String>,
) -> Result<T, String> {
    let pb = spinner(msg);
    match op() {
        Ok(value) => {
            spin_ok(&pb, done);
            Ok(value)
        }
        Err(e) => {
            spin_fail(&pb, failed);
            Err(e)
        }
    }
}

pub fn colorize_change(sign: char, id: &str) -> String {
    use console::Style;
    let line = format!("{sign} {id}");
    match sign {
        '+' => Style::new().green().apply_to(line).to_string(),
        '~' => Style::new().yellow().apply_to(line).to_string(),
        '-' => Style::new().red().apply_to(line).to_string(),
        _ => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use stratus_schema::{DeploymentTarget, DesiredState};

    fn invocation(config: PathBuf) -> Invocation {
        Invocation {
            config,
            options: InvocationOptions::default(),
            remote: Some("http://127.0.0.1:9".to_owned()),
            remote_token: None,
        }
    }

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_MANIFEST_ERROR);
        assert_ne!(EXIT_MANIFEST_ERROR, EXIT_REMOTE_ERROR);
    }

    #[test]
    fn missing_config_is_a_service_description_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = invocation(dir.path().join("stratus.toml"))
            .orchestrator()
            .err()
            .unwrap();
        assert!(err.starts_with("service description error:"), "{err}");
    }

    #[test]
    fn orchestrator_roots_at_config_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("stratus.toml");
        std::fs::write(&config, "service = \"orders\"\n").unwrap();
        let orch = invocation(config).orchestrator().unwrap();
        assert_eq!(orch.root(), dir.path());
        assert_eq!(orch.service().service, "orders");
    }

    #[test]
    fn assembly_summary_lists_stacks() {
        let target = DeploymentTarget {
            stage: "dev".to_owned(),
            region: "us-east-1".to_owned(),
            account_id: "123456789012".to_owned(),
            partition: "aws".to_owned(),
        };
        let mut assembly = Assembly::new("/srv/orders/.stratus-assembly");
        assembly.add_stack(DesiredState::new("orders-dev", target, BTreeMap::new()));
        let summary = assembly_summary(&assembly).unwrap();
        assert_eq!(summary["stacks"][0]["stack_name"], "orders-dev");
        assert_eq!(summary["stacks"][0]["target"]["account_id"], "123456789012");
        assert_eq!(
            summary["stacks"][0]["fingerprint"].as_str().unwrap().len(),
            64
        );
    }

    #[test]
    fn colorize_change_keeps_text() {
        assert!(colorize_change('+', "hello-ServerlessDeployedLambda")
            .contains("hello-ServerlessDeployedLambda"));
        assert_eq!(colorize_change('?', "x"), "? x");
    }

    #[test]
    fn with_spinner_passes_errors_through() {
        let err = with_spinner::<()>("working", "done", "failed", || Err("boom".to_owned()));
        assert_eq!(err.unwrap_err(), "boom");
    }
}
