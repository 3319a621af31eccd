use crate::CoreError;
use std::path::{Path, PathBuf};
use std::process::Command;
use stratus_schema::BuildSection;
use tracing::{debug, info};

/// Environment variable carrying the build config path to build commands.
pub const BUILD_CONFIG_ENV: &str = "STRATUS_BUILD_CONFIG";

/// Compiles (or cleans) the service's infrastructure code before synthesis.
pub trait BuildStep {
    fn build(&self, config_path: &Path) -> Result<(), CoreError>;
    fn clean(&self, config_path: &Path) -> Result<(), CoreError>;
}

/// Runs the configured `provider.build` commands in the service root.
#[derive(Debug, Clone)]
pub struct CommandBuildStep {
    root: PathBuf,
    command: Vec<String>,
    clean_command: Vec<String>,
}

impl CommandBuildStep {
    pub fn new(root: impl Into<PathBuf>, section: &BuildSection) -> Self {
        Self {
            root: root.into(),
            command: section.command.clone(),
            clean_command: section.clean_command.clone(),
        }
    }

    fn run(&self, what: &str, argv: &[String], config_path: &Path) -> Result<(), CoreError> {
        let Some((program, args)) = argv.split_first() else {
            debug!("no {what} command configured");
            return Ok(());
        };
        info!(
            "running {what} command '{}' with config {}",
            argv.join(" "),
            config_path.display()
        );
        let status = Command::new(program)
            .args(args)
            .current_dir(&self.root)
            .env(BUILD_CONFIG_ENV, config_path)
            .status()
            .map_err(|e| {
                CoreError::Configuration(format!("{what} failed: cannot run '{program}': {e}"))
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(CoreError::Configuration(format!(
                "{what} failed: '{}' exited with {status}",
                argv.join(" ")
            )))
        }
    }
}

impl BuildStep for CommandBuildStep {
    fn build(&self, config_path: &Path) -> Result<(), CoreError> {
        self.run("build", &self.command, config_path)
    }

    fn clean(&self, config_path: &Path) -> Result<(), CoreError> {
        self.run("clean", &self.clean_command, config_path)
    }
}
