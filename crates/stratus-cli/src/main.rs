mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{Invocation, EXIT_FAILURE, EXIT_MANIFEST_ERROR, EXIT_REMOTE_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;
use stratus_core::InvocationOptions;

#[derive(Debug, Parser)]
#[command(
    name = "stratus",
    version,
    about = "Config resolution and deployment orchestration for serverless services"
)]
struct Cli {
    /// Path to the service description.
    #[arg(long, default_value = "stratus.toml", global = true)]
    config: PathBuf,

    /// Deployment stage.
    #[arg(short, long, global = true)]
    stage: Option<String>,

    /// Deployment region.
    #[arg(short, long, global = true)]
    region: Option<String>,

    /// Named credentials profile.
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Credentials profile; takes precedence over --profile.
    #[arg(long, global = true)]
    aws_profile: Option<String>,

    /// Account to deploy into, skipping the default-account lookup.
    #[arg(long, global = true)]
    account_id: Option<String>,

    /// Partition of the target account.
    #[arg(long, global = true)]
    partition: Option<String>,

    /// Directory holding packaged function artifacts.
    #[arg(long, global = true)]
    package: Option<String>,

    /// Managed policy attached to the deployment execution role (repeatable).
    #[arg(long = "execution-policy", global = true)]
    execution_policies: Vec<String>,

    /// Control-plane URL (overrides the remote profile config).
    #[arg(long, global = true)]
    remote: Option<String>,

    /// Bearer token sent to the control plane.
    #[arg(long, global = true)]
    remote_token: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Provision the toolkit stack (staging bucket, execution policies).
    Bootstrap,
    /// Synthesize the service's stack into the assembly directory.
    Synth,
    /// Compare the synthesized stack against the deployed one.
    Diff {
        /// Exit with status 1 when any stack has changes.
        #[arg(long, default_value_t = false)]
        fail: bool,
    },
    /// Deploy the service, or update the code of a single function.
    Deploy {
        /// Only replace the code of this already-deployed function.
        #[arg(short, long)]
        function: Option<String>,
        /// Also update function configuration (not supported).
        #[arg(long, default_value_t = false)]
        update_config: bool,
    },
    /// Remove the deployed stack.
    Remove,
    /// Run the configured build command.
    Compile,
    /// Run the configured clean command.
    Clean,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STRATUS_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let json_output = cli.json;
    let (function, update_config) = match &cli.command {
        Commands::Deploy {
            function,
            update_config,
        } => (function.clone(), *update_config),
        _ => (None, false),
    };
    let invocation = Invocation {
        config: cli.config,
        options: InvocationOptions {
            stage: cli.stage,
            region: cli.region,
            profile: cli.profile,
            aws_profile: cli.aws_profile,
            account_id: cli.account_id,
            partition: cli.partition,
            package: cli.package,
            execution_policies: cli.execution_policies,
            function,
            update_config,
        },
        remote: cli.remote,
        remote_token: cli.remote_token,
    };

    let result = match cli.command {
        Commands::Bootstrap => commands::bootstrap::run(&invocation, json_output),
        Commands::Synth => commands::synth::run(&invocation, json_output),
        Commands::Diff { fail } => commands::diff::run(&invocation, fail, json_output),
        Commands::Deploy { .. } => commands::deploy::run(&invocation, json_output),
        Commands::Remove => commands::remove::run(&invocation, json_output),
        Commands::Compile => commands::compile::run(&invocation, json_output),
        Commands::Clean => commands::clean::run(&invocation, json_output),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("service description error:") {
                EXIT_MANIFEST_ERROR
            } else if msg.starts_with("remote error:") {
                EXIT_REMOTE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
