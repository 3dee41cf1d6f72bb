use crate::{bootstrap, decrypt, drift, vars};
use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum, ValueHint};
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

impl Level {
    fn as_filter(self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warn",
            Level::Error => "error",
        }
    }
}

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Arguments {
    /// The verbosity level of diagnostic output.
    #[arg(short, long, default_value = "warning")]
    pub verbosity: Level,
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand, strum::Display)]
enum Commands {
    /// Bootstraps the configuration repository and the cloud resources it
    /// needs (keyring, crypto key, service accounts, buckets, source repo).
    Bootstrap {
        /// Path to the workspace where the configuration directory is
        /// materialized.
        #[arg(long, short, value_hint = ValueHint::DirPath)]
        workspace: PathBuf,
        /// Cloud project id.
        #[arg(long, short)]
        project_id: String,
        /// Path to the template directory.
        #[arg(long, value_hint = ValueHint::DirPath, default_value = "bootstrap/config")]
        template_dir: PathBuf,
        /// Delete and recreate cloud resources that already exist.
        #[arg(long)]
        recreate: bool,
    },
    /// Compares the materialized configuration against the template and
    /// exits non-zero on any drift.
    Check {
        /// Root directory holding the .workspace pointer file.
        #[arg(long, value_hint = ValueHint::DirPath, default_value = ".")]
        root: PathBuf,
        /// Path to the template directory.
        #[arg(long, value_hint = ValueHint::DirPath, default_value = "bootstrap/config")]
        template_dir: PathBuf,
    },
    /// Decrypts every *_ENCRYPTED variable in the process environment and
    /// prints KEY=value lines.
    Decrypt {
        /// Cloud project id.
        #[arg(long, short)]
        project_id: String,
    },
    /// Prints the resolved variables.env entries (encrypted values
    /// decrypted) for pasting into an IDE run configuration.
    Env {
        /// Root directory holding the .workspace pointer file.
        #[arg(long, value_hint = ValueHint::DirPath, default_value = ".")]
        root: PathBuf,
    },
    /// Generates shell completions for the groundwork command.
    Completions {
        /// The shell to generate the completions for.
        #[arg(long, value_enum)]
        shell: clap_complete::Shell,
    },
}

pub fn execute() -> anyhow::Result<()> {
    let args = Arguments::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.verbosity.as_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let runner = runner::ProcessRunner::new();

    tracing::debug!("Executing {}", args.commands);
    match args.commands {
        Commands::Bootstrap {
            workspace,
            project_id,
            template_dir,
            recreate,
        } => {
            let options = bootstrap::Options {
                workspace,
                project_id: project_id.into(),
                template_dir,
                is_recreate: recreate,
            };
            bootstrap::run(&runner, &options).context("while bootstrapping the configuration")?;
        }

        Commands::Check { root, template_dir } => {
            let report = drift::run(root.as_path(), template_dir.as_path())
                .context("while checking for configuration drift")?;
            if report.is_drift() {
                std::process::exit(1);
            }
        }

        Commands::Decrypt { project_id } => {
            decrypt::run(&runner, project_id.as_str())
                .context("while decrypting environment variables")?;
        }

        Commands::Env { root } => {
            vars::run(&runner, root.as_path()).context("while resolving variables")?;
        }

        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Arguments::command(),
                "groundwork",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}
