// ABOUTME: buildforge binary: clap surface, tracing setup, subcommand dispatch
// ABOUTME: Every path funnels into one of the documented process exit codes

use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use buildforge_recipe::{synthesize, RecipeMeta};
use buildforge_sandbox::SandboxConfig;
use buildforge_trace::TraceLog;

mod attempt;
mod config;
mod exit_codes;
mod verify;

use attempt::AttemptArgs;
use config::Config;

#[derive(Parser)]
#[command(name = "buildforge")]
#[command(about = "Records interactive build-environment configuration and replays it as a Dockerfile")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one interactive configuration attempt against a fresh sandbox
    Run {
        /// Repository full name, `owner/name`
        #[arg(long)]
        repo: String,
        /// Commit the checkout is pinned to
        #[arg(long)]
        commit: String,
        /// Host path of the repository checkout staged into the sandbox
        #[arg(long)]
        repo_dir: PathBuf,
        /// Base image override
        #[arg(long)]
        image: Option<String>,
        /// Artifact directory (default: <output root>/<owner>/<name>)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Wall-clock limit override, in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Host scratch directory bind-mounted into the sandbox
        #[arg(long)]
        scratch: Option<PathBuf>,
    },
    /// Re-derive the Dockerfile from a saved command trace
    Synthesize {
        /// Saved trace, an inner_commands.json file
        #[arg(long)]
        trace: PathBuf,
        /// Repository full name, `owner/name`
        #[arg(long)]
        repo: String,
        /// Commit recorded into the bootstrap steps
        #[arg(long)]
        commit: String,
        /// Base image override
        #[arg(long)]
        image: Option<String>,
        /// Where to write the Dockerfile (default: next to the trace)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Build a synthesized Dockerfile under a deadline to prove it replays
    Verify {
        /// The Dockerfile to build
        dockerfile: PathBuf,
        /// Build context directory (default: the Dockerfile's directory)
        #[arg(long)]
        context: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(exit_codes::INVALID_ARGUMENTS);
        }
    };

    let code = handle_command(cli.command, config).await;
    process::exit(code);
}

async fn handle_command(command: Commands, config: Config) -> i32 {
    match command {
        Commands::Run {
            repo,
            commit,
            repo_dir,
            image,
            output,
            timeout,
            scratch,
        } => {
            let mut config = config;
            if let Some(image) = image {
                config.docker_image = image;
            }
            let output_dir = output.unwrap_or_else(|| config.output_root.join(&repo));
            let wall_clock_limit = timeout
                .map(Duration::from_secs)
                .unwrap_or(config.wall_clock_limit);
            let scratch_dir = scratch.unwrap_or_else(|| SandboxConfig::default().scratch_dir);
            let sandbox = config.sandbox_config(scratch_dir);
            attempt::run(AttemptArgs {
                repo,
                commit,
                repo_dir,
                output_dir,
                wall_clock_limit,
                sandbox,
            })
            .await
        }
        Commands::Synthesize {
            trace,
            repo,
            commit,
            image,
            out,
        } => synthesize_trace(&trace, repo, commit, image, out, &config),
        Commands::Verify {
            dockerfile,
            context,
        } => verify::run(&dockerfile, context, config.docker_build_timeout).await,
    }
}

fn synthesize_trace(
    trace_path: &Path,
    repo: String,
    commit: String,
    image: Option<String>,
    out: Option<PathBuf>,
    config: &Config,
) -> i32 {
    if repo.split('/').count() != 2 {
        eprintln!("Error: --repo must be an owner/name pair, got `{repo}`");
        return exit_codes::INVALID_ARGUMENTS;
    }
    let log = match TraceLog::load(trace_path) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("Error: failed to load {}: {e}", trace_path.display());
            return exit_codes::GENERAL_ERROR;
        }
    };
    let meta = RecipeMeta {
        repo_full_name: repo,
        base_image: image.unwrap_or_else(|| config.docker_image.clone()),
        commit_sha: Some(commit),
    };
    let recipe = synthesize(&log, &meta);
    let out = out.unwrap_or_else(|| {
        trace_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .join("Dockerfile")
    });
    if let Err(e) = std::fs::write(&out, recipe.render()) {
        eprintln!("Error: failed to write {}: {e}", out.display());
        return exit_codes::GENERAL_ERROR;
    }
    info!(
        out = %out.display(),
        steps = recipe.steps().len(),
        "Dockerfile synthesized from the saved trace"
    );
    exit_codes::SUCCESS
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
