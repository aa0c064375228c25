//! apptest - render resource packages through containerized functions
//!
//! ## Commands
//!
//! - `fn render INPUT_FILE CONTAINER_IMAGE`: run one function over the
//!   resources in `INPUT_FILE` (or `-` for stdin) and deliver the result

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use apptest_core::{truncate_output, Printer, RenderConfig, RenderError, Renderer};
use apptest_fnruntime::{
    CancellationToken, CliRuntime, FnError, ImagePullPolicy, RuntimeKind, StorageMount,
};

/// Bytes of function stderr shown when `--truncate-output` is set.
const TRUNCATE_LIMIT: usize = 4096;

#[derive(Parser)]
#[command(name = "apptest")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Render resource packages through containerized functions", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Work with functions
    Fn {
        #[command(subcommand)]
        action: FnAction,
    },
}

#[derive(Subcommand)]
enum FnAction {
    /// Render resources through a single function
    Render(RenderArgs),
}

#[derive(clap::Args, Debug)]
struct RenderArgs {
    /// Resource file to render, or `-` to read stdin
    input_file: PathBuf,

    /// Function image, or `exec:<path>` for a host executable
    container_image: String,

    /// Directory for the results artifact
    #[arg(long, env = "APPTEST_RESULTS_DIR")]
    results_dir: Option<PathBuf>,

    /// Output: `stdout`, `unwrap`, or a directory that must not exist yet
    #[arg(short, long)]
    output: Option<String>,

    /// When to pull the function image: always, ifNotPresent or never
    #[arg(long, default_value = "ifNotPresent")]
    image_pull_policy: ImagePullPolicy,

    /// Allow host executables as functions
    #[arg(long)]
    allow_exec: bool,

    /// Give the function network access
    #[arg(long)]
    network: bool,

    /// Storage mount, e.g. `type=bind,src=/data,dst=/data[,rw=true]`
    #[arg(long = "mount")]
    mounts: Vec<StorageMount>,

    /// Environment variable for the function, `KEY=VALUE` or `KEY`
    #[arg(short, long = "env")]
    env: Vec<String>,

    /// User the container runs as (default: nobody)
    #[arg(long)]
    user: Option<String>,

    /// Kill the function after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Container engine: docker, podman or nerdctl
    #[arg(long, env = "APPTEST_FN_RUNTIME", default_value = "docker")]
    fn_runtime: RuntimeKind,

    /// Shorten function stderr shown on failure
    #[arg(long)]
    truncate_output: bool,
}

impl RenderArgs {
    fn into_config(self) -> RenderConfig {
        RenderConfig {
            input: self.input_file,
            function: self.container_image,
            output: self.output,
            results_dir: self.results_dir,
            image_pull_policy: self.image_pull_policy,
            allow_exec: self.allow_exec,
            network: self.network,
            mounts: self.mounts,
            env: self.env,
            user: self.user,
            timeout: self.timeout.map(Duration::from_secs),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    apptest_core::telemetry::init_tracing(cli.json, level);

    let printer = Printer::stdio();
    let (result, truncate) = match cli.command {
        Commands::Fn {
            action: FnAction::Render(args),
        } => {
            let truncate = args.truncate_output;
            (cmd_render(args, printer.clone()).await, truncate)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Nothing left to report to if stderr is gone.
            let _ = printer.error(format_error(&e, truncate));
            ExitCode::FAILURE
        }
    }
}

async fn cmd_render(args: RenderArgs, printer: Printer) -> Result<()> {
    let runtime = Arc::new(CliRuntime::new(args.fn_runtime));
    let config = args.into_config();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling function");
            on_interrupt.cancel();
        }
    });

    let mut renderer = Renderer::new(config, runtime, printer);
    let outcome = renderer
        .execute(&cancel)
        .await
        .context("fn render failed")?;

    info!(
        resources = outcome.resources,
        destination = %outcome.destination,
        "render complete"
    );
    Ok(())
}

/// Render the error chain, shortening a failed function's stderr when asked.
fn format_error(err: &anyhow::Error, truncate: bool) -> String {
    if truncate {
        if let Some(RenderError::Function {
            source:
                FnError::FunctionExecutionFailed {
                    function,
                    exit_code,
                    stderr,
                },
            ..
        }) = err.downcast_ref::<RenderError>()
        {
            return format!(
                "function {function} failed with exit code {exit_code}:\n{}",
                truncate_output(stderr, TRUNCATE_LIMIT)
            );
        }
    }
    format!("{err:#}")
}
