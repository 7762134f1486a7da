use std::path::PathBuf;

use clap::Parser;
use memscreen_server::supervisor::{shutdown_signal, BootOptions, Supervisor};
use tracing::error;

/// Local, always-on visual memory daemon: capture → persistence → indexing
/// → query, served over a stable localhost HTTP API (§6).
#[derive(Parser, Debug)]
#[command(name = "memscreen-server", version, about)]
struct Cli {
    /// Address the HTTP API binds to, overriding `api_bind` in config.toml.
    #[arg(long)]
    bind: Option<String>,

    /// Per-user data root, overriding the `<home>/.memscreen` default.
    #[arg(long, value_name = "DIR")]
    data_root: Option<PathBuf>,

    /// Base URL of the model runtime, overriding `runtime_base_url`.
    #[arg(long, value_name = "URL")]
    runtime_url: Option<String>,

    /// Path to a bundled model-runtime binary to spawn if the configured
    /// runtime is unreachable at boot. Falls back to `ollama` on PATH.
    #[arg(long, value_name = "PATH")]
    runtime_bin: Option<PathBuf>,

    /// Raise the default log level to debug.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let opts = BootOptions {
        data_root: cli.data_root,
        bind: cli.bind,
        runtime_url: cli.runtime_url,
        runtime_bin: cli.runtime_bin,
        debug: cli.debug,
    };

    let supervisor = match Supervisor::boot(opts).await {
        Ok(supervisor) => supervisor,
        Err(err) => {
            eprintln!("fatal startup error: {err}");
            return std::process::ExitCode::FAILURE;
        }
    };

    if let Err(err) = supervisor.serve(shutdown_signal()).await {
        error!(error = %err, "server exited with an error");
        return std::process::ExitCode::FAILURE;
    }

    std::process::ExitCode::SUCCESS
}
