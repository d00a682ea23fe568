use clap::Parser;

/// Smoke-test a remote backend by running a fixed list of HTTP probes
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Probe plan to run. When omitted the built-in backend plan is used
    #[arg(short, long)]
    pub path: Option<String>,

    /// Override the base URL from the probe plan, e.g. http://127.0.0.1:8000
    #[arg(short, long)]
    pub base_url: Option<String>,

    /// Print debug diagnostics (request dispatch, timings) to stderr
    #[arg(short, long)]
    pub verbose: bool,
}
