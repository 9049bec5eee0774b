//! stx CLI: drive CUE-defined CloudFormation stacks.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "stx",
    version,
    about = "Evaluate CUE stacks and export, save or inspect them in CloudFormation"
)]
struct Cli {
    #[command(flatten)]
    flags: stx::cli::GlobalFlags,

    /// Debug logging (overridden by STX_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: stx::cli::Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STX_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    if let Err(e) = stx::cli::dispatch(cli.command, cli.flags.into()).await {
        eprintln!("{} {}", console::style("error:").red().bold(), e);
        std::process::exit(1);
    }
}
