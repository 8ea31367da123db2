use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use duet::{
    reveal::{combine, AttributionShares, Output, RevealMode},
    rules::AttributionRule,
    Event, Role,
};
use duet_tcp::SessionConfig;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs an attribution session with the other party.
    Run(RunArgs),
    /// Reconstructs the results from the persisted shares of both parties.
    Reveal {
        #[arg(value_parser, help = "Path to the shares of one party")]
        shares_a: PathBuf,

        #[arg(value_parser, help = "Path to the shares of the other party")]
        shares_b: PathBuf,

        #[arg(long, help = "Write the results to this file instead of stdout")]
        output: Option<PathBuf>,
    },
}

/// Command line flags, overriding the configuration file and the environment.
#[derive(Args, Debug, Serialize)]
struct RunArgs {
    #[arg(long, help = "Path to a TOML configuration file")]
    #[serde(skip)]
    config: Option<PathBuf>,

    #[arg(long, help = "Path to a JSON array with the events of this party")]
    #[serde(skip)]
    input: PathBuf,

    #[arg(long, help = "Write the results or shares to this file instead of stdout")]
    #[serde(skip)]
    output: Option<PathBuf>,

    #[arg(long, help = "Role of this party: publisher or partner")]
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<Role>,

    #[arg(long, help = "Bind address of the publisher, connect address of the partner")]
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,

    #[arg(long, help = "Attribution rule, e.g. last_click_1d or last_touch_7d")]
    #[serde(skip_serializing_if = "Option::is_none")]
    rule: Option<AttributionRule>,

    #[arg(long = "reveal", help = "Reveal mode: immediate or deferred")]
    #[serde(rename = "reveal_mode", skip_serializing_if = "Option::is_none")]
    reveal_mode: Option<RevealMode>,

    #[arg(long, help = "Number of touchpoints agreed with the other party")]
    #[serde(skip_serializing_if = "Option::is_none")]
    touchpoints: Option<usize>,

    #[arg(long, help = "Number of conversions agreed with the other party")]
    #[serde(skip_serializing_if = "Option::is_none")]
    conversions: Option<usize>,

    #[arg(long, help = "Seconds to wait for the other party")]
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("DUET_LOG"))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Run(args) => run(args).await,
        Command::Reveal {
            shares_a,
            shares_b,
            output,
        } => reveal(&shares_a, &shares_b, output.as_deref()),
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = SessionConfig::load(args.config.as_deref(), &args)
        .context("Invalid session configuration")?;

    let events = fs::read_to_string(&args.input)
        .with_context(|| format!("Could not read file `{}`", args.input.display()))?;
    let events: Vec<Event> = serde_json::from_str(&events)
        .with_context(|| format!("`{}` is not a JSON array of events", args.input.display()))?;

    info!(role = %config.role, address = %config.address, "starting session");
    let outcome = duet_tcp::run(config, events)
        .await
        .context("Attribution session failed")?;

    let json = match &outcome.output {
        Output::Revealed(results) => serde_json::to_string_pretty(results)?,
        Output::Deferred(shares) => serde_json::to_string_pretty(shares)?,
    };
    write_output(args.output.as_deref(), &json)
}

fn reveal(shares_a: &Path, shares_b: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let a = read_shares(shares_a)?;
    let b = read_shares(shares_b)?;
    if a.role == b.role {
        bail!("Both files contain the shares of the {}", a.role);
    }
    let results = combine(&a, &b).context("The shares cannot be combined")?;
    write_output(output, &serde_json::to_string_pretty(&results)?)
}

fn read_shares(path: &Path) -> anyhow::Result<AttributionShares> {
    let shares = fs::read_to_string(path)
        .with_context(|| format!("Could not read file `{}`", path.display()))?;
    serde_json::from_str(&shares)
        .with_context(|| format!("`{}` does not contain attribution shares", path.display()))
}

fn write_output(path: Option<&Path>, json: &str) -> anyhow::Result<()> {
    match path {
        Some(path) => fs::write(path, json)
            .with_context(|| format!("Could not write file `{}`", path.display())),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}
