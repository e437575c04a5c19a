//! # Scamandrios CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Print the ring behind a seed
//! scamandrios discover 10.0.0.1:9160
//!
//! # Resolve a DNS seed first and try every address it returns
//! scamandrios discover seeds.internal:9160 --resolve-seed
//!
//! # One call through a pool (outputs raw JSON)
//! scamandrios call 10.0.0.1:9160 describe_keyspace '{"keyspace": "events"}' --keyspace events
//!
//! # Per-host pool state
//! scamandrios ring-status 10.0.0.1:9160
//! ```
//!
//! Seeds are `host`, `host:port` or a JSON seed record.

use anyhow::Result;
use argh::FromArgs;
use scamandrios_cli::commands;
use std::path::PathBuf;

#[derive(FromArgs)]
/// Scamandrios - ring discovery and pooled access to a column-store cluster
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Discover(DiscoverArgs),
    Call(CallArgs),
    RingStatus(RingStatusArgs),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "discover")]
/// print the members of the ring behind a seed
struct DiscoverArgs {
    /// seed node, `host[:port]` or a JSON seed record
    #[argh(positional)]
    seed: String,

    /// resolve the seed host through DNS and try every address
    #[argh(switch, short = 'r', long = "resolve-seed")]
    resolve_seed: bool,

    /// keyspace passed along with the ring query
    #[argh(option, short = 'k')]
    keyspace: Option<String>,

    /// path to a JSON connection options file
    #[argh(option, short = 'o')]
    options: Option<PathBuf>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// make one call through a pool built from a seed
struct CallArgs {
    /// seed node, `host[:port]` or a JSON seed record
    #[argh(positional)]
    seed: String,

    /// method to call
    #[argh(positional)]
    method: String,

    /// JSON arguments for the call
    #[argh(positional, default = "\"{}\".into()")]
    args: String,

    /// resolve the seed host through DNS and try every address
    #[argh(switch, short = 'r', long = "resolve-seed")]
    resolve_seed: bool,

    /// keyspace selected on every session
    #[argh(option, short = 'k')]
    keyspace: Option<String>,

    /// path to a JSON connection options file
    #[argh(option, short = 'o')]
    options: Option<PathBuf>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "ring-status")]
/// build a pool from a seed and print the state of every host
struct RingStatusArgs {
    /// seed node, `host[:port]` or a JSON seed record
    #[argh(positional)]
    seed: String,

    /// resolve the seed host through DNS and try every address
    #[argh(switch, short = 'r', long = "resolve-seed")]
    resolve_seed: bool,

    /// keyspace selected on every session
    #[argh(option, short = 'k')]
    keyspace: Option<String>,

    /// path to a JSON connection options file
    #[argh(option, short = 'o')]
    options: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // logs go to stderr so stdout stays pipeable JSON
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let output = match cli.command {
        Commands::Discover(args) => {
            let seed = commands::parse_seed(&args.seed, args.resolve_seed)?;
            let options = commands::load_options(args.options.as_deref(), args.keyspace)?;
            serde_json::to_value(commands::discover(seed, options).await?)?
        }
        Commands::Call(args) => {
            let seed = commands::parse_seed(&args.seed, args.resolve_seed)?;
            let options = commands::load_options(args.options.as_deref(), args.keyspace)?;
            let call_args = commands::parse_args(&args.args)?;
            commands::call(seed, options, &args.method, call_args).await?
        }
        Commands::RingStatus(args) => {
            let seed = commands::parse_seed(&args.seed, args.resolve_seed)?;
            let options = commands::load_options(args.options.as_deref(), args.keyspace)?;
            commands::ring_status(seed, options).await?
        }
    };

    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}
