use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use lmsync_pack::Compression;
use lmsync_types::{AgentId, EventId, FacilityId};

#[derive(Parser)]
#[command(
    name = "lmsync",
    about = "lmsync: offline-first event sync between facilities and the online web",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a fresh agent or server configuration
    Init(InitArgs),
    /// Generate an ed25519 machine key pair
    Keygen,
    /// Issue a machine token from an agent configuration
    Token(AgentArgs),
    /// Register an agent's public key directly in the server registry
    Register(RegisterArgs),
    /// Run the online web server
    Serve(ServeArgs),
    /// Register this agent with the online web and store its key
    Activate(AgentArgs),
    /// Run one sync cycle with the online web, or keep syncing
    Sync(SyncArgs),
    /// Write pending events to a chain of event files
    Export(ExportArgs),
    /// Import event files carried in by hand
    Import(ImportArgs),
    /// Send pending events to the online web as one binary resource
    Upload(AgentArgs),
    /// Fetch the events owed to this facility as one binary resource file
    Download(DownloadArgs),
    /// Print the events inside event files
    Inspect(InspectArgs),
    /// Show the agent's (or the online web's) sync status
    Status(StatusArgs),
    /// Replay stored events that failed before
    Retry(RetryArgs),
    /// Prune confirmed events and compact the journal
    Compact(CompactArgs),
}

#[derive(Args)]
pub struct InitArgs {
    /// Where to write the configuration.
    #[arg(short, long, default_value = "lmsync.toml")]
    pub output: PathBuf,
    /// Write a server configuration instead of an agent one.
    #[arg(long)]
    pub server: bool,
    #[arg(long)]
    pub facility: Option<FacilityId>,
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct AgentArgs {
    #[arg(short, long, default_value = "lmsync.toml")]
    pub config: PathBuf,
}

#[derive(Args)]
pub struct RegisterArgs {
    #[arg(short, long, default_value = "lmsync-server.toml")]
    pub config: PathBuf,
    #[arg(long)]
    pub agent: AgentId,
    #[arg(long)]
    pub facility: FacilityId,
    /// Hex-encoded ed25519 public key.
    #[arg(long)]
    pub public_key: String,
}

#[derive(Args)]
pub struct ServeArgs {
    #[arg(short, long, default_value = "lmsync-server.toml")]
    pub config: PathBuf,
    /// Override the configured bind address.
    #[arg(long)]
    pub bind: Option<String>,
}

#[derive(Args)]
pub struct SyncArgs {
    #[arg(short, long, default_value = "lmsync.toml")]
    pub config: PathBuf,
    /// Keep running, syncing every `sync_interval_secs`.
    #[arg(long)]
    pub watch: bool,
}

#[derive(Args)]
pub struct ExportArgs {
    #[arg(short, long, default_value = "lmsync.toml")]
    pub config: PathBuf,
    /// Directory for the event files.
    #[arg(short, long)]
    pub out: PathBuf,
}

#[derive(Args)]
pub struct ImportArgs {
    #[arg(short, long, default_value = "lmsync.toml")]
    pub config: PathBuf,
    /// Event files, in chain order.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
    /// Compression of the files; defaults to the configured one.
    #[arg(long)]
    pub compression: Option<Compression>,
}

#[derive(Args)]
pub struct DownloadArgs {
    #[arg(short, long, default_value = "lmsync.toml")]
    pub config: PathBuf,
    /// File to write the resource to.
    #[arg(short, long)]
    pub out: PathBuf,
}

#[derive(Args)]
pub struct StatusArgs {
    #[arg(short, long, default_value = "lmsync.toml")]
    pub config: PathBuf,
    /// The configuration is a server one: show the online web's status.
    #[arg(long)]
    pub server: bool,
    /// Ask this running server instead of the configured bind address.
    #[arg(long)]
    pub url: Option<String>,
}

#[derive(Args)]
pub struct InspectArgs {
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
    #[arg(long, default_value = "none")]
    pub compression: Compression,
    /// Print payload bodies too.
    #[arg(long)]
    pub payloads: bool,
}

#[derive(Args)]
pub struct RetryArgs {
    #[arg(short, long, default_value = "lmsync.toml")]
    pub config: PathBuf,
    /// Replay this event even if it was replayed before.
    #[arg(long)]
    pub event: Option<EventId>,
}

#[derive(Args)]
pub struct CompactArgs {
    #[arg(short, long, default_value = "lmsync.toml")]
    pub config: PathBuf,
    /// The configuration is a server one.
    #[arg(long)]
    pub server: bool,
}
