//! Hippo CLI - episodic memory from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Open an episode for a session
//! hippo begin --session s1 --name "fix flaky test"
//!
//! # Record messages while it runs
//! hippo record --session s1 --role user --content "the CI job times out"
//!
//! # Pull in a transcript written by another tool
//! hippo import --session s1 --conversation cursor-42 --file ./transcript.jsonl
//!
//! # Close it and capture experiences
//! hippo complete <episode-id>
//! ```

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use hippo_core::config::HippoConfig;
use hippo_core::types::{Role, ScopeType};
use hippo_memory::EpisodicMemory;
use output::OutputFormat;
use std::path::PathBuf;
use std::process;
use tracing::debug;

#[derive(Parser)]
#[command(name = "hippo")]
#[command(about = "Hippo - Episodic memory for agent sessions", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format (human, json)
    #[arg(long, global = true, default_value = "human")]
    format: OutputFormatArg,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormatArg {
    Human,
    Json,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Human => OutputFormat::Human,
            OutputFormatArg::Json => OutputFormat::Json,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScopeArg {
    Session,
    Project,
    Global,
}

impl From<ScopeArg> for ScopeType {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::Session => ScopeType::Session,
            ScopeArg::Project => ScopeType::Project,
            ScopeArg::Global => ScopeType::Global,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RoleArg {
    User,
    Assistant,
    System,
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::User => Role::User,
            RoleArg::Assistant => Role::Assistant,
            RoleArg::System => Role::System,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Begin a new episode for a session
    Begin {
        /// Session that owns the episode
        #[arg(short, long)]
        session: String,

        /// Scope of the episode (defaults to the session)
        #[arg(long, value_enum)]
        scope: Option<ScopeArg>,

        /// Explicit scope identifier (project name for project scope)
        #[arg(long)]
        scope_id: Option<String>,

        /// Episode name
        #[arg(short, long, default_value = "")]
        name: String,
    },

    /// Complete an episode and capture its experiences
    Complete {
        /// Episode ID
        id: String,
    },

    /// Mark an episode as failed
    Fail {
        /// Episode ID
        id: String,

        /// Why the episode failed
        #[arg(short, long)]
        reason: String,
    },

    /// Cancel an episode
    Cancel {
        /// Episode ID
        id: String,
    },

    /// Show the active episode for a session
    Active {
        #[arg(short, long)]
        session: String,
    },

    /// List episodes
    List {
        #[arg(short, long)]
        session: Option<String>,

        #[arg(long, value_enum)]
        scope: Option<ScopeArg>,

        #[arg(long)]
        scope_id: Option<String>,
    },

    /// Record a message from the live session
    Record {
        #[arg(short, long)]
        session: String,

        /// Conversation identifier (defaults to the session)
        #[arg(long)]
        conversation: Option<String>,

        #[arg(short, long, value_enum, default_value = "user")]
        role: RoleArg,

        #[arg(long)]
        content: String,

        /// Override the message timestamp
        #[arg(long)]
        created_at: Option<String>,
    },

    /// Import a JSONL transcript and link it by time range
    Import {
        #[arg(short, long)]
        session: String,

        /// Conversation identifier (defaults to the session)
        #[arg(long)]
        conversation: Option<String>,

        /// Transcript file (one JSON record per line)
        #[arg(short, long)]
        file: PathBuf,

        /// Name of the tool that wrote the transcript
        #[arg(long)]
        source: Option<String>,
    },

    /// Show messages linked to an episode
    Messages {
        /// Episode ID
        id: String,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        output::error(format!("{:#}", e));
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let format = OutputFormat::from(cli.format);

    // config commands run without opening storage
    if let Commands::Config(config_cmd) = &cli.command {
        return match config_cmd {
            ConfigCommands::Show => {
                commands::config_show(&load_config(&cli.config).await?, format)
            }
            ConfigCommands::Init { force } => {
                commands::config_init(cli.config.clone(), *force).await
            }
        };
    }

    let config = load_config(&cli.config).await?;
    debug!(backend = %config.database.backend, "Opening episodic memory");
    let memory = EpisodicMemory::from_config(&config).await?;

    match cli.command {
        Commands::Begin {
            session,
            scope,
            scope_id,
            name,
        } => {
            commands::begin(&memory, &session, scope.map(Into::into), scope_id, name, format)
                .await?;
        }
        Commands::Complete { id } => commands::complete(&memory, &id, format).await?,
        Commands::Fail { id, reason } => commands::fail(&memory, &id, reason, format).await?,
        Commands::Cancel { id } => commands::cancel(&memory, &id, format).await?,
        Commands::Active { session } => commands::active(&memory, &session, format).await?,
        Commands::List {
            session,
            scope,
            scope_id,
        } => {
            commands::list(&memory, session, scope.map(Into::into), scope_id, format).await?;
        }
        Commands::Record {
            session,
            conversation,
            role,
            content,
            created_at,
        } => {
            commands::record(
                &memory,
                &session,
                conversation,
                role.into(),
                content,
                created_at,
                format,
            )
            .await?;
        }
        Commands::Import {
            session,
            conversation,
            file,
            source,
        } => {
            commands::import(&memory, &session, conversation, &file, source, format).await?;
        }
        Commands::Messages { id } => commands::messages(&memory, &id, format).await?,
        Commands::Config(_) => {}
    }

    Ok(())
}

async fn load_config(path: &Option<PathBuf>) -> Result<HippoConfig> {
    let config = match path {
        Some(path) => HippoConfig::load_from_path(path).await?,
        None => HippoConfig::load_or_create_default().await?,
    };
    Ok(config)
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = if verbose {
        EnvFilter::new("hippo=debug,hippo_memory=debug,hippo_storage=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("hippo=info,hippo_memory=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
