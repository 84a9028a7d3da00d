use anyhow::Result;
use clap::{Parser, Subcommand};
use relay::commands::{admin, dispatch, engine, init, queue, report, session, status, sync};

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Durable task queue and automation engine CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the .relay/ data directory
    Init,

    /// Show queue, sync, lock, and telemetry state
    Status,

    /// Add a task to the queue
    Enqueue {
        /// Opaque work description passed verbatim to the capability
        description: String,

        /// Batch id for entries sharing setup context
        #[arg(short, long)]
        batch: Option<String>,

        /// Explicit entry id (defaults to a fresh UUID)
        #[arg(long)]
        id: Option<String>,
    },

    /// Show one queue entry's full record
    Show {
        /// Entry id
        id: String,
    },

    /// Cancel a live queue entry
    Cancel {
        /// Entry id
        id: String,
    },

    /// Return a failed entry to the queue
    Reset {
        /// Entry id
        id: String,
    },

    /// Start a drain session if work is eligible and none is running
    Dispatch {
        /// Keep polling the queue instead of checking once
        #[arg(short, long)]
        watch: bool,

        /// Drain in this process instead of spawning a session
        #[arg(short, long)]
        foreground: bool,
    },

    /// Internal: drain the queue under an already-acquired lock
    #[command(hide = true)]
    Session {
        /// Holder token stamped into the lock by the dispatcher
        #[arg(long)]
        holder: String,

        /// Restrict the session to one batch
        #[arg(long)]
        batch: Option<String>,
    },

    /// Run the automation engine loop
    Engine {
        /// Perform a single tick and exit
        #[arg(long)]
        once: bool,
    },

    /// Manage document synchronization
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },

    /// Build the telemetry anomaly report
    Report {
        /// Emit JSON instead of markdown
        #[arg(long)]
        json: bool,

        /// Show per-signature statistics instead of anomalies
        #[arg(long)]
        stats: bool,
    },

    /// Maintenance operations
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
}

#[derive(Subcommand)]
enum SyncCommands {
    /// Queue a document for synchronization
    Add {
        /// Remote document title
        title: String,

        /// Source file, relative to the current directory
        file: String,

        /// Remote collection id
        collection: String,

        /// Explicit entry key (defaults to a fresh UUID)
        #[arg(long)]
        key: Option<String>,
    },

    /// Process all pending sync entries now
    Run,

    /// Return an errored entry to the pending pool
    Requeue {
        /// Entry key
        key: String,
    },

    /// List sync entries
    List,
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Return long-stuck in-progress entries to queued
    ResetStuck,

    /// Archive terminal entries older than the given age
    Archive {
        /// Minimum age in minutes
        #[arg(long, default_value = "1440")]
        older_than_mins: u64,
    },

    /// Remove the session lock regardless of holder
    ForceReleaseLock,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => init::execute(),
        Commands::Status => status::execute(),
        Commands::Enqueue {
            description,
            batch,
            id,
        } => queue::enqueue(description, batch, id),
        Commands::Show { id } => queue::show(id),
        Commands::Cancel { id } => queue::cancel(id),
        Commands::Reset { id } => queue::reset(id),
        Commands::Dispatch { watch, foreground } => dispatch::execute(watch, foreground),
        Commands::Session { holder, batch } => session::execute(holder, batch),
        Commands::Engine { once } => engine::execute(once),
        Commands::Sync { command } => match command {
            SyncCommands::Add {
                title,
                file,
                collection,
                key,
            } => sync::add(title, file, collection, key),
            SyncCommands::Run => sync::run(),
            SyncCommands::Requeue { key } => sync::requeue(key),
            SyncCommands::List => sync::list(),
        },
        Commands::Report { json, stats } => report::execute(json, stats),
        Commands::Admin { command } => match command {
            AdminCommands::ResetStuck => admin::reset_stuck(),
            AdminCommands::Archive { older_than_mins } => admin::archive(older_than_mins),
            AdminCommands::ForceReleaseLock => admin::force_release_lock(),
        },
    }
}
