//! fs-snapshot - Temporary read-only filesystem snapshots
//!
//! Usage:
//!   fs-snapshot provider list [ID]      - List snapshot providers
//!   fs-snapshot list [ID]               - List snapshots
//!   fs-snapshot set list [ID]           - List snapshot sets
//!   fs-snapshot delete ID [--force]     - Delete a snapshot
//!   fs-snapshot set delete ID [--force] - Delete a snapshot set
//!   fs-snapshot backup DIR...           - Snapshot directories, print the mapping, release
//!   fs-snapshot server start            - Run the snapshot server
//!   fs-snapshot enable test             - Check whether snapshots can be created

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fs_snapshot::{
    backup::Backuper,
    config::{parse_endpoint, Config},
    info::{tracing_callback, InfoCallback, MessageLevel},
    launch,
    model::Snapshot,
    rpc::Server,
    snapshoter::{new_local_snapshoter, new_snapshoter, NullSnapshoter, Snapshoter},
};

#[derive(Parser)]
#[command(name = "fs-snapshot")]
#[command(version)]
#[command(about = "Temporary read-only filesystem snapshots for backups")]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v details, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Snapshot providers
    #[command(subcommand)]
    Provider(ProviderCommands),

    /// List snapshots
    List {
        /// Full or short snapshot id
        id: Option<String>,
    },

    /// Snapshot sets
    #[command(subcommand)]
    Set(SetCommands),

    /// Delete a snapshot
    Delete {
        /// Full or short snapshot id
        id: String,

        /// Delete even if the snapshot is still in use
        #[arg(long)]
        force: bool,
    },

    /// Create snapshots for directories, print where they can be read, then release them
    Backup {
        /// Directories to snapshot
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },

    /// Snapshot server
    #[command(subcommand)]
    Server(ServerCommands),

    /// Privileges for creating snapshots
    #[command(subcommand)]
    Enable(EnableCommands),
}

#[derive(Subcommand)]
enum ProviderCommands {
    /// List snapshot providers
    List {
        /// Full or short provider id
        id: Option<String>,
    },
}

#[derive(Subcommand)]
enum SetCommands {
    /// List snapshot sets
    List {
        /// Full or short set id
        id: Option<String>,
    },

    /// Delete a snapshot set
    Delete {
        /// Full or short set id
        id: String,

        /// Delete even if the set is still in use
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum ServerCommands {
    /// Run the snapshot server in the foreground
    Start {
        /// Address to listen on (host:port)
        #[arg(long)]
        bind: Option<String>,

        /// Stop after this many idle seconds (0 = never)
        #[arg(long)]
        inactivity: Option<u64>,

        /// Serve even if snapshots can't be created here
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum EnableCommands {
    /// Check whether the current user can create snapshots
    Test,
}

fn main() {
    let cli = Cli::parse();

    // Setup logging
    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    if let Err(e) = run(cli) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading configuration from {:?}", config_path))?;

    let info = cli_callback();

    match cli.command {
        Commands::Provider(ProviderCommands::List { id }) => {
            with_snapshoter(&config, &info, |s| {
                for p in s.list_providers(id.as_deref().unwrap_or_default())? {
                    println!(
                        "{}\t{}\t{}\t{}",
                        s.simplify_id(&p.id),
                        p.name,
                        p.version,
                        p.provider_type
                    );
                }
                Ok(())
            })
        }

        Commands::List { id } => with_snapshoter(&config, &info, |s| {
            for snapshot in s.list_snapshots(id.as_deref().unwrap_or_default())? {
                print_snapshot(s, &snapshot, "");
            }
            Ok(())
        }),

        Commands::Set(SetCommands::List { id }) => with_snapshoter(&config, &info, |s| {
            for set in s.list_sets(id.as_deref().unwrap_or_default())? {
                println!(
                    "{}\t{}\t{} snapshot(s)",
                    s.simplify_id(set.id()),
                    set.creation_time().to_rfc3339(),
                    set.snapshots.len()
                );
                for snapshot in &set.snapshots {
                    print_snapshot(s, snapshot, "  ");
                }
            }
            Ok(())
        }),

        Commands::Delete { id, force } => with_snapshoter(&config, &info, |s| {
            if s.delete_snapshot(&id, force)? {
                println!("Deleted snapshot {}", id);
            } else {
                println!("Snapshot {} not found", id);
            }
            Ok(())
        }),

        Commands::Set(SetCommands::Delete { id, force }) => with_snapshoter(&config, &info, |s| {
            if s.delete_set(&id, force)? {
                println!("Deleted snapshot set {}", id);
            } else {
                println!("Snapshot set {} not found", id);
            }
            Ok(())
        }),

        Commands::Backup { dirs } => with_snapshoter(&config, &info, |s| {
            let backuper = s.start_backup(config.backup_config())?;

            for dir in &dirs {
                match backuper.try_to_create_temporary_snapshot(dir) {
                    Ok(path) => println!("{} -> {}", dir.display(), path.display()),
                    Err(e) => warn!("{}: {}", dir.display(), e),
                }
            }

            for (original, snapshot) in backuper.list_snapshoted_directories() {
                info!("Snapshoted {} at {}", original, snapshot);
            }

            backuper.close();
            Ok(())
        }),

        Commands::Server(ServerCommands::Start {
            bind,
            inactivity,
            force,
        }) => cmd_server_start(config, info, bind, inactivity, force),

        Commands::Enable(EnableCommands::Test) => {
            let can = launch::current_user_can_create_snapshots(&config.snapshoter_config(info))?;
            if can {
                println!("The current user can create snapshots");
            } else {
                println!("The current user can't create snapshots");
            }
            Ok(())
        }
    }
}

/// Output goes to stdout, everything else to the log
fn cli_callback() -> InfoCallback {
    let log = tracing_callback();
    Arc::new(move |level, msg| match level {
        MessageLevel::Output => println!("{}", msg),
        _ => log(level, msg),
    })
}

fn with_snapshoter(
    config: &Config,
    info: &InfoCallback,
    f: impl FnOnce(&dyn Snapshoter) -> fs_snapshot::Result<()>,
) -> anyhow::Result<()> {
    let snapshoter = new_snapshoter(&config.snapshoter_config(info.clone()))
        .context("no snapshoter available")?;

    let result = f(snapshoter.as_ref());
    snapshoter.close();
    Ok(result?)
}

fn print_snapshot(s: &dyn Snapshoter, snapshot: &Snapshot, indent: &str) {
    println!(
        "{}{}\t{}\t{}\t{}",
        indent,
        s.simplify_id(&snapshot.id),
        snapshot.creation_time.to_rfc3339(),
        snapshot.original_path,
        snapshot.snapshot_path
    );
}

fn cmd_server_start(
    mut config: Config,
    info: InfoCallback,
    bind: Option<String>,
    inactivity: Option<u64>,
    force: bool,
) -> anyhow::Result<()> {
    if let Some(bind) = bind {
        let (host, port) = parse_endpoint(&bind)?;
        config.server.host = host;
        config.server.port = port;
    }
    if let Some(secs) = inactivity {
        config.server.inactivity_secs = secs;
    }

    let snapshoter: Arc<dyn Snapshoter> = match new_local_snapshoter(info.clone()) {
        Ok(s) => Arc::from(s),
        Err(e) if force => {
            warn!("Can't create snapshots ({}), serving without them", e);
            Arc::new(NullSnapshoter)
        }
        Err(e) => {
            return Err(anyhow::Error::new(e).context("can't create snapshots in this process"))
        }
    };

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    let result = runtime.block_on(async {
        let server = Server::bind(snapshoter.clone(), config.rpc_server_config(info)).await?;
        info!("Snapshot server listening on {}", server.local_addr()?);
        server.serve().await
    });

    snapshoter.close();
    info!("Snapshot server stopped");
    Ok(result?)
}
