mod commands;
mod config;

use boxdraw_core::SqliteStore;
use boxdraw_lottery::{ChannelStateMachine, LotteryError};
use clap::{Parser, Subcommand};
use config::CliConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "boxdraw")]
#[command(about = "Box-draw lottery: claim a box, let the admin draw the order")]
#[command(version)]
struct Cli {
    /// Data directory for the shared channel database
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// User id to act as (a random one is generated when omitted)
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a channel and become its admin
    Create {
        /// Channel name
        name: String,
        /// Number of boxes (and maximum number of members)
        #[arg(short, long, default_value_t = 4)]
        max_users: u32,
        /// Display name shown to other members
        #[arg(short, long)]
        name_as: Option<String>,
    },
    /// List channels, newest first
    List,
    /// Join an existing channel
    Join {
        channel_id: String,
        /// Display name shown to other members
        #[arg(short, long)]
        name_as: Option<String>,
    },
    /// Claim a box
    Select { channel_id: String, box_index: u32 },
    /// Give back your box
    Release { channel_id: String },
    /// Draw the order of the claimed boxes (admin)
    Draw { channel_id: String },
    /// Clear boxes and results for another round (admin)
    Reset { channel_id: String },
    /// Show a channel
    Status { channel_id: String },
    /// Follow a channel's updates until interrupted
    Watch { channel_id: String },
    /// Delete a channel (admin)
    Delete {
        channel_id: String,
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = CliConfig {
        user: cli.user,
        verbose: cli.verbose,
        ..Default::default()
    };
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_filter()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Ensure data directory exists
    tokio::fs::create_dir_all(&config.data_dir).await?;

    tracing::debug!("Opening channel store at {:?}", config.db_path());
    let store = SqliteStore::open(&config.db_path(), &config.lottery).await?;
    let identity = config.identity();
    if config.user.is_none() {
        eprintln!(
            "Acting as {} (pass --user {} to keep this identity)",
            identity.user_id(),
            identity.user_id()
        );
    }
    let machine = ChannelStateMachine::new(Arc::new(store), identity, config.lottery.clone());

    // Execute command
    let result = match cli.command {
        Commands::Create {
            name,
            max_users,
            name_as,
        } => commands::create_channel(&machine, &name, max_users, name_as.as_deref()).await,
        Commands::List => commands::list_channels(&machine).await,
        Commands::Join {
            channel_id,
            name_as,
        } => commands::join_channel(&machine, &channel_id, name_as.as_deref()).await,
        Commands::Select {
            channel_id,
            box_index,
        } => commands::select_box(&machine, &channel_id, box_index).await,
        Commands::Release { channel_id } => commands::release_box(&machine, &channel_id).await,
        Commands::Draw { channel_id } => commands::draw(&machine, &channel_id).await,
        Commands::Reset { channel_id } => commands::reset(&machine, &channel_id).await,
        Commands::Status { channel_id } => commands::show_status(&machine, &channel_id).await,
        Commands::Watch { channel_id } => commands::watch(&machine, &channel_id).await,
        Commands::Delete { channel_id, force } => {
            commands::delete_channel(&machine, &channel_id, force).await
        }
    };

    if let Err(e) = result {
        match e {
            LotteryError::ChannelNotFound(id) => {
                eprintln!("Error: Channel '{}' not found", id);
                eprintln!("Use 'boxdraw list' to see available channels");
            }
            LotteryError::NotAMember(user) => {
                eprintln!("Error: {} is not a member of this channel", user);
                eprintln!("Join first with: boxdraw --user {} join <channel-id>", user);
            }
            LotteryError::Unauthorized => {
                eprintln!("Error: Only the channel admin can do that");
                eprintln!("Pass the admin's id with --user");
            }
            LotteryError::CapacityExceeded { max_users } => {
                eprintln!("Error: Channel is full");
                eprintln!("All {} places are taken", max_users);
            }
            e if e.is_rejection() => {
                eprintln!("Rejected: {}", e);
            }
            _ => {
                eprintln!("Error: {}", e);
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
