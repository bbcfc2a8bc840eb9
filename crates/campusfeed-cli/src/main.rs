//! Campus Feed CLI
//!
//! Drives a scripted sync session against the in-memory platform and prints
//! the resulting cache state.
//!
//! ## Usage
//!
//! ```bash
//! # Seed a feed, toggle two bookmarks, push an urgent announcement
//! campusfeed simulate --announcements 6 --toggles 2
//!
//! # Same, with a failed toggle, a redelivered push and a transport drop
//! campusfeed simulate --fail-toggle --duplicate --drop-transport
//!
//! # Print the effective configuration
//! campusfeed --config sync.json config
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use campusfeed_core::{
    Announcement, AnnouncementFilter, Category, FeedSession, GatewayError, GatewayOp,
    MemoryGateway, Priority, SyncConfig, SyncEvent, UserId,
};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;

/// How long to wait for the listener to report progress
const EVENT_WAIT: Duration = Duration::from_secs(30);

/// Campus Feed - announcement, bookmark and notification sync
#[derive(Parser)]
#[command(name = "campusfeed")]
#[command(version)]
#[command(about = "Campus Feed - announcement, bookmark and notification sync")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Sync configuration file (JSON); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted session against the in-memory platform
    Simulate {
        /// Signed-in user id
        #[arg(short, long, default_value = "student-1")]
        user: String,

        /// Announcements to seed, cycling through every category
        #[arg(short, long, default_value_t = 5)]
        announcements: usize,

        /// Bookmark toggles to issue, walking the feed newest first
        #[arg(short, long, default_value_t = 2)]
        toggles: usize,

        /// Make the first bookmark creation fail
        #[arg(long)]
        fail_toggle: bool,

        /// Redeliver the pushed notification once
        #[arg(long)]
        duplicate: bool,

        /// Drop the push transport and wait for the listener to recover
        #[arg(long)]
        drop_transport: bool,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Simulate {
            user,
            announcements,
            toggles,
            fail_toggle,
            duplicate,
            drop_transport,
        } => {
            let script = Script {
                user: UserId::from(user),
                announcements,
                toggles,
                fail_toggle,
                duplicate,
                drop_transport,
            };
            simulate(config, script).await?;
        }

        Commands::Config => {
            println!("{}", config.to_json()?);
        }
    }

    Ok(())
}

struct Script {
    user: UserId,
    announcements: usize,
    toggles: usize,
    fail_toggle: bool,
    duplicate: bool,
    drop_transport: bool,
}

async fn simulate(config: SyncConfig, script: Script) -> Result<()> {
    if script.announcements == 0 && script.toggles > 0 {
        bail!("--toggles needs at least one announcement to bookmark");
    }

    let gateway = Arc::new(MemoryGateway::new());
    seed_announcements(&gateway, script.announcements);

    let session = FeedSession::new(script.user.clone(), gateway.clone(), config)?;
    let mut events = session.subscribe_events();
    session.start().await?;
    wait_for(&mut events, |e| matches!(e, SyncEvent::Reconciled { .. }))
        .await
        .context("push listener never reconciled")?;

    let feed = session.feed_filter();
    session.refresh_announcements(feed.clone()).await?;
    let feed_ids: Vec<_> = session
        .announcements(&feed)
        .and_then(|s| {
            s.value
                .as_announcements()
                .map(|items| items.iter().map(|a| a.id.clone()).collect())
        })
        .unwrap_or_default();

    if script.fail_toggle {
        gateway.fail_next(
            GatewayOp::CreateBookmark,
            GatewayError::Transport("simulated outage".to_string()),
        );
    }

    let mut rolled_back = 0;
    for i in 0..script.toggles {
        let Some(id) = feed_ids.get(i % feed_ids.len().max(1)) else {
            break;
        };
        match session.toggle_bookmark(id).await {
            Ok(outcome) => {
                let verb = if outcome.bookmarked { "Bookmarked" } else { "Unbookmarked" };
                println!("{} {}", verb, id);
            }
            Err(e) => {
                rolled_back += 1;
                println!("Toggle failed: {}", e.user_message());
            }
        }
    }

    let urgent = Announcement::new(
        "Campus closed today",
        Category::Urgent,
        "Administration",
        UserId::new(),
    )
    .with_priority(Priority::Urgent);
    let pushed = gateway.publish_announcement(urgent, std::slice::from_ref(&script.user));
    wait_for(&mut events, |e| matches!(e, SyncEvent::NotificationFolded { .. }))
        .await
        .context("pushed notification never arrived")?;

    if script.duplicate {
        for notification in &pushed {
            gateway.redeliver(notification);
        }
        wait_for(&mut events, |e| {
            matches!(e, SyncEvent::NotificationFolded { duplicate: true, .. })
        })
        .await
        .context("redelivered notification never arrived")?;
        println!("Duplicate push dropped");
    }

    if script.drop_transport {
        gateway.drop_streams(&script.user);
        wait_for(&mut events, |e| matches!(e, SyncEvent::Reconciled { .. }))
            .await
            .context("push listener never recovered")?;
        println!("Transport recovered");
    }

    print_summary(&session, &feed, rolled_back);
    session.sign_out().await;
    Ok(())
}

fn seed_announcements(gateway: &MemoryGateway, count: usize) {
    let author = UserId::new();
    for (i, category) in Category::ALL.iter().cycle().take(count).enumerate() {
        let priority = if *category == Category::Urgent {
            Priority::Urgent
        } else {
            Priority::Medium
        };
        gateway.insert_announcement(
            Announcement::new(
                format!("{} update #{}", category, i + 1),
                *category,
                "Campus Communications",
                author.clone(),
            )
            .with_priority(priority),
        );
    }
}

fn print_summary(session: &FeedSession, feed: &AnnouncementFilter, rolled_back: usize) {
    let announcements = session
        .announcements(feed)
        .map(|s| s.value.len())
        .unwrap_or(0);
    let notifications = session
        .notifications()
        .map(|s| s.value.len())
        .unwrap_or(0);

    println!();
    println!("Session: {}", session.user_id());
    println!("  Announcements: {}", announcements);
    println!("  Bookmarks: {}", session.bookmark_count());
    println!(
        "  Notifications: {} ({} unread)",
        notifications,
        session.unread_count()
    );
    println!("  Rolled back: {}", rolled_back);
    println!("  Listener: {}", session.listener_state());
}

/// Wait until an event matches, or fail after [`EVENT_WAIT`]
async fn wait_for(
    events: &mut broadcast::Receiver<SyncEvent>,
    done: impl Fn(&SyncEvent) -> bool,
) -> Result<SyncEvent> {
    tokio::time::timeout(EVENT_WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if done(&event) => return Ok(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event receiver lagged, missed {} events", n);
                }
                Err(e) => return Err(anyhow::Error::from(e)),
            }
        }
    })
    .await
    .context("timed out waiting for sync event")?
}

fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    let config = match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            SyncConfig::from_json(&json)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => SyncConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Setup logging based on verbosity level
fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}
