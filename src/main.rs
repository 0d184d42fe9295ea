//! FitSync command-line client
//!
//! Drives the sync stores against the configured backend.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fitsync::chat::ChatEvent;
use fitsync::export::ExportDocument;
use fitsync::storage::config::{self, AppConfig, ENV_ACCESS_TOKEN};
use fitsync::storage::open_snapshot_store;
use fitsync::{ChatFeedStore, ExportClient, HttpGateway, WorkoutStore};

#[derive(Parser)]
#[command(name = "fitsync")]
#[command(about = "Workout tracker sync client", version)]
struct Cli {
    /// Configuration file (defaults to the platform data directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List a user's workouts with their exercises
    Workouts {
        #[arg(short, long)]
        user: String,
    },
    /// Print the latest chat messages
    Chat {
        /// Keep printing new messages until interrupted
        #[arg(short, long)]
        follow: bool,
    },
    /// Post a chat message
    Send {
        #[arg(short, long)]
        user: String,
        #[arg(short = 'n', long)]
        username: String,
        message: String,
    },
    /// Export workouts
    Export {
        /// Export only this workout
        #[arg(short, long)]
        workout: Option<i64>,
        /// Build the export file locally for this user instead of on the backend
        #[arg(long)]
        local: Option<String>,
        /// Output directory for local exports
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Show today's workout activity
    Report,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let app_config = load(cli.config.as_deref())?;
    tracing::info!(
        "Starting FitSync v{} against {}",
        env!("CARGO_PKG_VERSION"),
        app_config.backend.url
    );

    let gateway = Arc::new(HttpGateway::new(&app_config.backend, &app_config.sync)?);
    if let Some(token) = std::env::var(ENV_ACCESS_TOKEN).ok().filter(|t| !t.is_empty()) {
        gateway.set_access_token(token);
    }

    match cli.command {
        Command::Workouts { user } => {
            let snapshots =
                open_snapshot_store(&app_config.persistence, app_config.data_dir.clone());
            let store = WorkoutStore::new(gateway, snapshots, &app_config.sync);
            for workout in store.fetch_workouts(&user).await? {
                println!(
                    "#{} {} ({} exercises)",
                    workout.id,
                    workout.name,
                    workout.exercise_count()
                );
                for exercise in &workout.exercises {
                    println!("    #{} {}", exercise.id, exercise.name);
                }
            }
        }
        Command::Chat { follow } => {
            let store = ChatFeedStore::new(gateway, &app_config.sync);
            let mut events = store.events();
            if follow {
                store.subscribe_to_messages().await?;
            }
            for message in store.fetch_messages().await? {
                println!("[{}] {}: {}", message.created_at, message.username, message.message);
            }

            if follow {
                loop {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => break,
                        event = events.recv() => match event {
                            Ok(ChatEvent::Appended(message)) => {
                                println!(
                                    "[{}] {}: {}",
                                    message.created_at, message.username, message.message
                                );
                            }
                            Ok(ChatEvent::SubscriptionLost(reason)) => {
                                anyhow::bail!("chat subscription lost: {}", reason);
                            }
                            Err(e) => tracing::warn!("Missed chat events: {}", e),
                        },
                    }
                }
                store.unsubscribe_from_messages().await;
            }
        }
        Command::Send {
            user,
            username,
            message,
        } => {
            let store = ChatFeedStore::new(gateway, &app_config.sync);
            store.send_message(&user, &username, &message).await?;
            println!("Sent");
        }
        Command::Export {
            workout,
            local: Some(user),
            out,
        } => {
            let snapshots =
                open_snapshot_store(&app_config.persistence, app_config.data_dir.clone());
            let store = WorkoutStore::new(gateway, snapshots, &app_config.sync);
            let mut workouts = store.fetch_workouts(&user).await?;
            if let Some(id) = workout {
                workouts.retain(|w| w.id == id);
            }
            anyhow::ensure!(!workouts.is_empty(), "No workouts found");

            let document = ExportDocument::from_workouts(&user, &workouts);
            let path = out.join(document.file_name(workout));
            tokio::fs::write(&path, document.to_json_pretty()?)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            println!(
                "Exported {} workouts ({} exercises) to {}",
                document.total_workouts,
                document.total_exercises,
                path.display()
            );
        }
        Command::Export {
            workout,
            local: None,
            ..
        } => {
            let client = ExportClient::new(gateway, &app_config.sync);
            let outcome = client.export_workouts(workout).await?;
            println!(
                "Exported {} workouts ({} exercises)\n{}",
                outcome.total_workouts, outcome.total_exercises, outcome.download_url
            );
        }
        Command::Report => {
            let client = ExportClient::new(gateway, &app_config.sync);
            let report = client.daily_report().await?;
            println!("{}", report.message);
        }
    }

    Ok(())
}

fn load(path: Option<&std::path::Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => {
            let mut app_config = config::load_config_from(path)
                .with_context(|| format!("loading {}", path.display()))?;
            config::apply_env_overrides(&mut app_config, |key| std::env::var(key).ok());
            Ok(app_config)
        }
        None => Ok(config::load_config()?),
    }
}
