//! Kommandozeilen-Client für Klinik-Anrufe

use anyhow::{bail, Context, Result};
use clap::Parser;
use clinic_call::call::CallHandle;
use clinic_call::config::{AppConfig, DEFAULT_SIGNALING_URL};
use clinic_call::overlay::OverlayView;
use clinic_call::transport::UserId;
use clinic_call::AppState;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about = "Clinic audio/video calls", long_about = None)]
struct Args {
    /// Eigene Benutzer-ID
    #[arg(short, long)]
    user: String,

    /// Signaling-Server
    #[arg(long, env = "SIGNALING_URL", default_value = DEFAULT_SIGNALING_URL)]
    signaling_url: String,

    /// Pfad der SQLite-Datenbank
    #[arg(long, env = "CLINIC_CALL_DB")]
    db: Option<PathBuf>,

    /// In-Memory Datenbank verwenden
    #[arg(long, conflicts_with = "db")]
    ephemeral: bool,

    /// TURN-Server, z.B. turn:turn.example.org:3478
    #[arg(long, requires_all = ["turn_username", "turn_credential"])]
    turn_url: Option<String>,

    #[arg(long, env = "TURN_USERNAME")]
    turn_username: Option<String>,

    #[arg(long, env = "TURN_CREDENTIAL")]
    turn_credential: Option<String>,
}

const HELP: &str = "commands: call <user> | video <user> | accept | decline | hangup | \
                    mute | camera | dismiss | history <user> | quit";

#[tokio::main]
async fn main() -> Result<()> {
    clinic_call::init_logging();
    let args = Args::parse();

    let mut config = AppConfig::new(UserId::new(args.user.as_str()), &args.signaling_url)
        .context("invalid configuration")?;
    if args.ephemeral {
        config.database_path = None;
    } else if let Some(db) = args.db {
        config.database_path = Some(db);
    }
    if let (Some(url), Some(username), Some(credential)) =
        (args.turn_url, args.turn_username, args.turn_credential)
    {
        config = config.with_turn_server(url, username, credential);
    }

    let state = AppState::start(config)
        .await
        .context("failed to start session")?;

    if let Some(calls) = state.calls() {
        spawn_overlay_printer(calls);
    } else {
        eprintln!("calling is unavailable for this session");
    }
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            break;
        }
        if let Err(e) = run_command(&state, line).await {
            eprintln!("{}", e);
        }
    }

    state.shutdown().await;
    Ok(())
}

async fn run_command(state: &AppState, line: &str) -> Result<()> {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let arg = parts.next();

    if command == "history" {
        let Some(other) = arg else {
            bail!("usage: history <user>");
        };
        let messages = state
            .store()
            .messages_between(&state.config().user_id, &UserId::new(other))?;
        for message in messages {
            println!(
                "[{}] {} -> {}: {}",
                message.created_at, message.from_user, message.to_user, message.body
            );
        }
        return Ok(());
    }

    let Some(calls) = state.calls() else {
        bail!("calling is unavailable");
    };

    match (command, arg) {
        ("call", Some(user)) => calls.start_audio_call(UserId::new(user)).await?,
        ("video", Some(user)) => calls.start_video_call(UserId::new(user)).await?,
        ("accept", _) => calls.accept_call().await?,
        ("decline", _) => calls.decline_call().await?,
        ("hangup", _) => calls.end_call().await?,
        ("mute", _) => calls.toggle_mute().await?,
        ("camera", _) => calls.toggle_video().await?,
        ("dismiss", _) => calls.dismiss().await?,
        _ => bail!("{}", HELP),
    }
    Ok(())
}

/// Gibt das Overlay bei jeder Änderung aus
fn spawn_overlay_printer(calls: &CallHandle) {
    let mut snapshots = calls.watch();
    tokio::spawn(async move {
        let mut last: Option<OverlayView> = None;
        while snapshots.changed().await.is_ok() {
            let view = OverlayView::from_snapshot(&snapshots.borrow_and_update());
            if last.as_ref() == Some(&view) {
                continue;
            }
            if view.visible {
                let controls: Vec<String> = view
                    .controls
                    .iter()
                    .map(|c| format!("{:?}", c).to_lowercase())
                    .collect();
                println!(
                    "[{}] {} {} ({})",
                    view.title,
                    view.peer_name.as_deref().unwrap_or(""),
                    view.status,
                    controls.join(", ")
                );
            } else if last.as_ref().map(|v| v.visible).unwrap_or(false) {
                println!("[idle]");
            }
            last = Some(view);
        }
    });
}
