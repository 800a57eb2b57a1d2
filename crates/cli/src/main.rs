#![deny(unsafe_code)]

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use campusmind_api::{ApiError, FileId, HttpChatBackend, SessionId};
use campusmind_chat::{ChatStreamController, Settings, SettingsError, SettingsStore};
use clap::{Parser, Subcommand};
use snafu::{OptionExt, ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt};

mod render;

use render::{ReplyPrinter, session_line, write_transcript};

#[derive(Parser)]
#[command(name = "campusmind")]
#[command(about = "Chat with your course material from the terminal", long_about = None)]
struct Cli {
    /// Settings file to use instead of the per-user default
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Backend base URL for this run, e.g. http://localhost:8000/api
    #[arg(long, global = true)]
    base_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the bearer token used for every request
    Login {
        #[arg(long)]
        token: String,
    },
    /// Forget the stored token
    Logout,
    /// List chat sessions, most recent first
    Sessions,
    /// Create a session, optionally scoped to one uploaded file
    New {
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        file: Option<String>,
    },
    /// Print the stored transcript of a session
    History { session: String },
    /// Ask one question and stream the answer; Ctrl-C stops the stream
    Ask { session: String, query: String },
    /// Interactive chat: /new, /open <id>, /sessions, /quit
    Chat {
        #[arg(long)]
        session: Option<String>,
    },
}

#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(display("not signed in; run `campusmind login --token <token>` first"))]
    NotSignedIn,
    #[snafu(display("failed to set up the backend client on `{stage}`: {source}"))]
    BuildBackend {
        stage: &'static str,
        source: ApiError,
    },
    #[snafu(display("failed to save settings: {source}"))]
    SaveSettings { source: SettingsError },
    #[snafu(display("{message}"))]
    Chat { message: String },
    #[snafu(display("failed on `{stage}`: {source}"))]
    Terminal {
        stage: &'static str,
        source: std::io::Error,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), CliError> {
    init_tracing();
    let cli = Cli::parse();

    let store = match cli.config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::load(),
    };
    tracing::debug!(path = %store.config_path().display(), "loaded settings");

    match cli.command {
        Commands::Login { token } => {
            let settings = Settings {
                api_token: Some(token),
                ..(*store.settings()).clone()
            };
            store.update(settings).context(SaveSettingsSnafu)?;
            ensure_signed_in(&store.settings())?;
            println!("signed in");
        }
        Commands::Logout => {
            let settings = Settings {
                api_token: None,
                ..(*store.settings()).clone()
            };
            store.update(settings).context(SaveSettingsSnafu)?;
            println!("signed out");
        }
        Commands::Sessions => {
            let controller = connect(&store, cli.base_url)?;
            print_sessions(&controller).await;
        }
        Commands::New { title, file } => {
            let controller = connect(&store, cli.base_url)?;
            let session_id = create_session(&controller, title, file).await?;
            println!("{session_id}");
        }
        Commands::History { session } => {
            let controller = connect(&store, cli.base_url)?;
            open_session(&controller, SessionId::from(session)).await?;
            print_transcript(&controller)?;
        }
        Commands::Ask { session, query } => {
            let controller = connect(&store, cli.base_url)?;
            open_session(&controller, SessionId::from(session)).await?;
            stream_reply(&controller, query).await?;
            if let Some(message) = controller.snapshot().error {
                return ChatSnafu { message }.fail();
            }
        }
        Commands::Chat { session } => {
            let controller = connect(&store, cli.base_url)?;
            if let Some(session) = session {
                open_session(&controller, SessionId::from(session)).await?;
                print_transcript(&controller)?;
            }
            interactive(&controller).await?;
        }
    }

    Ok(())
}

fn ensure_signed_in(settings: &Settings) -> Result<(), CliError> {
    settings.api_token.as_ref().context(NotSignedInSnafu)?;
    Ok(())
}

fn connect(
    store: &SettingsStore,
    base_url: Option<String>,
) -> Result<ChatStreamController, CliError> {
    let mut settings = (*store.settings()).clone();
    if let Some(base_url) = base_url {
        settings = Settings {
            api_base_url: base_url,
            ..settings
        }
        .normalized();
    }
    ensure_signed_in(&settings)?;

    let backend = HttpChatBackend::new(settings.backend_config()).context(BuildBackendSnafu {
        stage: "build-http-backend",
    })?;
    tracing::debug!(base_url = %settings.api_base_url, "connected chat controller");

    Ok(ChatStreamController::new(
        Arc::new(backend),
        Arc::new(settings.token_provider()),
        settings.controller_settings(),
    ))
}

async fn print_sessions(controller: &ChatStreamController) {
    controller.list_sessions().await;
    let sessions = controller.snapshot().sessions;
    if sessions.is_empty() {
        println!("no sessions");
    }
    for session in &sessions {
        println!("{}", session_line(session));
    }
}

async fn create_session(
    controller: &ChatStreamController,
    title: Option<String>,
    file: Option<String>,
) -> Result<SessionId, CliError> {
    match controller.create_session(title, file.map(FileId::from)).await {
        Some(session_id) => Ok(session_id),
        None => ChatSnafu {
            message: controller
                .snapshot()
                .error
                .unwrap_or_else(|| "failed to create session".to_string()),
        }
        .fail(),
    }
}

fn print_transcript(controller: &ChatStreamController) -> Result<(), CliError> {
    write_transcript(&mut std::io::stdout().lock(), &controller.snapshot().messages).context(
        TerminalSnafu {
            stage: "print-history",
        },
    )
}

async fn open_session(
    controller: &ChatStreamController,
    session_id: SessionId,
) -> Result<(), CliError> {
    controller.load_history(session_id).await;
    match controller.snapshot().error {
        Some(message) => ChatSnafu { message }.fail(),
        None => Ok(()),
    }
}

/// Sends `query` and echoes the reply as it streams. Ctrl-C stops the stream, not the process.
async fn stream_reply(controller: &ChatStreamController, query: String) -> Result<(), CliError> {
    let mut updates = controller.subscribe();
    let mut printer = ReplyPrinter::new(controller.snapshot().messages.len());

    let mut sending = tokio::spawn({
        let controller = controller.clone();
        async move { controller.send_message(query).await }
    });
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            joined = &mut sending => {
                if let Err(error) = joined {
                    tracing::warn!(error = %error, "send task ended abnormally");
                }
                break;
            }
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                controller.stop_streaming();
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                printer
                    .render(&snapshot, &mut std::io::stdout(), &mut std::io::stderr())
                    .context(TerminalSnafu { stage: "print-reply" })?;
            }
        }
    }

    let snapshot = controller.snapshot();
    let mut stdout = std::io::stdout();
    printer
        .render(&snapshot, &mut stdout, &mut std::io::stderr())
        .and_then(|()| printer.finish(&snapshot, &mut stdout))
        .context(TerminalSnafu { stage: "print-reply" })?;
    if interrupted {
        eprintln!("(stopped)");
    }
    Ok(())
}

async fn interactive(controller: &ChatStreamController) -> Result<(), CliError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout()
            .flush()
            .context(TerminalSnafu { stage: "flush-prompt" })?;

        let Some(line) = lines
            .next_line()
            .await
            .context(TerminalSnafu { stage: "read-input" })?
        else {
            break;
        };
        let line = line.trim();

        match line.split_once(' ').unwrap_or((line, "")) {
            ("", _) => {}
            ("/quit", _) => break,
            ("/sessions", _) => print_sessions(controller).await,
            ("/new", title) => {
                let title = Some(title.trim().to_string()).filter(|title| !title.is_empty());
                match create_session(controller, title, None).await {
                    Ok(session_id) => println!("opened new session {session_id}"),
                    Err(error) => eprintln!("error: {error}"),
                }
            }
            ("/open", session) if !session.trim().is_empty() => {
                match open_session(controller, SessionId::from(session.trim())).await {
                    Ok(()) => print_transcript(controller)?,
                    Err(error) => eprintln!("error: {error}"),
                }
            }
            _ if line.starts_with('/') => {
                eprintln!("commands: /new [title], /open <session>, /sessions, /quit");
            }
            _ => {
                if controller.snapshot().active_session_id.is_none() {
                    eprintln!("no session open; use /new or /open <session>");
                    continue;
                }
                stream_reply(controller, line.to_string()).await?;
                if let Some(error) = controller.snapshot().error {
                    eprintln!("error: {error}");
                }
            }
        }
    }

    Ok(())
}
