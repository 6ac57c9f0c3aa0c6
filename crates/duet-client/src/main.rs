//! `duet`: terminal front end over a local store.
//!
//! Lines starting with `/` are commands; anything else is sent to the open
//! conversation.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use duet_client::config::ClientConfig;
use duet_client::directory::{ConversationDirectory, CreateOutcome};
use duet_client::events::ClientEvent;
use duet_client::session::StaticIdentity;
use duet_client::view::ConversationView;
use duet_client::AppState;
use duet_shared::ConversationId;
use duet_store::{Database, LocalStore};

const HELP: &str = "\
/list            list conversations
/new <email>     start a conversation
/open <id>       open a conversation
/show            show the open conversation
/retry           re-open unavailable subscriptions
/quit            exit
<text>           send to the open conversation";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    duet_client::init_tracing();
    info!("Starting duet v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let db = match &config.db_path {
        Some(path) => Database::open_at(path),
        None => Database::new(),
    }
    .context("opening the local database")?;
    let store = LocalStore::new(db, config.store_config());
    store.describe();

    let identity = match &config.user_email {
        Some(email) => StaticIdentity::signed_in(email.clone(), config.photo_url.clone()),
        None => StaticIdentity::default(),
    };

    let mut state = AppState::new(Arc::new(store), Arc::new(identity));
    let session = state
        .sign_in()
        .await
        .context("set DUET_USER_EMAIL to sign in")?;
    println!("signed in as {}", session.email);

    spawn_event_printer(&state);

    let mut directory = state.open_directory().await?;
    let mut open: Option<ConversationView> = None;
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim_end();
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));

        match command {
            "/quit" => break,
            "/help" => println!("{HELP}"),
            "/list" => print_directory(&directory),
            "/new" => match directory.create(arg).await {
                Ok(CreateOutcome::Created(id)) => println!("created {id}"),
                Ok(CreateOutcome::Skipped(reason)) => println!("not created ({reason:?})"),
                Err(e) => warn!(error = %e, "create failed"),
            },
            "/open" => {
                let id = ConversationId::from(arg.trim());
                let result = match open.as_mut() {
                    Some(view) => state.switch_conversation(view, &id).await,
                    None => match state.open_conversation(&id).await {
                        Ok(view) => {
                            open = Some(view);
                            Ok(())
                        }
                        Err(e) => Err(e),
                    },
                };
                match result {
                    Ok(()) => open.iter().for_each(print_conversation),
                    Err(e) => println!("cannot open {id}: {e}"),
                }
            }
            "/show" => match &open {
                Some(view) => print_conversation(view),
                None => println!("no conversation open"),
            },
            "/retry" => {
                if let Err(e) = directory.retry().await {
                    warn!(error = %e, "directory retry failed");
                }
                if let Some(view) = open.as_mut() {
                    if let Err(e) = view.retry().await {
                        warn!(error = %e, "conversation retry failed");
                    }
                }
            }
            _ if command.starts_with('/') => println!("unknown command, try /help"),
            _ => match &open {
                Some(view) => {
                    view.composer().set_text(line);
                    if let Err(e) = view.composer().submit_key("Enter").await {
                        println!("not sent: {e}");
                    }
                }
                None => println!("open a conversation first"),
            },
        }
    }

    state.sign_out().await?;
    Ok(())
}

fn spawn_event_printer(state: &AppState) {
    let mut events = state.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ClientEvent::SendFailed { reason, .. } => println!("! send failed: {reason}"),
                ClientEvent::SyncUnavailable { feed, reason, .. } => {
                    println!("! {feed} unavailable: {reason} (try /retry)")
                }
                other => tracing::debug!(event = other.name(), "client event"),
            }
        }
    });
}

fn print_directory(directory: &ConversationDirectory) {
    let entries = directory.entries();
    if entries.is_empty() {
        println!("no conversations yet, try /new <email>");
    }
    for entry in entries {
        let recipient = entry.recipient;
        println!(
            "{}  {} (last seen {})",
            entry.conversation.id, recipient.email, recipient.last_seen
        );
    }
}

fn print_conversation(view: &ConversationView) {
    let recipient = view.recipient();
    println!("-- {} (last seen {})", recipient.email, recipient.last_seen);
    for message in view.messages() {
        let marker = if message.is_own { ">" } else { "<" };
        println!("{marker} [{}] {}", message.sent_at, message.text);
    }
}
