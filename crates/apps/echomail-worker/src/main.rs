//! EchoMail worker - Mailbox sync from the command line
//!
//! This is the main entry point for the EchoMail sync worker.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use mailsync::{Authorization, SyncSettings, UserId};

mod app;

use app::WorkerApp;

#[derive(Parser)]
#[command(name = "echomail-worker")]
#[command(version, about = "Sync Microsoft 365 mailboxes into the EchoMail store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file to use instead of ~/.config/echomail/settings.json
    #[arg(long, global = true)]
    settings: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a successful sign-in and sync the user's mailbox
    Authorize {
        #[arg(long)]
        username: String,

        /// Display name
        #[arg(long)]
        name: String,

        /// Bearer access token
        #[arg(long, env = "ECHOMAIL_ACCESS_TOKEN", hide_env_values = true)]
        token: String,

        /// Token expiry in seconds since the Unix epoch
        #[arg(long)]
        expires_at: i64,
    },

    /// Resync an existing user's mailbox
    Sync {
        #[arg(long)]
        user_id: String,
    },

    /// Print a page of a user's synced inbox
    Inbox {
        #[arg(long)]
        username: String,

        /// Zero-based page number
        #[arg(long, default_value_t = 0)]
        page: usize,

        /// Print the page as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = match &cli.settings {
        Some(path) => SyncSettings::from_file(path)?,
        None => SyncSettings::load()?,
    };
    let app = WorkerApp::open(&settings)?;

    match cli.command {
        Commands::Authorize {
            username,
            name,
            token,
            expires_at,
        } => {
            let auth = Authorization::with_unix_expiry(username, name, token, expires_at)?;
            let (outcome, job) = app.authorize(auth)?;
            println!("user {} ({})", outcome.user.id, outcome.user.username);
            match job {
                Some(job) => print_job(&job),
                None => println!("no sync requested"),
            }
        }
        Commands::Sync { user_id } => {
            let job = app.sync(&UserId::new(user_id))?;
            print_job(&job);
        }
        Commands::Inbox {
            username,
            page,
            json,
        } => {
            let inbox = app
                .inbox(&username, page)?
                .with_context(|| format!("No user named {}", username))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&inbox)?);
                return Ok(());
            }

            for message in &inbox.messages {
                println!(
                    "{} {} {:<30} {}",
                    if message.is_read { " " } else { "*" },
                    message.received_at.format("%Y-%m-%d %H:%M"),
                    message.sender.display(),
                    message.subject
                );
            }
            info!(
                "page {} ({} messages, next page: {})",
                inbox.page,
                inbox.messages.len(),
                if inbox.has_next { "yes" } else { "no" }
            );
        }
    }

    Ok(())
}

fn print_job(job: &mailsync::queue::Job) {
    match (&job.outcome, &job.last_error) {
        (Some(state), _) => println!("{} {}: {:?}", job.name, job.id, state),
        (None, Some(error)) => println!(
            "{} {}: failed after {} attempts: {}",
            job.name, job.id, job.attempts_made, error
        ),
        (None, None) => println!("{} {}: {:?}", job.name, job.id, job.status),
    }
}
