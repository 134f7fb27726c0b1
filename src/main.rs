//! pairchat - terminal client for two-party realtime chat
//!
//! Authenticates against an identity provider, mirrors presence into a
//! document store, and keeps one conversation at a time in sync with the
//! store's push notifications. Ships with an in-process sandbox backend.

mod auth;
mod config;
mod directory;
mod models;
mod sandbox;
mod session;
mod store;
mod sync;
mod tui;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::SessionCache;
use crate::session::SessionManager;

#[derive(Parser)]
#[command(name = "pairchat")]
#[command(about = "Terminal client for two-party realtime chat", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in to the sandbox backend and open the chat UI
    Chat {
        /// Account email
        #[arg(long)]
        email: String,

        /// Account password
        #[arg(long)]
        password: String,

        /// Create the account first instead of signing in
        #[arg(long)]
        signup: bool,

        /// Display name for --signup
        #[arg(long, default_value = "You")]
        display_name: String,
    },

    /// Show the cached identity from the last session
    Whoami,

    /// Clear the cached identity
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Chat {
            email,
            password,
            signup,
            display_name,
        } => {
            run_chat(&email, &password, signup, &display_name).await?;
        }
        Commands::Whoami => {
            let cache = SessionCache::open()?;
            match cache.load()? {
                Some(identity) => {
                    println!("{} <{}> (id {})", identity.display_name, identity.email, identity.id);
                }
                None => println!("Not signed in."),
            }
        }
        Commands::Logout => {
            SessionCache::open()?.clear()?;
            println!("Session cache cleared.");
        }
    }

    Ok(())
}

/// Sign in (or up) against the sandbox backend and run the TUI.
async fn run_chat(email: &str, password: &str, signup: bool, display_name: &str) -> Result<()> {
    let sandbox = sandbox::seed().await?;
    let store = Arc::new(sandbox.store.clone());
    let manager = SessionManager::new(
        sandbox.provider.clone(),
        store.clone(),
        SessionCache::open()?,
    );

    let identity = if signup {
        manager
            .sign_up(email, password, display_name)
            .await
            .context("Sign-up failed")?
    } else {
        manager
            .sign_in(email, password)
            .await
            .context("Sign-in failed")?
    };
    tracing::info!("signed in as {}", identity.email);

    sandbox.spawn_echo(identity.id.clone()).await?;

    let result = tui::run(store, identity).await;

    // Mirror presence to offline before the process ends.
    manager.sign_out().await;
    result
}
