use std::env;
use std::sync::Arc;

use anyhow::Context;
use log::info;
use simplelog::{ColorChoice, Config as LogConfig, TermLogger, TerminalMode};

use peer_calls_server::{router, sweeper, Config, MemoryCallStore, ServerState, StaticMembership};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?.with_address_arg(env::args().nth(1))?;
    TermLogger::init(
        config.level_filter()?,
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    let membership = match &config.membership_file {
        Some(path) => StaticMembership::from_json_file(path)?,
        None => StaticMembership::new(),
    };
    let state = ServerState::new(
        Arc::new(MemoryCallStore::new()),
        Arc::new(membership),
        config.strict_missed,
    );

    sweeper::spawn(
        Arc::clone(&state.lifecycle),
        config.ring_timeout(),
        config.sweep_interval(),
    );

    info!("listening on {}", config.address);
    axum::Server::bind(&config.address)
        .serve(router::create(state).into_make_service())
        .await
        .context("server error")
}
