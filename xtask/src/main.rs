#![allow(clippy::cargo_common_metadata)]

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::Result;
use xshell::{cmd, Shell};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Fmt,
    Check,
    Clippy,
    /// Start the signaling server with a development membership table.
    Run {
        /// Membership file, relative to the project root.
        #[arg(long, default_value = "signaling-server/dev/membership.json")]
        membership: PathBuf,
        #[arg(long, default_value = "debug")]
        log_level: String,
    },
    Test,
    Doc,
    PreCommit,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let sh = Shell::new()?;

    match &cli.command {
        Command::Fmt => fmt(&sh)?,
        Command::Check => check(&sh)?,
        Command::Clippy => clippy(&sh)?,
        Command::Run {
            membership,
            log_level,
        } => run(&sh, membership, log_level)?,
        Command::Test => test(&sh)?,
        Command::Doc => doc(&sh)?,
        Command::PreCommit => pre_commit(&sh)?,
    };

    Ok(())
}

fn fmt(sh: &Shell) -> Result<()> {
    Ok(cmd!(sh, "cargo +nightly fmt").run()?)
}

fn check(sh: &Shell) -> Result<()> {
    Ok(cmd!(sh, "cargo check --all-targets --all-features --workspace").run()?)
}

fn clippy(sh: &Shell) -> Result<()> {
    Ok(cmd!(sh, "cargo clippy --all-targets --all-features --workspace").run()?)
}

fn run(sh: &Shell, membership: &Path, log_level: &str) -> Result<()> {
    let membership = project_root::get_project_root()?.join(membership);
    Ok(cmd!(sh, "cargo run --package peer-calls-server")
        .env("PEER_CALLS_MEMBERSHIP_FILE", membership)
        .env("PEER_CALLS_LOG_LEVEL", log_level)
        .run()?)
}

fn test(sh: &Shell) -> Result<()> {
    let _root = sh.push_dir(project_root::get_project_root()?);
    Ok(cmd!(sh, "cargo test --workspace --all-features").run()?)
}

fn doc(sh: &Shell) -> Result<()> {
    Ok(cmd!(sh, "cargo doc --no-deps --all-features").run()?)
}

fn pre_commit(sh: &Shell) -> Result<()> {
    for cmd in [fmt, check, clippy, test, doc] {
        cmd(sh)?;
    }
    Ok(())
}
