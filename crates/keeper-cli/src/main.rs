mod app;
mod cli;
mod commands;
mod config;

use std::io::{self, Write};

use clap::Parser;
use color_eyre::Result;
use keeper_core::{config::BackendOverride, context::Context};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    app::App,
    cli::{Command, ConfigCommand, PassphraseCommand},
    config::Paths,
};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let paths = Paths::from_env()?;
    let ctx = interruptible_context();
    let mut out = io::stdout().lock();

    match cli.command {
        Command::Version => print_version(),
        Command::Config(cmd) => run_config(cmd, &paths, &mut out)?,
        Command::Passphrase(cmd) => run_passphrase(&ctx, cmd, &mut out).await?,
        command => {
            let agent = app::build_agent(|key| std::env::var(key).ok());
            let overrides = BackendOverride {
                crypto: cli.crypto,
                sync: cli.sync,
            };
            let mut app = App::open(&ctx, paths, agent, overrides).await?;
            run_store_command(&ctx, &mut app, command, &mut out).await?;
        }
    }
    out.flush()?;
    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info; logs go to stderr so
    // decrypted output on stdout stays clean.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Context cancelled on Ctrl-C so in-flight crypto work is torn down.
fn interruptible_context() -> Context {
    let (ctx, handle) = Context::with_cancel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received, cancelling");
            handle.cancel();
        }
    });
    ctx
}

fn print_version() {
    println!("keeper {}", env!("CARGO_PKG_VERSION"));
}

async fn run_store_command(
    ctx: &Context,
    app: &mut App,
    command: Command,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        Command::Init(args) => commands::init(ctx, app, args, out).await,
        Command::Ls => commands::list(ctx, app, out).await,
        Command::Show { name } => commands::show(ctx, app, &name, out).await,
        Command::Insert { name, value } => commands::insert(ctx, app, &name, value, out).await,
        Command::Rm { name } => commands::remove(ctx, app, &name, out).await,
        Command::Mounts(cmd) => commands::mounts(ctx, app, cmd, out).await,
        Command::Recipients(cmd) => commands::recipients(ctx, app, cmd, out).await,
        Command::Keys(cmd) => commands::keys(ctx, app, cmd, out).await,
        Command::Version | Command::Config(_) | Command::Passphrase(_) => Ok(()),
    }
}

fn run_config(cmd: ConfigCommand, paths: &Paths, out: &mut impl Write) -> Result<()> {
    match cmd {
        ConfigCommand::Init => {
            let path = config::write_default_if_missing(&paths.default_config(), &paths.config_file)?;
            writeln!(out, "Config initialized at {}", path.display())?;
        }
        ConfigCommand::Path => writeln!(out, "{}", paths.config_file.display())?,
    }
    Ok(())
}

async fn run_passphrase(ctx: &Context, cmd: PassphraseCommand, out: &mut impl Write) -> Result<()> {
    let keychain = app::keychain();
    match cmd {
        PassphraseCommand::Set => {
            let passphrase = commands::read_line(ctx).await?;
            if passphrase.is_empty() {
                color_eyre::eyre::bail!("refusing to store an empty passphrase");
            }
            keychain.remember(&passphrase)?;
            writeln!(out, "Passphrase stored in the OS keychain")?;
        }
        PassphraseCommand::Clear => {
            keychain.clear()?;
            writeln!(out, "Passphrase removed from the OS keychain")?;
        }
    }
    Ok(())
}
