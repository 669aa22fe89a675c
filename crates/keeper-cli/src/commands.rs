use std::io::Write;

use color_eyre::{eyre::eyre, Result};
use keeper_core::{config::StoreConfig, context::Context};
use tokio::io::AsyncReadExt;

use crate::{
    app::App,
    cli::{InitArgs, KeysCommand, MountsCommand, RecipientsCommand},
};

/// Initialize a store, generating an identity when no recipient is given.
pub async fn init(ctx: &Context, app: &App, args: InitArgs, out: &mut impl Write) -> Result<()> {
    let alias = args.store.unwrap_or_default();
    let cfg = args.path.map(StoreConfig::new);
    let mut recipients = args.recipients;
    if recipients.is_empty() {
        let owner = app.root.store(&alias);
        let id = owner
            .crypto()
            .generate_identity(ctx, &args.name)
            .await?;
        writeln!(out, "Generated identity {id}")?;
        recipients.push(id);
    }
    app.root
        .init(ctx, &alias, cfg.as_ref(), &recipients)
        .await?;
    let label = if alias.is_empty() { "root" } else { alias.as_str() };
    writeln!(out, "Initialized {label} store for {}", recipients.join(", "))?;
    Ok(())
}

pub async fn list(ctx: &Context, app: &App, out: &mut impl Write) -> Result<()> {
    let names = app.root.list(ctx).await?;
    if names.is_empty() {
        writeln!(out, "No entries yet. Add one with `keeper insert <name>`.")?;
    }
    for name in names {
        writeln!(out, "{name}")?;
    }
    Ok(())
}

pub async fn show(ctx: &Context, app: &App, name: &str, out: &mut impl Write) -> Result<()> {
    let content = app.root.get(ctx, name).await?;
    out.write_all(&content)?;
    if !content.ends_with(b"\n") {
        writeln!(out)?;
    }
    Ok(())
}

pub async fn insert(
    ctx: &Context,
    app: &App,
    name: &str,
    value: Option<String>,
    out: &mut impl Write,
) -> Result<()> {
    let content = match value {
        Some(value) => value.into_bytes(),
        None => read_stdin(ctx).await?,
    };
    app.root.set(ctx, name, &content).await?;
    writeln!(out, "Saved {name}")?;
    Ok(())
}

pub async fn remove(ctx: &Context, app: &App, name: &str, out: &mut impl Write) -> Result<()> {
    app.root.delete(ctx, name).await?;
    writeln!(out, "Removed {name}")?;
    Ok(())
}

/// Mount changes are applied to the open store first and only then written
/// to the config file.
pub async fn mounts(
    ctx: &Context,
    app: &mut App,
    cmd: MountsCommand,
    out: &mut impl Write,
) -> Result<()> {
    match cmd {
        MountsCommand::List => {
            let mounts = app.root.mounts();
            if mounts.is_empty() {
                writeln!(out, "No mounts.")?;
            }
            for (alias, path) in mounts {
                writeln!(out, "{alias} => {}", path.display())?;
            }
        }
        MountsCommand::Add {
            alias,
            path,
            crypto,
            sync,
        } => {
            let cfg = StoreConfig {
                path,
                crypto_backend: crypto,
                sync_backend: sync,
            };
            app.root.add_mount(ctx, &alias, &cfg).await?;
            let key = alias.trim_matches('/').to_string();
            app.config.mounts.insert(key.clone(), cfg);
            app.save_config()?;
            writeln!(
                out,
                "Mounted {key} (saved to {})",
                app.config_file().display()
            )?;
        }
        MountsCommand::Remove { alias } => {
            app.root.remove_mount(&alias).await?;
            let key = alias.trim_matches('/');
            app.config.mounts.remove(key);
            app.save_config()?;
            writeln!(out, "Unmounted {key}")?;
        }
    }
    Ok(())
}

pub async fn recipients(
    ctx: &Context,
    app: &App,
    cmd: RecipientsCommand,
    out: &mut impl Write,
) -> Result<()> {
    match cmd {
        RecipientsCommand::List { store } => {
            let owner = app.root.store(&store);
            for id in app.root.recipients(ctx, &store).await?.iter() {
                writeln!(out, "{}", owner.crypto().format_key(ctx, id).await)?;
            }
        }
        RecipientsCommand::Add { id, store } => {
            if app.root.add_recipient(ctx, &store, &id).await? {
                writeln!(out, "Added recipient {id}")?;
            } else {
                writeln!(out, "{id} is already a recipient")?;
            }
        }
        RecipientsCommand::Remove { id, store } => {
            if app.root.remove_recipient(ctx, &store, &id).await? {
                writeln!(out, "Removed recipient {id}")?;
            } else {
                writeln!(out, "{id} is not a recipient")?;
            }
        }
    }
    Ok(())
}

pub async fn keys(ctx: &Context, app: &App, cmd: KeysCommand, out: &mut impl Write) -> Result<()> {
    match cmd {
        KeysCommand::Generate { name, store } => {
            let id = app
                .root
                .store(&store)
                .crypto()
                .generate_identity(ctx, &name)
                .await?;
            writeln!(out, "{id}")?;
        }
        KeysCommand::List { store } => {
            let owner = app.root.store(&store);
            for id in owner.crypto().list_identities(ctx).await? {
                writeln!(out, "{}", owner.crypto().format_key(ctx, &id).await)?;
            }
        }
        KeysCommand::Export { id, store } => {
            let key = app
                .root
                .store(&store)
                .crypto()
                .export_public_key(ctx, &id)
                .await?;
            out.write_all(&key)?;
            writeln!(out)?;
        }
        KeysCommand::Import { file, store } => {
            let key = tokio::fs::read(&file)
                .await
                .map_err(|e| eyre!("read {}: {e}", file.display()))?;
            let id = app
                .root
                .store(&store)
                .crypto()
                .import_public_key(ctx, &key)
                .await?;
            writeln!(out, "Imported {id}")?;
        }
    }
    Ok(())
}

async fn read_stdin(ctx: &Context) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ctx.run(tokio::io::stdin().read_to_end(&mut buf)).await??;
    Ok(buf)
}

/// Read a single line from stdin, without its line ending.
pub async fn read_line(ctx: &Context) -> Result<String> {
    let bytes = read_stdin(ctx).await?;
    let text = String::from_utf8(bytes).map_err(|_| eyre!("input is not valid UTF-8"))?;
    Ok(text.lines().next().unwrap_or_default().to_string())
}
