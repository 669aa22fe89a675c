use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "keeper",
    about = "Hierarchical encrypted secret store",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Crypto backend to use for every store, ignoring the config file.
    #[arg(long, global = true)]
    pub crypto: Option<String>,
    /// Sync backend to use for every store, ignoring the config file.
    #[arg(long, global = true)]
    pub sync: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Initialize the root store, or a store to be mounted with --store/--path.
    Init(InitArgs),
    /// List every entry, mounts included.
    #[command(alias = "list")]
    Ls,
    /// Decrypt and print an entry.
    Show { name: String },
    /// Store an entry; reads the value from stdin when not given.
    Insert { name: String, value: Option<String> },
    /// Delete an entry.
    #[command(alias = "remove")]
    Rm { name: String },
    /// Manage mounted stores.
    #[command(subcommand)]
    Mounts(MountsCommand),
    /// Manage the recipients of a store.
    #[command(subcommand)]
    Recipients(RecipientsCommand),
    /// Manage identities of the crypto backend.
    #[command(subcommand)]
    Keys(KeysCommand),
    /// Manage the passphrase kept in the OS keychain.
    #[command(subcommand)]
    Passphrase(PassphraseCommand),
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct InitArgs {
    /// Alias of the store to initialize; the root store when absent.
    #[arg(long)]
    pub store: Option<String>,
    /// Location of a store that is not mounted yet.
    #[arg(long, requires = "store")]
    pub path: Option<PathBuf>,
    /// Name for the identity generated when no recipient is given.
    #[arg(long, default_value = "keeper")]
    pub name: String,
    /// Recipient IDs to encrypt for.
    pub recipients: Vec<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum MountsCommand {
    /// Show mounted stores and their paths.
    List,
    /// Mount an initialized store and record it in the config file.
    Add {
        alias: String,
        path: PathBuf,
        #[arg(long = "store-crypto")]
        crypto: Option<String>,
        #[arg(long = "store-sync")]
        sync: Option<String>,
    },
    /// Unmount a store and drop it from the config file.
    Remove { alias: String },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum RecipientsCommand {
    List {
        #[arg(long, default_value = "")]
        store: String,
    },
    Add {
        id: String,
        #[arg(long, default_value = "")]
        store: String,
    },
    Remove {
        id: String,
        #[arg(long, default_value = "")]
        store: String,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum KeysCommand {
    /// Create a new private identity and print its recipient ID.
    Generate {
        #[arg(default_value = "keeper")]
        name: String,
        #[arg(long, default_value = "")]
        store: String,
    },
    /// List local identities.
    List {
        #[arg(long, default_value = "")]
        store: String,
    },
    /// Print a public key so others can encrypt to it.
    Export {
        id: String,
        #[arg(long, default_value = "")]
        store: String,
    },
    /// Import a public key exported elsewhere.
    Import {
        file: PathBuf,
        #[arg(long, default_value = "")]
        store: String,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum PassphraseCommand {
    /// Read a passphrase from stdin and keep it in the keychain.
    Set,
    /// Remove the stored passphrase.
    Clear,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
    /// Print the config file location.
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_show_subcommand() {
        let cli = Cli::try_parse_from(["keeper", "show", "web/github"]).expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Show {
                name: "web/github".into()
            }
        );
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["keeper"]).is_err());
    }

    #[test]
    fn parses_init_for_unmounted_store() {
        let cli = Cli::try_parse_from([
            "keeper", "init", "--store", "work", "--path", "/srv/work", "abc", "def",
        ])
        .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Init(InitArgs {
                store: Some("work".into()),
                path: Some(PathBuf::from("/srv/work")),
                name: "keeper".into(),
                recipients: vec!["abc".into(), "def".into()],
            })
        );
    }

    #[test]
    fn init_path_requires_store() {
        assert!(Cli::try_parse_from(["keeper", "init", "--path", "/srv/work"]).is_err());
    }

    #[test]
    fn global_backend_overrides_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["keeper", "ls", "--crypto", "plain", "--sync", "noop"])
            .expect("parse should succeed");
        assert_eq!(cli.command, Command::Ls);
        assert_eq!(cli.crypto.as_deref(), Some("plain"));
        assert_eq!(cli.sync.as_deref(), Some("noop"));
    }

    #[test]
    fn parses_mounts_add() {
        let cli = Cli::try_parse_from([
            "keeper",
            "mounts",
            "add",
            "work",
            "~/work-store",
            "--store-crypto",
            "agecli",
        ])
        .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Mounts(MountsCommand::Add {
                alias: "work".into(),
                path: PathBuf::from("~/work-store"),
                crypto: Some("agecli".into()),
                sync: None,
            })
        );
    }

    #[test]
    fn recipients_default_to_root_store() {
        let cli = Cli::try_parse_from(["keeper", "recipients", "add", "abc"])
            .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Recipients(RecipientsCommand::Add {
                id: "abc".into(),
                store: String::new(),
            })
        );
    }

    #[test]
    fn parses_config_init_subcommand() {
        let cli = Cli::try_parse_from(["keeper", "config", "init"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Config(ConfigCommand::Init));
    }
}
