//! `agecli`: delegates to the external `age` / `age-keygen` binaries.
//!
//! Every invocation is spawned with `kill_on_drop`, so when the caller's
//! context is cancelled the in-flight future is dropped and the child dies
//! with it.

use std::{
    ffi::OsStr,
    io,
    path::{Path, PathBuf},
    process::{Output, Stdio},
};

use async_trait::async_trait;
use keeper_core::{
    config::Locations,
    context::Context,
    crypto::{CryptoBackend, CryptoError, FormatVersion},
};
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{debug, instrument};

pub const NAME: &str = "agecli";
pub const EXT: &str = "age";
pub const ID_FILE: &str = ".age-recipients";

#[derive(Debug, Clone)]
pub struct AgeCliBackend {
    store_root: PathBuf,
    identity_file: PathBuf,
    age_binary: String,
    keygen_binary: String,
}

impl AgeCliBackend {
    pub fn new(store_root: impl Into<PathBuf>, locations: &Locations) -> Self {
        Self {
            store_root: store_root.into(),
            identity_file: locations.config_dir.join("agecli").join("identity.txt"),
            age_binary: "age".to_owned(),
            keygen_binary: "age-keygen".to_owned(),
        }
    }

    /// Use custom binaries, e.g. absolute paths or test doubles.
    pub fn with_binaries(
        mut self,
        age_binary: impl Into<String>,
        keygen_binary: impl Into<String>,
    ) -> Self {
        self.age_binary = age_binary.into();
        self.keygen_binary = keygen_binary.into();
        self
    }

    pub fn store_root(&self) -> &Path {
        &self.store_root
    }

    pub fn identity_file(&self) -> &Path {
        &self.identity_file
    }

    async fn exec(
        &self,
        ctx: &Context,
        binary: &str,
        args: &[&OsStr],
        stdin: &[u8],
    ) -> Result<Output, CryptoError> {
        ctx.check()?;
        let mut command = Command::new(binary);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|error| map_spawn_error(binary, error))?;
        debug!(binary, pid = ?child.id(), "spawned crypto helper");

        // Feed stdin while draining stdout/stderr; a helper that streams its
        // output would otherwise block on a full pipe before reading all input.
        let child_stdin = child.stdin.take();
        let feed = async move {
            let Some(mut pipe) = child_stdin else {
                return Ok(());
            };
            let written = match pipe.write_all(stdin).await {
                Ok(()) => pipe.shutdown().await,
                Err(error) => Err(error),
            };
            match written {
                // The helper exited without reading everything; its status and
                // stderr explain why.
                Err(error) if error.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
        };
        let work = async move {
            let ((), output) = tokio::try_join!(feed, child.wait_with_output())?;
            Ok::<_, io::Error>(output)
        };
        Ok(ctx.run(work).await??)
    }
}

fn map_spawn_error(binary: &str, error: io::Error) -> CryptoError {
    if error.kind() == io::ErrorKind::NotFound {
        return CryptoError::Uninitialized {
            backend: NAME,
            reason: format!("required binary not found: {binary}"),
        };
    }
    CryptoError::from(error)
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_owned()
}

#[async_trait]
impl CryptoBackend for AgeCliBackend {
    async fn initialized(&self, ctx: &Context) -> Result<(), CryptoError> {
        let output = self
            .exec(ctx, &self.age_binary, &[OsStr::new("--version")], b"")
            .await?;
        if !output.status.success() {
            return Err(CryptoError::Uninitialized {
                backend: NAME,
                reason: format!("{} --version failed: {}", self.age_binary, stderr_of(&output)),
            });
        }
        if !self.identity_file.is_file() {
            return Err(CryptoError::Uninitialized {
                backend: NAME,
                reason: format!("missing identity {}", self.identity_file.display()),
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        NAME
    }

    fn version(&self, _ctx: &Context) -> FormatVersion {
        FormatVersion::new(1, 0, 0)
    }

    fn ext(&self) -> &'static str {
        EXT
    }

    fn id_file(&self) -> &'static str {
        ID_FILE
    }

    #[instrument(skip_all, fields(recipients = recipients.len()))]
    async fn encrypt(
        &self,
        ctx: &Context,
        plaintext: &[u8],
        recipients: &[String],
    ) -> Result<Vec<u8>, CryptoError> {
        ctx.check()?;
        let recipients: Vec<&str> = recipients
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .collect();
        if recipients.is_empty() {
            return Err(CryptoError::Recipient {
                reason: "recipient list is empty".to_string(),
            });
        }
        let mut args: Vec<&OsStr> = vec![OsStr::new("--encrypt")];
        for recipient in &recipients {
            args.push(OsStr::new("--recipient"));
            args.push(OsStr::new(*recipient));
        }
        let output = self.exec(ctx, &self.age_binary, &args, plaintext).await?;
        if !output.status.success() {
            return Err(CryptoError::Recipient {
                reason: stderr_of(&output),
            });
        }
        Ok(output.stdout)
    }

    #[instrument(skip_all)]
    async fn decrypt(&self, ctx: &Context, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        ctx.check()?;
        let args: [&OsStr; 3] = [
            OsStr::new("--decrypt"),
            OsStr::new("--identity"),
            self.identity_file.as_os_str(),
        ];
        let output = self.exec(ctx, &self.age_binary, &args, ciphertext).await?;
        if !output.status.success() {
            return Err(CryptoError::Decrypt {
                reason: stderr_of(&output),
            });
        }
        Ok(output.stdout)
    }

    async fn list_recipients(&self, ctx: &Context) -> Result<Vec<String>, CryptoError> {
        self.list_identities(ctx).await
    }

    async fn list_identities(&self, ctx: &Context) -> Result<Vec<String>, CryptoError> {
        ctx.check()?;
        if !self.identity_file.is_file() {
            return Ok(Vec::new());
        }
        let args: [&OsStr; 2] = [OsStr::new("-y"), self.identity_file.as_os_str()];
        let output = self.exec(ctx, &self.keygen_binary, &args, b"").await?;
        if !output.status.success() {
            return Err(CryptoError::Io {
                reason: stderr_of(&output),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect())
    }

    async fn generate_identity(&self, ctx: &Context, _name: &str) -> Result<String, CryptoError> {
        ctx.check()?;
        if self.identity_file.exists() {
            return Err(CryptoError::Encrypt {
                reason: format!("identity {} already exists", self.identity_file.display()),
            });
        }
        if let Some(parent) = self.identity_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let args: [&OsStr; 2] = [OsStr::new("-o"), self.identity_file.as_os_str()];
        let output = self.exec(ctx, &self.keygen_binary, &args, b"").await?;
        if !output.status.success() {
            return Err(CryptoError::Encrypt {
                reason: stderr_of(&output),
            });
        }
        self.list_identities(ctx)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CryptoError::Encrypt {
                reason: "age-keygen produced no recipient".to_string(),
            })
    }
}
