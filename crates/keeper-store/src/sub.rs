//! A single physical store: one directory, one crypto backend, one sync backend.

use std::{
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use keeper_core::{
    context::Context,
    crypto::{CryptoBackend, CryptoError},
    recipients::{IdFile, RecipientSet},
};
use keeper_sync::SyncBackend;
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

use crate::{paths::clean_name, StoreError};

pub struct SubStore {
    alias: String,
    path: PathBuf,
    crypto: Box<dyn CryptoBackend>,
    sync: Box<dyn SyncBackend>,
}

impl SubStore {
    pub fn new(
        alias: impl Into<String>,
        path: impl Into<PathBuf>,
        crypto: Box<dyn CryptoBackend>,
        sync: Box<dyn SyncBackend>,
    ) -> Self {
        Self {
            alias: alias.into(),
            path: path.into(),
            crypto,
            sync,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn crypto(&self) -> &dyn CryptoBackend {
        self.crypto.as_ref()
    }

    pub fn sync(&self) -> &dyn SyncBackend {
        self.sync.as_ref()
    }

    fn id_file(&self) -> IdFile {
        IdFile::new(&self.path, self.crypto.id_file())
    }

    fn relative_entry(&self, name: &str) -> Result<PathBuf, StoreError> {
        let name = clean_name(name).map_err(|reason| StoreError::InvalidName {
            name: name.to_string(),
            reason,
        })?;
        Ok(PathBuf::from(format!("{name}.{}", self.crypto.ext())))
    }

    /// True if an entry file exists for `name`.
    pub fn exists(&self, name: &str) -> bool {
        self.relative_entry(name)
            .map(|rel| self.path.join(rel).is_file())
            .unwrap_or(false)
    }

    /// True if `name` is a directory inside this store; `""` is the store root.
    pub fn is_dir(&self, name: &str) -> bool {
        let name = name.trim_matches('/');
        if name.is_empty() {
            return self.path.is_dir();
        }
        clean_name(name).is_ok() && self.path.join(name).is_dir()
    }

    /// Ok iff the ID file lists at least one recipient and both backends are ready.
    pub async fn initialized(&self, ctx: &Context) -> Result<(), StoreError> {
        ctx.check()?;
        let id_file = self.id_file();
        if id_file.load()?.is_empty() {
            return Err(CryptoError::Uninitialized {
                backend: self.crypto.name(),
                reason: format!("no recipients in {}", id_file.path().display()),
            }
            .into());
        }
        self.crypto.initialized(ctx).await?;
        self.sync.initialized(ctx).await?;
        Ok(())
    }

    /// Create the store directory and write its ID file.
    #[instrument(skip_all, fields(alias = %self.alias, path = %self.path.display()))]
    pub async fn init(&self, ctx: &Context, recipients: &[String]) -> Result<(), StoreError> {
        ctx.check()?;
        let set: RecipientSet = recipients.iter().map(String::as_str).collect();
        if set.is_empty() {
            return Err(CryptoError::Recipient {
                reason: "at least one recipient is required".to_string(),
            }
            .into());
        }
        fs::create_dir_all(&self.path)?;
        let id_file = self.id_file();
        id_file.save(&set)?;
        debug!(recipients = set.len(), "wrote id file");
        self.record(
            ctx,
            vec![PathBuf::from(self.crypto.id_file())],
            "Initialized store",
        )
        .await
    }

    pub async fn recipients(&self, ctx: &Context) -> Result<RecipientSet, StoreError> {
        ctx.check()?;
        Ok(self.id_file().load()?)
    }

    /// Add `id` to the ID file and re-encrypt every entry for the new set.
    /// Returns `false` if it was already present.
    #[instrument(skip_all, fields(alias = %self.alias, recipient = %id))]
    pub async fn add_recipient(&self, ctx: &Context, id: &str) -> Result<bool, StoreError> {
        ctx.check()?;
        let mut set = self.id_file().load()?;
        if !set.insert(id) {
            return Ok(false);
        }
        self.update_recipients(ctx, &set, &format!("Added recipient {id}"))
            .await?;
        Ok(true)
    }

    /// Remove `id` from the ID file and re-encrypt every entry without it.
    /// Removing the last recipient is refused.
    #[instrument(skip_all, fields(alias = %self.alias, recipient = %id))]
    pub async fn remove_recipient(&self, ctx: &Context, id: &str) -> Result<bool, StoreError> {
        ctx.check()?;
        let mut set = self.id_file().load()?;
        if !set.remove(id) {
            return Ok(false);
        }
        if set.is_empty() {
            return Err(CryptoError::Recipient {
                reason: "cannot remove the last recipient".to_string(),
            }
            .into());
        }
        self.update_recipients(ctx, &set, &format!("Removed recipient {id}"))
            .await?;
        Ok(true)
    }

    async fn update_recipients(
        &self,
        ctx: &Context,
        set: &RecipientSet,
        message: &str,
    ) -> Result<(), StoreError> {
        // Decrypt everything first so a failure leaves the store untouched.
        let mut plaintexts = Vec::new();
        for name in self.list(ctx).await? {
            let content = self.get(ctx, &name).await?;
            plaintexts.push((name, content));
        }
        let mut ciphertexts = Vec::with_capacity(plaintexts.len());
        for (name, content) in &plaintexts {
            let sealed = self.crypto.encrypt(ctx, content, set.as_slice()).await?;
            ciphertexts.push((self.relative_entry(name)?, sealed));
        }
        ctx.check()?;

        let mut changed = vec![PathBuf::from(self.crypto.id_file())];
        self.id_file().save(set)?;
        for (rel, sealed) in ciphertexts {
            write_atomic(&self.path.join(&rel), &sealed)?;
            changed.push(rel);
        }
        self.record(ctx, changed, message).await
    }

    #[instrument(skip_all, fields(alias = %self.alias, name))]
    pub async fn get(&self, ctx: &Context, name: &str) -> Result<Vec<u8>, StoreError> {
        ctx.check()?;
        let path = self.path.join(self.relative_entry(name)?);
        let ciphertext = fs::read(&path).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound {
                    name: name.to_string(),
                }
            } else {
                StoreError::Io(err)
            }
        })?;
        Ok(self.crypto.decrypt(ctx, &ciphertext).await?)
    }

    /// Encrypt `content` for the store's recipients and write it atomically.
    #[instrument(skip_all, fields(alias = %self.alias, name, len = content.len()))]
    pub async fn set(&self, ctx: &Context, name: &str, content: &[u8]) -> Result<(), StoreError> {
        ctx.check()?;
        let rel = self.relative_entry(name)?;
        let recipients = self.id_file().load()?;
        if recipients.is_empty() {
            return Err(CryptoError::Uninitialized {
                backend: self.crypto.name(),
                reason: format!("store {} has no recipients", self.path.display()),
            }
            .into());
        }
        let ciphertext = self
            .crypto
            .encrypt(ctx, content, recipients.as_slice())
            .await?;
        ctx.check()?;
        write_atomic(&self.path.join(&rel), &ciphertext)?;
        self.record(ctx, vec![rel], &format!("Save secret to {name}"))
            .await
    }

    #[instrument(skip_all, fields(alias = %self.alias, name))]
    pub async fn delete(&self, ctx: &Context, name: &str) -> Result<(), StoreError> {
        ctx.check()?;
        let rel = self.relative_entry(name)?;
        let path = self.path.join(&rel);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    name: name.to_string(),
                })
            }
            Err(err) => return Err(err.into()),
        }
        self.prune_empty_parents(&path);
        self.record(ctx, vec![rel], &format!("Remove {name} from store"))
            .await
    }

    /// Every entry name in this store, sorted. Hidden files and directories are skipped.
    pub async fn list(&self, ctx: &Context) -> Result<Vec<String>, StoreError> {
        ctx.check()?;
        let mut names = Vec::new();
        if self.path.is_dir() {
            collect_entries(&self.path, "", self.crypto.ext(), &mut names)?;
        }
        names.sort();
        Ok(names)
    }

    async fn record(
        &self,
        ctx: &Context,
        paths: Vec<PathBuf>,
        message: &str,
    ) -> Result<(), StoreError> {
        self.sync.add(ctx, &paths).await?;
        self.sync.commit(ctx, message).await?;
        Ok(())
    }

    fn prune_empty_parents(&self, entry: &Path) {
        let mut dir = entry.parent();
        while let Some(current) = dir {
            if current == self.path || !current.starts_with(&self.path) {
                break;
            }
            // remove_dir fails on non-empty directories, which ends the walk.
            if fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

impl fmt::Display for SubStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Store(Alias: {}, Path: {})", self.alias, self.path.display())
    }
}

impl fmt::Debug for SubStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubStore")
            .field("alias", &self.alias)
            .field("path", &self.path)
            .field("crypto", &self.crypto.name())
            .field("sync", &self.sync.name())
            .finish()
    }
}

fn collect_entries(dir: &Path, prefix: &str, ext: &str, out: &mut Vec<String>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            warn!(path = %entry.path().display(), "skipping non UTF-8 path");
            continue;
        };
        if file_name.starts_with('.') {
            continue;
        }
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_entries(&entry.path(), &format!("{prefix}{file_name}/"), ext, out)?;
        } else if let Some(stem) = file_name
            .strip_suffix(ext)
            .and_then(|rest| rest.strip_suffix('.'))
        {
            out.push(format!("{prefix}{stem}"));
        }
    }
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().ok_or_else(|| StoreError::InvalidName {
        name: path.display().to_string(),
        reason: "entry has no parent directory".to_string(),
    })?;
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}
