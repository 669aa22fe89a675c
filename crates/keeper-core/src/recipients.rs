//! Recipient sets and the plain-text ID file that persists them.

use std::{
    fs, io,
    io::Write,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

/// Ordered, duplicate-free list of recipient identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientSet {
    ids: Vec<String>,
}

impl RecipientSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse ID file contents: one identifier per line, blanks ignored.
    pub fn parse(contents: &str) -> Self {
        contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect()
    }

    /// Returns `false` if the identifier was already present.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        let id = id.trim();
        if id.is_empty() || self.contains(id) {
            return false;
        }
        self.ids.push(id.to_string());
        true
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.ids.len();
        self.ids.retain(|existing| existing != id);
        self.ids.len() != before
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|existing| existing == id)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.ids
    }

    /// File body: each identifier on its own line, newline-terminated.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for id in &self.ids {
            out.push_str(id);
            out.push('\n');
        }
        out
    }
}

impl<S: Into<String>> FromIterator<S> for RecipientSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut set = RecipientSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl IntoIterator for RecipientSet {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.into_iter()
    }
}

/// `<root>/<file_name>` accessor for a store's ID file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdFile {
    path: PathBuf,
}

impl IdFile {
    pub fn new(store_root: &Path, file_name: &str) -> Self {
        Self {
            path: store_root.join(file_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// A missing file reads as an empty set.
    pub fn load(&self) -> io::Result<RecipientSet> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(RecipientSet::parse(&contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(RecipientSet::new()),
            Err(err) => Err(err),
        }
    }

    /// Atomically replace the file with `set`.
    pub fn save(&self, set: &RecipientSet) -> io::Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "id file has no parent"))?;
        fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(set.render().as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
