//! Path and name normalization shared by the root and sub stores.

use std::{
    fs, io,
    path::{Component, Path, PathBuf},
};

/// Turn a configured store path into the form stores keep and report:
/// `~` expanded against `home`, made absolute, `.`/`..` folded. Symlinks
/// are left alone; see [`physical_path`].
pub fn clean_path(raw: &Path, home: &Path) -> io::Result<PathBuf> {
    let expanded = expand_tilde(raw, home);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()?.join(expanded)
    };
    Ok(normalize_lexically(&absolute))
}

/// The directory a cleaned path really points at, used to detect two stores
/// sharing one location. Falls back to the path itself when it cannot be
/// resolved, e.g. because it does not exist yet.
pub fn physical_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn expand_tilde(raw: &Path, home: &Path) -> PathBuf {
    let mut components = raw.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => home.join(components.as_path()),
        _ => raw.to_path_buf(),
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Popping past the root is a no-op, matching how the OS resolves `/..`.
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Validate a mount alias and strip surrounding slashes.
pub fn clean_alias(alias: &str) -> Result<String, String> {
    let trimmed = alias.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err("alias must not be empty".to_string());
    }
    check_segments(trimmed)?;
    Ok(trimmed.to_string())
}

/// Validate an entry name relative to its store, stripping a leading `/`.
pub fn clean_name(name: &str) -> Result<String, String> {
    let trimmed = name.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err("entry name must not be empty".to_string());
    }
    if trimmed.ends_with('/') {
        return Err("entry name must not end with '/'".to_string());
    }
    check_segments(trimmed)?;
    Ok(trimmed.to_string())
}

fn check_segments(value: &str) -> Result<(), String> {
    for segment in value.split('/') {
        match segment {
            "" => return Err("empty path segment".to_string()),
            "." | ".." => return Err(format!("segment '{segment}' is not allowed")),
            s if s.contains('\\') => return Err("backslash is not allowed".to_string()),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_tilde_against_home() {
        let home = Path::new("/home/keeper");
        let cleaned = clean_path(Path::new("~/stores/work"), home).expect("clean");
        assert_eq!(cleaned, PathBuf::from("/home/keeper/stores/work"));
        assert_eq!(
            clean_path(Path::new("~"), home).expect("bare tilde"),
            PathBuf::from("/home/keeper")
        );
    }

    #[test]
    fn folds_dot_segments() {
        let cleaned =
            clean_path(Path::new("/nonexistent-keeper/a/./b/../c"), Path::new("/h")).expect("clean");
        assert_eq!(cleaned, PathBuf::from("/nonexistent-keeper/a/c"));
    }

    #[test]
    fn relative_paths_become_absolute() {
        let cleaned =
            clean_path(Path::new("keeper-relative-test"), Path::new("/h")).expect("clean");
        assert!(cleaned.is_absolute());
        assert!(cleaned.ends_with("keeper-relative-test"));
    }

    #[test]
    fn existing_paths_keep_their_configured_spelling() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("real")).expect("mkdir");
        let spelled = dir.path().join("real").join("..").join("real");
        let cleaned = clean_path(&spelled, Path::new("/h")).expect("clean");
        assert_eq!(cleaned, dir.path().join("real"));
    }

    #[cfg(unix)]
    #[test]
    fn physical_path_resolves_symlinks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let real = dir.path().join("real");
        let link = dir.path().join("link");
        fs::create_dir(&real).expect("mkdir");
        std::os::unix::fs::symlink(&real, &link).expect("symlink");
        assert_ne!(clean_path(&link, Path::new("/h")).expect("clean"), real);
        assert_eq!(
            physical_path(&link),
            fs::canonicalize(&real).expect("canonical")
        );
        let missing = dir.path().join("missing");
        assert_eq!(physical_path(&missing), missing);
    }

    #[test]
    fn aliases_are_trimmed_and_validated() {
        assert_eq!(clean_alias("/work/").expect("alias"), "work");
        assert_eq!(clean_alias("team/ops").expect("nested"), "team/ops");
        assert!(clean_alias("").is_err());
        assert!(clean_alias("/").is_err());
        assert!(clean_alias("a//b").is_err());
        assert!(clean_alias("../escape").is_err());
    }

    #[test]
    fn entry_names_reject_traversal() {
        assert_eq!(clean_name("/web/github").expect("name"), "web/github");
        assert!(clean_name("").is_err());
        assert!(clean_name("dir/").is_err());
        assert!(clean_name("a/../../etc/passwd").is_err());
    }
}
