use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{paths::physical_path, PathConflict, StoreError, SubStore};

/// Immutable snapshot of the mounted stores. Replaced wholesale on change.
#[derive(Debug, Clone, Default)]
pub(crate) struct MountTable {
    pub(crate) mounts: BTreeMap<String, Arc<SubStore>>,
}

impl MountTable {
    /// Longest alias that equals `name` or prefixes it at a `/` boundary.
    pub(crate) fn longest_match(&self, name: &str) -> Option<(&str, &Arc<SubStore>)> {
        self.mounts
            .iter()
            .filter(|(alias, _)| is_under(name, alias))
            .max_by_key(|(alias, _)| alias.len())
            .map(|(alias, store)| (alias.as_str(), store))
    }

    /// True if `alias` is mounted somewhere below `name`.
    pub(crate) fn has_mount_below(&self, name: &str) -> bool {
        let name = name.trim_matches('/');
        self.mounts
            .keys()
            .any(|alias| name.is_empty() || is_under(alias, name))
    }

    /// Reject any two stores, base included, sharing one physical path.
    /// Every shared path is reported, not just the first.
    pub(crate) fn check_conflicts(&self, base: &SubStore) -> Result<(), StoreError> {
        let stores = std::iter::once((base.alias(), base.path()))
            .chain(self.mounts.iter().map(|(alias, store)| (alias.as_str(), store.path())));
        let conflicts = group_by_physical_path(stores);
        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(StoreError::MountConflict { conflicts })
        }
    }
}

fn group_by_physical_path<'a>(
    stores: impl Iterator<Item = (&'a str, &'a Path)>,
) -> Vec<PathConflict> {
    let mut by_path: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
    for (alias, path) in stores {
        by_path
            .entry(physical_path(path))
            .or_default()
            .push(alias.to_string());
    }
    by_path
        .into_iter()
        .filter(|(_, aliases)| aliases.len() > 1)
        .map(|(path, aliases)| PathConflict { path, aliases })
        .collect()
}

/// `name` equals `prefix` or lies below it.
pub(crate) fn is_under(name: &str, prefix: &str) -> bool {
    name == prefix
        || name
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_every_shared_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let p1 = dir.path().join("p1");
        let p2 = dir.path().join("p2");
        let solo = dir.path().join("solo");
        let stores = [
            ("", solo.as_path()),
            ("a", p1.as_path()),
            ("b", p1.as_path()),
            ("c", p2.as_path()),
            ("d", p2.as_path()),
        ];
        let conflicts = group_by_physical_path(stores.into_iter());
        assert_eq!(
            conflicts,
            [
                PathConflict {
                    path: p1.clone(),
                    aliases: vec!["a".into(), "b".into()],
                },
                PathConflict {
                    path: p2.clone(),
                    aliases: vec!["c".into(), "d".into()],
                },
            ]
        );
    }

    #[test]
    fn prefix_matching_respects_segment_boundaries() {
        assert!(is_under("work", "work"));
        assert!(is_under("work/mail", "work"));
        assert!(!is_under("workshop/mail", "work"));
        assert!(!is_under("wor", "work"));
    }
}
