//! Source ↔ mirror path translation.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{LinkError, Result};
use crate::rule::LinkRule;

/// Maps paths between a rule's source tree and its mirror tree.
///
/// Translation is purely lexical: `.` and `..` components are folded before
/// the root prefix is stripped, so a path that walks out of the root is
/// rejected instead of being mapped somewhere unexpected.
#[derive(Debug, Clone)]
pub struct PathTranslator {
    source_root: PathBuf,
    mirror_root: PathBuf,
}

impl PathTranslator {
    pub fn new(rule: &LinkRule) -> Self {
        Self {
            source_root: rule.source_root().to_path_buf(),
            mirror_root: rule.mirror_root().to_path_buf(),
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn mirror_root(&self) -> &Path {
        &self.mirror_root
    }

    /// Whether `path` lies inside the source root (the root itself included).
    pub fn contains(&self, path: &Path) -> bool {
        relative_to(&self.source_root, path).is_some()
    }

    /// Path of `path` relative to the source root.
    pub fn relative(&self, path: &Path) -> Result<PathBuf> {
        relative_to(&self.source_root, path).ok_or_else(|| LinkError::OutsideRoot {
            path: path.to_path_buf(),
            root: self.source_root.clone(),
        })
    }

    pub fn to_mirror(&self, path: &Path) -> Result<PathBuf> {
        let rel = self.relative(path)?;
        Ok(self.mirror_root.join(rel))
    }

    pub fn to_source(&self, mirror_path: &Path) -> Result<PathBuf> {
        let rel =
            relative_to(&self.mirror_root, mirror_path).ok_or_else(|| LinkError::OutsideRoot {
                path: mirror_path.to_path_buf(),
                root: self.mirror_root.clone(),
            })?;
        Ok(self.source_root.join(rel))
    }
}

/// Create every missing parent directory of `path`. Succeeds silently when
/// they already exist.
pub fn ensure_parent_dirs(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .map_err(|err| LinkError::io("create parent directories of", path, err)),
        _ => Ok(()),
    }
}

fn relative_to(root: &Path, path: &Path) -> Option<PathBuf> {
    if !path.is_absolute() {
        return None;
    }
    let normalized = normalize(path);
    normalized.strip_prefix(root).ok().map(Path::to_path_buf)
}

pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                clean.push(component)
            }
            Component::CurDir => {}
            Component::ParentDir => {
                // Popping at the root is a no-op, like the kernel's "/..".
                clean.pop();
            }
        }
    }
    clean
}
