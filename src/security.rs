//! Workspace path validation.
//!
//! Every workspace is checked once before a sandbox is created for it. The
//! filesystem root and system directories are refused; a couple of temp
//! subtrees under `/var` are allowed back. An optional allowed root confines
//! all workspaces to one directory.

use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::error::SecurityError;

/// Paths refused only on exact match.
const BLOCKED_EXACT: &[&str] = &["/"];

/// Paths refused along with everything under them.
const BLOCKED_TREES: &[&str] = &[
    "/etc", "/var", "/usr", "/bin", "/sbin", "/boot", "/dev", "/proc", "/sys", "/root",
];

/// Subtrees of blocked trees that are still acceptable (per-user temp dirs).
const ALLOWED_SUBTREES: &[&str] = &["/var/folders", "/var/tmp"];

/// Check `workspace` and return its resolved absolute path.
pub fn validate_workspace(
    workspace: &Path,
    allowed_root: Option<&Path>,
) -> Result<PathBuf, SecurityError> {
    let resolved = resolve(workspace);

    if BLOCKED_EXACT.iter().any(|b| resolved == Path::new(b)) {
        warn!(workspace = %resolved.display(), "Blocked workspace path (exact match)");
        return Err(SecurityError::BlockedPath {
            path: resolved,
            reason: "filesystem root".to_string(),
        });
    }

    if !ALLOWED_SUBTREES.iter().any(|a| is_under(&resolved, Path::new(a))) {
        if let Some(tree) = BLOCKED_TREES.iter().find(|b| is_under(&resolved, Path::new(b))) {
            warn!(workspace = %resolved.display(), tree, "Blocked workspace path (system directory)");
            return Err(SecurityError::BlockedPath {
                path: resolved,
                reason: format!("inside system directory {tree}"),
            });
        }
    }

    if let Some(root) = allowed_root {
        let root = resolve(root);
        if !resolved.starts_with(&root) {
            warn!(
                workspace = %resolved.display(),
                root = %root.display(),
                "Workspace outside allowed root"
            );
            return Err(SecurityError::OutsideRoot {
                path: resolved,
                root,
            });
        }
    }

    Ok(resolved)
}

/// Under `tree` either as written or after resolving symlinks (`/var` is a
/// link to `/private/var` on some systems).
fn is_under(path: &Path, tree: &Path) -> bool {
    path.starts_with(tree) || path.starts_with(resolve(tree))
}

/// Absolute, lexically normalized path with the longest existing prefix
/// canonicalized. Works for paths that do not exist yet.
fn resolve(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };
    let normalized = normalize_lexical(&absolute);

    let mut ancestor = normalized.as_path();
    let mut tail = Vec::new();
    loop {
        if let Ok(canonical) = ancestor.canonicalize() {
            return tail.into_iter().rev().fold(canonical, |acc, part| acc.join(part));
        }
        match (ancestor.file_name(), ancestor.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name);
                ancestor = parent;
            }
            _ => return normalized.clone(),
        }
    }
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize_lexical(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if components
                    .last()
                    .is_some_and(|c| matches!(c, Component::Normal(_)))
                {
                    components.pop();
                }
            }
            Component::CurDir => {}
            other => components.push(other),
        }
    }
    components.iter().collect()
}
