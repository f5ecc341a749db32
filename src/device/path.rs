//! Block-to-character device path translation
//!
//! NVMe passthrough runs against the NVMe-generic character device
//! (`/dev/ngXnY`), the sibling of the block node (`/dev/nvmeXnY`). Udev
//! setups commonly point at either through symlinks, so the path is first
//! resolved link by link and then rewritten on the concrete name.

use std::path::{Path, PathBuf};

/// Hops before a symlink chain is assumed to be a cycle
const MAX_SYMLINK_HOPS: usize = 32;

/// Resolve a device path for passthrough use
pub fn passthrough_path(path: &Path) -> PathBuf {
    translate(&resolve_symlinks(path))
}

/// Follow symlinks step by step, resolving relative targets against the
/// directory that contains the link
fn resolve_symlinks(path: &Path) -> PathBuf {
    let mut current = path.to_path_buf();
    for _ in 0..MAX_SYMLINK_HOPS {
        match std::fs::read_link(&current) {
            Ok(target) => {
                current = if target.is_relative() {
                    match current.parent() {
                        Some(parent) => parent.join(&target),
                        None => target,
                    }
                } else {
                    target
                };
            }
            // Not a symlink (or not readable): this is the concrete path
            Err(_) => break,
        }
    }
    current
}

/// Rewrite a resolved block-device name to its character-device sibling
///
/// `nvme` without `ng` gets its first `nvme` replaced; a name already in the
/// `ng` family passes through; anything else is accepted with a warning.
fn translate(resolved: &Path) -> PathBuf {
    let name = resolved.to_string_lossy();
    let has_nvme = name.contains("nvme");
    let has_ng = name.contains("ng");

    if has_nvme && !has_ng {
        return PathBuf::from(name.replacen("nvme", "ng", 1));
    }
    if has_ng && !has_nvme {
        return resolved.to_path_buf();
    }

    eprintln!(
        "Warning: device path '{}' doesn't appear to be an NVMe device",
        name
    );
    resolved.to_path_buf()
}
