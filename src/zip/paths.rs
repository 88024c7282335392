//! Mapping between file system paths and archive member names.

use log::debug;
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Result, ZipError};

/// One file system object about to be archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    pub path: PathBuf,
    /// Member name, `/`-separated, with a trailing `/` for directories.
    pub name: String,
    /// Directory that `name` is relative to.
    pub base: PathBuf,
    pub is_dir: bool,
    pub is_symlink: bool,
}

/// Compute the member name for `path`.
///
/// With `relative_to`, the prefix is stripped and must match whole leading
/// components. Without it, root and drive prefixes are dropped and relative
/// paths are kept as given.
///
/// # Returns
///
/// The member name and the directory it is relative to.
pub fn archive_name(path: &Path, relative_to: Option<&Path>, is_dir: bool) -> Result<(String, PathBuf)> {
    let (rest, base) = match relative_to {
        Some(prefix) => {
            let rest = path.strip_prefix(prefix).map_err(|_| {
                ZipError::invalid_path(
                    path,
                    format!("not located under relative-to prefix [{}]", prefix.display()),
                )
            })?;
            (rest, prefix.to_path_buf())
        }
        None => {
            let mut base = PathBuf::new();
            let mut rest = path;
            for component in path.components() {
                match component {
                    Component::Prefix(_) | Component::RootDir => {
                        base.push(component);
                        rest = rest.strip_prefix(component).unwrap_or(rest);
                    }
                    _ => break,
                }
            }
            (rest, base)
        }
    };

    let mut parts = Vec::new();
    for component in rest.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().replace('\\', "/")),
            Component::CurDir => {}
            _ => return Err(ZipError::invalid_path(path, "'..' is not allowed in member names")),
        }
    }
    if parts.is_empty() {
        return Err(ZipError::invalid_path(path, "empty member name"));
    }

    let mut name = parts.join("/");
    if is_dir {
        name.push('/');
    }
    Ok((name, base))
}

/// Expand one append source into the items to archive.
///
/// A directory contributes its immediate children (sub-directories as
/// directory members), or with `recursive` every file below it plus every
/// empty directory. A directory without children is archived as itself.
/// Paths equal to any of `exclude` are skipped.
pub fn collect_sources(
    source: &Path,
    relative_to: Option<&Path>,
    recursive: bool,
    exclude: &[PathBuf],
) -> Result<Vec<SourceItem>> {
    let meta = fs::symlink_metadata(source)
        .map_err(|e| ZipError::invalid_path(source, format!("cannot access source: {e}")))?;

    let item = |path: &Path, is_dir: bool, is_symlink: bool| -> Result<SourceItem> {
        let (name, base) = archive_name(path, relative_to, is_dir)?;
        Ok(SourceItem {
            path: path.to_path_buf(),
            name,
            base,
            is_dir,
            is_symlink,
        })
    };

    if !meta.is_dir() {
        return Ok(vec![item(source, false, meta.file_type().is_symlink())?]);
    }

    let exclude: Vec<PathBuf> = exclude.iter().filter_map(|p| std::path::absolute(p).ok()).collect();
    let is_excluded = |path: &Path| {
        std::path::absolute(path)
            .map(|p| exclude.contains(&p))
            .unwrap_or(false)
    };

    let mut walker = WalkDir::new(source).min_depth(1).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut items = Vec::new();
    let mut saw_children = false;
    for entry in walker {
        let entry = entry?;
        saw_children = true;
        if is_excluded(entry.path()) {
            debug!("Excluding [{}] from its own archive", entry.path().display());
            continue;
        }

        let file_type = entry.file_type();
        if file_type.is_dir() {
            if !recursive || is_empty_dir(entry.path())? {
                items.push(item(entry.path(), true, false)?);
            }
        } else {
            items.push(item(entry.path(), false, file_type.is_symlink())?);
        }
    }

    if !saw_children {
        items.push(item(source, true, false)?);
    }
    if items.is_empty() {
        return Err(ZipError::invalid_path(source, "nothing to archive"));
    }
    Ok(items)
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(path)
        .map_err(|e| ZipError::invalid_path(path, format!("cannot read directory: {e}")))?;
    Ok(entries.next().is_none())
}

/// Resolve member `name` below `output_dir`, refusing names that escape it.
pub fn safe_join(output_dir: &Path, name: &str) -> Result<PathBuf> {
    let mut path = output_dir.to_path_buf();
    let mut depth = 0usize;
    for part in name.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => return Err(ZipError::invalid_path(name, "member name escapes the output directory")),
            part => {
                if Path::new(part).components().any(|c| !matches!(c, Component::Normal(_))) {
                    return Err(ZipError::invalid_path(name, "member name is not a relative path"));
                }
                path.push(part);
                depth += 1;
            }
        }
    }
    if depth == 0 {
        return Err(ZipError::invalid_path(name, "empty member name"));
    }
    Ok(path)
}

/// Fail if an existing directory between `output_dir` and `dest` is a
/// symbolic link. A link extracted earlier would otherwise redirect writes
/// outside `output_dir`.
pub fn reject_linked_parents(output_dir: &Path, dest: &Path) -> Result<()> {
    let relative = dest
        .strip_prefix(output_dir)
        .map_err(|_| ZipError::invalid_path(dest, "not below the output directory"))?;
    let mut current = output_dir.to_path_buf();
    let mut parts = relative.components().peekable();
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            break;
        }
        current.push(part);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(ZipError::invalid_path(
                    dest,
                    format!("parent [{}] is a symbolic link", current.display()),
                ));
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    Ok(())
}

/// Ancestor directory names of a member, shallowest first: `a/b/c` gives `a`, `a/b`.
pub fn parent_names(name: &str) -> Vec<&str> {
    let trimmed = name.trim_end_matches('/');
    trimmed
        .match_indices('/')
        .map(|(i, _)| &trimmed[..i])
        .filter(|parent| !parent.is_empty())
        .collect()
}
