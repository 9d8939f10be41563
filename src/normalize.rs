//! Reference normalization.
//!
//! Turns user-supplied locations and `$ref` strings into [`CanonicalId`]s and
//! [`RefPointer`]s. File ids are absolute, lexically normalized paths; every
//! other id is a URL as normalized by the `url` crate, without fragment.

use std::path::{Component, Path, PathBuf};

use url::Url;

use crate::error::RefError;
use crate::pointer::JsonPointer;
use crate::types::{CanonicalId, RefPointer};

/// Check if a string is an absolute URL (has a scheme of two or more
/// characters, so Windows drive letters are not mistaken for schemes).
pub fn is_url(s: &str) -> bool {
    match s.split_once(':') {
        Some((scheme, _)) => {
            scheme.len() > 1
                && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Split a reference into its location and fragment parts.
///
/// The fragment keeps its leading `#`.
pub fn split_fragment(reference: &str) -> (&str, Option<&str>) {
    match reference.find('#') {
        Some(idx) => (&reference[..idx], Some(&reference[idx..])),
        None => (reference, None),
    }
}

/// Canonical id for a root document given as a path or URL.
///
/// Relative paths resolve against the current working directory.
pub fn root_id(source: &str) -> Result<CanonicalId, RefError> {
    let (location, _) = split_fragment(source);
    if is_url(location) {
        return url_id(location, source, &CanonicalId::new(source));
    }
    let path = Path::new(location);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        current_dir().join(path)
    };
    Ok(path_id(&absolute))
}

/// Canonical id for an in-memory document with no location of its own:
/// the current working directory, as a directory (trailing separator), so
/// relative refs resolve against it.
pub fn memory_root_id() -> CanonicalId {
    let mut dir = path_id(&current_dir()).as_str().to_string();
    if !dir.ends_with('/') {
        dir.push('/');
    }
    CanonicalId::new(dir)
}

/// Resolve a `$ref` string found in the document `base`.
///
/// # Errors
///
/// Returns `RefError::InvalidReference` when the fragment is not a JSON
/// Pointer or the location cannot be resolved against `base`.
pub fn resolve_reference(reference: &str, base: &CanonicalId) -> Result<RefPointer, RefError> {
    let invalid = |message: String| RefError::InvalidReference {
        reference: reference.to_string(),
        id: base.clone(),
        path: String::new(),
        message,
    };

    let (location, fragment) = split_fragment(reference);
    let fragment = match fragment {
        Some(fragment) => JsonPointer::from_fragment(fragment).map_err(invalid)?,
        None => JsonPointer::root(),
    };

    let target = if location.is_empty() {
        base.clone()
    } else {
        resolve_location(location, base).map_err(invalid)?
    };

    Ok(RefPointer { target, fragment })
}

/// Resolve a location (no fragment) against the id of its containing document.
fn resolve_location(location: &str, base: &CanonicalId) -> Result<CanonicalId, String> {
    if is_url(location) {
        let url = Url::parse(location).map_err(|e| e.to_string())?;
        return Ok(id_from_url(url));
    }

    if is_url(base.as_str()) {
        let base_url = Url::parse(base.as_str()).map_err(|e| e.to_string())?;
        if base_url.cannot_be_a_base() {
            return Err(format!("cannot resolve relative location against {}", base));
        }
        let joined = base_url.join(location).map_err(|e| e.to_string())?;
        return Ok(id_from_url(joined));
    }

    // File refs may be URI-encoded (`my%20schema.json`).
    let decoded = urlencoding::decode(location).map_err(|e| e.to_string())?;
    let path = Path::new(decoded.as_ref());
    if path.is_absolute() {
        return Ok(path_id(path));
    }
    Ok(path_id(&base_dir(base).join(path)))
}

fn url_id(location: &str, source: &str, id: &CanonicalId) -> Result<CanonicalId, RefError> {
    let url = Url::parse(location).map_err(|e| RefError::InvalidReference {
        reference: source.to_string(),
        id: id.clone(),
        path: String::new(),
        message: e.to_string(),
    })?;
    Ok(id_from_url(url))
}

fn id_from_url(mut url: Url) -> CanonicalId {
    url.set_fragment(None);
    if url.scheme() == "file" {
        if let Ok(path) = url.to_file_path() {
            return path_id(&path);
        }
    }
    CanonicalId::new(String::from(url))
}

/// Directory that relative refs in a file document resolve against.
pub fn base_dir(id: &CanonicalId) -> PathBuf {
    let s = id.as_str();
    if s.ends_with('/') || s.ends_with(std::path::MAIN_SEPARATOR) {
        return PathBuf::from(s);
    }
    Path::new(s)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}

fn path_id(path: &Path) -> CanonicalId {
    CanonicalId::new(normalize_path(path).to_string_lossy().into_owned())
}

/// Lexically normalize a path: drop `.` components and fold `..` into
/// their parent. Never touches the file system.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    out
}

/// Path of `target` relative to the directory `base`, using `/` separators.
pub fn relative_path(base: &Path, target: &Path) -> String {
    let base: Vec<Component> = base.components().collect();
    let target: Vec<Component> = target.components().collect();
    let common = base
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = Vec::new();
    for _ in common..base.len() {
        parts.push("..".to_string());
    }
    for component in &target[common..] {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }
    parts.join("/")
}

fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))
}
