//! Stepwise translation between cleartext paths and obfuscated backend
//! paths.
//!
//! Every filemap is located under its own obfuscated parent, so translation
//! has to traverse the filemap chain one directory at a time: each component
//! is resolved against the filemap of the directory accumulated so far, and
//! the cursors (cleartext on one side, backend on the other) advance
//! together. A component equal to the sidecar name switches to verbatim
//! pass-through for the rest of the path.
//!
//! `to_backend_path` shares the filemap store's side effect: translating a
//! path ensures every prefix component has a filemap entry, which is what
//! `mkdir_all` and file creation rely on.

use crate::error::FsError;
use crate::volume::config::SIDECAR_DIR;
use crate::volume::filemap::FilemapStore;
use crate::volume::VolumeCtx;

/// Non-empty, non-`.` components of a slash-separated path.
pub(crate) fn components(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect()
}

/// Join a directory and a child name; `"."` is the identity directory.
pub(crate) fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() || dir == "." {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Split into `(parent, basename)`; the parent of a top-level name is `"."`.
pub(crate) fn split_parent(path: &str) -> (String, String) {
    let comps = components(path);
    match comps.split_last() {
        Some((base, parents)) if !parents.is_empty() => {
            (parents.join("/"), (*base).to_string())
        }
        Some((base, _)) => (".".to_string(), (*base).to_string()),
        None => (".".to_string(), String::new()),
    }
}

/// Basename of a path; `"."` for the root.
pub(crate) fn basename(path: &str) -> String {
    components(path)
        .last()
        .map(|s| s.to_string())
        .unwrap_or_else(|| ".".to_string())
}

/// Translate a cleartext path to its obfuscated backend path.
///
/// The empty and `.` paths map to `.`. Side effect: every prefix component
/// gains a filemap entry if it had none.
pub(crate) fn to_backend_path(
    store: &FilemapStore,
    ctx: &VolumeCtx<'_>,
    path: &str,
) -> Result<String, FsError> {
    let comps = components(path);
    if comps.is_empty() {
        return Ok(".".to_string());
    }

    let mut backend = Vec::with_capacity(comps.len());
    let mut current = ".".to_string();
    for (i, comp) in comps.iter().enumerate() {
        if *comp == SIDECAR_DIR {
            backend.extend(comps[i..].iter().map(|c| c.to_string()));
            break;
        }
        let token = store.obfuscate(ctx, &current, comp)?;
        backend.push(token);
        current = join(&current, comp);
    }
    Ok(backend.join("/"))
}

/// Translate an obfuscated backend path back to cleartext.
///
/// Symmetric inverse of [`to_backend_path`]; used for symbolic-link target
/// resolution. The cleartext cursor advances through the *deobfuscated*
/// directories so each lookup consults the right filemap.
pub(crate) fn to_cleartext_path(
    store: &FilemapStore,
    ctx: &VolumeCtx<'_>,
    obf_path: &str,
) -> Result<String, FsError> {
    let comps = components(obf_path);
    if comps.is_empty() {
        return Ok(".".to_string());
    }

    let mut cleartext = Vec::with_capacity(comps.len());
    let mut current = ".".to_string();
    for (i, comp) in comps.iter().enumerate() {
        if *comp == SIDECAR_DIR {
            cleartext.extend(comps[i..].iter().map(|c| c.to_string()));
            break;
        }
        let name = store.deobfuscate(ctx, &current, comp)?;
        current = join(&current, &name);
        cleartext.push(name);
    }
    Ok(cleartext.join("/"))
}
