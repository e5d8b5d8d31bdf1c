//! Content-Addressed Asset Rewriting
//!
//! Every local asset a room references is copied once into
//! `<out>/<slug>/assets/<stem>.<hash>.<ext>` and the reference is rewritten to
//! the published URL. Identical bytes always land on the same name, and
//! references that already point at this bundle are left alone, so running
//! the rewriter over its own output is a no-op.

pub mod markup;
pub mod visit;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::hashing::asset_digest;
use crate::layout::BundleLayout;
use crate::publish::write_atomic;
use crate::room::RoomDescription;

pub const MODEL_EXTENSIONS: &[&str] = &["glb", "gltf", "obj", "fbx", "stl"];
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "svg", "avif", "ktx2", "hdr"];

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("asset {path:?} referenced by {referenced_by} not found at {}", .resolved.display())]
    Missing {
        path: String,
        referenced_by: String,
        resolved: PathBuf,
    },

    #[error("device '{alias}' model {model:?} has no file extension; point it at a concrete model file (.glb, .gltf, ...)")]
    AmbiguousModel { alias: String, model: String },

    #[error("device '{alias}' model {model:?} has unsupported extension .{ext}; expected one of {}", MODEL_EXTENSIONS.join(", "))]
    UnsupportedModel { alias: String, model: String, ext: String },

    #[error("asset {path:?} referenced by {referenced_by} resolves outside the asset root {}", .root.display())]
    OutsideRoot {
        path: String,
        referenced_by: String,
        root: PathBuf,
    },

    #[error("failed to read asset {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write asset {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Reference as the author wrote it (first occurrence).
    pub original: String,
    pub url: String,
    pub hash: String,
    pub bytes: u64,
    pub ext: String,
}

#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    pub document: RoomDescription,
    /// Ordered by published URL.
    pub records: Vec<AssetRecord>,
    pub replacements: usize,
    /// Files written into the asset directory (or that would be, on a dry run).
    pub copied: usize,
}

/// Lowercased extension of the path part of a reference, ignoring any query
/// string or fragment.
pub fn asset_extension(reference: &str) -> Option<String> {
    let path = reference.split(['?', '#']).next().unwrap_or(reference);
    let file = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn is_remote(reference: &str) -> bool {
    let lower = reference.trim_start().to_ascii_lowercase();
    if lower.starts_with("//") || lower.starts_with("data:") {
        return true;
    }
    match lower.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        }
        None => false,
    }
}

pub fn is_local_asset(reference: &str) -> bool {
    if reference.trim().is_empty() || is_remote(reference) {
        return false;
    }
    asset_extension(reference)
        .is_some_and(|ext| MODEL_EXTENSIONS.contains(&ext.as_str()) || IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

fn asset_key_regex() -> &'static Regex {
    static ONCE: OnceLock<Regex> = OnceLock::new();
    ONCE.get_or_init(|| Regex::new(r"(?i)(url|image|texture|src)").expect("valid asset key regex"))
}

/// Decor strings worth offering to the rewriter: asset-like key or asset-like value.
pub fn looks_like_asset(key: Option<&str>, value: &str) -> bool {
    key.is_some_and(|k| asset_key_regex().is_match(k)) || is_local_asset(value)
}

/// Run-scoped caches. Built fresh for every `rewrite` call.
#[derive(Default)]
struct RewriteState {
    by_path: HashMap<PathBuf, String>,
    by_digest: HashMap<String, String>,
    records: BTreeMap<String, AssetRecord>,
    replacements: usize,
    copied: usize,
}

pub struct AssetRewriter {
    public_root: PathBuf,
    assets_dir: PathBuf,
    url_prefix: String,
    dry_run: bool,
}

impl AssetRewriter {
    pub fn new(public_root: impl Into<PathBuf>, layout: &BundleLayout, dry_run: bool) -> Self {
        Self {
            public_root: public_root.into(),
            assets_dir: layout.assets_dir(),
            url_prefix: layout.asset_url_prefix(),
            dry_run,
        }
    }

    pub fn is_published(&self, reference: &str) -> bool {
        reference.starts_with(&self.url_prefix)
    }

    /// Rewrite every local asset reference in `doc`, returning a new document.
    pub fn rewrite(&self, doc: &RoomDescription) -> Result<RewriteOutcome, AssetError> {
        let mut state = RewriteState::default();
        let mut out = doc.clone();

        for device in out.devices.iter_mut() {
            if !is_remote(&device.model) {
                match asset_extension(&device.model) {
                    None => {
                        return Err(AssetError::AmbiguousModel {
                            alias: device.alias.clone(),
                            model: device.model.clone(),
                        })
                    }
                    Some(ext) if !MODEL_EXTENSIONS.contains(&ext.as_str()) => {
                        return Err(AssetError::UnsupportedModel {
                            alias: device.alias.clone(),
                            model: device.model.clone(),
                            ext,
                        })
                    }
                    Some(_) => {}
                }
            }
            let referenced_by = format!("device '{}'", device.alias);
            if let Some(url) = self.publish(&mut state, &device.model, &referenced_by)? {
                device.model = url;
                state.replacements += 1;
            }
        }

        for decor in out.structure.decor.iter_mut() {
            let referenced_by = format!("decor '{}' ({})", decor.id, decor.kind);
            for (key, value) in decor.extra.iter_mut() {
                let count = visit::rewrite_strings(
                    value,
                    Some(key.as_str()),
                    key,
                    &looks_like_asset,
                    &mut |path: &str, s: &str| {
                        let by = format!("{referenced_by} field {path}");
                        self.publish(&mut state, s, &by)
                    },
                )?;
                state.replacements += count;
            }
        }

        for board in out.boards.iter_mut() {
            let referenced_by = format!("board '{}'", board.id);
            let mut replacements = HashMap::new();
            for target in markup::image_targets(&board.markdown) {
                if let Some(url) = self.publish(&mut state, &target, &referenced_by)? {
                    replacements.insert(target, url);
                }
            }
            if !replacements.is_empty() {
                board.markdown = markup::replace_image_targets(&board.markdown, &replacements);
                state.replacements += replacements.len();
            }
        }

        info!(
            replacements = state.replacements,
            copied = state.copied,
            assets = state.records.len(),
            dry_run = self.dry_run,
            "asset rewrite complete"
        );

        Ok(RewriteOutcome {
            document: out,
            records: state.records.into_values().collect(),
            replacements: state.replacements,
            copied: state.copied,
        })
    }

    /// Published URL for `reference`, or `None` when it is not ours to touch.
    fn publish(
        &self,
        state: &mut RewriteState,
        reference: &str,
        referenced_by: &str,
    ) -> Result<Option<String>, AssetError> {
        if !is_local_asset(reference) || self.is_published(reference) {
            return Ok(None);
        }

        let resolved = self.resolve(reference);
        if !resolved.is_file() {
            return Err(AssetError::Missing {
                path: reference.to_string(),
                referenced_by: referenced_by.to_string(),
                resolved,
            });
        }
        let canonical = fs::canonicalize(&resolved).map_err(|source| AssetError::Read {
            path: resolved.clone(),
            source,
        })?;
        let root = fs::canonicalize(&self.public_root).map_err(|source| AssetError::Read {
            path: self.public_root.clone(),
            source,
        })?;
        if !canonical.starts_with(&root) {
            return Err(AssetError::OutsideRoot {
                path: reference.to_string(),
                referenced_by: referenced_by.to_string(),
                root,
            });
        }
        if let Some(url) = state.by_path.get(&canonical) {
            return Ok(Some(url.clone()));
        }

        let bytes = fs::read(&canonical).map_err(|source| AssetError::Read {
            path: canonical.clone(),
            source,
        })?;
        let hash = asset_digest(&bytes);
        let ext = asset_extension(reference).unwrap_or_default();

        let filename = match state.by_digest.get(&hash) {
            Some(existing) => {
                debug!(%reference, %existing, "identical content already published");
                existing.clone()
            }
            None => {
                let stem = canonical
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("asset");
                let name = format!("{stem}.{hash}.{ext}");
                if self.store(&name, &bytes)? {
                    state.copied += 1;
                }
                let url = format!("{}{}", self.url_prefix, name);
                state.records.insert(
                    url.clone(),
                    AssetRecord {
                        original: reference.to_string(),
                        url,
                        hash: hash.clone(),
                        bytes: bytes.len() as u64,
                        ext,
                    },
                );
                state.by_digest.insert(hash, name.clone());
                name
            }
        };

        let url = format!("{}{}", self.url_prefix, filename);
        state.by_path.insert(canonical, url.clone());
        Ok(Some(url))
    }

    fn resolve(&self, reference: &str) -> PathBuf {
        let path = reference.split(['?', '#']).next().unwrap_or(reference);
        let relative = path.trim_start_matches('/');
        self.public_root.join(Path::new(relative))
    }

    /// Write into the asset directory unless the name already exists. Returns
    /// whether a file was (or, dry, would be) written.
    fn store(&self, name: &str, bytes: &[u8]) -> Result<bool, AssetError> {
        let dest = self.assets_dir.join(name);
        if dest.exists() {
            debug!(dest = %dest.display(), "asset already present");
            return Ok(false);
        }
        if self.dry_run {
            debug!(dest = %dest.display(), "dry run: would copy asset");
            return Ok(true);
        }
        write_atomic(&dest, bytes).map_err(|source| AssetError::Write { path: dest.clone(), source })?;
        debug!(dest = %dest.display(), bytes = bytes.len(), "asset copied");
        Ok(true)
    }
}
