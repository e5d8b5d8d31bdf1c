//! Bundle Publication - atomic writes, then best-effort side steps
//!
//! The final document and manifest are written through a temp file in the
//! same directory and renamed into place, so readers see either the old file
//! or the new one. Preview and index run only after both landed and can never
//! fail the publish.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};

use crate::layout::BundleLayout;
use crate::manifest::{BundleFiles, Manifest};
use crate::preview::{Screenshotter, PREVIEW_TIMEOUT};
use crate::room::RoomDescription;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Write `data` to `path` via a sibling temp file and a rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PublishError> {
    let mut body = serde_json::to_vec_pretty(value)?;
    body.push(b'\n');
    write_atomic(path, &body).map_err(|source| PublishError::Write { path: path.to_path_buf(), source })
}

/// Outcome of an optional step that is not allowed to fail the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum SideEffect {
    Skipped,
    Done,
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub dry_run: bool,
    pub update_index: bool,
    pub preview_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PublishResult {
    pub final_path: PathBuf,
    pub manifest_path: PathBuf,
    /// False on a dry run.
    pub written: bool,
    pub preview: SideEffect,
    pub index: SideEffect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub slug: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub files: BundleFiles,
}

impl IndexEntry {
    pub fn from_manifest(manifest: &Manifest) -> Self {
        Self {
            slug: manifest.slug.clone(),
            title: manifest.meta.title.clone(),
            summary: manifest.meta.summary.clone(),
            files: manifest.files.clone(),
        }
    }
}

/// Existing index entries; anything unreadable counts as an empty index.
pub fn read_index(path: &Path) -> Vec<IndexEntry> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return vec![],
        Err(e) => {
            warn!(path = %path.display(), error = %e, "index unreadable, starting fresh");
            return vec![];
        }
    };
    match serde_json::from_str(&content) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "index corrupt, starting fresh");
            vec![]
        }
    }
}

/// Replace or append `entry`, keep entries sorted by slug, rewrite atomically.
pub fn upsert_index(path: &Path, entry: IndexEntry) -> Result<Vec<IndexEntry>, PublishError> {
    let mut entries = read_index(path);
    entries.retain(|e| e.slug != entry.slug);
    entries.push(entry);
    entries.sort_by(|a, b| a.slug.cmp(&b.slug));
    write_json(path, &entries)?;
    Ok(entries)
}

pub struct Publisher {
    screenshotter: Box<dyn Screenshotter>,
}

impl Publisher {
    pub fn new(screenshotter: Box<dyn Screenshotter>) -> Self {
        Self { screenshotter }
    }

    pub fn publish(
        &self,
        layout: &BundleLayout,
        document: &RoomDescription,
        manifest: &Manifest,
        options: &PublishOptions,
    ) -> Result<PublishResult, PublishError> {
        let final_path = layout.final_path();
        let manifest_path = layout.manifest_path();

        if options.dry_run {
            info!(slug = layout.slug(), "dry run: nothing written");
            return Ok(PublishResult {
                final_path,
                manifest_path,
                written: false,
                preview: SideEffect::Skipped,
                index: SideEffect::Skipped,
            });
        }

        write_json(&final_path, document)?;
        write_json(&manifest_path, manifest)?;
        info!(
            final_doc = %final_path.display(),
            manifest = %manifest_path.display(),
            "bundle published"
        );

        let preview = match &options.preview_url {
            Some(url) => self.capture_preview(layout, url),
            None => SideEffect::Skipped,
        };

        let index = if options.update_index {
            match upsert_index(&layout.index_path(), IndexEntry::from_manifest(manifest)) {
                Ok(entries) => {
                    info!(entries = entries.len(), "index updated");
                    SideEffect::Done
                }
                Err(e) => {
                    warn!(error = %e, "index update failed");
                    SideEffect::Failed(e.to_string())
                }
            }
        } else {
            SideEffect::Skipped
        };

        Ok(PublishResult { final_path, manifest_path, written: true, preview, index })
    }

    fn capture_preview(&self, layout: &BundleLayout, url: &str) -> SideEffect {
        let dest = layout.preview_path();
        match self.screenshotter.capture(url, &dest, PREVIEW_TIMEOUT) {
            Ok(()) => {
                info!(preview = %dest.display(), "preview captured");
                SideEffect::Done
            }
            Err(e) => {
                warn!(%url, error = %e, "preview capture failed");
                SideEffect::Failed(e.to_string())
            }
        }
    }
}
