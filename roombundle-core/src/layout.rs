//! Bundle Layout - where one slug's outputs live

use std::path::{Path, PathBuf};

pub const INDEX_FILE: &str = "index.json";
pub const PREVIEW_FILE: &str = "preview.png";

#[derive(Debug, Clone)]
pub struct BundleLayout {
    out_dir: PathBuf,
    slug: String,
    url_base: String,
}

impl BundleLayout {
    pub fn new(out_dir: impl Into<PathBuf>, slug: &str, url_base: &str) -> Self {
        Self {
            out_dir: out_dir.into(),
            slug: slug.to_string(),
            url_base: url_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn final_name(&self) -> String {
        format!("{}.final.json", self.slug)
    }

    pub fn manifest_name(&self) -> String {
        format!("{}.manifest.json", self.slug)
    }

    /// Preview path relative to the output directory.
    pub fn preview_name(&self) -> String {
        format!("{}/{}", self.slug, PREVIEW_FILE)
    }

    pub fn final_path(&self) -> PathBuf {
        self.out_dir.join(self.final_name())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.out_dir.join(self.manifest_name())
    }

    pub fn preview_path(&self) -> PathBuf {
        self.out_dir.join(&self.slug).join(PREVIEW_FILE)
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.out_dir.join(&self.slug).join("assets")
    }

    pub fn index_path(&self) -> PathBuf {
        self.out_dir.join(INDEX_FILE)
    }

    /// Everything under this prefix is already published for this slug.
    pub fn asset_url_prefix(&self) -> String {
        format!("{}/{}/assets/", self.url_base, self.slug)
    }
}
