//! Bundling Pipeline - Single Entry Point
//!
//! parse → validate → normalize → re-validate → [assets → re-validate]
//! → analyze → publish. Validation after a transform stage is not optional:
//! a failure there is a pipeline bug and is reported as such.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, info_span, warn};

use crate::assets::{AssetError, AssetRewriter};
use crate::hashing::compute_content_hash;
use crate::layout::BundleLayout;
use crate::manifest::{Manifest, ManifestInputs, ManifestOptions};
use crate::normalize::{normalize, NormalizePolicy};
use crate::preview::{NoopScreenshotter, Screenshotter};
use crate::publish::{PublishError, PublishOptions, PublishResult, Publisher};
use crate::room::RoomDescription;
use crate::validation::{is_valid_slug, revalidate, validate, SchemaError};
use crate::warnings::Analyzer;

/// Transform stage whose output is re-validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Normalize,
    AssetRewrite,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Normalize => write!(f, "normalize"),
            Stage::AssetRewrite => write!(f, "asset rewrite"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid JSON: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid slug {0:?}: must match ^[a-z0-9][a-z0-9_-]*$")]
    InvalidSlug(String),

    #[error("Validation failed: {0}")]
    Schema(#[from] SchemaError),

    #[error("internal invariant violated: {stage} output failed re-validation: {source}")]
    Invariant {
        stage: Stage,
        #[source]
        source: SchemaError,
    },

    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl PipelineError {
    /// Process exit code for this failure class.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Read { .. } | Self::Parse { .. } | Self::InvalidSlug(_) | Self::Schema(_) => 2,
            Self::Asset(_) => 3,
            Self::Invariant { .. } => 70,
            Self::Publish(_) | Self::SerializationError(_) => 1,
        }
    }
}

/// Everything a single bundle run is parameterized by.
#[derive(Debug, Clone)]
pub struct BundleOptions {
    /// Overrides the slug derived from the input file name.
    pub slug: Option<String>,
    pub out_dir: PathBuf,
    pub public_dir: PathBuf,
    pub url_base: String,
    pub normalize: NormalizePolicy,
    pub dry_run: bool,
    pub bundle_assets: bool,
    pub update_index: bool,
    pub preview_url: Option<String>,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            slug: None,
            out_dir: PathBuf::from("dist/rooms"),
            public_dir: PathBuf::from("public"),
            url_base: String::new(),
            normalize: NormalizePolicy::default(),
            dry_run: false,
            bundle_assets: false,
            update_index: false,
            preview_url: None,
        }
    }
}

/// Counts from the asset pass. Kept out of the manifest: `copied` depends on
/// what earlier runs left in the asset directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RewriteStats {
    pub replacements: usize,
    pub copied: usize,
}

#[derive(Debug, Clone)]
pub struct BundleReport {
    pub document: RoomDescription,
    pub manifest: Manifest,
    pub rewrite: RewriteStats,
    pub publish: PublishResult,
}

/// Used when a file name has nothing slug-worthy in it.
pub const FALLBACK_SLUG: &str = "room";

/// Slug from an input file name: up to the first `.`, lowercased, anything
/// outside `[a-z0-9_-]` turned into `-`, leading `-`/`_` trimmed.
pub fn derive_slug(input: &Path) -> String {
    let name = input.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let stem = name.split('.').next().unwrap_or_default();
    let mapped: String = stem
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let slug = mapped.trim_start_matches(['-', '_']);
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug.to_string()
    }
}

/// The bundling pipeline - single entry point for all bundle operations
pub struct BundlePipeline {
    analyzer: Analyzer,
    publisher: Publisher,
}

impl BundlePipeline {
    pub fn new(screenshotter: Box<dyn Screenshotter>) -> Self {
        Self {
            analyzer: Analyzer::new(),
            publisher: Publisher::new(screenshotter),
        }
    }

    /// Read, parse and bundle one room file.
    pub fn bundle_file(&self, input: &Path, options: &BundleOptions) -> Result<BundleReport, PipelineError> {
        let content = fs::read_to_string(input).map_err(|source| PipelineError::Read {
            path: input.to_path_buf(),
            source,
        })?;
        let raw: Value = serde_json::from_str(&content).map_err(|source| PipelineError::Parse {
            path: input.to_path_buf(),
            source,
        })?;
        let slug = options.slug.clone().unwrap_or_else(|| derive_slug(input));
        self.bundle(&raw, &slug, options)
    }

    /// Bundle an already parsed document under `slug`.
    ///
    /// Nothing is written unless every stage up to publication succeeded.
    pub fn bundle(&self, raw: &Value, slug: &str, options: &BundleOptions) -> Result<BundleReport, PipelineError> {
        let span = info_span!("bundle", %slug);
        let _guard = span.enter();

        if !is_valid_slug(slug) {
            return Err(PipelineError::InvalidSlug(slug.to_string()));
        }
        let layout = BundleLayout::new(&options.out_dir, slug, &options.url_base);

        // MANDATORY: input validation before anything else.
        let source = validate(raw).map_err(|e| {
            warn!(issues = e.issues.len(), "input rejected by schema");
            e
        })?;
        info!(
            devices = source.devices.len(),
            decor = source.structure.decor.len(),
            "input validated"
        );

        let normalized = normalize(&source, &options.normalize);
        let normalized = recheck(&normalized, Stage::Normalize)?;

        let (document, assets, rewrite) = if options.bundle_assets {
            let rewriter = AssetRewriter::new(&options.public_dir, &layout, options.dry_run);
            let outcome = rewriter.rewrite(&normalized)?;
            let document = recheck(&outcome.document, Stage::AssetRewrite)?;
            let stats = RewriteStats { replacements: outcome.replacements, copied: outcome.copied };
            (document, outcome.records, stats)
        } else {
            (normalized, vec![], RewriteStats::default())
        };

        // Bounds are judged against the authored positions, before clamping.
        let warnings = self.analyzer.analyze(&source);
        for w in &warnings {
            warn!(rule = %w.rule, "{}", w.message);
        }

        let manifest = Manifest::build(ManifestInputs {
            layout: &layout,
            source: &source,
            assets,
            warnings,
            content_hash: compute_content_hash(&document)?,
            options: ManifestOptions {
                normalize: options.normalize,
                bundle_assets: options.bundle_assets,
            },
            with_preview: options.preview_url.is_some(),
        });

        let publish = self.publisher.publish(
            &layout,
            &document,
            &manifest,
            &PublishOptions {
                dry_run: options.dry_run,
                update_index: options.update_index,
                preview_url: options.preview_url.clone(),
            },
        )?;

        Ok(BundleReport { document, manifest, rewrite, publish })
    }
}

fn recheck(doc: &RoomDescription, stage: Stage) -> Result<RoomDescription, PipelineError> {
    revalidate(doc).map_err(|source| {
        error!(%stage, issues = ?source.issues, "internal invariant violated");
        PipelineError::Invariant { stage, source }
    })
}

impl Default for BundlePipeline {
    fn default() -> Self {
        Self::new(Box::new(NoopScreenshotter))
    }
}
