//! Bundle Manifest - what was produced and why
//!
//! Everything except `generated_at` is a pure function of the input document
//! and the options, so two runs over the same input differ only there.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assets::AssetRecord;
use crate::layout::BundleLayout;
use crate::normalize::NormalizePolicy;
use crate::room::{RoomDescription, RoomMeta};
use crate::warnings::Warning;
use crate::ENGINE_NAME;
use crate::ENGINE_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementCounts {
    pub devices: usize,
    pub decor: usize,
    pub flows: usize,
    pub phases: usize,
    pub boards: usize,
}

impl ElementCounts {
    pub fn of(doc: &RoomDescription) -> Self {
        Self {
            devices: doc.devices.len(),
            decor: doc.structure.decor.len(),
            flows: doc.flows.len(),
            phases: doc.phases.len(),
            boards: doc.boards.len(),
        }
    }
}

/// Output files, relative to the output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleFiles {
    #[serde(rename = "final")]
    pub final_doc: String,
    pub manifest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl BundleFiles {
    pub fn for_layout(layout: &BundleLayout, with_preview: bool) -> Self {
        Self {
            final_doc: layout.final_name(),
            manifest: layout.manifest_name(),
            preview: with_preview.then(|| layout.preview_name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generator {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestOptions {
    pub normalize: NormalizePolicy,
    pub bundle_assets: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub slug: String,
    pub schema_version: String,
    pub meta: RoomMeta,
    pub counts: ElementCounts,
    pub assets: Vec<AssetRecord>,
    pub warnings: Vec<Warning>,
    pub files: BundleFiles,
    pub content_hash: String,
    pub generator: Generator,
    pub options: ManifestOptions,
    pub generated_at: DateTime<Utc>,
}

/// Inputs gathered along the pipeline.
pub struct ManifestInputs<'a> {
    pub layout: &'a BundleLayout,
    /// Document as first validated; element counts come from here.
    pub source: &'a RoomDescription,
    pub assets: Vec<AssetRecord>,
    pub warnings: Vec<Warning>,
    pub content_hash: String,
    pub options: ManifestOptions,
    pub with_preview: bool,
}

impl Manifest {
    pub fn build(inputs: ManifestInputs<'_>) -> Self {
        Self {
            slug: inputs.layout.slug().to_string(),
            schema_version: inputs.source.schema_version.clone(),
            meta: inputs.source.meta.clone(),
            counts: ElementCounts::of(inputs.source),
            assets: inputs.assets,
            warnings: inputs.warnings,
            files: BundleFiles::for_layout(inputs.layout, inputs.with_preview),
            content_hash: inputs.content_hash,
            generator: Generator {
                name: ENGINE_NAME.to_string(),
                version: ENGINE_VERSION.to_string(),
            },
            options: inputs.options,
            generated_at: Utc::now(),
        }
    }
}
