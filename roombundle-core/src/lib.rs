//! RoomBundle Core - Room Bundling Compiler
//!
//! # Guarantees
//! 1. Every published document passed the room schema, three times
//! 2. Normalization is geometric only; the look is the author's
//! 3. Asset names are content hashes; same bytes, same URL
//! 4. Rewriting is idempotent over its own output
//! 5. Nothing is written unless the whole pipeline succeeded
//! 6. Preview and index are best effort and never fail a bundle

pub mod room;
pub mod validation;
pub mod normalize;
pub mod warnings;
pub mod hashing;
pub mod assets;
pub mod layout;
pub mod manifest;
pub mod preview;
pub mod publish;
pub mod pipeline;

pub use room::{RoomDescription, Device, DeviceCategory, DecorElement, SCHEMA_VERSION};
pub use validation::{validate, SchemaError, SchemaIssue};
pub use normalize::{normalize, ClampMode, NormalizePolicy};
pub use warnings::{analyze, Warning};
pub use hashing::{asset_digest, canonical_json, compute_content_hash};
pub use assets::{AssetError, AssetRecord, AssetRewriter, RewriteOutcome};
pub use layout::BundleLayout;
pub use manifest::Manifest;
pub use preview::{ChromiumScreenshotter, NoopScreenshotter, Screenshotter};
pub use publish::{PublishResult, Publisher, SideEffect};
pub use pipeline::{BundleOptions, BundlePipeline, BundleReport, PipelineError};

pub const ENGINE_NAME: &str = env!("CARGO_PKG_NAME");
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
