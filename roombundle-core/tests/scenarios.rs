//! End-to-end bundle scenarios through the public pipeline.

use std::fs;
use std::path::Path;
use std::time::Duration;

use roombundle_core::preview::PreviewError;
use roombundle_core::publish::read_index;
use roombundle_core::{
    BundleOptions, BundlePipeline, ClampMode, NormalizePolicy, Screenshotter, SideEffect,
};
use serde_json::{json, Value};
use tempfile::tempdir;

fn room_with_device_at(x: f64) -> Value {
    json!({
        "schemaVersion": "1.0",
        "slug": "edge-lab",
        "meta": {"title": "Edge Lab"},
        "environment": {"background": "#000000"},
        "structure": {"dimensions": {"width": 10, "height": 3, "depth": 10}},
        "devices": [
            {"alias": "edge-fw", "category": "firewall", "model": "https://cdn.example.com/fw.glb", "position": [x, 0, 0]}
        ]
    })
}

fn poster_room() -> Value {
    json!({
        "schemaVersion": "1.0",
        "slug": "poster-room",
        "meta": {"title": "Poster Room", "summary": "One poster"},
        "environment": {"background": "#fafafa"},
        "structure": {
            "dimensions": {"width": 6, "height": 3, "depth": 6},
            "decor": [{"id": "poster", "type": "poster", "position": [0, 1.5, -2.9], "imageUrl": "/img/poster.png"}]
        }
    })
}

fn write_poster(public: &Path) -> Vec<u8> {
    fs::create_dir_all(public.join("img")).unwrap();
    let bytes: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
    fs::write(public.join("img/poster.png"), &bytes).unwrap();
    bytes
}

fn options(out: &Path, public: &Path) -> BundleOptions {
    BundleOptions {
        out_dir: out.to_path_buf(),
        public_dir: public.to_path_buf(),
        ..BundleOptions::default()
    }
}

fn count_files(dir: &Path) -> usize {
    if !dir.exists() {
        return 0;
    }
    fs::read_dir(dir)
        .unwrap()
        .map(|e| {
            let path = e.unwrap().path();
            if path.is_dir() { count_files(&path) } else { 1 }
        })
        .sum()
}

#[test]
fn scenario_hard_clamp_pulls_device_inside_and_warns_with_original_value() {
    let out = tempdir().unwrap();
    let mut opts = options(out.path(), out.path());
    opts.normalize = NormalizePolicy::new(ClampMode::Hard, 0.0).unwrap();

    let report = BundlePipeline::default().bundle(&room_with_device_at(6.0), "edge-lab", &opts).unwrap();
    assert_eq!(report.document.devices[0].position[0], 4.75);

    let oob: Vec<_> = report.manifest.warnings.iter().filter(|w| w.rule == "out_of_bounds").collect();
    assert_eq!(oob.len(), 1);
    assert!(oob[0].message.contains("edge-fw"));
    assert!(oob[0].message.contains("[6, 0, 0]"));

    let published: Value = serde_json::from_str(&fs::read_to_string(&report.publish.final_path).unwrap()).unwrap();
    assert_eq!(published["devices"][0]["position"][0], 4.75);
}

#[test]
fn scenario_far_device_warning_names_alias() {
    let out = tempdir().unwrap();
    let mut opts = options(out.path(), out.path());
    opts.dry_run = true;
    let report = BundlePipeline::default().bundle(&room_with_device_at(100.0), "edge-lab", &opts).unwrap();
    assert!(report.manifest.warnings.iter().any(|w| w.message.contains("edge-fw")));
}

#[test]
fn scenario_bundle_single_png() {
    let public = tempdir().unwrap();
    let out = tempdir().unwrap();
    let bytes = write_poster(public.path());
    let mut opts = options(out.path(), public.path());
    opts.bundle_assets = true;

    let report = BundlePipeline::default().bundle(&poster_room(), "poster-room", &opts).unwrap();
    let assets = &report.manifest.assets;
    assert_eq!(assets.len(), 1);

    let record = &assets[0];
    assert_eq!(record.bytes, 2048);
    assert_eq!(record.ext, "png");
    assert_eq!(record.original, "/img/poster.png");
    assert_eq!(record.hash.len(), 8);
    assert!(record.hash.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(record.url, format!("/poster-room/assets/poster.{}.png", record.hash));

    let decor = &report.document.structure.decor[0];
    assert_eq!(decor.extra["imageUrl"], record.url.as_str());

    let copied = out.path().join("poster-room/assets").join(format!("poster.{}.png", record.hash));
    assert_eq!(fs::read(copied).unwrap(), bytes);
    assert_eq!(report.rewrite.copied, 1);
}

#[test]
fn scenario_dry_run_populates_manifest_but_writes_nothing() {
    let public = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_poster(public.path());
    let mut opts = options(out.path(), public.path());
    opts.bundle_assets = true;
    opts.dry_run = true;
    opts.update_index = true;

    let report = BundlePipeline::default().bundle(&poster_room(), "poster-room", &opts).unwrap();
    assert_eq!(report.manifest.assets.len(), 1);
    assert!(!report.publish.written);
    assert_eq!(report.publish.index, SideEffect::Skipped);
    assert_eq!(count_files(out.path()), 0);
}

#[test]
fn scenario_without_bundling_assets_stay_as_authored() {
    let out = tempdir().unwrap();
    let report = BundlePipeline::default()
        .bundle(&poster_room(), "poster-room", &options(out.path(), Path::new("/nonexistent")))
        .unwrap();
    assert!(report.manifest.assets.is_empty());
    assert_eq!(report.document.structure.decor[0].extra["imageUrl"], "/img/poster.png");
}

#[test]
fn scenario_index_upsert_across_bundles() {
    let out = tempdir().unwrap();
    let mut opts = options(out.path(), out.path());
    opts.update_index = true;
    let pipeline = BundlePipeline::default();

    pipeline.bundle(&poster_room(), "poster-room", &opts).unwrap();
    pipeline.bundle(&room_with_device_at(1.0), "edge-lab", &opts).unwrap();
    let report = pipeline.bundle(&poster_room(), "poster-room", &opts).unwrap();
    assert_eq!(report.publish.index, SideEffect::Done);

    let entries = read_index(&out.path().join("index.json"));
    let slugs: Vec<_> = entries.iter().map(|e| e.slug.as_str()).collect();
    assert_eq!(slugs, vec!["edge-lab", "poster-room"]);
    assert_eq!(entries[1].summary.as_deref(), Some("One poster"));
    assert_eq!(entries[1].files.final_doc, "poster-room.final.json");
}

struct FailingScreenshotter;

impl Screenshotter for FailingScreenshotter {
    fn capture(&self, _url: &str, _dest: &Path, timeout: Duration) -> Result<(), PreviewError> {
        Err(PreviewError::Timeout { secs: timeout.as_secs() })
    }
}

#[test]
fn scenario_preview_failure_is_soft() {
    let out = tempdir().unwrap();
    let mut opts = options(out.path(), out.path());
    opts.preview_url = Some("http://localhost:5173/rooms/poster-room".into());
    opts.update_index = true;

    let report = BundlePipeline::new(Box::new(FailingScreenshotter))
        .bundle(&poster_room(), "poster-room", &opts)
        .unwrap();

    assert!(matches!(report.publish.preview, SideEffect::Failed(ref m) if m.contains("timed out")));
    assert_eq!(report.publish.index, SideEffect::Done);
    assert!(report.publish.final_path.exists());
    assert_eq!(report.manifest.files.preview.as_deref(), Some("poster-room/preview.png"));
}

#[test]
fn scenario_bundle_file_derives_slug() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("Poster Room.room.json");
    fs::write(&input, serde_json::to_string(&poster_room()).unwrap()).unwrap();
    let out = dir.path().join("out");

    let report = BundlePipeline::default().bundle_file(&input, &options(&out, dir.path())).unwrap();
    assert_eq!(report.manifest.slug, "poster-room");
    assert!(out.join("poster-room.final.json").exists());
    assert!(out.join("poster-room.manifest.json").exists());

    let manifest: Value = serde_json::from_str(&fs::read_to_string(out.join("poster-room.manifest.json")).unwrap()).unwrap();
    assert_eq!(manifest["counts"]["decor"], 1);
    assert_eq!(manifest["schemaVersion"], "1.0");
    assert_eq!(manifest["files"]["final"], "poster-room.final.json");
    assert!(manifest["generatedAt"].is_string());
}

#[test]
fn scenario_underscore_file_name_still_yields_a_valid_slug() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("_draft.json");
    fs::write(&input, serde_json::to_string(&poster_room()).unwrap()).unwrap();
    let out = dir.path().join("out");

    let report = BundlePipeline::default().bundle_file(&input, &options(&out, dir.path())).unwrap();
    assert_eq!(report.manifest.slug, "draft");
    assert!(out.join("draft.final.json").exists());
}

#[test]
fn scenario_malformed_json_is_an_input_error() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("broken.json");
    fs::write(&input, "{ \"schemaVersion\": ").unwrap();
    let err = BundlePipeline::default()
        .bundle_file(&input, &options(dir.path(), dir.path()))
        .unwrap_err();
    assert_eq!(err.exit_code(), 2);
}
