//! Contract Invariant Tests
//!
//! These tests verify the non-negotiable guarantees.

use std::fs;
use std::path::Path;

use roombundle_core::{
    normalize, validate, AssetRewriter, BundleLayout, BundleOptions, BundlePipeline, ClampMode,
    NormalizePolicy, PipelineError,
};
use serde_json::{json, Value};
use tempfile::tempdir;

fn sample_room() -> Value {
    json!({
        "schemaVersion": "1.0",
        "slug": "soc-floor",
        "meta": {"title": "SOC Floor", "summary": "Perimeter and core"},
        "environment": {"background": "#0b0f14"},
        "camera": {"position": [0, 4, 9], "target": [0, 0, 0], "fov": 50},
        "structure": {
            "dimensions": {"width": 10, "height": 3, "depth": 8},
            "decor": [
                {"id": "wall-n", "type": "firewall_wall", "position": [0, 1.5, -3.9], "thickness": 0.1},
                {"id": "poster", "type": "poster", "position": [3.3, 1.7, -3.8], "imageUrl": "/img/net.png"},
                {"id": "rug", "type": "rug", "pattern": {"texture": "img/rug.jpg", "repeat": [2, 2]}}
            ]
        },
        "devices": [
            {"alias": "edge", "category": "router", "model": "/models/router.glb", "position": [-4.1, 0, 2.2]},
            {"alias": "core", "category": "switch", "model": "/models/switch.glb", "position": [0.3, 0.9, 0.1]},
            {"alias": "web", "category": "server", "model": "/models/server.glb", "position": [3.7, 0, 1.3],
             "metadata": {"os": "linux"}}
        ],
        "links": [{"from": "edge", "to": "core"}, {"from": "core", "to": "web", "label": "10G"}],
        "flows": [{"id": "http", "path": ["edge", "core", "web"], "color": "#4af", "speed": 1.5}],
        "phases": [{"id": "intro", "title": "Intro", "actions": [{"kind": "highlight", "target": "core"}]}],
        "terminal": [{"command": "show route", "response": "0.0.0.0/0 via edge", "phase": "intro"}],
        "boards": [{"id": "notes", "title": "Notes", "markdown": "## Map\n![net](/img/net.png)\nend"}]
    })
}

fn write_public(root: &Path) {
    fs::create_dir_all(root.join("models")).unwrap();
    fs::create_dir_all(root.join("img")).unwrap();
    fs::write(root.join("models/router.glb"), b"router-model").unwrap();
    fs::write(root.join("models/switch.glb"), b"switch-model").unwrap();
    fs::write(root.join("models/server.glb"), b"server-model").unwrap();
    fs::write(root.join("img/net.png"), b"net-png").unwrap();
    fs::write(root.join("img/rug.jpg"), b"rug-jpg").unwrap();
}

fn options(out: &Path, public: &Path) -> BundleOptions {
    BundleOptions {
        out_dir: out.to_path_buf(),
        public_dir: public.to_path_buf(),
        ..BundleOptions::default()
    }
}

#[test]
fn invariant_normalize_output_revalidates() {
    let doc = validate(&sample_room()).unwrap();
    for clamp in [ClampMode::None, ClampMode::Soft, ClampMode::Hard] {
        for step in [0.0, 0.25, 0.5, 1.0] {
            let policy = NormalizePolicy::new(clamp, step).unwrap();
            let out = normalize(&doc, &policy);
            let raw = serde_json::to_value(&out).unwrap();
            assert!(validate(&raw).is_ok(), "clamp {clamp:?} step {step}");
        }
    }
}

#[test]
fn invariant_rewrite_output_revalidates_and_is_idempotent() {
    let public = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_public(public.path());
    let doc = validate(&sample_room()).unwrap();
    let layout = BundleLayout::new(out.path(), "soc-floor", "");
    let rewriter = AssetRewriter::new(public.path(), &layout, false);

    let first = rewriter.rewrite(&doc).unwrap();
    validate(&serde_json::to_value(&first.document).unwrap()).unwrap();
    let files_after_first = fs::read_dir(layout.assets_dir()).unwrap().count();

    let second = rewriter.rewrite(&first.document).unwrap();
    assert_eq!(second.replacements, 0);
    assert_eq!(second.copied, 0);
    assert_eq!(fs::read_dir(layout.assets_dir()).unwrap().count(), files_after_first);
}

#[test]
fn invariant_fresh_caches_per_run() {
    // Deleting the asset directory between runs must lead to a re-copy:
    // nothing from the first run may suppress it.
    let public = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_public(public.path());
    let doc = validate(&sample_room()).unwrap();
    let layout = BundleLayout::new(out.path(), "soc-floor", "");
    let rewriter = AssetRewriter::new(public.path(), &layout, false);

    let first = rewriter.rewrite(&doc).unwrap();
    fs::remove_dir_all(layout.assets_dir()).unwrap();
    let again = rewriter.rewrite(&doc).unwrap();
    assert_eq!(again.copied, first.copied);
    assert_eq!(again.document, first.document);
}

#[test]
fn invariant_dedup_identical_content() {
    let public = tempdir().unwrap();
    let out = tempdir().unwrap();
    fs::create_dir_all(public.path().join("a")).unwrap();
    fs::create_dir_all(public.path().join("b")).unwrap();
    fs::write(public.path().join("a/tile.png"), b"same-bytes").unwrap();
    fs::write(public.path().join("b/tile.png"), b"same-bytes").unwrap();

    let mut raw = sample_room();
    raw["devices"] = json!([]);
    raw["links"] = json!([]);
    raw["flows"] = json!([]);
    raw["boards"] = json!([]);
    raw["structure"]["decor"] = json!([
        {"id": "t1", "type": "tile", "imageUrl": "/a/tile.png"},
        {"id": "t2", "type": "tile", "imageUrl": "/b/tile.png"}
    ]);
    let doc = validate(&raw).unwrap();
    let layout = BundleLayout::new(out.path(), "soc-floor", "");
    let outcome = AssetRewriter::new(public.path(), &layout, false).rewrite(&doc).unwrap();

    let decor = &outcome.document.structure.decor;
    assert_eq!(decor[0].extra["imageUrl"], decor[1].extra["imageUrl"]);
    assert_eq!(outcome.copied, 1);
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(fs::read_dir(layout.assets_dir()).unwrap().count(), 1);
}

#[test]
fn invariant_deterministic_outputs() {
    let public = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_public(public.path());
    let mut opts = options(out.path(), public.path());
    opts.bundle_assets = true;
    opts.normalize = NormalizePolicy::new(ClampMode::Soft, 0.25).unwrap();
    let pipeline = BundlePipeline::default();

    let strip_time = |path: &Path| {
        let mut v: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        v.as_object_mut().unwrap().remove("generatedAt");
        v
    };

    let first = pipeline.bundle(&sample_room(), "soc-floor", &opts).unwrap();
    let final_1 = fs::read(&first.publish.final_path).unwrap();
    let manifest_1 = strip_time(&first.publish.manifest_path);

    let second = pipeline.bundle(&sample_room(), "soc-floor", &opts).unwrap();
    assert_eq!(fs::read(&second.publish.final_path).unwrap(), final_1);
    assert_eq!(strip_time(&second.publish.manifest_path), manifest_1);
}

#[test]
fn invariant_hard_clamp_bounds() {
    let mut raw = sample_room();
    raw["devices"][0]["position"] = json!([-30, 9, 30]);
    raw["devices"][2]["position"] = json!([30, -2, -30]);
    let doc = validate(&raw).unwrap();
    let width = doc.structure.dimensions.width;

    for (clamp, margin) in [(ClampMode::Hard, 0.25), (ClampMode::Soft, 0.15)] {
        let out = normalize(&doc, &NormalizePolicy::new(clamp, 0.0).unwrap());
        for d in &out.devices {
            assert!(d.position[0] >= -width / 2.0 + margin && d.position[0] <= width / 2.0 - margin);
        }
    }
}

#[test]
fn invariant_grid_snap_multiples() {
    let doc = validate(&sample_room()).unwrap();
    let out = normalize(&doc, &NormalizePolicy::new(ClampMode::None, 0.5).unwrap());
    let positions = out
        .devices
        .iter()
        .map(|d| d.position)
        .chain(out.structure.decor.iter().filter_map(|d| d.position));
    for p in positions {
        for v in p {
            assert_eq!((v / 0.5).fract(), 0.0, "{v} is not a multiple of 0.5");
        }
    }
}

#[test]
fn invariant_schema_failure_writes_nothing() {
    let out = tempdir().unwrap();
    let mut raw = sample_room();
    raw["devices"][1]["category"] = json!("toaster");
    let err = BundlePipeline::default()
        .bundle(&raw, "soc-floor", &options(out.path(), out.path()))
        .unwrap_err();

    assert!(matches!(err, PipelineError::Schema(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(err.to_string().contains("devices[1].category"));
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn invariant_missing_asset_aborts_before_publish() {
    let public = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_public(public.path());
    fs::remove_file(public.path().join("img/rug.jpg")).unwrap();
    let mut opts = options(out.path(), public.path());
    opts.bundle_assets = true;

    let err = BundlePipeline::default().bundle(&sample_room(), "soc-floor", &opts).unwrap_err();
    assert_eq!(err.exit_code(), 3);
    assert!(err.to_string().contains("img/rug.jpg"));
    assert!(err.to_string().contains("decor 'rug'"));
    assert!(!out.path().join("soc-floor.final.json").exists());
    assert!(!out.path().join("soc-floor.manifest.json").exists());
}

#[test]
fn invariant_no_visual_defaults_injected() {
    let mut raw = sample_room();
    raw.as_object_mut().unwrap().remove("environment");
    let out = tempdir().unwrap();
    let mut opts = options(out.path(), out.path());
    opts.normalize = NormalizePolicy::new(ClampMode::Hard, 0.5).unwrap();

    let report = BundlePipeline::default().bundle(&raw, "soc-floor", &opts).unwrap();
    let published: Value = serde_json::from_str(&fs::read_to_string(&report.publish.final_path).unwrap()).unwrap();
    assert!(published.get("environment").is_none());
    assert!(published.get("theme").is_none());
    assert!(report.manifest.warnings.iter().any(|w| w.rule == "missing_background"));
}

#[cfg(feature = "test-hooks")]
#[test]
fn invariant_validator_called_at_every_checkpoint() {
    use roombundle_core::validation::get_validation_call_count;

    let public = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_public(public.path());
    let mut opts = options(out.path(), public.path());
    opts.bundle_assets = true;
    opts.dry_run = true;

    let before = get_validation_call_count();
    BundlePipeline::default().bundle(&sample_room(), "soc-floor", &opts).unwrap();
    // initial + post-normalize + post-rewrite; other tests may run concurrently
    assert!(get_validation_call_count() - before >= 3);
}
