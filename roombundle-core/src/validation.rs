//! Schema Validation - Field-Level Issues
//!
//! The walker collects every issue in one pass, each with the path of the
//! offending field. Only a document with zero issues is deserialized into
//! `RoomDescription`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::room::{DeviceCategory, RoomDescription, Vec3, SCHEMA_VERSION};

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static VALIDATION_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_validation_call_count() -> u32 {
    VALIDATION_CALL_COUNT.load(Ordering::SeqCst)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaIssue {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Error)]
#[error("document does not match room schema {}: {}", SCHEMA_VERSION, render_issues(.issues))]
pub struct SchemaError {
    pub issues: Vec<SchemaIssue>,
}

fn render_issues(issues: &[SchemaIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{}: {}", i.path, i.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validate an untyped document against the room contract.
pub fn validate(raw: &Value) -> Result<RoomDescription, SchemaError> {
    #[cfg(feature = "test-hooks")]
    VALIDATION_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

    let mut walker = Walker::default();
    walker.document(raw);
    if !walker.issues.is_empty() {
        return Err(SchemaError { issues: walker.issues });
    }

    // The walker mirrors the typed model; serde is the backstop.
    serde_json::from_value(raw.clone()).map_err(|e| SchemaError {
        issues: vec![SchemaIssue { path: "$".to_string(), reason: e.to_string() }],
    })
}

/// Re-validate a typed document by round-tripping it through its JSON form.
pub fn revalidate(doc: &RoomDescription) -> Result<RoomDescription, SchemaError> {
    let raw = serde_json::to_value(doc).map_err(|e| SchemaError {
        issues: vec![SchemaIssue { path: "$".to_string(), reason: e.to_string() }],
    })?;
    validate(&raw)
}

fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn index(parent: &str, i: usize) -> String {
    format!("{parent}[{i}]")
}

const ROOT_FIELDS: &[&str] = &[
    "schemaVersion", "slug", "meta", "theme", "environment", "camera", "structure",
    "devices", "links", "flows", "phases", "terminal", "boards",
];

#[derive(Default)]
struct Walker {
    issues: Vec<SchemaIssue>,
}

impl Walker {
    fn issue(&mut self, path: &str, reason: impl Into<String>) {
        let path = if path.is_empty() { "$" } else { path };
        self.issues.push(SchemaIssue { path: path.to_string(), reason: reason.into() });
    }

    /// Object with a closed key set.
    fn object<'a>(
        &mut self,
        path: &str,
        value: &'a Value,
        allowed: &[&str],
        required: &[&str],
    ) -> Option<&'a Map<String, Value>> {
        let map = self.open_object(path, value, required)?;
        for key in map.keys() {
            if !allowed.contains(&key.as_str()) {
                self.issue(&join(path, key), "unknown field");
            }
        }
        Some(map)
    }

    /// Object that accepts any extra keys.
    fn open_object<'a>(
        &mut self,
        path: &str,
        value: &'a Value,
        required: &[&str],
    ) -> Option<&'a Map<String, Value>> {
        let Some(map) = value.as_object() else {
            self.issue(path, "expected an object");
            return None;
        };
        for key in required {
            if map.get(*key).map_or(true, Value::is_null) {
                self.issue(&join(path, key), "missing required field");
            }
        }
        Some(map)
    }

    fn string<'a>(&mut self, path: &str, value: &'a Value) -> Option<&'a str> {
        match value.as_str() {
            Some(s) => Some(s),
            None => {
                self.issue(path, "expected a string");
                None
            }
        }
    }

    fn non_empty<'a>(&mut self, path: &str, value: &'a Value) -> Option<&'a str> {
        let s = self.string(path, value)?;
        if s.trim().is_empty() {
            self.issue(path, "must not be empty");
            return None;
        }
        Some(s)
    }

    fn number(&mut self, path: &str, value: &Value) -> Option<f64> {
        match value.as_f64() {
            Some(n) if n.is_finite() => Some(n),
            _ => {
                self.issue(path, "expected a finite number");
                None
            }
        }
    }

    fn boolean(&mut self, path: &str, value: &Value) {
        if !value.is_boolean() {
            self.issue(path, "expected a boolean");
        }
    }

    fn vec3(&mut self, path: &str, value: &Value) -> Option<Vec3> {
        let Some(items) = value.as_array() else {
            self.issue(path, "expected an array of three numbers");
            return None;
        };
        if items.len() != 3 {
            self.issue(path, format!("expected 3 components, found {}", items.len()));
            return None;
        }
        let mut out = [0.0; 3];
        let mut ok = true;
        for (i, item) in items.iter().enumerate() {
            match self.number(&index(path, i), item) {
                Some(n) => out[i] = n,
                None => ok = false,
            }
        }
        ok.then_some(out)
    }

    fn array<'a>(&mut self, path: &str, value: &'a Value) -> Option<&'a Vec<Value>> {
        match value.as_array() {
            Some(items) => Some(items),
            None => {
                self.issue(path, "expected an array");
                None
            }
        }
    }

    /// Present and non-null field.
    fn field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
        map.get(key).filter(|v| !v.is_null())
    }

    fn opt_string(&mut self, path: &str, map: &Map<String, Value>, key: &str) {
        if let Some(v) = Self::field(map, key) {
            self.string(&join(path, key), v);
        }
    }

    fn document(&mut self, raw: &Value) {
        let Some(root) = self.object(
            "",
            raw,
            ROOT_FIELDS,
            &["schemaVersion", "slug", "meta", "structure"],
        ) else {
            return;
        };

        for key in ["devices", "links", "flows", "phases", "terminal", "boards"] {
            if root.get(key).is_some_and(Value::is_null) {
                self.issue(key, "expected an array");
            }
        }

        if let Some(v) = Self::field(root, "schemaVersion") {
            if let Some(version) = self.string("schemaVersion", v) {
                if version != SCHEMA_VERSION {
                    self.issue(
                        "schemaVersion",
                        format!("unsupported schema version {version:?}, expected {SCHEMA_VERSION:?}"),
                    );
                }
            }
        }
        if let Some(v) = Self::field(root, "slug") {
            if let Some(slug) = self.string("slug", v) {
                if !is_valid_slug(slug) {
                    self.issue("slug", "must match ^[a-z0-9][a-z0-9_-]*$");
                }
            }
        }
        if let Some(v) = Self::field(root, "meta") {
            self.meta(v);
        }
        if let Some(v) = Self::field(root, "theme") {
            self.theme(v);
        }
        if let Some(v) = Self::field(root, "environment") {
            self.environment(v);
        }
        if let Some(v) = Self::field(root, "camera") {
            self.camera(v);
        }
        if let Some(v) = Self::field(root, "structure") {
            self.structure(v);
        }

        let aliases = Self::field(root, "devices").map(|v| self.devices(v)).unwrap_or_default();
        let phase_ids = Self::field(root, "phases").map(|v| self.phases(v)).unwrap_or_default();

        if let Some(v) = Self::field(root, "links") {
            self.links(v, &aliases);
        }
        if let Some(v) = Self::field(root, "flows") {
            self.flows(v, &aliases);
        }
        if let Some(v) = Self::field(root, "terminal") {
            self.terminal(v, &phase_ids);
        }
        if let Some(v) = Self::field(root, "boards") {
            self.boards(v);
        }
    }

    fn meta(&mut self, value: &Value) {
        let path = "meta";
        let Some(map) = self.object(path, value, &["title", "summary", "author", "tags"], &["title"]) else {
            return;
        };
        if let Some(v) = Self::field(map, "title") {
            self.non_empty("meta.title", v);
        }
        self.opt_string(path, map, "summary");
        self.opt_string(path, map, "author");
        // Defaulted lists: explicit null is an issue, not "absent".
        if let Some(v) = map.get("tags") {
            if let Some(tags) = self.array("meta.tags", v) {
                for (i, tag) in tags.iter().enumerate() {
                    self.string(&index("meta.tags", i), tag);
                }
            }
        }
    }

    fn theme(&mut self, value: &Value) {
        let path = "theme";
        let Some(map) = self.object(path, value, &["accent", "font", "palette"], &[]) else {
            return;
        };
        self.opt_string(path, map, "accent");
        self.opt_string(path, map, "font");
        if let Some(v) = Self::field(map, "palette") {
            if let Some(palette) = self.open_object("theme.palette", v, &[]) {
                for (key, color) in palette {
                    self.string(&join("theme.palette", key), color);
                }
            }
        }
    }

    fn environment(&mut self, value: &Value) {
        let path = "environment";
        let allowed = ["background", "fog", "ambientIntensity", "lighting"];
        let Some(map) = self.object(path, value, &allowed, &[]) else {
            return;
        };
        self.opt_string(path, map, "background");
        self.opt_string(path, map, "lighting");
        if let Some(v) = Self::field(map, "ambientIntensity") {
            if let Some(n) = self.number("environment.ambientIntensity", v) {
                if n < 0.0 {
                    self.issue("environment.ambientIntensity", "must be >= 0");
                }
            }
        }
        if let Some(v) = Self::field(map, "fog") {
            let fog_path = "environment.fog";
            if let Some(fog) = self.object(fog_path, v, &["color", "near", "far"], &["color", "near", "far"]) {
                if let Some(c) = Self::field(fog, "color") {
                    self.string("environment.fog.color", c);
                }
                let near = Self::field(fog, "near").and_then(|n| self.number("environment.fog.near", n));
                let far = Self::field(fog, "far").and_then(|n| self.number("environment.fog.far", n));
                if let Some(near) = near {
                    if near < 0.0 {
                        self.issue("environment.fog.near", "must be >= 0");
                    }
                    if let Some(far) = far {
                        if far <= near {
                            self.issue("environment.fog.far", "must be greater than near");
                        }
                    }
                }
            }
        }
    }

    fn camera(&mut self, value: &Value) {
        let Some(map) = self.object("camera", value, &["position", "target", "fov"], &["position"]) else {
            return;
        };
        if let Some(v) = Self::field(map, "position") {
            self.vec3("camera.position", v);
        }
        if let Some(v) = Self::field(map, "target") {
            self.vec3("camera.target", v);
        }
        if let Some(v) = Self::field(map, "fov") {
            if let Some(fov) = self.number("camera.fov", v) {
                if fov <= 0.0 || fov >= 180.0 {
                    self.issue("camera.fov", "must be within (0, 180)");
                }
            }
        }
    }

    fn structure(&mut self, value: &Value) {
        let Some(map) = self.object("structure", value, &["dimensions", "decor"], &["dimensions"]) else {
            return;
        };
        if let Some(v) = Self::field(map, "dimensions") {
            let path = "structure.dimensions";
            let keys = ["width", "height", "depth"];
            if let Some(dims) = self.object(path, v, &keys, &keys) {
                for key in keys {
                    if let Some(n) = Self::field(dims, key) {
                        let p = join(path, key);
                        if let Some(n) = self.number(&p, n) {
                            if n <= 0.0 {
                                self.issue(&p, "must be > 0");
                            }
                        }
                    }
                }
            }
        }
        if let Some(v) = map.get("decor") {
            self.decor(v);
        }
    }

    fn decor(&mut self, value: &Value) {
        let base = "structure.decor";
        let Some(items) = self.array(base, value) else {
            return;
        };
        let mut seen = HashSet::new();
        for (i, item) in items.iter().enumerate() {
            let path = index(base, i);
            // Open object: type-specific fields pass through.
            let Some(map) = self.open_object(&path, item, &["id", "type"]) else {
                continue;
            };
            if let Some(v) = Self::field(map, "id") {
                if let Some(id) = self.non_empty(&join(&path, "id"), v) {
                    if !seen.insert(id.to_string()) {
                        self.issue(&join(&path, "id"), format!("duplicate decor id {id:?}"));
                    }
                }
            }
            if let Some(v) = Self::field(map, "type") {
                self.non_empty(&join(&path, "type"), v);
            }
            self.placement(&path, map);
        }
    }

    fn placement(&mut self, path: &str, map: &Map<String, Value>) {
        if let Some(v) = Self::field(map, "position") {
            self.vec3(&join(path, "position"), v);
        }
        if let Some(v) = Self::field(map, "rotation") {
            self.vec3(&join(path, "rotation"), v);
        }
        if let Some(v) = Self::field(map, "scale") {
            let p = join(path, "scale");
            if let Some(scale) = self.vec3(&p, v) {
                if scale.iter().any(|s| *s <= 0.0) {
                    self.issue(&p, "scale components must be > 0");
                }
            }
        }
    }

    fn devices(&mut self, value: &Value) -> HashSet<String> {
        let mut aliases = HashSet::new();
        let Some(items) = self.array("devices", value) else {
            return aliases;
        };
        let allowed = ["alias", "category", "model", "position", "rotation", "scale", "label", "metadata"];
        for (i, item) in items.iter().enumerate() {
            let path = index("devices", i);
            let Some(map) = self.object(&path, item, &allowed, &["alias", "category", "model", "position"]) else {
                continue;
            };
            if let Some(v) = Self::field(map, "alias") {
                if let Some(alias) = self.non_empty(&join(&path, "alias"), v) {
                    if !aliases.insert(alias.to_string()) {
                        self.issue(&join(&path, "alias"), format!("duplicate device alias {alias:?}"));
                    }
                }
            }
            if let Some(v) = Self::field(map, "category") {
                let p = join(&path, "category");
                if let Some(category) = self.string(&p, v) {
                    if !DeviceCategory::ALL.contains(&category) {
                        self.issue(
                            &p,
                            format!("unknown category {category:?}, expected one of {}", DeviceCategory::ALL.join("|")),
                        );
                    }
                }
            }
            if let Some(v) = Self::field(map, "model") {
                self.non_empty(&join(&path, "model"), v);
            }
            self.placement(&path, map);
            self.opt_string(&path, map, "label");
            if let Some(v) = Self::field(map, "metadata") {
                self.open_object(&join(&path, "metadata"), v, &[]);
            }
        }
        aliases
    }

    fn links(&mut self, value: &Value, aliases: &HashSet<String>) {
        let Some(items) = self.array("links", value) else {
            return;
        };
        for (i, item) in items.iter().enumerate() {
            let path = index("links", i);
            let Some(map) = self.object(&path, item, &["from", "to", "label", "kind"], &["from", "to"]) else {
                continue;
            };
            for key in ["from", "to"] {
                if let Some(v) = Self::field(map, key) {
                    self.alias_ref(&join(&path, key), v, aliases);
                }
            }
            self.opt_string(&path, map, "label");
            self.opt_string(&path, map, "kind");
        }
    }

    fn alias_ref(&mut self, path: &str, value: &Value, aliases: &HashSet<String>) {
        if let Some(alias) = self.string(path, value) {
            if !aliases.contains(alias) {
                self.issue(path, format!("unknown device alias {alias:?}"));
            }
        }
    }

    fn flows(&mut self, value: &Value, aliases: &HashSet<String>) {
        let Some(items) = self.array("flows", value) else {
            return;
        };
        let allowed = ["id", "path", "color", "speed", "loop"];
        for (i, item) in items.iter().enumerate() {
            let path = index("flows", i);
            let Some(map) = self.object(&path, item, &allowed, &["id", "path"]) else {
                continue;
            };
            if let Some(v) = Self::field(map, "id") {
                self.non_empty(&join(&path, "id"), v);
            }
            if let Some(v) = Self::field(map, "path") {
                let p = join(&path, "path");
                if let Some(hops) = self.array(&p, v) {
                    if hops.len() < 2 {
                        self.issue(&p, "a flow needs at least two hops");
                    }
                    for (j, hop) in hops.iter().enumerate() {
                        self.alias_ref(&index(&p, j), hop, aliases);
                    }
                }
            }
            self.opt_string(&path, map, "color");
            if let Some(v) = Self::field(map, "speed") {
                let p = join(&path, "speed");
                if let Some(speed) = self.number(&p, v) {
                    if speed <= 0.0 {
                        self.issue(&p, "must be > 0");
                    }
                }
            }
            if let Some(v) = Self::field(map, "loop") {
                self.boolean(&join(&path, "loop"), v);
            }
        }
    }

    fn phases(&mut self, value: &Value) -> HashSet<String> {
        let mut ids = HashSet::new();
        let Some(items) = self.array("phases", value) else {
            return ids;
        };
        for (i, item) in items.iter().enumerate() {
            let path = index("phases", i);
            let Some(map) = self.object(&path, item, &["id", "title", "actions"], &["id", "title"]) else {
                continue;
            };
            if let Some(v) = Self::field(map, "id") {
                if let Some(id) = self.non_empty(&join(&path, "id"), v) {
                    if !ids.insert(id.to_string()) {
                        self.issue(&join(&path, "id"), format!("duplicate phase id {id:?}"));
                    }
                }
            }
            if let Some(v) = Self::field(map, "title") {
                self.string(&join(&path, "title"), v);
            }
            if let Some(v) = map.get("actions") {
                let base = join(&path, "actions");
                if let Some(actions) = self.array(&base, v) {
                    for (j, action) in actions.iter().enumerate() {
                        self.phase_action(&index(&base, j), action);
                    }
                }
            }
        }
        ids
    }

    fn phase_action(&mut self, path: &str, value: &Value) {
        let allowed = ["kind", "target", "message", "durationMs"];
        let Some(map) = self.object(path, value, &allowed, &["kind"]) else {
            return;
        };
        if let Some(v) = Self::field(map, "kind") {
            self.non_empty(&join(path, "kind"), v);
        }
        self.opt_string(path, map, "target");
        self.opt_string(path, map, "message");
        if let Some(v) = Self::field(map, "durationMs") {
            if v.as_u64().is_none() {
                self.issue(&join(path, "durationMs"), "expected a non-negative integer");
            }
        }
    }

    fn terminal(&mut self, value: &Value, phase_ids: &HashSet<String>) {
        let Some(items) = self.array("terminal", value) else {
            return;
        };
        for (i, item) in items.iter().enumerate() {
            let path = index("terminal", i);
            let Some(map) =
                self.object(&path, item, &["command", "response", "phase"], &["command", "response"])
            else {
                continue;
            };
            if let Some(v) = Self::field(map, "command") {
                self.non_empty(&join(&path, "command"), v);
            }
            if let Some(v) = Self::field(map, "response") {
                self.string(&join(&path, "response"), v);
            }
            if let Some(v) = Self::field(map, "phase") {
                let p = join(&path, "phase");
                if let Some(phase) = self.string(&p, v) {
                    if !phase_ids.contains(phase) {
                        self.issue(&p, format!("unknown phase {phase:?}"));
                    }
                }
            }
        }
    }

    fn boards(&mut self, value: &Value) {
        let Some(items) = self.array("boards", value) else {
            return;
        };
        let mut seen = HashSet::new();
        for (i, item) in items.iter().enumerate() {
            let path = index("boards", i);
            let Some(map) = self.object(&path, item, &["id", "title", "markdown"], &["id", "markdown"]) else {
                continue;
            };
            if let Some(v) = Self::field(map, "id") {
                if let Some(id) = self.non_empty(&join(&path, "id"), v) {
                    if !seen.insert(id.to_string()) {
                        self.issue(&join(&path, "id"), format!("duplicate board id {id:?}"));
                    }
                }
            }
            self.opt_string(&path, map, "title");
            if let Some(v) = Self::field(map, "markdown") {
                self.string(&join(&path, "markdown"), v);
            }
        }
    }
}

pub fn is_valid_slug(slug: &str) -> bool {
    let mut chars = slug.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}
