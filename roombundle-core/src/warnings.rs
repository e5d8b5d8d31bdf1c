//! Advisory Diagnostics - Rules Produce Warnings
//!
//! Warnings never block a bundle. They end up in the manifest and on the
//! console, nowhere else.

use serde::{Deserialize, Serialize};

use crate::room::{RoomDescription, Vec3};

/// Walls thinner than this flicker against whatever sits behind them.
pub const MIN_WALL_THICKNESS: f64 = 0.02;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Warning {
    pub rule: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

/// Warning rule trait - read-only, never fails
pub trait WarningRule {
    fn name(&self) -> &'static str;
    fn check(&self, doc: &RoomDescription) -> Vec<Warning>;
}

pub struct MissingBackgroundRule;

impl WarningRule for MissingBackgroundRule {
    fn name(&self) -> &'static str { "missing_background" }

    fn check(&self, doc: &RoomDescription) -> Vec<Warning> {
        let has_background = doc
            .environment
            .as_ref()
            .and_then(|env| env.background.as_deref())
            .is_some_and(|bg| !bg.trim().is_empty());

        if has_background {
            return vec![];
        }
        vec![Warning {
            rule: self.name().to_string(),
            message: "environment.background is not set; the viewer will fall back to its own look. \
                      Set the background explicitly"
                .to_string(),
            subject: None,
        }]
    }
}

pub struct ThinWallRule;

impl WarningRule for ThinWallRule {
    fn name(&self) -> &'static str { "thin_wall" }

    fn check(&self, doc: &RoomDescription) -> Vec<Warning> {
        doc.structure
            .decor
            .iter()
            .filter(|d| d.kind == "firewall_wall")
            .filter_map(|d| {
                let thickness = d.extra.get("thickness")?.as_f64()?;
                (thickness > 0.0 && thickness < MIN_WALL_THICKNESS).then(|| Warning {
                    rule: self.name().to_string(),
                    message: format!(
                        "firewall_wall '{}' has thickness {} (< {}), which may cause z-fighting",
                        d.id, thickness, MIN_WALL_THICKNESS
                    ),
                    subject: Some(d.id.clone()),
                })
            })
            .collect()
    }
}

pub struct OutOfBoundsRule;

impl WarningRule for OutOfBoundsRule {
    fn name(&self) -> &'static str { "out_of_bounds" }

    fn check(&self, doc: &RoomDescription) -> Vec<Warning> {
        let dims = doc.structure.dimensions;
        let mut warnings = vec![];

        for device in &doc.devices {
            if !dims.contains(&device.position) {
                warnings.push(Warning {
                    rule: self.name().to_string(),
                    message: format!(
                        "device '{}' at {} is outside the room bounds {}",
                        device.alias,
                        fmt_vec3(&device.position),
                        fmt_bounds(doc)
                    ),
                    subject: Some(device.alias.clone()),
                });
            }
        }
        for decor in &doc.structure.decor {
            let Some(position) = decor.position else { continue };
            if !dims.contains(&position) {
                warnings.push(Warning {
                    rule: self.name().to_string(),
                    message: format!(
                        "decor '{}' ({}) at {} is outside the room bounds {}",
                        decor.id,
                        decor.kind,
                        fmt_vec3(&position),
                        fmt_bounds(doc)
                    ),
                    subject: Some(decor.id.clone()),
                });
            }
        }
        warnings
    }
}

fn fmt_vec3(p: &Vec3) -> String {
    format!("[{}, {}, {}]", p[0], p[1], p[2])
}

fn fmt_bounds(doc: &RoomDescription) -> String {
    let d = doc.structure.dimensions;
    format!(
        "x[{}, {}] y[0, {}] z[{}, {}]",
        -d.width / 2.0,
        d.width / 2.0,
        d.height,
        -d.depth / 2.0,
        d.depth / 2.0
    )
}

/// Analyzer runs every rule in order
pub struct Analyzer {
    rules: Vec<Box<dyn WarningRule>>,
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(MissingBackgroundRule),
                Box::new(ThinWallRule),
                Box::new(OutOfBoundsRule),
            ],
        }
    }

    pub fn analyze(&self, doc: &RoomDescription) -> Vec<Warning> {
        self.rules.iter().flat_map(|rule| rule.check(doc)).collect()
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the default rule set.
pub fn analyze(doc: &RoomDescription) -> Vec<Warning> {
    Analyzer::new().analyze(doc)
}
