//! Markdown image links inside board text.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

fn image_link_regex() -> &'static Regex {
    static ONCE: OnceLock<Regex> = OnceLock::new();
    ONCE.get_or_init(|| {
        Regex::new(r#"!\[(?P<alt>[^\]]*)\]\((?P<target>[^)\s]+)(?P<title>\s+"[^"]*")?\)"#)
            .expect("valid image link regex")
    })
}

/// Distinct image targets in first-seen order.
pub fn image_targets(text: &str) -> Vec<String> {
    let mut out: Vec<String> = vec![];
    for caps in image_link_regex().captures_iter(text) {
        let target = &caps["target"];
        if !out.iter().any(|t| t == target) {
            out.push(target.to_string());
        }
    }
    out
}

/// Swap image targets found in `replacements`; everything else is copied through.
pub fn replace_image_targets(text: &str, replacements: &HashMap<String, String>) -> String {
    if replacements.is_empty() {
        return text.to_string();
    }
    image_link_regex()
        .replace_all(text, |caps: &Captures| {
            let target = &caps["target"];
            match replacements.get(target) {
                Some(url) => format!(
                    "![{}]({}{})",
                    &caps["alt"],
                    url,
                    caps.name("title").map_or("", |m| m.as_str())
                ),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
