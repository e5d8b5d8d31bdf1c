//! Structural string visitor over `serde_json::Value`.
//!
//! Knows nothing about decor kinds: the caller decides which strings are
//! interesting (`predicate`) and what they become (`rewrite`).

use serde_json::Value;

/// Walk `value` depth-first, offering every string that passes `predicate` to
/// `rewrite`. `key` is the nearest object key (array items inherit their
/// parent's key). Returns the number of strings replaced.
pub fn rewrite_strings<P, F, E>(
    value: &mut Value,
    key: Option<&str>,
    path: &str,
    predicate: &P,
    rewrite: &mut F,
) -> Result<usize, E>
where
    P: Fn(Option<&str>, &str) -> bool,
    F: FnMut(&str, &str) -> Result<Option<String>, E>,
{
    match value {
        Value::String(s) => {
            if !predicate(key, s) {
                return Ok(0);
            }
            match rewrite(path, s)? {
                Some(replacement) if replacement != *s => {
                    *s = replacement;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
        Value::Array(items) => {
            let mut count = 0;
            for (i, item) in items.iter_mut().enumerate() {
                count += rewrite_strings(item, key, &format!("{path}[{i}]"), predicate, rewrite)?;
            }
            Ok(count)
        }
        Value::Object(map) => {
            let mut count = 0;
            for (k, item) in map.iter_mut() {
                count += rewrite_strings(item, Some(k.as_str()), &format!("{path}.{k}"), predicate, rewrite)?;
            }
            Ok(count)
        }
        _ => Ok(0),
    }
}
