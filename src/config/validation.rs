//! Unknown-key detection for config files
//!
//! The raw TOML is walked before serde sees it. Every dotted key that the
//! default configuration does not have produces a warning, with the closest
//! known key offered when one is within edit distance 3. Unknown keys never
//! fail a load.

use std::collections::BTreeSet;
use std::fmt;

use super::LocatorConfig;

/// A non-fatal config warning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKey {
    pub key: String,
    pub suggestion: Option<String>,
}

impl fmt::Display for UnknownKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown config key '{}'", self.key)?;
        if let Some(s) = &self.suggestion {
            write!(f, ", did you mean '{s}'?")?;
        }
        Ok(())
    }
}

/// Every dotted key path a full config can contain.
pub fn known_config_keys() -> BTreeSet<String> {
    toml::Value::try_from(LocatorConfig::default())
        .map(|value| walk_toml_keys(&value, "").into_iter().collect())
        .unwrap_or_default()
}

/// Dotted paths of all keys and tables in a TOML value.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let Some(table) = value.as_table() else {
        return Vec::new();
    };
    let mut keys = Vec::new();
    for (k, v) in table {
        let path = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{prefix}.{k}")
        };
        if v.is_table() {
            keys.extend(walk_toml_keys(v, &path));
        }
        keys.push(path);
    }
    keys
}

/// Closest known key within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &BTreeSet<String>) -> Option<String> {
    known
        .iter()
        .map(|k| (edit_distance(unknown, k), k))
        .filter(|(d, _)| *d <= 3)
        .min_by_key(|(d, _)| *d)
        .map(|(_, k)| k.clone())
}

/// Warnings for keys the config does not define. Unparseable TOML yields
/// none; serde reports it.
pub fn find_unknown_keys(raw_toml: &str) -> Vec<UnknownKey> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };
    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key))
        .map(|key| UnknownKey {
            suggestion: suggest_correction(&key, &known),
            key,
        })
        .collect()
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_keys_cover_every_section() {
        let known = known_config_keys();
        for key in [
            "sockets.router_path",
            "modem.poll_command",
            "database.has_header",
            "link.retry_delay_ms",
            "estimator.path_loss_exponent",
            "display.location_log",
        ] {
            assert!(known.contains(key), "missing {key}");
        }
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("same", "same"), 0);
    }
}
