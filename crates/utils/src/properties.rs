use anyhow::{anyhow, Context, Result};
use models::PortfolioProperty;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::database::PROPERTIES_KEY;

/// Statistics about a merge operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub added: usize,
    pub skipped: usize,
    pub total: usize,
}

impl MergeStats {
    pub fn has_duplicates(&self) -> bool {
        self.skipped > 0
    }
}

/// Stable id of a property: same portfolio, kind and timestamp is the same
/// fact, whatever value a later parse extracted.
pub fn property_id(property: &PortfolioProperty) -> String {
    let s = format!(
        "{}|{}|{}",
        property.portfolio,
        property.property,
        property.timestamp.to_rfc3339()
    );
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    let hash = hasher.finalize();

    format!("PROP-{}", hex::encode(&hash[..12]))
}

/// Merges properties into the database's `portfolio_properties` array,
/// skipping those whose `property_id` is already stored. The array is
/// created when missing.
///
/// # Example
/// ```no_run
/// use serde_json::json;
/// use utils::merge_properties_with_deduplication;
///
/// let database = json!({"portfolio_properties": []});
/// let (merged, stats) = merge_properties_with_deduplication(database, &[]).unwrap();
/// println!("Added: {}, Skipped: {}", stats.added, stats.skipped);
/// ```
pub fn merge_properties_with_deduplication(
    mut database: Value,
    properties: &[PortfolioProperty],
) -> Result<(Value, MergeStats)> {
    let root = database
        .as_object_mut()
        .ok_or_else(|| anyhow!("database.json is not a JSON object"))?;
    let arr = root
        .entry(PROPERTIES_KEY)
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| anyhow!("database.json '{}' is not an array", PROPERTIES_KEY))?;

    let mut existing_ids: HashSet<String> = arr
        .iter()
        .filter_map(|p| p.get("property_id").and_then(|id| id.as_str()).map(|s| s.to_string()))
        .collect();

    let mut stats = MergeStats {
        total: properties.len(),
        ..MergeStats::default()
    };

    for property in properties {
        let id = property_id(property);
        if !existing_ids.insert(id.clone()) {
            stats.skipped += 1;
            continue;
        }

        let mut entry = serde_json::Map::new();
        entry.insert("property_id".to_string(), Value::String(id));
        let fields = serde_json::to_value(property).context("Serializing portfolio property")?;
        if let Value::Object(fields) = fields {
            entry.extend(fields);
        }
        arr.push(Value::Object(entry));
        stats.added += 1;
    }

    Ok((database, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use models::PortfolioPropertyKind;
    use serde_json::json;

    fn property(kind: PortfolioPropertyKind, value: &str) -> PortfolioProperty {
        PortfolioProperty {
            portfolio: "1234567".to_string(),
            property: kind,
            value: value.to_string(),
            timestamp: Utc.with_ymd_and_hms(2020, 3, 31, 20, 59, 59).unwrap(),
        }
    }

    #[test]
    fn test_property_id_is_stable_and_ignores_value() {
        let a = property(PortfolioPropertyKind::TotalAssets, "100");
        let b = property(PortfolioPropertyKind::TotalAssets, "200");
        let c = property(PortfolioPropertyKind::exchange_rate_for("USD"), "100");

        assert_eq!(property_id(&a), property_id(&b));
        assert_ne!(property_id(&a), property_id(&c));
        assert!(property_id(&a).starts_with("PROP-"));
        assert_eq!(property_id(&a).len(), "PROP-".len() + 24);
    }

    #[test]
    fn test_merge_skips_duplicates() {
        let properties = vec![
            property(PortfolioPropertyKind::TotalAssets, "1500.5"),
            property(PortfolioPropertyKind::exchange_rate_for("USD"), "77.7325"),
            property(PortfolioPropertyKind::TotalAssets, "1500.5"),
        ];

        let (db, first) = merge_properties_with_deduplication(json!({}), &properties).unwrap();
        assert_eq!(first, MergeStats { added: 2, skipped: 1, total: 3 });

        let (db, second) = merge_properties_with_deduplication(db, &properties[..2]).unwrap();
        assert_eq!(second.added, 0);
        assert!(second.has_duplicates());

        let stored = db[PROPERTIES_KEY].as_array().unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1]["property"], "USD_EXCHANGE_RATE");
        assert_eq!(stored[1]["value"], "77.7325");
        assert!(stored[0]["property_id"].as_str().unwrap().starts_with("PROP-"));
    }

    #[test]
    fn test_merge_rejects_malformed_database() {
        assert!(merge_properties_with_deduplication(json!([]), &[]).is_err());
        assert!(merge_properties_with_deduplication(json!({PROPERTIES_KEY: 1}), &[]).is_err());
    }
}
