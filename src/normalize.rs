//! Turns one raw source row into a [`GeoRecord`], or rejects it.
//!
//! Rejection is silent: rows without usable coordinates simply produce no record.

use crate::types::{json_to_tag, GeoRecord, RawRow, RawValue, UNKNOWN_TYPE};
use geo::Point;

const LAT_COLUMNS: &[&str] = &["lat", "latitude", "latitudes"];
// "longtitudes" is a misspelling found in real exports
const LNG_COLUMNS: &[&str] = &["lng", "longitude", "lon", "long", "longtitudes"];
const NAME_COLUMNS: &[&str] = &["name", "military_base_name"];
const COORDINATES_COLUMN: &str = "coordinates";

pub fn normalize_row(row: &RawRow) -> Option<GeoRecord> {
    let (lng, lat) = alias_position(row).or_else(|| combined_position(row))?;

    let name = row.first_text(NAME_COLUMNS).unwrap_or_default().to_string();
    // untyped rows share the unknown bucket and its label; their own `type` text is ignored
    let (type_norm, type_label) = match row.first_text(&["type_norm"]) {
        Some(type_norm) => {
            let label = row.first_text(&["type"]).unwrap_or(type_norm);
            (type_norm.to_string(), label.to_string())
        }
        None => (UNKNOWN_TYPE.to_string(), UNKNOWN_TYPE.to_string()),
    };

    Some(GeoRecord {
        name,
        type_norm,
        type_label,
        tags: parse_tags(row.get("tags")),
        position: Point::new(lng, lat),
    })
}

/// Reads `(lng, lat)` from the separate latitude/longitude columns.
fn alias_position(row: &RawRow) -> Option<(f64, f64)> {
    let lat = parse_finite(row.first_text(LAT_COLUMNS)?)?;
    let lng = parse_finite(row.first_text(LNG_COLUMNS)?)?;
    Some((lng, lat))
}

/// Reads the combined `coordinates` column, ordered `lng,lat[,alt]`.
fn combined_position(row: &RawRow) -> Option<(f64, f64)> {
    let parts: Vec<Option<f64>> = match row.get(COORDINATES_COLUMN)? {
        RawValue::Text(s) => s.split(',').map(parse_finite).collect(),
        RawValue::List(items) => items.iter().map(|s| parse_finite(s)).collect(),
    };

    match parts.as_slice() {
        [Some(lng), Some(lat), ..] => Some((*lng, *lat)),
        _ => None,
    }
}

fn parse_finite(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Tags arrive either structured or as a JSON array; anything unparsable becomes empty.
fn parse_tags(value: Option<&RawValue>) -> Vec<String> {
    match value {
        Some(RawValue::List(tags)) => tags.clone(),
        Some(RawValue::Text(s)) if !s.trim().is_empty() => {
            match serde_json::from_str::<serde_json::Value>(s) {
                Ok(serde_json::Value::Array(items)) => items.iter().map(json_to_tag).collect(),
                _ => Vec::new(),
            }
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_columns_are_swapped_to_lng_lat() {
        let row = RawRow::new()
            .with_text("name", "Kubinka")
            .with_text("lat", "55.7")
            .with_text("lng", "36.7")
            .with_text("type_norm", "airbase")
            .with_text("type", "Air Base")
            .with_text("tags", "[\"fighter\"]");

        let record = normalize_row(&row).unwrap();
        assert_eq!(record.coordinates(), [36.7, 55.7]);
        assert_eq!(record.name, "Kubinka");
        assert_eq!(record.type_norm, "airbase");
        assert_eq!(record.type_label, "Air Base");
        assert_eq!(record.tags, vec!["fighter"]);
    }

    #[test]
    fn test_every_alias_is_accepted() {
        for lat_col in LAT_COLUMNS {
            for lng_col in LNG_COLUMNS {
                let row = RawRow::new().with_text(lat_col, "10.5").with_text(lng_col, "-20.25");
                let record = normalize_row(&row)
                    .unwrap_or_else(|| panic!("{} / {} rejected", lat_col, lng_col));
                assert_eq!(record.coordinates(), [-20.25, 10.5]);
            }
        }
    }

    #[test]
    fn test_combined_coordinates_fallback() {
        let row = RawRow::new().with_text("coordinates", "37.5,55.8,0");
        assert_eq!(normalize_row(&row).unwrap().coordinates(), [37.5, 55.8]);

        let row = RawRow::new().with_list("coordinates", &["37.5", " 55.8 "]);
        assert_eq!(normalize_row(&row).unwrap().coordinates(), [37.5, 55.8]);
    }

    #[test]
    fn test_fallback_used_when_aliases_are_bad() {
        let row = RawRow::new()
            .with_text("lat", "abc")
            .with_text("lng", "36.7")
            .with_text("coordinates", "37.5,55.8");
        assert_eq!(normalize_row(&row).unwrap().coordinates(), [37.5, 55.8]);
    }

    #[test]
    fn test_rows_without_finite_coordinates_are_rejected() {
        let rows = [
            RawRow::new().with_text("lat", "abc").with_text("lng", "36.7"),
            RawRow::new().with_text("lat", "55.7"),
            RawRow::new().with_text("lat", "inf").with_text("lng", "36.7"),
            RawRow::new().with_text("lat", "NaN").with_text("lng", "NaN"),
            RawRow::new().with_text("coordinates", "37.5"),
            RawRow::new().with_text("coordinates", "37.5,abc,0"),
            RawRow::new().with_text("name", "nowhere"),
            RawRow::new(),
        ];
        for row in &rows {
            assert!(normalize_row(row).is_none(), "{:?} should be rejected", row);
        }
    }

    #[test]
    fn test_bad_tags_become_empty() {
        let base = || RawRow::new().with_text("lat", "1").with_text("lng", "2");

        assert!(normalize_row(&base().with_text("tags", "[not json")).unwrap().tags.is_empty());
        assert!(normalize_row(&base().with_text("tags", "{\"a\": 1}")).unwrap().tags.is_empty());
        assert!(normalize_row(&base()).unwrap().tags.is_empty());
        assert_eq!(
            normalize_row(&base().with_text("tags", "[\"a\", 3]")).unwrap().tags,
            vec!["a", "3"]
        );
        assert_eq!(
            normalize_row(&base().with_list("tags", &["x", "y"])).unwrap().tags,
            vec!["x", "y"]
        );
    }

    #[test]
    fn test_untyped_row_ignores_its_type_text() {
        let row = RawRow::new()
            .with_text("lat", "1")
            .with_text("lng", "2")
            .with_text("type_norm", " ")
            .with_text("type", "Air Base");
        let record = normalize_row(&row).unwrap();
        assert_eq!(record.type_norm, UNKNOWN_TYPE);
        assert_eq!(record.type_label, UNKNOWN_TYPE);
    }

    #[test]
    fn test_numbers_with_units_are_rejected() {
        // stricter than a leading-prefix parse: "55.7km" is not read as 55.7
        for value in ["55.7km", "55.7°", "12abc"] {
            let row = RawRow::new().with_text("lat", value).with_text("lng", "36.7");
            assert!(normalize_row(&row).is_none(), "{} should be rejected", value);
        }
        let row = RawRow::new().with_text("coordinates", "37.5E,55.8N");
        assert!(normalize_row(&row).is_none());
    }

    #[test]
    fn test_name_alias_and_type_defaults() {
        let row = RawRow::new()
            .with_text("lat", "1")
            .with_text("lng", "2")
            .with_text("name", "")
            .with_text("military_base_name", "Engels");
        let record = normalize_row(&row).unwrap();
        assert_eq!(record.name, "Engels");
        assert_eq!(record.type_norm, UNKNOWN_TYPE);
        assert_eq!(record.type_label, UNKNOWN_TYPE);

        let row = RawRow::new()
            .with_text("lat", "1")
            .with_text("lng", "2")
            .with_text("type_norm", "garrison");
        let record = normalize_row(&row).unwrap();
        assert_eq!(record.name, "");
        assert_eq!(record.type_label, "garrison");
    }
}
