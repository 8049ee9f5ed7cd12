use geo::Point;
use geojson::{Feature, Geometry, JsonObject, Value};
use serde_json::json;
use std::collections::HashMap;

/// Key used for records that carry no type of their own.
pub const UNKNOWN_TYPE: &str = "unknown";

/// A single cell of a parsed source row.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Text(String),
    /// Already-structured sequence (e.g. tags handed over by a caller rather than read from CSV).
    List(Vec<String>),
}

/// One parsed source row, keyed by lower-cased, trimmed column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    cells: HashMap<String, RawValue>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a cell, normalizing the column name the same way CSV headers are.
    pub fn insert(&mut self, column: &str, value: RawValue) {
        self.cells.insert(column.trim().to_lowercase(), value);
    }

    pub fn with_text(mut self, column: &str, value: &str) -> Self {
        self.insert(column, RawValue::Text(value.to_string()));
        self
    }

    pub fn with_list(mut self, column: &str, values: &[&str]) -> Self {
        self.insert(column, RawValue::List(values.iter().map(|s| s.to_string()).collect()));
        self
    }

    pub fn get(&self, column: &str) -> Option<&RawValue> {
        self.cells.get(column)
    }

    /// Text content of a column, if present and textual.
    pub fn text(&self, column: &str) -> Option<&str> {
        match self.cells.get(column) {
            Some(RawValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// First column among `aliases` holding non-blank text.
    pub fn first_text(&self, aliases: &[&str]) -> Option<&str> {
        aliases
            .iter()
            .filter_map(|alias| self.text(alias))
            .map(str::trim)
            .find(|s| !s.is_empty())
    }
}

/// A normalized facility record. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoRecord {
    pub name: String,
    pub type_norm: String,
    pub type_label: String,
    pub tags: Vec<String>,
    // x = longitude, y = latitude, both finite
    pub position: Point<f64>,
}

impl GeoRecord {
    pub fn lng(&self) -> f64 {
        self.position.x()
    }

    pub fn lat(&self) -> f64 {
        self.position.y()
    }

    /// GeoJSON ordering: `[lng, lat]`.
    pub fn coordinates(&self) -> [f64; 2] {
        [self.lng(), self.lat()]
    }

    pub fn to_feature(&self) -> Feature {
        let mut properties = JsonObject::new();
        properties.insert("name".to_string(), json!(self.name));
        properties.insert("type".to_string(), json!(self.type_label));
        properties.insert("type_norm".to_string(), json!(self.type_norm));
        properties.insert("tags".to_string(), json!(self.tags));
        properties.insert("lat".to_string(), json!(self.lat()));
        properties.insert("lng".to_string(), json!(self.lng()));

        Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Point(vec![self.lng(), self.lat()]))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }

    /// Rebuilds a record from a rendered feature (e.g. one returned by a hit test).
    pub fn from_feature(feature: &Feature) -> Option<Self> {
        let (lng, lat) = match feature.geometry.as_ref().map(|g| &g.value) {
            Some(Value::Point(coords)) if coords.len() >= 2 => (coords[0], coords[1]),
            _ => return None,
        };
        if !lng.is_finite() || !lat.is_finite() {
            return None;
        }

        let text = |key: &str| {
            feature
                .property(key)
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let type_norm = text("type_norm");
        let type_label = match text("type") {
            label if label.is_empty() => type_norm.clone(),
            label => label,
        };
        let tags = feature
            .property("tags")
            .and_then(serde_json::Value::as_array)
            .map(|tags| tags.iter().map(json_to_tag).collect())
            .unwrap_or_default();

        Some(Self {
            name: text("name"),
            type_norm,
            type_label,
            tags,
            position: Point::new(lng, lat),
        })
    }
}

/// Tags are kept as strings; non-string JSON values keep their JSON text.
pub fn json_to_tag(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `type_norm` -> display label, iterated in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeLabelMap {
    order: Vec<String>,
    labels: HashMap<String, String>,
}

impl TypeLabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts unless the key is already present; an existing label is never replaced.
    pub fn insert_if_absent(&mut self, type_norm: &str, label: &str) -> bool {
        if self.labels.contains_key(type_norm) {
            return false;
        }
        self.order.push(type_norm.to_string());
        self.labels.insert(type_norm.to_string(), label.to_string());
        true
    }

    pub fn get(&self, type_norm: &str) -> Option<&str> {
        self.labels.get(type_norm).map(String::as_str)
    }

    pub fn contains(&self, type_norm: &str) -> bool {
        self.labels.contains_key(type_norm)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order
            .iter()
            .map(|k| (k.as_str(), self.labels[k].as_str()))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> GeoRecord {
        GeoRecord {
            name: "Kubinka".to_string(),
            type_norm: "airbase".to_string(),
            type_label: "Air Base".to_string(),
            tags: vec!["fighter".to_string()],
            position: Point::new(36.7, 55.7),
        }
    }

    #[test]
    fn test_feature_properties_and_ordering() {
        let feature = record().to_feature();
        match feature.geometry.as_ref().map(|g| &g.value) {
            Some(Value::Point(coords)) => assert_eq!(coords, &vec![36.7, 55.7]),
            other => panic!("unexpected geometry {:?}", other),
        }
        assert_eq!(feature.property("type_norm"), Some(&json!("airbase")));
        assert_eq!(feature.property("type"), Some(&json!("Air Base")));
        assert_eq!(feature.property("lat"), Some(&json!(55.7)));
        assert_eq!(feature.property("lng"), Some(&json!(36.7)));
        assert_eq!(feature.property("tags"), Some(&json!(["fighter"])));
    }

    #[test]
    fn test_feature_back_to_record() {
        let original = record();
        let restored = GeoRecord::from_feature(&original.to_feature()).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_label_map_keeps_first_label_and_order() {
        let mut labels = TypeLabelMap::new();
        assert!(labels.insert_if_absent("garrison", "Garrison"));
        assert!(labels.insert_if_absent("airbase", "Air Base"));
        assert!(!labels.insert_if_absent("garrison", "Base Garrison"));

        assert_eq!(labels.get("garrison"), Some("Garrison"));
        assert_eq!(labels.keys().collect::<Vec<_>>(), vec!["garrison", "airbase"]);
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn test_raw_row_first_text_skips_blank_aliases() {
        let row = RawRow::new()
            .with_text("lat", "  ")
            .with_text("Latitude ", "55.1");
        assert_eq!(row.first_text(&["lat", "latitude"]), Some("55.1"));
        assert_eq!(row.first_text(&["latitudes"]), None);
    }
}
