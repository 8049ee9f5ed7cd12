use crate::types::GeoRecord;
use std::collections::HashSet;

/// Keeps features whose type is selected and whose name contains the search term.
///
/// The term is trimmed and compared case-insensitively; an empty term matches
/// every selected feature. Input order is preserved.
pub fn filter_features(
    features: &[GeoRecord],
    selected_types: &HashSet<String>,
    search_term: &str,
) -> Vec<GeoRecord> {
    if selected_types.is_empty() {
        return Vec::new();
    }
    let term = search_term.trim().to_lowercase();

    features
        .iter()
        .filter(|f| matches(f, selected_types, &term))
        .cloned()
        .collect()
}

fn matches(feature: &GeoRecord, selected_types: &HashSet<String>, term: &str) -> bool {
    if !selected_types.contains(&feature.type_norm) {
        return false;
    }
    term.is_empty() || feature.name.to_lowercase().contains(term)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Point;

    fn feature(name: &str, type_norm: &str) -> GeoRecord {
        GeoRecord {
            name: name.to_string(),
            type_norm: type_norm.to_string(),
            type_label: type_norm.to_string(),
            tags: Vec::new(),
            position: Point::new(1.0, 2.0),
        }
    }

    fn sample() -> Vec<GeoRecord> {
        vec![
            feature("Kubinka", "airbase"),
            feature("Severomorsk", "naval_base"),
            feature("Engels", "airbase"),
            feature("Alabino", "garrison"),
        ]
    }

    fn types(keys: &[&str]) -> HashSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_all_types_and_empty_search_is_identity() {
        let features = sample();
        let all = types(&["airbase", "naval_base", "garrison"]);
        assert_eq!(filter_features(&features, &all, ""), features);
        assert_eq!(filter_features(&features, &all, "   "), features);
    }

    #[test]
    fn test_empty_selection_excludes_everything() {
        let features = sample();
        assert!(filter_features(&features, &HashSet::new(), "").is_empty());
        assert!(filter_features(&features, &HashSet::new(), "kub").is_empty());
    }

    #[test]
    fn test_search_is_case_insensitive_substring() {
        let features = sample();
        let all = types(&["airbase", "naval_base", "garrison"]);
        let found = filter_features(&features, &all, "  ENG ");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Engels");

        let found = filter_features(&features, &all, "o");
        let names: Vec<_> = found.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Severomorsk", "Alabino"]);
    }

    #[test]
    fn test_type_selection_preserves_order() {
        let features = sample();
        let found = filter_features(&features, &types(&["airbase"]), "");
        let names: Vec<_> = found.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Kubinka", "Engels"]);
    }

    #[test]
    fn test_filter_is_idempotent() {
        let features = sample();
        let selected = types(&["airbase", "garrison"]);
        let once = filter_features(&features, &selected, "a");
        let twice = filter_features(&once, &selected, "a");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unselected_type_is_excluded() {
        let features = vec![feature("Nameless", "")];
        assert!(filter_features(&features, &types(&["airbase"]), "").is_empty());
        assert_eq!(filter_features(&features, &types(&[""]), "").len(), 1);
    }
}
