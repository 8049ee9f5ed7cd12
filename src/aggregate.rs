//! Derived views over the full (unfiltered) feature set.

use crate::config::TypeConfig;
use crate::types::{GeoRecord, TypeLabelMap};
use std::collections::{HashMap, HashSet};

pub type TypeCounts = HashMap<String, usize>;

#[derive(Debug, Clone, PartialEq)]
pub struct LegendItem {
    pub key: String,
    pub label: String,
    pub count: usize,
}

/// Label map from the static configuration; unlabeled entries show their key.
pub fn static_labels(types: &[TypeConfig]) -> TypeLabelMap {
    let mut labels = TypeLabelMap::new();
    for t in types {
        let label = t.label.as_deref().unwrap_or(&t.type_norm);
        labels.insert_if_absent(&t.type_norm, label);
    }
    labels
}

/// Static labels, then labels collected at build time, then anything only the features know about.
///
/// Earlier entries are never overwritten by later ones.
pub fn effective_labels(
    static_labels: &TypeLabelMap,
    data_labels: &TypeLabelMap,
    features: &[GeoRecord],
) -> TypeLabelMap {
    let mut labels = static_labels.clone();
    for (type_norm, label) in data_labels.iter() {
        labels.insert_if_absent(type_norm, label);
    }
    for feature in features {
        if feature.type_norm.is_empty() {
            continue;
        }
        let label = if feature.type_label.is_empty() {
            &feature.type_norm
        } else {
            &feature.type_label
        };
        labels.insert_if_absent(&feature.type_norm, label);
    }
    labels
}

/// Every known type key, in discovery order.
pub fn type_universe(labels: &TypeLabelMap) -> Vec<String> {
    labels.keys().map(str::to_string).collect()
}

pub fn type_counts(features: &[GeoRecord]) -> TypeCounts {
    let mut counts = TypeCounts::new();
    for feature in features {
        if feature.type_norm.is_empty() {
            continue;
        }
        *counts.entry(feature.type_norm.clone()).or_default() += 1;
    }
    counts
}

/// Returns the initial "everything selected" set when the universe has just
/// become known and nothing is selected yet.
///
/// Only the empty -> non-empty transition of the universe fires, so a user
/// who deselected everything later is left alone.
pub fn bootstrap_selection(
    previous_universe_len: usize,
    universe: &[String],
    selected: &HashSet<String>,
) -> Option<HashSet<String>> {
    if previous_universe_len == 0 && !universe.is_empty() && selected.is_empty() {
        Some(universe.iter().cloned().collect())
    } else {
        None
    }
}

/// Legend rows: preloaded icon types first, then every labeled type.
pub fn legend(preloaded: &[String], labels: &TypeLabelMap, counts: &TypeCounts) -> Vec<LegendItem> {
    let mut seen = HashSet::new();
    preloaded
        .iter()
        .map(String::as_str)
        .chain(labels.keys())
        .filter(|key| !key.is_empty() && seen.insert(key.to_string()))
        .map(|key| LegendItem {
            key: key.to_string(),
            label: labels
                .get(key)
                .map(str::to_string)
                .unwrap_or_else(|| key.replace('_', " ")),
            count: counts.get(key).copied().unwrap_or(0),
        })
        .collect()
}
