use crate::normalize::normalize_row;
use crate::types::{GeoRecord, RawRow, TypeLabelMap};
use rayon::prelude::*;
use tracing::debug;

/// Output of one full build over the source rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub features: Vec<GeoRecord>,
    pub type_labels: TypeLabelMap,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Normalizes every row and collects the first label seen for each type.
///
/// Pure over `rows`; callers rebuild the whole dataset on reload instead of patching it.
/// The label map depends on row order: the first occurrence of a type wins.
pub fn build_features(rows: &[RawRow]) -> Dataset {
    // collect keeps input order, so first-seen labels below stay deterministic
    let features: Vec<GeoRecord> = rows
        .par_iter()
        .filter_map(normalize_row)
        .collect();

    let mut type_labels = TypeLabelMap::new();
    for feature in &features {
        if feature.type_norm.is_empty() {
            continue;
        }
        type_labels.insert_if_absent(&feature.type_norm, &feature.type_label);
    }

    debug!("Kept {} of {} rows, {} types", features.len(), rows.len(), type_labels.len());

    Dataset { features, type_labels }
}
