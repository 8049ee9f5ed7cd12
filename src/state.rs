//! The state container the UI reads and writes.
//!
//! Holds the loaded dataset and the user's selection; everything shown on
//! screen is derived from it on demand by the pure functions in
//! [`crate::aggregate`] and [`crate::filter`].

use crate::aggregate::{self, LegendItem, TypeCounts};
use crate::config::AppConfig;
use crate::data::LoadError;
use crate::filter::filter_features;
use crate::processing::Dataset;
use crate::types::{GeoRecord, TypeLabelMap, UNKNOWN_TYPE};
use std::collections::HashSet;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    Loading,
    Ready,
    Failed(String),
}

/// Identifies one load; completions from older loads are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Panel {
    Filters,
    Details,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Loading,
    Error(String),
    NoMatches,
    Showing { filtered: usize, total: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionState {
    pub selected_types: HashSet<String>,
    pub search_term: String,
    pub selected_feature: Option<GeoRecord>,
    pub map_style: String,
}

/// What the details panel shows for a selected feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureDetails {
    pub title: String,
    pub type_label: String,
    pub coordinates: String,
    pub copy_text: String,
    pub tags: Vec<String>,
}

impl FeatureDetails {
    pub fn from_record(record: &GeoRecord) -> Self {
        let title = if record.name.is_empty() {
            "Facility details".to_string()
        } else {
            record.name.clone()
        };
        let type_label = [&record.type_label, &record.type_norm]
            .into_iter()
            .find(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| UNKNOWN_TYPE.to_string());

        Self {
            title,
            type_label,
            coordinates: format!("{:.6}, {:.6}", record.lat(), record.lng()),
            copy_text: format!("{}, {}", record.lat(), record.lng()),
            tags: record.tags.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AtlasState {
    static_labels: TypeLabelMap,
    dataset: Dataset,
    load: LoadState,
    load_ticket: u64,
    selection: SelectionState,
    universe_len: usize,
    open_panels: HashSet<Panel>,
    revision: u64,
}

impl AtlasState {
    pub fn new(config: &AppConfig) -> Self {
        let static_labels = aggregate::static_labels(&config.types);
        Self {
            static_labels,
            dataset: Dataset::default(),
            load: LoadState::Loading,
            load_ticket: 0,
            selection: SelectionState {
                selected_types: HashSet::new(),
                search_term: String::new(),
                selected_feature: None,
                map_style: config.default_style_url(),
            },
            universe_len: 0,
            open_panels: HashSet::new(),
            revision: 0,
        }
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn load_state(&self) -> &LoadState {
        &self.load
    }

    pub fn features(&self) -> &[GeoRecord] {
        &self.dataset.features
    }

    /// Bumped on every change the map has to reflect.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn begin_load(&mut self) -> LoadTicket {
        self.load_ticket += 1;
        self.load = LoadState::Loading;
        self.touch();
        LoadTicket(self.load_ticket)
    }

    /// Applies a finished load. Returns `false` if a newer load has started since.
    ///
    /// A failure leaves the feature set empty and is reported through [`Self::status`].
    pub fn finish_load(&mut self, ticket: LoadTicket, result: Result<Dataset, LoadError>) -> bool {
        if ticket.0 != self.load_ticket {
            info!("Discarding result of superseded load {}", ticket.0);
            return false;
        }
        match result {
            Ok(dataset) => {
                self.dataset = dataset;
                self.load = LoadState::Ready;
            }
            Err(e) => {
                warn!("Could not load data: {}", e);
                self.dataset = Dataset::default();
                self.load = LoadState::Failed(e.to_string());
            }
        }
        self.refresh_universe();
        self.touch();
        true
    }

    pub fn labels(&self) -> TypeLabelMap {
        aggregate::effective_labels(&self.static_labels, &self.dataset.type_labels, &self.dataset.features)
    }

    pub fn type_universe(&self) -> Vec<String> {
        aggregate::type_universe(&self.labels())
    }

    pub fn type_counts(&self) -> TypeCounts {
        aggregate::type_counts(&self.dataset.features)
    }

    pub fn filtered(&self) -> Vec<GeoRecord> {
        filter_features(
            &self.dataset.features,
            &self.selection.selected_types,
            &self.selection.search_term,
        )
    }

    pub fn legend(&self, preloaded: &[String]) -> Vec<LegendItem> {
        aggregate::legend(preloaded, &self.labels(), &self.type_counts())
    }

    pub fn status(&self) -> Status {
        match &self.load {
            LoadState::Loading => Status::Loading,
            LoadState::Failed(message) => Status::Error(message.clone()),
            LoadState::Ready => match self.filtered().len() {
                0 => Status::NoMatches,
                filtered => Status::Showing { filtered, total: self.dataset.len() },
            },
        }
    }

    pub fn details(&self) -> Option<FeatureDetails> {
        self.selection.selected_feature.as_ref().map(FeatureDetails::from_record)
    }

    pub fn toggle_type(&mut self, type_norm: &str) {
        if !self.selection.selected_types.remove(type_norm) {
            self.selection.selected_types.insert(type_norm.to_string());
        }
        self.touch();
    }

    pub fn set_selected_types<I, S>(&mut self, types: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection.selected_types = types.into_iter().map(Into::into).collect();
        self.touch();
    }

    pub fn select_all_types(&mut self) {
        self.selection.selected_types = self.type_universe().into_iter().collect();
        self.touch();
    }

    pub fn clear_types(&mut self) {
        self.selection.selected_types.clear();
        self.touch();
    }

    pub fn set_search(&mut self, term: &str) {
        self.selection.search_term = term.to_string();
        self.touch();
    }

    /// Everything visible again, search cleared.
    pub fn reset(&mut self) {
        self.selection.selected_types = self.type_universe().into_iter().collect();
        self.selection.search_term.clear();
        self.touch();
    }

    pub fn select_feature(&mut self, record: GeoRecord) {
        self.selection.selected_feature = Some(record);
        self.open_panels.insert(Panel::Details);
    }

    pub fn close_details(&mut self) {
        self.selection.selected_feature = None;
        self.open_panels.remove(&Panel::Details);
    }

    pub fn set_map_style(&mut self, style_url: &str) {
        self.selection.map_style = style_url.to_string();
    }

    pub fn is_panel_open(&self, panel: Panel) -> bool {
        self.open_panels.contains(&panel)
    }

    /// Records a panel opening or closing; returns whether the map must be resized.
    pub fn set_panel_open(&mut self, panel: Panel, open: bool) -> bool {
        if open {
            self.open_panels.insert(panel)
        } else {
            self.open_panels.remove(&panel)
        }
    }

    // The universe only counts as known once data has actually arrived.
    fn refresh_universe(&mut self) {
        if self.load != LoadState::Ready {
            return;
        }
        let universe = self.type_universe();
        if let Some(selected) =
            aggregate::bootstrap_selection(self.universe_len, &universe, &self.selection.selected_types)
        {
            info!("Selecting all {} types", selected.len());
            self.selection.selected_types = selected;
        }
        self.universe_len = universe.len();
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}
