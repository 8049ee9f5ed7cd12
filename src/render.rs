//! Presentation adapter between the filtered features and a map render engine.
//!
//! The engine is an imperative handle with mutable sources, layers and images.
//! [`MapView`] owns it and only ever talks to it through idempotent
//! "ensure it exists" / "replace data" operations.

use crate::config::{AppConfig, MapConfig};
use crate::icons::{Icon, IconBatch, IconCache, IconLoader, LoadedBatch};
use crate::types::{GeoRecord, UNKNOWN_TYPE};
use geo::Point;
use geojson::{Feature, FeatureCollection};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, info};

pub const SOURCE_ID: &str = "bases";
pub const CLUSTER_LAYER: &str = "clusters";
pub const CLUSTER_COUNT_LAYER: &str = "cluster-count";
pub const POINT_LAYER: &str = "unclustered-point";

#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("unknown source '{0}'")]
    UnknownSource(String),
    #[error("unknown cluster {0}")]
    UnknownCluster(u64),
    #[error("map has been removed")]
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClusterSource {
    pub cluster: bool,
    pub cluster_max_zoom: u8,
    pub cluster_radius: u32,
}

impl ClusterSource {
    pub fn from_config(map: &MapConfig) -> Self {
        Self {
            cluster: true,
            cluster_max_zoom: map.cluster_max_zoom,
            cluster_radius: map.cluster_radius,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Circle,
    Symbol,
}

/// Which primitives of a clustered source a layer draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerFilter {
    Clustered,
    Unclustered,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerSpec {
    pub id: String,
    pub kind: LayerKind,
    pub source: String,
    pub filter: LayerFilter,
    pub layout: serde_json::Value,
    pub paint: serde_json::Value,
}

/// What sits under a clicked position.
#[derive(Debug, Clone, PartialEq)]
pub enum Hit {
    Cluster {
        source: String,
        id: u64,
        center: Point<f64>,
        point_count: usize,
    },
    Marker(Feature),
}

pub trait RenderEngine {
    /// Switches basemap. Sources, layers and images registered so far are dropped.
    fn set_style(&mut self, style_url: &str);
    fn has_image(&self, name: &str) -> bool;
    fn add_image(&mut self, name: &str, icon: Icon);
    fn has_source(&self, id: &str) -> bool;
    fn add_source(&mut self, id: &str, options: ClusterSource, data: FeatureCollection);
    /// Replaces the source's data wholesale.
    fn set_data(&mut self, id: &str, data: FeatureCollection) -> Result<(), EngineError>;
    fn has_layer(&self, id: &str) -> bool;
    fn add_layer(&mut self, layer: LayerSpec);
    fn hit_test(&self, at: Point<f64>) -> Option<Hit>;
    fn cluster_expansion_zoom(&self, source_id: &str, cluster_id: u64) -> Result<f64, EngineError>;
    fn ease_to(&mut self, center: Point<f64>, zoom: f64);
    fn resize(&mut self);
    /// Releases the engine; later calls are no-ops or errors.
    fn remove(&mut self);
}

pub fn to_feature_collection(features: &[GeoRecord]) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: features.iter().map(GeoRecord::to_feature).collect(),
        foreign_members: None,
    }
}

pub fn cluster_layers(map: &MapConfig) -> Vec<LayerSpec> {
    vec![
        LayerSpec {
            id: CLUSTER_LAYER.to_string(),
            kind: LayerKind::Circle,
            source: SOURCE_ID.to_string(),
            filter: LayerFilter::Clustered,
            layout: json!({}),
            paint: json!({
                "circle-color": ["step", ["get", "point_count"], "#71c7ec", 20, "#1c9cea", 50, "#136fce", 100, "#0b4fa1"],
                "circle-radius": ["step", ["get", "point_count"], 15, 20, 20, 50, 25, 100, 30],
            }),
        },
        LayerSpec {
            id: CLUSTER_COUNT_LAYER.to_string(),
            kind: LayerKind::Symbol,
            source: SOURCE_ID.to_string(),
            filter: LayerFilter::Clustered,
            layout: json!({
                "text-field": ["get", "point_count_abbreviated"],
                "text-font": ["Open Sans Bold", "Arial Unicode MS Bold"],
                "text-size": 12,
            }),
            paint: json!({ "text-color": "#ffffff" }),
        },
        LayerSpec {
            id: POINT_LAYER.to_string(),
            kind: LayerKind::Symbol,
            source: SOURCE_ID.to_string(),
            filter: LayerFilter::Unclustered,
            layout: json!({
                "icon-image": ["coalesce", ["get", "type_norm"], UNKNOWN_TYPE],
                "icon-size": map.icon_size,
                "icon-allow-overlap": true,
                "icon-anchor": "bottom",
                "icon-offset": [0, -4],
            }),
            paint: json!({}),
        },
    ]
}

/// Result of resolving a click on the map.
#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    /// A cluster was clicked and the camera moved to reveal its members.
    Expanded { center: Point<f64>, zoom: f64 },
    Selected(GeoRecord),
    Ignored,
}

type SelectCallback = Box<dyn FnMut(&GeoRecord)>;

pub struct MapView<E: RenderEngine> {
    engine: E,
    map: MapConfig,
    preload: Vec<String>,
    fallback_icon: String,
    icons: IconCache,
    // latest submitted (revision, features); the renderer always shows this slot
    latest: Option<(u64, Vec<GeoRecord>)>,
    disposed: bool,
    on_select: Option<SelectCallback>,
}

impl<E: RenderEngine> MapView<E> {
    pub fn new(engine: E, config: &AppConfig) -> Self {
        Self {
            engine,
            map: config.map.clone(),
            preload: config.preloaded_icons(),
            fallback_icon: config.icons.fallback.clone(),
            icons: IconCache::new(),
            latest: None,
            disposed: false,
            on_select: None,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn set_on_select(&mut self, callback: impl FnMut(&GeoRecord) + 'static) {
        self.on_select = Some(Box::new(callback));
    }

    pub fn latest_revision(&self) -> Option<u64> {
        self.latest.as_ref().map(|(revision, _)| *revision)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Switches basemap and returns the icons that must be loaded again for it.
    pub fn load_style(&mut self, style_url: &str) -> IconBatch {
        if self.disposed {
            return IconBatch { epoch: self.icons.epoch(), names: Vec::new() };
        }
        info!("Loading map style {}", style_url);
        self.engine.set_style(style_url);
        self.icons.invalidate();

        let names: Vec<String> = self
            .preload
            .iter()
            .map(String::as_str)
            .chain(self.current_types())
            .map(str::to_string)
            .collect();
        self.icons.request(names.iter().map(String::as_str))
    }

    /// Stores a new filtered result. Returns `None` when the revision is stale.
    pub fn submit(&mut self, revision: u64, features: Vec<GeoRecord>) -> Option<IconBatch> {
        if self.disposed {
            return None;
        }
        if let Some(latest) = self.latest_revision() {
            if revision < latest {
                debug!("Ignoring stale revision {} (latest {})", revision, latest);
                return None;
            }
        }
        self.latest = Some((revision, features));
        let types: Vec<String> = self.current_types().into_iter().map(str::to_string).collect();
        Some(self.icons.request(types.iter().map(String::as_str)))
    }

    /// Registers loaded icons unless the batch predates a style change or teardown.
    pub fn apply_icons(&mut self, batch: LoadedBatch) -> bool {
        if self.disposed || !self.icons.accepts(&batch) {
            debug!("Discarding {} icons from epoch {}", batch.icons.len(), batch.epoch);
            return false;
        }
        for loaded in batch.icons {
            let Some(icon) = loaded.icon else { continue };
            if loaded.via_fallback && !self.engine.has_image(&self.fallback_icon) {
                self.engine.add_image(&self.fallback_icon, icon.clone());
            }
            if !self.engine.has_image(&loaded.requested) {
                self.engine.add_image(&loaded.requested, icon);
            }
        }
        true
    }

    /// Ensures source and layers exist and pushes the latest features to the engine.
    pub fn sync(&mut self) {
        if self.disposed {
            return;
        }
        let data = to_feature_collection(self.latest.as_ref().map(|(_, f)| f.as_slice()).unwrap_or(&[]));

        if self.engine.has_source(SOURCE_ID) {
            if let Err(e) = self.engine.set_data(SOURCE_ID, data) {
                debug!("set_data failed: {}", e);
            }
        } else {
            self.engine.add_source(SOURCE_ID, ClusterSource::from_config(&self.map), data);
        }

        for layer in cluster_layers(&self.map) {
            if !self.engine.has_layer(&layer.id) {
                self.engine.add_layer(layer);
            }
        }
    }

    /// Submit, load missing icons, then render the latest features.
    pub async fn refresh(&mut self, loader: &IconLoader, revision: u64, features: Vec<GeoRecord>) {
        if let Some(batch) = self.submit(revision, features) {
            if !batch.is_empty() {
                let loaded = loader.load_batch(batch).await;
                self.apply_icons(loaded);
            }
        }
        self.sync();
    }

    /// Switches basemap and re-establishes icons, source and layers against it.
    pub async fn change_style(&mut self, loader: &IconLoader, style_url: &str) {
        let batch = self.load_style(style_url);
        let loaded = loader.load_batch(batch).await;
        self.apply_icons(loaded);
        self.sync();
    }

    pub fn handle_click(&mut self, at: Point<f64>) -> ClickOutcome {
        if self.disposed {
            return ClickOutcome::Ignored;
        }
        match self.engine.hit_test(at) {
            Some(Hit::Cluster { source, id, center, .. }) => {
                match self.engine.cluster_expansion_zoom(&source, id) {
                    Ok(zoom) => {
                        self.engine.ease_to(center, zoom);
                        ClickOutcome::Expanded { center, zoom }
                    }
                    Err(e) => {
                        debug!("Cluster expansion failed: {}", e);
                        ClickOutcome::Ignored
                    }
                }
            }
            Some(Hit::Marker(feature)) => match GeoRecord::from_feature(&feature) {
                Some(record) => {
                    if let Some(callback) = self.on_select.as_mut() {
                        callback(&record);
                    }
                    ClickOutcome::Selected(record)
                }
                None => ClickOutcome::Ignored,
            },
            None => ClickOutcome::Ignored,
        }
    }

    pub fn resize(&mut self) {
        if !self.disposed {
            self.engine.resize();
        }
    }

    /// Tears the engine down; icon batches still in flight are discarded when they land.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.engine.remove();
        self.icons.invalidate();
        self.disposed = true;
    }

    fn current_types(&self) -> BTreeSet<&str> {
        self.latest
            .iter()
            .flat_map(|(_, features)| features.iter())
            .map(|f| f.type_norm.as_str())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icons::LoadedIcon;
    use image::{Rgba, RgbaImage};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    /// Records calls; hit results are scripted.
    #[derive(Default)]
    struct FakeEngine {
        style: String,
        images: HashMap<String, Icon>,
        sources: HashMap<String, FeatureCollection>,
        layers: Vec<String>,
        next_hit: Option<Hit>,
        expansion: Option<f64>,
        camera: Option<(Point<f64>, f64)>,
        resizes: usize,
        removed: bool,
    }

    impl RenderEngine for FakeEngine {
        fn set_style(&mut self, style_url: &str) {
            self.style = style_url.to_string();
            self.images.clear();
            self.sources.clear();
            self.layers.clear();
        }
        fn has_image(&self, name: &str) -> bool {
            self.images.contains_key(name)
        }
        fn add_image(&mut self, name: &str, icon: Icon) {
            self.images.insert(name.to_string(), icon);
        }
        fn has_source(&self, id: &str) -> bool {
            self.sources.contains_key(id)
        }
        fn add_source(&mut self, id: &str, _options: ClusterSource, data: FeatureCollection) {
            self.sources.insert(id.to_string(), data);
        }
        fn set_data(&mut self, id: &str, data: FeatureCollection) -> Result<(), EngineError> {
            match self.sources.get_mut(id) {
                Some(existing) => {
                    *existing = data;
                    Ok(())
                }
                None => Err(EngineError::UnknownSource(id.to_string())),
            }
        }
        fn has_layer(&self, id: &str) -> bool {
            self.layers.iter().any(|l| l == id)
        }
        fn add_layer(&mut self, layer: LayerSpec) {
            self.layers.push(layer.id);
        }
        fn hit_test(&self, _at: Point<f64>) -> Option<Hit> {
            self.next_hit.clone()
        }
        fn cluster_expansion_zoom(&self, _source_id: &str, cluster_id: u64) -> Result<f64, EngineError> {
            self.expansion.ok_or(EngineError::UnknownCluster(cluster_id))
        }
        fn ease_to(&mut self, center: Point<f64>, zoom: f64) {
            self.camera = Some((center, zoom));
        }
        fn resize(&mut self) {
            self.resizes += 1;
        }
        fn remove(&mut self) {
            self.removed = true;
        }
    }

    fn config() -> AppConfig {
        AppConfig::from_toml(
            "[input]\ndata_csv = \"x.csv\"\n[[types]]\ntype_norm = \"airbase\"\n",
        )
        .unwrap()
    }

    fn record(name: &str, type_norm: &str) -> GeoRecord {
        GeoRecord {
            name: name.to_string(),
            type_norm: type_norm.to_string(),
            type_label: type_norm.to_string(),
            tags: Vec::new(),
            position: Point::new(37.0, 55.0),
        }
    }

    fn icon() -> Icon {
        Icon { image: RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255])), pixel_ratio: 2.0 }
    }

    fn feature_count(view: &MapView<FakeEngine>) -> usize {
        view.engine().sources[SOURCE_ID].features.len()
    }

    #[test]
    fn test_feature_collection_envelope() {
        let fc = to_feature_collection(&[record("A", "airbase"), record("B", "garrison")]);
        let json = serde_json::to_value(&fc).unwrap();
        assert_eq!(json["type"], "FeatureCollection");
        assert_eq!(json["features"].as_array().unwrap().len(), 2);
        assert_eq!(json["features"][0]["geometry"]["coordinates"], json!([37.0, 55.0]));
    }

    #[test]
    fn test_sync_creates_then_replaces() {
        let mut view = MapView::new(FakeEngine::default(), &config());
        view.submit(1, vec![record("A", "airbase"), record("B", "airbase")]);
        view.sync();
        assert_eq!(feature_count(&view), 2);
        assert_eq!(view.engine().layers, vec![CLUSTER_LAYER, CLUSTER_COUNT_LAYER, POINT_LAYER]);

        view.submit(2, vec![record("C", "garrison")]);
        view.sync();
        assert_eq!(feature_count(&view), 1);
        assert_eq!(view.engine().layers.len(), 3);
    }

    #[test]
    fn test_stale_revision_never_overwrites() {
        let mut view = MapView::new(FakeEngine::default(), &config());
        assert!(view.submit(5, vec![record("Latest", "airbase")]).is_some());
        assert!(view.submit(3, vec![record("Old", "airbase"), record("Old2", "airbase")]).is_none());
        view.sync();
        assert_eq!(feature_count(&view), 1);
        assert_eq!(view.latest_revision(), Some(5));
    }

    #[test]
    fn test_icon_requests_only_new_types() {
        let mut view = MapView::new(FakeEngine::default(), &config());
        let first = view.submit(1, vec![record("A", "airbase"), record("B", "garrison")]).unwrap();
        assert_eq!(first.names, vec!["airbase", "garrison"]);
        let second = view.submit(2, vec![record("C", "garrison"), record("D", "training")]).unwrap();
        assert_eq!(second.names, vec!["training"]);
    }

    #[test]
    fn test_fallback_icon_registered_under_both_names() {
        let mut view = MapView::new(FakeEngine::default(), &config());
        let batch = view.submit(1, vec![record("A", "radar")]).unwrap();
        let loaded = LoadedBatch {
            epoch: batch.epoch,
            icons: vec![LoadedIcon { requested: "radar".into(), icon: Some(icon()), via_fallback: true }],
        };
        assert!(view.apply_icons(loaded));
        assert!(view.engine().has_image("radar"));
        assert!(view.engine().has_image("unknown"));
    }

    #[test]
    fn test_style_change_invalidates_everything() {
        let mut view = MapView::new(FakeEngine::default(), &config());
        let stale = view.submit(1, vec![record("A", "garrison")]).unwrap();
        view.sync();

        let batch = view.load_style("mapbox://styles/mapbox/dark-v11");
        assert_eq!(view.engine().style, "mapbox://styles/mapbox/dark-v11");
        assert!(!view.engine().has_source(SOURCE_ID));
        assert_eq!(batch.names, vec!["airbase", "unknown", "garrison"]);

        let late = LoadedBatch {
            epoch: stale.epoch,
            icons: vec![LoadedIcon { requested: "garrison".into(), icon: Some(icon()), via_fallback: false }],
        };
        assert!(!view.apply_icons(late));
        assert!(!view.engine().has_image("garrison"));

        view.sync();
        assert_eq!(feature_count(&view), 1);
        assert_eq!(view.engine().layers.len(), 3);
    }

    #[test]
    fn test_missing_icons_do_not_block_markers() {
        let mut view = MapView::new(FakeEngine::default(), &config());
        let batch = view.submit(1, vec![record("A", "radar")]).unwrap();
        view.apply_icons(LoadedBatch {
            epoch: batch.epoch,
            icons: vec![LoadedIcon { requested: "radar".into(), icon: None, via_fallback: true }],
        });
        view.sync();
        assert_eq!(feature_count(&view), 1);
        assert!(!view.engine().has_image("radar"));
    }

    #[test]
    fn test_cluster_click_expands() {
        let mut engine = FakeEngine::default();
        engine.next_hit = Some(Hit::Cluster {
            source: SOURCE_ID.into(),
            id: 7,
            center: Point::new(30.0, 50.0),
            point_count: 12,
        });
        engine.expansion = Some(6.0);
        let mut view = MapView::new(engine, &config());

        let outcome = view.handle_click(Point::new(30.1, 50.1));
        assert_eq!(outcome, ClickOutcome::Expanded { center: Point::new(30.0, 50.0), zoom: 6.0 });
        assert_eq!(view.engine().camera, Some((Point::new(30.0, 50.0), 6.0)));
    }

    #[test]
    fn test_cluster_expansion_failure_is_ignored() {
        let mut engine = FakeEngine::default();
        engine.next_hit = Some(Hit::Cluster {
            source: SOURCE_ID.into(),
            id: 7,
            center: Point::new(30.0, 50.0),
            point_count: 12,
        });
        let mut view = MapView::new(engine, &config());
        assert_eq!(view.handle_click(Point::new(30.0, 50.0)), ClickOutcome::Ignored);
        assert_eq!(view.engine().camera, None);
    }

    #[test]
    fn test_marker_click_selects_feature() {
        let mut engine = FakeEngine::default();
        engine.next_hit = Some(Hit::Marker(record("Kubinka", "airbase").to_feature()));
        let mut view = MapView::new(engine, &config());

        let selected = Rc::new(RefCell::new(Vec::new()));
        let sink = selected.clone();
        view.set_on_select(move |r| sink.borrow_mut().push(r.name.clone()));

        match view.handle_click(Point::new(37.0, 55.0)) {
            ClickOutcome::Selected(record) => assert_eq!(record.name, "Kubinka"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(*selected.borrow(), vec!["Kubinka".to_string()]);
    }

    #[test]
    fn test_dispose_releases_engine_and_drops_late_results() {
        let mut view = MapView::new(FakeEngine::default(), &config());
        let batch = view.submit(1, vec![record("A", "airbase")]).unwrap();
        view.dispose();
        assert!(view.engine().removed);
        assert!(view.is_disposed());

        let late = LoadedBatch {
            epoch: batch.epoch,
            icons: vec![LoadedIcon { requested: "airbase".into(), icon: Some(icon()), via_fallback: false }],
        };
        assert!(!view.apply_icons(late));
        assert!(view.submit(2, Vec::new()).is_none());
        view.resize();
        assert_eq!(view.engine().resizes, 0);
    }
}
