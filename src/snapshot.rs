//! An in-process [`RenderEngine`].
//!
//! Clusters points on a pixel grid at the camera zoom, answers hit tests from
//! an R-tree of the rendered primitives and can write its current state out as
//! a static bundle (GeoJSON, style description and icon PNGs).

use crate::icons::Icon;
use crate::render::{ClusterSource, EngineError, Hit, LayerSpec, RenderEngine, CLUSTER_LAYER, POINT_LAYER};
use anyhow::{Context, Result};
use geo::Point;
use geojson::{Feature, FeatureCollection, Value};
use rstar::{RTree, RTreeObject, AABB};
use serde_json::json;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fs;
use std::path::Path;
use tracing::info;

const TILE_SIZE: f64 = 256.0;
const MAX_ZOOM: u8 = 22;
const MARKER_HIT_RADIUS: f64 = 12.0;
// largest circle radius drawn for a cluster
const MAX_HIT_RADIUS: f64 = 30.0;
const ZOOM_SHIFT: u64 = 48;

#[derive(Debug, Clone)]
struct SourceState {
    options: ClusterSource,
    data: FeatureCollection,
}

#[derive(Debug, Clone, PartialEq)]
enum Rendered {
    Cluster { id: u64, members: Vec<usize>, center: Point<f64> },
    Marker(usize),
}

struct HitTarget {
    index: usize,
    position: [f64; 2],
}

impl RTreeObject for HitTarget {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotEngine {
    style_url: String,
    images: BTreeMap<String, Icon>,
    sources: BTreeMap<String, SourceState>,
    layers: Vec<LayerSpec>,
    center: Point<f64>,
    zoom: f64,
    resizes: usize,
    removed: bool,
}

impl SnapshotEngine {
    pub fn new(center: Point<f64>, zoom: f64) -> Self {
        Self {
            style_url: String::new(),
            images: BTreeMap::new(),
            sources: BTreeMap::new(),
            layers: Vec::new(),
            center,
            zoom,
            resizes: 0,
            removed: false,
        }
    }

    pub fn style_url(&self) -> &str {
        &self.style_url
    }

    pub fn camera(&self) -> (Point<f64>, f64) {
        (self.center, self.zoom)
    }

    pub fn image_names(&self) -> Vec<&str> {
        self.images.keys().map(String::as_str).collect()
    }

    pub fn layer_ids(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.id.as_str()).collect()
    }

    pub fn source_data(&self, id: &str) -> Option<&FeatureCollection> {
        self.sources.get(id).map(|s| &s.data)
    }

    pub fn resize_count(&self) -> usize {
        self.resizes
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Number of (clusters, markers) drawn for a source at the current camera zoom.
    pub fn rendered_counts(&self, source_id: &str) -> Option<(usize, usize)> {
        let source = self.sources.get(source_id)?;
        let rendered = render_source(source, self.tile_zoom());
        let clusters = rendered.iter().filter(|r| matches!(r, Rendered::Cluster { .. })).count();
        Some((clusters, rendered.len() - clusters))
    }

    /// Writes `<source>.geojson`, `style.json` and `icons/<name>.png` under `dir`.
    pub fn write_bundle(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create output directory {:?}", dir))?;

        let mut sources = serde_json::Map::new();
        for (id, source) in &self.sources {
            let path = dir.join(format!("{}.geojson", id));
            fs::write(&path, serde_json::to_string(&source.data)?)
                .with_context(|| format!("Failed to write {:?}", path))?;
            sources.insert(
                id.clone(),
                json!({ "type": "geojson", "data": format!("{}.geojson", id), "options": source.options }),
            );
        }

        let mut images = serde_json::Map::new();
        for (name, icon) in &self.images {
            images.insert(
                name.clone(),
                json!({ "path": format!("icons/{}.png", name), "pixel_ratio": icon.pixel_ratio }),
            );
        }

        let style = json!({
            "style": self.style_url,
            "center": [self.center.x(), self.center.y()],
            "zoom": self.zoom,
            "sources": sources,
            "layers": self.layers,
            "images": images,
        });
        let style_path = dir.join("style.json");
        fs::write(&style_path, serde_json::to_string_pretty(&style)?)
            .with_context(|| format!("Failed to write {:?}", style_path))?;

        let icon_dir = dir.join("icons");
        fs::create_dir_all(&icon_dir).context("Failed to create icon directory")?;
        for (name, icon) in &self.images {
            let path = icon_dir.join(format!("{}.png", name));
            icon.image
                .save(&path)
                .with_context(|| format!("Failed to save icon {:?}", path))?;
        }

        info!("Wrote bundle to {:?} ({} icons)", dir, self.images.len());
        Ok(())
    }

    fn tile_zoom(&self) -> u8 {
        self.zoom.floor().clamp(0.0, MAX_ZOOM as f64) as u8
    }
}

impl RenderEngine for SnapshotEngine {
    fn set_style(&mut self, style_url: &str) {
        if self.removed {
            return;
        }
        self.style_url = style_url.to_string();
        self.images.clear();
        self.sources.clear();
        self.layers.clear();
    }

    fn has_image(&self, name: &str) -> bool {
        self.images.contains_key(name)
    }

    fn add_image(&mut self, name: &str, icon: Icon) {
        if !self.removed {
            self.images.insert(name.to_string(), icon);
        }
    }

    fn has_source(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    fn add_source(&mut self, id: &str, options: ClusterSource, data: FeatureCollection) {
        if !self.removed {
            self.sources.insert(id.to_string(), SourceState { options, data });
        }
    }

    fn set_data(&mut self, id: &str, data: FeatureCollection) -> Result<(), EngineError> {
        if self.removed {
            return Err(EngineError::Removed);
        }
        let source = self
            .sources
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownSource(id.to_string()))?;
        source.data = data;
        Ok(())
    }

    fn has_layer(&self, id: &str) -> bool {
        self.layers.iter().any(|l| l.id == id)
    }

    fn add_layer(&mut self, layer: LayerSpec) {
        if !self.removed && !self.has_layer(&layer.id) {
            self.layers.push(layer);
        }
    }

    fn hit_test(&self, at: Point<f64>) -> Option<Hit> {
        if self.removed {
            return None;
        }
        let zoom = self.tile_zoom();
        let query = world_pixel(at.x(), at.y(), zoom);
        let clusters_hittable = self.has_layer(CLUSTER_LAYER);
        let markers_hittable = self.has_layer(POINT_LAYER);

        let mut best: Option<(f64, Hit)> = None;
        for (id, source) in &self.sources {
            let rendered = render_source(source, zoom);
            let targets: Vec<HitTarget> = rendered
                .iter()
                .enumerate()
                .map(|(index, r)| {
                    let p = match r {
                        Rendered::Cluster { center, .. } => *center,
                        Rendered::Marker(i) => feature_position(&source.data.features[*i]).unwrap_or(Point::new(0.0, 0.0)),
                    };
                    let (x, y) = world_pixel(p.x(), p.y(), zoom);
                    HitTarget { index, position: [x, y] }
                })
                .collect();
            let tree = RTree::bulk_load(targets);

            let envelope = AABB::from_corners(
                [query.0 - MAX_HIT_RADIUS, query.1 - MAX_HIT_RADIUS],
                [query.0 + MAX_HIT_RADIUS, query.1 + MAX_HIT_RADIUS],
            );
            for target in tree.locate_in_envelope_intersecting(&envelope) {
                let dx = target.position[0] - query.0;
                let dy = target.position[1] - query.1;
                let distance = (dx * dx + dy * dy).sqrt();

                let hit = match &rendered[target.index] {
                    Rendered::Cluster { id: cluster_id, members, center } if clusters_hittable => {
                        if distance > cluster_radius(members.len()) {
                            continue;
                        }
                        Hit::Cluster {
                            source: id.clone(),
                            id: *cluster_id,
                            center: *center,
                            point_count: members.len(),
                        }
                    }
                    Rendered::Marker(i) if markers_hittable => {
                        if distance > MARKER_HIT_RADIUS {
                            continue;
                        }
                        Hit::Marker(source.data.features[*i].clone())
                    }
                    _ => continue,
                };
                if best.as_ref().map_or(true, |(d, _)| distance < *d) {
                    best = Some((distance, hit));
                }
            }
        }
        best.map(|(_, hit)| hit)
    }

    fn cluster_expansion_zoom(&self, source_id: &str, cluster_id: u64) -> Result<f64, EngineError> {
        if self.removed {
            return Err(EngineError::Removed);
        }
        let source = self
            .sources
            .get(source_id)
            .ok_or_else(|| EngineError::UnknownSource(source_id.to_string()))?;

        let zoom = (cluster_id >> ZOOM_SHIFT) as u8;
        let members = render_source(source, zoom)
            .into_iter()
            .find_map(|r| match r {
                Rendered::Cluster { id, members, .. } if id == cluster_id => Some(members),
                _ => None,
            })
            .ok_or(EngineError::UnknownCluster(cluster_id))?;

        let max_zoom = source.options.cluster_max_zoom;
        for z in zoom.saturating_add(1)..=max_zoom {
            let cells = grid_cells(&source.data.features, &members, source.options.cluster_radius, z);
            if cells.len() > 1 {
                return Ok(z as f64);
            }
        }
        Ok(max_zoom.saturating_add(1) as f64)
    }

    fn ease_to(&mut self, center: Point<f64>, zoom: f64) {
        self.center = center;
        self.zoom = zoom;
    }

    fn resize(&mut self) {
        self.resizes += 1;
    }

    fn remove(&mut self) {
        self.removed = true;
        self.images.clear();
        self.sources.clear();
        self.layers.clear();
    }
}

fn render_source(source: &SourceState, zoom: u8) -> Vec<Rendered> {
    let features = &source.data.features;
    let all: Vec<usize> = (0..features.len())
        .filter(|&i| feature_position(&features[i]).is_some())
        .collect();

    if !source.options.cluster || zoom > source.options.cluster_max_zoom {
        return all.into_iter().map(Rendered::Marker).collect();
    }

    grid_cells(features, &all, source.options.cluster_radius, zoom)
        .into_values()
        .enumerate()
        .map(|(cell_index, members)| {
            if members.len() == 1 {
                return Rendered::Marker(members[0]);
            }
            let (sum_x, sum_y) = members
                .iter()
                .filter_map(|&i| feature_position(&features[i]))
                .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x(), sy + p.y()));
            let n = members.len() as f64;
            Rendered::Cluster {
                id: ((zoom as u64) << ZOOM_SHIFT) | cell_index as u64,
                center: Point::new(sum_x / n, sum_y / n),
                members,
            }
        })
        .collect()
}

/// Buckets `members` into square cells of `radius` pixels at `zoom`.
fn grid_cells(
    features: &[Feature],
    members: &[usize],
    radius: u32,
    zoom: u8,
) -> BTreeMap<(i64, i64), Vec<usize>> {
    let size = radius.max(1) as f64;
    let mut cells: BTreeMap<(i64, i64), Vec<usize>> = BTreeMap::new();
    for &i in members {
        if let Some(p) = feature_position(&features[i]) {
            let (x, y) = world_pixel(p.x(), p.y(), zoom);
            let key = ((x / size).floor() as i64, (y / size).floor() as i64);
            cells.entry(key).or_default().push(i);
        }
    }
    cells
}

fn feature_position(feature: &Feature) -> Option<Point<f64>> {
    match feature.geometry.as_ref().map(|g| &g.value) {
        Some(Value::Point(coords)) if coords.len() >= 2 => Some(Point::new(coords[0], coords[1])),
        _ => None,
    }
}

fn cluster_radius(point_count: usize) -> f64 {
    match point_count {
        n if n >= 100 => 30.0,
        n if n >= 50 => 25.0,
        n if n >= 20 => 20.0,
        _ => 15.0,
    }
}

// Web Mercator world pixel coordinates
fn world_pixel(lon: f64, lat: f64, zoom: u8) -> (f64, f64) {
    let n = 2.0_f64.powi(zoom as i32) * TILE_SIZE;
    let x = (lon + 180.0) / 360.0 * n;
    let lat_rad = lat.clamp(-85.0511, 85.0511).to_radians();
    let y = (1.0 - (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() / PI) / 2.0 * n;
    (x, y)
}
