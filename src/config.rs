use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::fs;
use anyhow::{Context, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub types: Vec<TypeConfig>,
    #[serde(default)]
    pub icons: IconConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub data_csv: PathBuf,
}

/// One entry of the static label configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct TypeConfig {
    pub type_norm: String,
    pub label: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IconConfig {
    pub dir: PathBuf,
    pub extension: String,
    pub fallback: String,
    pub pixel_ratio: f32,
}

impl Default for IconConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("icons"),
            extension: "png".to_string(),
            fallback: "unknown".to_string(),
            pixel_ratio: 2.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MapConfig {
    pub styles: Vec<StyleConfig>,
    pub default_style: String,
    pub center: [f64; 2], // lng, lat
    pub zoom: f64,
    pub cluster_max_zoom: u8,
    pub cluster_radius: u32, // pixels
    pub icon_size: f64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StyleConfig {
    pub name: String,
    pub url: String,
}

impl Default for MapConfig {
    fn default() -> Self {
        let styles = [
            ("streets", "mapbox://styles/mapbox/streets-v12"),
            ("satellite-streets", "mapbox://styles/mapbox/satellite-streets-v12"),
            ("satellite", "mapbox://styles/mapbox/satellite-v9"),
            ("light", "mapbox://styles/mapbox/light-v11"),
            ("dark", "mapbox://styles/mapbox/dark-v11"),
        ]
        .into_iter()
        .map(|(name, url)| StyleConfig { name: name.to_string(), url: url.to_string() })
        .collect();

        Self {
            styles,
            default_style: "streets".to_string(),
            center: [37.618423, 55.751244],
            zoom: 4.0,
            cluster_max_zoom: 14,
            cluster_radius: 50,
            icon_size: 2.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { dir: PathBuf::from("output") }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }

    /// Looks a basemap up by name, falling back to treating `name` as a raw style url.
    pub fn style_url(&self, name: &str) -> String {
        self.map
            .styles
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.url.clone())
            .unwrap_or_else(|| name.to_string())
    }

    pub fn default_style_url(&self) -> String {
        self.style_url(&self.map.default_style)
    }

    /// Type keys from the static configuration, in declared order.
    pub fn known_types(&self) -> Vec<String> {
        self.types.iter().map(|t| t.type_norm.clone()).collect()
    }

    /// Icons loaded on every style load: the configured types plus the fallback, once each.
    pub fn preloaded_icons(&self) -> Vec<String> {
        let mut names = self.known_types();
        if !names.contains(&self.icons.fallback) {
            names.push(self.icons.fallback.clone());
        }
        names
    }
}
