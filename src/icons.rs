//! Per-type marker icons.
//!
//! Requests are deduplicated per style epoch. A batch remembers the epoch it
//! was issued in, so results that arrive after a style change or teardown can
//! be recognised and dropped.

use crate::config::IconConfig;
use image::RgbaImage;
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum IconError {
    #[error("failed to read icon {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode icon {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Icon {
    pub image: RgbaImage,
    pub pixel_ratio: f32,
}

/// Names to load, stamped with the epoch they were requested in.
#[derive(Debug, Clone, PartialEq)]
pub struct IconBatch {
    pub epoch: u64,
    pub names: Vec<String>,
}

impl IconBatch {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct LoadedIcon {
    pub requested: String,
    /// `None` when neither the icon nor the fallback could be loaded.
    pub icon: Option<Icon>,
    pub via_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct LoadedBatch {
    pub epoch: u64,
    pub icons: Vec<LoadedIcon>,
}

#[derive(Debug, Default)]
pub struct IconCache {
    epoch: u64,
    requested: HashSet<String>,
}

impl IconCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Issues a batch for every name not yet requested in this epoch.
    pub fn request<'a, I>(&mut self, names: I) -> IconBatch
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names = names
            .into_iter()
            .filter(|name| !name.is_empty())
            .filter(|name| self.requested.insert(name.to_string()))
            .map(str::to_string)
            .collect();
        IconBatch { epoch: self.epoch, names }
    }

    /// Forgets everything requested so far; outstanding batches become stale.
    pub fn invalidate(&mut self) {
        self.epoch += 1;
        self.requested.clear();
    }

    pub fn accepts(&self, batch: &LoadedBatch) -> bool {
        batch.epoch == self.epoch
    }
}

/// Loads `<dir>/<name>.<extension>` icons from disk.
#[derive(Debug, Clone)]
pub struct IconLoader {
    dir: PathBuf,
    extension: String,
    fallback: String,
    pixel_ratio: f32,
}

impl IconLoader {
    pub fn from_config(config: &IconConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            extension: config.extension.clone(),
            fallback: config.fallback.clone(),
            pixel_ratio: config.pixel_ratio,
        }
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, self.extension))
    }

    pub async fn load(&self, name: &str) -> Result<Icon, IconError> {
        let path = self.path_for(name);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| IconError::Read { path: path.clone(), source })?;
        let image = image::load_from_memory(&bytes)
            .map_err(|source| IconError::Decode { path, source })?
            .to_rgba8();
        Ok(Icon { image, pixel_ratio: self.pixel_ratio })
    }

    /// Loads `name`, substituting the fallback icon on any failure.
    pub async fn load_with_fallback(&self, name: &str) -> LoadedIcon {
        match self.load(name).await {
            Ok(icon) => LoadedIcon { requested: name.to_string(), icon: Some(icon), via_fallback: false },
            Err(e) => {
                debug!("Icon {} unavailable, using {}: {}", name, self.fallback, e);
                let icon = match self.load(&self.fallback).await {
                    Ok(icon) => Some(icon),
                    Err(e) => {
                        warn!("Fallback icon unavailable: {}", e);
                        None
                    }
                };
                LoadedIcon { requested: name.to_string(), icon, via_fallback: true }
            }
        }
    }

    /// Loads every icon of the batch concurrently. Completion order is not preserved.
    pub async fn load_batch(&self, batch: IconBatch) -> LoadedBatch {
        let mut tasks = JoinSet::new();
        for name in batch.names {
            let loader = self.clone();
            tasks.spawn(async move { loader.load_with_fallback(&name).await });
        }

        let mut icons = Vec::new();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(icon) => icons.push(icon),
                Err(e) => warn!("Icon task failed: {}", e),
            }
        }

        LoadedBatch { epoch: batch.epoch, icons }
    }
}
