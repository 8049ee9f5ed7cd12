use crate::processing::{build_features, Dataset};
use crate::types::{RawRow, RawValue};
use csv::{ReaderBuilder, Trim};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("loader task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Parses CSV with a header row into raw rows.
///
/// Headers are trimmed and lower-cased. Blank lines are skipped and short
/// records are tolerated; missing cells are simply absent from the row.
/// Invalid UTF-8 is replaced rather than failing the whole file.
pub fn read_rows<R: Read>(reader: R) -> Result<Vec<RawRow>, LoadError> {
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::Headers)
        .from_reader(reader);
    let headers: Vec<String> = rdr
        .byte_headers()?
        .iter()
        .map(|h| String::from_utf8_lossy(h).trim().to_lowercase())
        .collect();

    let mut rows = Vec::new();
    for result in rdr.byte_records() {
        let record = result?;
        let cells: Vec<String> = record
            .iter()
            .map(|cell| String::from_utf8_lossy(cell).into_owned())
            .collect();
        if cells.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }

        let mut row = RawRow::new();
        for (header, cell) in headers.iter().zip(cells) {
            row.insert(header, RawValue::Text(cell));
        }
        rows.push(row);
    }

    Ok(rows)
}

pub fn read_rows_from_path(path: &Path) -> Result<Vec<RawRow>, LoadError> {
    let file = File::open(path).map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    read_rows(file)
}

/// Reads and builds the dataset off the async runtime's worker threads.
pub async fn load_dataset(path: PathBuf) -> Result<Dataset, LoadError> {
    info!("Loading facilities from {:?}", path);
    let dataset = tokio::task::spawn_blocking(move || {
        let rows = read_rows_from_path(&path)?;
        Ok::<_, LoadError>(build_features(&rows))
    })
    .await??;
    info!("Loaded {} facilities across {} types", dataset.len(), dataset.type_labels.len());
    Ok(dataset)
}
