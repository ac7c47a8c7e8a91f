//! Staging downloads.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzDecoder;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use url::Url;

use super::http::{redact, HttpBackend};
use super::{AdapterError, AdapterResult};
use crate::model::{role, DataFile, DataFiles};

const DEFAULT_EXTENSION: &str = "parquet";

/// Local base name of a role.
pub fn legacy_name(role_name: &str) -> &str {
    match role_name {
        role::X_TRAIN => "X_train",
        role::Y_TRAIN => "y_train",
        role::X_TEST => "X_test",
        role::Y_TEST => "y_test",
        role::X => "X",
        role::Y => "y",
        role::Y_RAW => "y_raw",
        role::EXAMPLE_PREDICTION => "example_prediction",
        other => other,
    }
}

/// Local file name of a role: its legacy name plus the URL's extension.
pub fn file_name(role_name: &str, url: &str) -> String {
    let extension = Url::parse(url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_ascii_lowercase))
        })
        .and_then(|last| {
            let last = last.strip_suffix(".gz").unwrap_or(&last).to_string();
            [".parquet", ".csv"]
                .iter()
                .find(|ext| last.ends_with(*ext))
                .map(|ext| ext[1..].to_string())
        })
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());

    format!("{}.{}", legacy_name(role_name), extension)
}

pub(crate) async fn download_all(
    backend: &HttpBackend,
    data_files: &DataFiles,
    directory: &Path,
    force: bool,
) -> AdapterResult<BTreeMap<String, PathBuf>> {
    tokio::fs::create_dir_all(directory)
        .await
        .map_err(|source| AdapterError::io(directory, source))?;

    let mut paths = BTreeMap::new();
    for (role_name, file) in data_files.iter() {
        let path = directory.join(file_name(role_name, &file.url));

        if !file.has_known_size() {
            warn!(role = role_name, "skipping file with unknown size");
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                paths.insert(role_name.to_string(), path);
            }
            continue;
        }

        if !file.signed {
            return Err(AdapterError::UnsignedUrl {
                role: role_name.to_string(),
            });
        }

        if !force && local_size(&path).await == Some(file.size as u64) {
            debug!(role = role_name, path = %path.display(), "already downloaded");
            paths.insert(role_name.to_string(), path);
            continue;
        }

        download_one(backend, role_name, file, &path).await?;
        paths.insert(role_name.to_string(), path);
    }

    Ok(paths)
}

async fn local_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}

enum Sink {
    Plain(NamedTempFile),
    Gzip(GzDecoder<NamedTempFile>),
}

impl Sink {
    fn write_all(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Plain(file) => file.write_all(chunk),
            Self::Gzip(decoder) => decoder.write_all(chunk),
        }
    }

    fn finish(self) -> std::io::Result<NamedTempFile> {
        let mut file = match self {
            Self::Plain(file) => file,
            Self::Gzip(decoder) => decoder.finish()?,
        };
        file.flush()?;
        file.as_file().sync_all()?;
        Ok(file)
    }
}

async fn download_one(
    backend: &HttpBackend,
    role_name: &str,
    file: &DataFile,
    path: &Path,
) -> AdapterResult<()> {
    let url = Url::parse(&file.url).map_err(|e| AdapterError::InvalidUrl {
        url: file.url.clone(),
        message: e.to_string(),
    })?;

    info!(role = role_name, url = %redact(&url), size = file.size, "downloading");

    let mut response = backend.fetch_file(&url).await?;

    // Deleted on drop unless persisted.
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    let temp = tempfile::Builder::new()
        .prefix(".download-")
        .suffix(".tmp")
        .tempfile_in(directory)
        .map_err(|source| AdapterError::io(directory, source))?;
    let temp_path = temp.path().to_path_buf();
    let mut sink = if file.compressed {
        Sink::Gzip(GzDecoder::new(temp))
    } else {
        Sink::Plain(temp)
    };

    while let Some(chunk) = response.chunk().await? {
        sink.write_all(&chunk)
            .map_err(|source| AdapterError::io(&temp_path, source))?;
    }
    let temp = sink
        .finish()
        .map_err(|source| AdapterError::io(&temp_path, source))?;

    temp.persist(path)
        .map_err(|e| AdapterError::io(path, e.error))?;

    let actual = local_size(path).await.unwrap_or(0);
    if actual != file.size as u64 {
        return Err(AdapterError::SizeMismatch {
            role: role_name.to_string(),
            expected: file.size,
            actual,
        });
    }

    Ok(())
}
