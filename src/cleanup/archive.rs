// License: GNU Affero General Public License v3 or later
// A copy of GNU AGPL v3 should have been included in this software package in LICENSE.txt.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutMode, PutPayload};
use tokio::fs;
use url::Url;

use crate::models::forecast::{Forecast, ForecastValue, FORECAST_TABLE, FORECAST_VALUE_TABLE};
use crate::store::ArchiveBatch;
use crate::{Error, Result};

/// Where archived batches get written to.
///
/// Local paths (plain or `file://`) are backed by the local file system, any other
/// URL scheme object_store understands (`s3://`, `gs://`, `az://`, `memory://`)
/// by the matching remote store.
#[derive(Debug, Clone)]
pub struct Archive {
    store: Arc<dyn ObjectStore>,
    prefix: ObjectPath,
    local_root: Option<PathBuf>,
}

/// Files written for one batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArchivedFiles {
    pub paths: Vec<String>,
    pub rows: usize,
}

impl Archive {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: ObjectPath) -> Self {
        Self {
            store,
            prefix,
            local_root: None,
        }
    }

    pub async fn open(destination: &str) -> Result<Self> {
        match Url::parse(destination) {
            // single letter schemes are windows drive letters
            Ok(url) if url.scheme() != "file" && url.scheme().len() > 1 => {
                let (store, prefix) = object_store::parse_url(&url)?;
                tracing::info!("Archiving to {url}");
                Ok(Self::new(Arc::from(store), prefix))
            }
            Ok(url) if url.scheme() == "file" => {
                let Ok(root) = url.to_file_path() else {
                    return Err(Error::InvalidConfig(format!(
                        "Invalid archive path {destination}"
                    )));
                };
                Self::open_local(&root).await
            }
            _ => Self::open_local(Path::new(destination)).await,
        }
    }

    async fn open_local(root: &Path) -> Result<Self> {
        if !root.exists() {
            tracing::info!("Creating archive directory {root:?}");
            fs::create_dir_all(root).await?;
        } else if !root.is_dir() {
            return Err(Error::InvalidConfig(format!(
                "Archive destination {root:?} is not a directory"
            )));
        }
        let store = LocalFileSystem::new_with_prefix(root)?;
        tracing::info!("Archiving to {root:?}");
        Ok(Self {
            store: Arc::new(store),
            prefix: ObjectPath::default(),
            local_root: Some(root.to_owned()),
        })
    }

    /// First batch index not yet taken in `subdir`.
    pub async fn next_index(&self, subdir: &str) -> Result<usize> {
        let dir = self.prefix.child(subdir);
        let listing = self.store.list_with_delimiter(Some(&dir)).await?;
        let next = listing
            .objects
            .iter()
            .filter_map(|meta| batch_index(meta.location.filename()?))
            .max()
            .map_or(0, |index| index + 1);
        Ok(next)
    }

    /// Write `forecast_{index}.csv` and `forecast_value_{index}.csv` into `subdir`.
    ///
    /// Returns once both objects are stored. Empty tables are skipped. Existing
    /// files are never replaced, writing to a taken index fails with
    /// [`Error::ArchiveExists`].
    pub async fn write_batch(
        &self,
        subdir: &str,
        index: usize,
        batch: &ArchiveBatch,
    ) -> Result<ArchivedFiles> {
        if let Some(root) = &self.local_root {
            let dir = root.join(subdir);
            if !dir.exists() {
                tracing::debug!("Creating archive directory {dir:?}");
                fs::create_dir_all(&dir).await?;
            }
        }

        let dir = self.prefix.child(subdir);
        let mut written = ArchivedFiles::default();

        let tables = [
            (
                FORECAST_TABLE,
                Forecast::csv_header(),
                batch.forecasts.iter().map(Forecast::to_csv).collect::<Vec<_>>(),
            ),
            (
                FORECAST_VALUE_TABLE,
                ForecastValue::csv_header(),
                batch.values.iter().map(ForecastValue::to_csv).collect::<Vec<_>>(),
            ),
        ];

        for (table, header, rows) in tables {
            if rows.is_empty() {
                tracing::info!("No data found for {table}");
                continue;
            }
            let path = dir.child(format!("{table}_{index}.csv"));
            tracing::info!(rows = rows.len(), "Saving {path}");

            let body = format!("{header}\n{}\n", rows.join("\n"));
            self.store
                .put_opts(
                    &path,
                    PutPayload::from(body.into_bytes()),
                    PutMode::Create.into(),
                )
                .await
                .map_err(|e| match e {
                    object_store::Error::AlreadyExists { path, .. } => Error::ArchiveExists(path),
                    e => e.into(),
                })?;

            written.rows += rows.len();
            written.paths.push(path.to_string());
        }

        Ok(written)
    }
}

/// Batch index of an archive file name like `forecast_value_3.csv`.
fn batch_index(filename: &str) -> Option<usize> {
    let (table, index) = filename.strip_suffix(".csv")?.rsplit_once('_')?;
    if table != FORECAST_TABLE && table != FORECAST_VALUE_TABLE {
        return None;
    }
    index.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::prelude::*;
    use object_store::memory::InMemory;
    use uuid::Uuid;

    fn batch() -> ArchiveBatch {
        let timestamp = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let forecast_uuid = Uuid::new_v4();
        ArchiveBatch {
            forecasts: vec![Forecast {
                forecast_uuid,
                site_uuid: Uuid::new_v4(),
                timestamp_utc: timestamp,
                forecast_version: "0".to_string(),
                created_utc: timestamp,
            }],
            values: (0..3)
                .map(|i| ForecastValue {
                    forecast_uuid,
                    start_utc: timestamp,
                    end_utc: timestamp,
                    horizon_minutes: i,
                    forecast_power_kw: 0.5,
                    created_utc: timestamp,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_write_batch_memory() {
        let store = Arc::new(InMemory::new());
        let archive = Archive::new(store.clone(), ObjectPath::from("archive"));

        let written = archive
            .write_batch("2020-01-08T00:00:00", 2, &batch())
            .await
            .unwrap();
        assert_eq!(written.rows, 4);
        assert_eq!(
            written.paths,
            vec![
                "archive/2020-01-08T00:00:00/forecast_2.csv".to_string(),
                "archive/2020-01-08T00:00:00/forecast_value_2.csv".to_string(),
            ]
        );

        let data = store
            .get(&ObjectPath::from(
                "archive/2020-01-08T00:00:00/forecast_value_2.csv",
            ))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        let text = String::from_utf8(data.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], ForecastValue::csv_header());
    }

    #[tokio::test]
    async fn test_write_batch_skips_empty_tables() {
        let store = Arc::new(InMemory::new());
        let archive = Archive::new(store, ObjectPath::default());
        let mut batch = batch();
        batch.values.clear();

        let written = archive.write_batch("day", 0, &batch).await.unwrap();
        assert_eq!(written.paths, vec!["day/forecast_0.csv".to_string()]);

        let written = archive
            .write_batch("day", 1, &ArchiveBatch::default())
            .await
            .unwrap();
        assert_eq!(written, ArchivedFiles::default());
    }

    #[tokio::test]
    async fn test_existing_files_are_kept() {
        let store = Arc::new(InMemory::new());
        let archive = Archive::new(store.clone(), ObjectPath::default());
        assert_eq!(archive.next_index("day").await.unwrap(), 0);

        archive.write_batch("day", 0, &batch()).await.unwrap();
        archive.write_batch("day", 1, &batch()).await.unwrap();
        archive.write_batch("other", 7, &batch()).await.unwrap();
        assert_eq!(archive.next_index("day").await.unwrap(), 2);

        let path = ObjectPath::from("day/forecast_0.csv");
        let before = store.get(&path).await.unwrap().bytes().await.unwrap();
        let result = archive.write_batch("day", 0, &batch()).await;
        assert!(matches!(result, Err(Error::ArchiveExists(_))));
        let after = store.get(&path).await.unwrap().bytes().await.unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_batch_index() {
        let tests = [
            ("forecast_0.csv", Some(0)),
            ("forecast_value_12.csv", Some(12)),
            ("forecast_value_x.csv", None),
            ("notes_3.csv", None),
            ("forecast_3.txt", None),
        ];
        for (name, expected) in tests {
            assert_eq!(batch_index(name), expected, "{name}");
        }
    }

    #[tokio::test]
    async fn test_open_local_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("nested").join("archive");
        let archive = Archive::open(root.to_str().unwrap()).await.unwrap();
        assert!(root.is_dir());

        archive
            .write_batch("2020-01-08T00:00:00", 0, &batch())
            .await
            .unwrap();
        let dir = root.join("2020-01-08T00:00:00");
        assert!(dir.join("forecast_0.csv").is_file());
        assert!(dir.join("forecast_value_0.csv").is_file());
        let content = std::fs::read_to_string(dir.join("forecast_0.csv")).unwrap();
        assert!(content.starts_with(Forecast::csv_header()));
    }

    #[tokio::test]
    async fn test_open_rejects_files() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let result = Archive::open(tmp.path().to_str().unwrap()).await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_open_url() {
        let archive = Archive::open("memory:///archive").await.unwrap();
        let written = archive.write_batch("day", 0, &batch()).await.unwrap();
        assert_eq!(written.paths.len(), 2);
    }
}
