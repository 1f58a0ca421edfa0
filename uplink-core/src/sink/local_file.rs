use std::io::ErrorKind;
use std::path::PathBuf;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::{Batch, Sink};
use crate::codec::RowLayout;
use crate::config::LocalFileConfig;
use crate::payload::PartitionKey;

/// Writes every flushed batch into a new `.csv` file. Existing files are never appended to or
/// replaced, a numeric suffix is added when the name is taken.
pub struct LocalFileSink {
    dir: PathBuf,
}

impl LocalFileSink {
    pub fn new(config: LocalFileConfig) -> Self {
        Self { dir: config.dir }
    }

    async fn create_new(&self, stem: &str) -> std::io::Result<(File, PathBuf)> {
        let mut attempt = 0usize;
        loop {
            let name = match attempt {
                0 => format!("{stem}.csv"),
                n => format!("{stem}-{n}.csv"),
            };
            let path = self.dir.join(name);

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((file, path)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }
}

/// `{schema}-{secs}` or `{warehouse}-{schema}-{secs}`.
fn file_stem(key: &PartitionKey, unix_secs: i64) -> String {
    format!("{key}-{unix_secs}")
}

impl Sink for LocalFileSink {
    async fn write(&mut self, batch: Batch<'_>) -> crate::Result<()> {
        let contents = RowLayout::Source.encode_batch(&batch);
        let stem = file_stem(batch.key, chrono::Utc::now().timestamp());

        let (mut file, path) = self.create_new(&stem).await?;
        file.write_all(&contents).await?;
        file.flush().await?;
        file.sync_all().await?;

        info!(
            partition = %batch.key,
            rows = batch.rows.len(),
            path = %path.display(),
            "Wrote batch to file"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::TempDir;

    use super::*;
    use crate::header::HeaderSet;
    use crate::payload::test_utils::payload;

    fn csv_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(
            file_stem(&PartitionKey::schema("events"), 1_700_000_000),
            "events-1700000000"
        );
        assert_eq!(
            file_stem(
                &PartitionKey::new(Some("acme".to_string()), "events"),
                1_700_000_000
            ),
            "acme-events-1700000000"
        );
    }

    #[tokio::test]
    async fn test_write_batch() {
        let tmp = TempDir::new().unwrap();
        let mut sink = LocalFileSink::new(LocalFileConfig {
            dir: tmp.path().to_path_buf(),
        });

        let key = PartitionKey::schema("events");
        let rows = vec![
            payload(key.clone(), &[("a", 1i64.into()), ("b", "x".into())]),
            payload(key.clone(), &[("b", "y".into())]),
        ];
        let headers: HeaderSet = ["a", "b"].into_iter().collect();

        sink.write(Batch {
            key: &key,
            headers: &headers,
            rows: &rows,
        })
        .await
        .unwrap();

        let files = csv_files(tmp.path());
        assert_eq!(files.len(), 1);

        let name = files[0].file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("events-"), "{name}");

        let contents = fs::read_to_string(&files[0]).unwrap();
        assert_eq!(contents, "source|a|b\ntests|1|x\ntests||y\n");
    }

    #[tokio::test]
    async fn test_never_overwrites() {
        let tmp = TempDir::new().unwrap();
        let mut sink = LocalFileSink::new(LocalFileConfig {
            dir: tmp.path().to_path_buf(),
        });

        let key = PartitionKey::schema("events");
        let headers: HeaderSet = ["a"].into_iter().collect();

        for value in ["first", "second", "third"] {
            let rows = vec![payload(key.clone(), &[("a", value.into())])];
            sink.write(Batch {
                key: &key,
                headers: &headers,
                rows: &rows,
            })
            .await
            .unwrap();
        }

        let files = csv_files(tmp.path());
        assert_eq!(files.len(), 3);

        let mut values: Vec<_> = files
            .iter()
            .map(|path| {
                let contents = fs::read_to_string(path).unwrap();
                contents.lines().nth(1).unwrap().to_string()
            })
            .collect();
        values.sort();
        assert_eq!(values, vec!["tests|first", "tests|second", "tests|third"]);
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let mut sink = LocalFileSink::new(LocalFileConfig {
            dir: tmp.path().join("missing"),
        });

        let key = PartitionKey::schema("events");
        let headers: HeaderSet = ["a"].into_iter().collect();
        let rows = vec![payload(key.clone(), &[("a", 1i64.into())])];

        let result = sink
            .write(Batch {
                key: &key,
                headers: &headers,
                rows: &rows,
            })
            .await;
        assert!(matches!(result, Err(crate::Error::Io(_))));
    }
}
