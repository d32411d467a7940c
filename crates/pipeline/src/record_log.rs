//! Append-only JSONL attribute log, the system of record.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use certhunt_core::Attribute;

use crate::error::SinkError;

/// One attribute per line, flushed after every append.
///
/// Each line is serialized up front and written with a single call. A
/// write that fails part-way is truncated back to the last complete line.
pub struct AttributeLog {
    path: PathBuf,
    file: File,
    offset: u64,
}

impl AttributeLog {
    /// Open for create/append. Failure here is fatal at startup.
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let offset = file.metadata().await?.len();
        info!(path = %path.display(), offset, "attribute log opened");
        Ok(Self { path, file, offset })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte length of the complete lines written so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub async fn append(&mut self, attribute: &Attribute) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(attribute)?;
        line.push(b'\n');

        if let Err(e) = self.write_line(&line).await {
            error!(
                path = %self.path.display(),
                offset = self.offset,
                len = line.len(),
                error = %e,
                "attribute log write failed"
            );
            if let Err(te) = self.file.set_len(self.offset).await {
                error!(
                    path = %self.path.display(),
                    offset = self.offset,
                    error = %te,
                    "failed to truncate partial attribute line"
                );
            }
            return Err(e.into());
        }

        self.offset += line.len() as u64;
        Ok(())
    }

    async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.file.write_all(line).await?;
        self.file.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn attribute(value: &str) -> Attribute {
        Attribute {
            parent_event: "Certstream Sigma Rules".into(),
            event_name: "r".into(),
            event_tags: vec![],
            attr_type: "domain".into(),
            value: value.into(),
            comment: "Observed in Certstream: 2024-06-10".into(),
        }
    }

    #[tokio::test]
    async fn appends_one_json_object_per_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attributes.jsonl");

        let mut log = AttributeLog::open(&path).await.unwrap();
        log.append(&attribute("a.com")).await.unwrap();
        log.append(&attribute("b.com")).await.unwrap();
        drop(log);

        // Reopening appends rather than truncating.
        let mut log = AttributeLog::open(&path).await.unwrap();
        log.append(&attribute("c.com")).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let values: Vec<String> = contents
            .lines()
            .map(|l| serde_json::from_str::<Attribute>(l).unwrap().value)
            .collect();
        assert_eq!(values, vec!["a.com", "b.com", "c.com"]);
        assert!(contents.contains(r#""attr_value":"a.com""#));
    }

    #[tokio::test]
    async fn offset_tracks_complete_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attributes.jsonl");
        std::fs::write(&path, "{}\n").unwrap();

        let mut log = AttributeLog::open(&path).await.unwrap();
        assert_eq!(log.offset(), 3);
        log.append(&attribute("a.com")).await.unwrap();

        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(log.offset(), len);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn failed_write_is_reported_and_offset_kept() {
        // Every write to /dev/full fails with ENOSPC.
        let mut log = AttributeLog::open("/dev/full").await.unwrap();
        let before = log.offset();
        assert!(matches!(
            log.append(&attribute("a.com")).await,
            Err(SinkError::Io(_))
        ));
        assert_eq!(log.offset(), before);
    }

    #[tokio::test]
    async fn open_fails_when_directory_is_missing() {
        let dir = TempDir::new().unwrap();
        let result = AttributeLog::open(dir.path().join("missing/attributes.jsonl")).await;
        assert!(result.is_err());
    }
}
