//! Disk-spill failover: a rolling daily newline-delimited JSON file,
//! written when the stream connection to the forge is unavailable.

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub struct FailoverWriter {
    directory: PathBuf,
    current: Mutex<Option<(NaiveDate, File)>>,
}

impl FailoverWriter {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            current: Mutex::new(None),
        }
    }

    /// Append one JSON line (without its own trailing newline) to today's
    /// failover file, creating the failover directory and file as
    /// needed, flushing after every write.
    pub async fn write_line(&self, json_line: &str) -> std::io::Result<()> {
        fs::create_dir_all(&self.directory).await?;
        let today = Utc::now().date_naive();

        let mut guard = self.current.lock().await;
        let needs_new_file = match &*guard {
            Some((date, _)) => *date != today,
            None => true,
        };
        if needs_new_file {
            let path = self.path_for(today);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            *guard = Some((today, file));
        }

        let (_, file) = guard.as_mut().expect("file just ensured present");
        file.write_all(json_line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.directory
            .join(format!("failover_{}.jsonl", date.format("%Y_%m_%d")))
    }
}

/// Visible for the health endpoint: path of today's failover file,
/// whether or not it has been created yet.
#[must_use]
pub fn todays_path(directory: &Path) -> PathBuf {
    directory.join(format!(
        "failover_{}.jsonl",
        Utc::now().date_naive().format("%Y_%m_%d")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_line_creates_todays_file_with_one_json_line_per_call() {
        let dir = std::env::temp_dir().join(format!("pixl-failover-test-{}", std::process::id()));
        let writer = FailoverWriter::new(&dir);
        writer.write_line(r#"{"a":1}"#).await.unwrap();
        writer.write_line(r#"{"a":2}"#).await.unwrap();

        let path = todays_path(&dir);
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec![r#"{"a":1}"#, r#"{"a":2}"#]);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
