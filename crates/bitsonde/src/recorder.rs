//! Terminal record sink writing text and binary logs with rotation.
//!
//! Every record is appended as one line to the text log and as a
//! length-prefixed frame to the binary log. Both files rotate together when
//! the configured size or age threshold is crossed; the closed pair is
//! renamed with a UTC timestamp suffix. Write failures are logged and the
//! recorder keeps going; it never takes the crawler down.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::filter::Processor;
use crate::record::Record;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Construction-time options for the file recorder.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Path prefix of the log pair (`<prefix>.log`, `<prefix>.dat`).
    pub prefix: PathBuf,
    /// Rotate once either file exceeds this many bytes; 0 disables.
    pub size_limit: u64,
    /// Rotate once the open pair is older than this; zero disables.
    pub age_limit: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            prefix: PathBuf::from("bitsonde"),
            size_limit: 0,
            age_limit: Duration::ZERO,
        }
    }
}

struct LogPair {
    text: BufWriter<File>,
    binary: BufWriter<File>,
    opened: Instant,
    written: u64,
}

impl LogPair {
    async fn open(config: &RecorderConfig) -> Result<LogPair, RecorderError> {
        if let Some(parent) = config.prefix.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let open = |path: PathBuf| async move {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
        };
        let text = open(text_path(config)).await?;
        let binary = open(binary_path(config)).await?;
        Ok(LogPair {
            text: BufWriter::new(text),
            binary: BufWriter::new(binary),
            opened: Instant::now(),
            written: 0,
        })
    }

    fn due_for_rotation(&self, config: &RecorderConfig) -> bool {
        if config.size_limit > 0 && self.written >= config.size_limit {
            return true;
        }
        if !config.age_limit.is_zero() && self.opened.elapsed() >= config.age_limit {
            return true;
        }
        false
    }

    async fn append(&mut self, record: &Record) -> Result<(), RecorderError> {
        let line = format!("{record}\n");
        self.text.write_all(line.as_bytes()).await?;
        self.text.flush().await?;

        let bytes = record.to_bytes();
        self.binary
            .write_all(&(bytes.len() as u32).to_le_bytes())
            .await?;
        self.binary.write_all(&bytes).await?;
        self.binary.flush().await?;

        self.written += line.len() as u64 + bytes.len() as u64 + 4;
        Ok(())
    }

    async fn close(mut self) {
        let _ = self.text.flush().await;
        let _ = self.binary.flush().await;
    }
}

fn text_path(config: &RecorderConfig) -> PathBuf {
    PathBuf::from(format!("{}.log", config.prefix.display()))
}

fn binary_path(config: &RecorderConfig) -> PathBuf {
    PathBuf::from(format!("{}.dat", config.prefix.display()))
}

/// Writes records to a rotating pair of on-disk logs.
pub struct FileRecorder {
    queue: Mutex<Option<mpsc::Sender<Record>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FileRecorder {
    /// Opens the log pair and spawns the writer task.
    pub async fn new(config: RecorderConfig) -> Result<Arc<FileRecorder>, RecorderError> {
        let pair = LogPair::open(&config).await?;
        let (tx, mut rx) = mpsc::channel::<Record>(1);
        let task = tokio::spawn(async move {
            let mut pair = Some(pair);
            while let Some(record) = rx.recv().await {
                let current = match pair.take() {
                    Some(current) => current,
                    None => match LogPair::open(&config).await {
                        Ok(fresh) => fresh,
                        Err(err) => {
                            warn!(%err, "could not reopen record logs");
                            continue;
                        }
                    },
                };
                pair = Self::write(current, &config, &record).await;
            }
            if let Some(current) = pair {
                current.close().await;
            }
            debug!("recorder stopped");
        });
        Ok(Arc::new(FileRecorder {
            queue: Mutex::new(Some(tx)),
            task: Mutex::new(Some(task)),
        }))
    }

    async fn write(
        mut pair: LogPair,
        config: &RecorderConfig,
        record: &Record,
    ) -> Option<LogPair> {
        if pair.due_for_rotation(config) {
            pair.close().await;
            if let Err(err) = Self::rotate(config).await {
                warn!(%err, "log rotation failed");
            }
            pair = match LogPair::open(config).await {
                Ok(fresh) => fresh,
                Err(err) => {
                    warn!(%err, "could not reopen record logs");
                    return None;
                }
            };
        }
        if let Err(err) = pair.append(record).await {
            warn!(%err, "record write failed");
        }
        Some(pair)
    }

    /// Renames the closed pair out of the way with a UTC timestamp suffix.
    async fn rotate(config: &RecorderConfig) -> Result<(), RecorderError> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let rotated_text = PathBuf::from(format!("{}-{stamp}.log", config.prefix.display()));
        let rotated_binary = PathBuf::from(format!("{}-{stamp}.dat", config.prefix.display()));
        tokio::fs::rename(text_path(config), rotated_text).await?;
        tokio::fs::rename(binary_path(config), rotated_binary).await?;
        debug!(%stamp, "record logs rotated");
        Ok(())
    }

    /// Closes the input queue, lets the writer drain, and joins it.
    pub async fn stop(&self) {
        drop(self.queue.lock().take());
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

#[async_trait]
impl Processor for FileRecorder {
    async fn process(&self, record: Record) {
        let sender = self.queue.lock().clone();
        if let Some(sender) = sender {
            let _ = sender.send(record).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Command, PingRecord, PongRecord, Record};

    fn ping(nonce: u64) -> Record {
        Record::Ping(PingRecord::new(
            nonce,
            "203.0.113.7:8333".parse().unwrap(),
            "10.0.0.1:50000".parse().unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_writes_text_and_binary_forms() {
        let dir = tempfile::tempdir().unwrap();
        let config = RecorderConfig {
            prefix: dir.path().join("capture"),
            ..RecorderConfig::default()
        };
        let recorder = FileRecorder::new(config.clone()).await.unwrap();

        recorder.process(ping(1)).await;
        recorder
            .process(Record::Pong(PongRecord::new(
                2,
                "203.0.113.7:8333".parse().unwrap(),
                "10.0.0.1:50000".parse().unwrap(),
            )))
            .await;
        recorder.stop().await;

        let text = std::fs::read_to_string(text_path(&config)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(" ping "));
        assert!(lines[1].contains(" pong "));

        let binary = std::fs::read(binary_path(&config)).unwrap();
        let mut offset = 0;
        let mut commands = Vec::new();
        while offset < binary.len() {
            let len =
                u32::from_le_bytes(binary[offset..offset + 4].try_into().unwrap()) as usize;
            offset += 4;
            let record = Record::from_bytes(&binary[offset..offset + len]).unwrap();
            commands.push(record.command());
            offset += len;
        }
        assert_eq!(commands, vec![Command::Ping, Command::Pong]);
    }

    #[tokio::test]
    async fn test_rotation_by_size() {
        let dir = tempfile::tempdir().unwrap();
        let config = RecorderConfig {
            prefix: dir.path().join("capture"),
            size_limit: 1,
            ..RecorderConfig::default()
        };
        let recorder = FileRecorder::new(config.clone()).await.unwrap();

        recorder.process(ping(1)).await;
        recorder.process(ping(2)).await;
        recorder.stop().await;

        let rotated = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.starts_with("capture-") && name.ends_with(".log")
            })
            .count();
        assert_eq!(rotated, 1);
        // the live pair still exists and holds the second record
        let text = std::fs::read_to_string(text_path(&config)).unwrap();
        assert_eq!(text.lines().count(), 1);
    }
}
