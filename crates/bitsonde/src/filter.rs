//! Record processors and the command filter.
//!
//! Processors form a directed acyclic graph: each accepts records through
//! [`Processor::process`] and forwards the ones it keeps to its downstream
//! processors. Queues are single-slot, so a slow sink back-pressures its
//! producers instead of dropping records.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::record::Record;

/// A node in the record processing graph.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Submits one record. Suspends while the processor's queue is full.
    async fn process(&self, record: Record);
}

/// Configuration for a [`CommandFilter`].
#[derive(Debug, Clone, Default)]
pub struct CommandFilterConfig {
    /// Wire command strings to let through. An empty set filters everything.
    pub commands: HashSet<String>,
}

impl CommandFilterConfig {
    pub fn with_commands<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }
}

/// Forwards only records whose command is in the configured set.
pub struct CommandFilter {
    queue: Mutex<Option<mpsc::Sender<Record>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CommandFilter {
    /// Creates the filter and spawns its forwarding task.
    pub fn new(config: CommandFilterConfig, next: Vec<Arc<dyn Processor>>) -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel::<Record>(1);
        let task = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if config.commands.contains(record.cmd()) {
                    for processor in &next {
                        processor.process(record.clone()).await;
                    }
                }
            }
            debug!("command filter stopped");
        });
        Arc::new(Self {
            queue: Mutex::new(Some(tx)),
            task: Mutex::new(Some(task)),
        })
    }

    /// Closes the input queue, lets the task drain, and joins it.
    pub async fn stop(&self) {
        drop(self.queue.lock().take());
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

#[async_trait]
impl Processor for CommandFilter {
    async fn process(&self, record: Record) {
        let sender = self.queue.lock().clone();
        if let Some(sender) = sender {
            let _ = sender.send(record).await;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::record::{PingRecord, PlainRecord, Record};
    use crate::record::{Command, TxRecord};

    /// Terminal processor collecting everything it receives.
    pub(crate) struct CollectSink {
        pub records: Mutex<Vec<Record>>,
    }

    impl CollectSink {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Processor for CollectSink {
        async fn process(&self, record: Record) {
            self.records.lock().push(record);
        }
    }

    fn plain(cmd: Command) -> Record {
        Record::Plain(PlainRecord::new(
            cmd,
            cmd.as_str().to_string(),
            "203.0.113.7:8333".parse().unwrap(),
            "10.0.0.1:50000".parse().unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_only_configured_commands_pass_in_order() {
        let sink = CollectSink::new();
        let filter = CommandFilter::new(
            CommandFilterConfig::with_commands(["tx", "block"]),
            vec![sink.clone()],
        );

        let remote = "203.0.113.7:8333".parse().unwrap();
        let local = "10.0.0.1:50000".parse().unwrap();
        let tx = Record::Tx(TxRecord {
            meta: crate::record::Meta::new(Command::Tx, remote, local),
            txid: [0u8; 32],
            inputs: 0,
            outputs: 0,
            value: 0,
            lock_time: 0,
        });

        for record in [
            Record::Ping(PingRecord::new(1, remote, local)),
            tx,
            plain(Command::Addr),
            plain(Command::Block),
            Record::Ping(PingRecord::new(2, remote, local)),
        ] {
            filter.process(record).await;
        }
        filter.stop().await;

        let seen: Vec<Command> = sink.records.lock().iter().map(|r| r.command()).collect();
        assert_eq!(seen, vec![Command::Tx, Command::Block]);
    }

    #[tokio::test]
    async fn test_fan_out_to_multiple_sinks() {
        let first = CollectSink::new();
        let second = CollectSink::new();
        let filter = CommandFilter::new(
            CommandFilterConfig::with_commands(["ping"]),
            vec![first.clone(), second.clone()],
        );

        let remote = "203.0.113.7:8333".parse().unwrap();
        let local = "10.0.0.1:50000".parse().unwrap();
        filter
            .process(Record::Ping(PingRecord::new(9, remote, local)))
            .await;
        filter.stop().await;

        assert_eq!(first.records.lock().len(), 1);
        assert_eq!(second.records.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_set_filters_everything() {
        let sink = CollectSink::new();
        let filter = CommandFilter::new(CommandFilterConfig::default(), vec![sink.clone()]);
        let remote = "203.0.113.7:8333".parse().unwrap();
        let local = "10.0.0.1:50000".parse().unwrap();

        filter
            .process(Record::Ping(PingRecord::new(3, remote, local)))
            .await;
        filter.stop().await;

        assert!(sink.records.lock().is_empty());
    }
}
