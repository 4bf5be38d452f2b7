use std::collections::HashMap;
use std::sync::Arc;

use opcore_protocol::{OperationId, TraceKind, TraceRecord, TraceSink};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

/// Keeps every record in memory, in arrival order.
#[derive(Debug, Default)]
pub struct TraceRecorder {
    records: Mutex<Vec<TraceRecord>>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<TraceRecord> {
        self.records.lock().clone()
    }

    pub fn records_for(&self, operation_id: OperationId) -> Vec<TraceRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.operation_id == operation_id)
            .cloned()
            .collect()
    }

    /// Activity counts reported for one operation, in order.
    pub fn activity_counts(&self, operation_id: OperationId) -> Vec<u32> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.operation_id == operation_id)
            .filter_map(|record| match record.kind {
                TraceKind::ActivityChanged { count } => Some(count),
                _ => None,
            })
            .collect()
    }

    /// Number of records per kind name.
    pub fn kind_histogram(&self) -> HashMap<&'static str, usize> {
        let mut histogram = HashMap::new();
        for record in self.records.lock().iter() {
            *histogram.entry(record.kind.name()).or_insert(0) += 1;
        }
        histogram
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl TraceSink for TraceRecorder {
    fn record(&self, record: TraceRecord) {
        self.records.lock().push(record);
    }
}

#[derive(Clone, Debug)]
pub struct TraceHub {
    sender: broadcast::Sender<TraceRecord>,
}

impl TraceHub {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self { sender }
    }

    pub fn publish(&self, record: TraceRecord) {
        let _ = self.sender.send(record);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TraceRecord> {
        self.sender.subscribe()
    }

    pub fn subscribe_stream(&self) -> BroadcastStream<TraceRecord> {
        BroadcastStream::new(self.sender.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl TraceSink for TraceHub {
    fn record(&self, record: TraceRecord) {
        self.publish(record);
    }
}

/// Records to an optional recorder, then publishes to the hub.
#[derive(Clone)]
pub struct TraceJournal {
    recorder: Option<Arc<TraceRecorder>>,
    hub: TraceHub,
}

impl TraceJournal {
    pub fn new(hub: TraceHub) -> Self {
        Self {
            recorder: None,
            hub,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<TraceRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn recorder(&self) -> Option<&Arc<TraceRecorder>> {
        self.recorder.as_ref()
    }

    pub fn hub(&self) -> &TraceHub {
        &self.hub
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TraceRecord> {
        self.hub.subscribe()
    }
}

impl TraceSink for TraceJournal {
    fn record(&self, record: TraceRecord) {
        trace!(
            operation_id = %record.operation_id,
            kind = record.kind.name(),
            "trace record"
        );
        if let Some(recorder) = &self.recorder {
            recorder.record(record.clone());
        }
        self.hub.publish(record);
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use opcore_protocol::{LifecycleState, OperationId, TraceKind, TraceRecord, TraceSink};
    use std::sync::Arc;

    use crate::{TraceHub, TraceJournal, TraceRecorder};

    fn lifecycle(id: OperationId, from: LifecycleState, to: LifecycleState) -> TraceRecord {
        TraceRecord::new(id, None, TraceKind::Lifecycle { from, to })
    }

    #[test]
    fn recorder_filters_by_operation() {
        let recorder = TraceRecorder::new();
        let a = OperationId::new();
        let b = OperationId::new();
        recorder.record(TraceRecord::new(a, None, TraceKind::ActivityChanged { count: 2 }));
        recorder.record(TraceRecord::new(b, None, TraceKind::ActivityChanged { count: 7 }));
        recorder.record(TraceRecord::new(a, None, TraceKind::ActivityChanged { count: 1 }));

        assert_eq!(recorder.len(), 3);
        assert_eq!(recorder.records_for(a).len(), 2);
        assert_eq!(recorder.activity_counts(a), vec![2, 1]);
        assert_eq!(recorder.kind_histogram().get("activity_changed"), Some(&3));

        recorder.clear();
        assert!(recorder.is_empty());
    }

    #[tokio::test]
    async fn journal_records_and_publishes() {
        let recorder = Arc::new(TraceRecorder::new());
        let journal = TraceJournal::new(TraceHub::new(16)).with_recorder(recorder.clone());
        let mut receiver = journal.subscribe();

        let id = OperationId::new();
        journal.record(lifecycle(id, LifecycleState::Initialized, LifecycleState::Operating));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.operation_id, id);
        assert_eq!(recorder.records_for(id).len(), 1);
    }

    #[tokio::test]
    async fn hub_stream_yields_published_records() {
        let hub = TraceHub::new(8);
        let mut stream = hub.subscribe_stream();
        assert_eq!(hub.subscriber_count(), 1);

        let id = OperationId::new();
        hub.publish(lifecycle(id, LifecycleState::Operating, LifecycleState::Completing));

        let record = stream.next().await.unwrap().unwrap();
        assert!(matches!(
            record.kind,
            TraceKind::Lifecycle {
                to: LifecycleState::Completing,
                ..
            }
        ));
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let hub = TraceHub::new(1);
        hub.publish(lifecycle(
            OperationId::new(),
            LifecycleState::Completing,
            LifecycleState::CompletionPending,
        ));
        assert_eq!(hub.subscriber_count(), 0);
    }
}
