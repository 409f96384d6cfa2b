mod event;
mod sink;

use std::sync::Arc;

pub use event::*;
pub use sink::*;

/// Identifier of a single package download within a run.
pub type OperationId = u64;

/// Shared handle to an event sink.
pub type EventSinkHandle = Arc<dyn EventSink>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sink() {
        let sink = NullSink;
        sink.emit(SyncEvent::TargetStarting {
            target: "x86_64/core".to_string(),
        });
    }

    #[test]
    fn test_channel_sink() {
        let (sink, rx) = ChannelSink::new();
        sink.emit(SyncEvent::FetchStarting {
            op_id: 1,
            filename: "foo.pkg.tar.zst".to_string(),
            total: 1024,
        });
        sink.emit(SyncEvent::FetchProgress {
            op_id: 1,
            filename: "foo.pkg.tar.zst".to_string(),
            current: 512,
            total: 1024,
        });
        sink.emit(SyncEvent::FetchComplete {
            op_id: 1,
            filename: "foo.pkg.tar.zst".to_string(),
            total: 1024,
        });

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[1],
            SyncEvent::FetchProgress {
                current: 512,
                ..
            }
        ));
        assert!(events.iter().all(|e| e.filename() == Some("foo.pkg.tar.zst")));
    }

    #[test]
    fn test_channel_sink_receiver_dropped() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(SyncEvent::TargetStarting {
            target: "orphaned".to_string(),
        });
    }

    #[test]
    fn test_collector_sink_through_handle() {
        let collector = Arc::new(CollectorSink::default());
        assert!(collector.is_empty());

        let sink: EventSinkHandle = collector.clone();
        sink.emit(SyncEvent::Publishing {
            target: "x86_64/core".to_string(),
            stage: PublishStage::WritingIndex,
        });
        sink.emit(SyncEvent::TargetComplete {
            target: "x86_64/core".to_string(),
            status: TargetStatus::Synced,
        });

        assert_eq!(collector.len(), 2);
        assert_eq!(collector.events()[0].filename(), None);
    }

    #[test]
    fn test_event_sink_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NullSink>();
        assert_send_sync::<ChannelSink>();
        assert_send_sync::<CollectorSink>();
    }
}
