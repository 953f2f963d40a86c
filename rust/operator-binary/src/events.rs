//! A narrow event-emission capability, decoupled from `kube::runtime::events::Recorder`
//! so tests can assert on emitted events without a live API server.
use async_trait::async_trait;
use stackable_operator::kube::{
    runtime::events::{Event, EventType, Recorder},
    Resource,
};

use crate::crd::LogConfig;

pub const REASON_SYNC_SUCCESS: &str = "syncSuccess";
pub const REASON_SYNC_FAILED: &str = "syncFailed";

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, target: &LogConfig, event_type: EventType, reason: &str, message: String);
}

pub struct RecorderPublisher(pub Recorder);

#[async_trait]
impl EventPublisher for RecorderPublisher {
    async fn publish(
        &self,
        target: &LogConfig,
        event_type: EventType,
        reason: &str,
        message: String,
    ) {
        let event = Event {
            type_: event_type,
            reason: reason.to_string(),
            note: Some(message),
            action: reason.to_string(),
            secondary: None,
        };
        if let Err(err) = self.0.publish(&event, &target.object_ref(&())).await {
            tracing::warn!(%err, "failed to publish event");
        }
    }
}

/// Emit the standard `syncSuccess`/`syncFailed` pair for a selector-type dispatch outcome.
pub async fn emit_sync_result(
    publisher: &dyn EventPublisher,
    target: &LogConfig,
    selector_type: &str,
    keys: &[String],
    result: &Result<(), String>,
) {
    match result {
        Ok(()) if keys.is_empty() => {}
        Ok(()) => {
            publisher
                .publish(
                    target,
                    EventType::Normal,
                    REASON_SYNC_SUCCESS,
                    format!("Sync type {selector_type} {keys:?} success"),
                )
                .await;
        }
        Err(err) => {
            publisher
                .publish(
                    target,
                    EventType::Warning,
                    REASON_SYNC_FAILED,
                    format!("Sync type {selector_type} {keys:?} failed: {err}"),
                )
                .await;
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct CollectingPublisher {
        pub events: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl EventPublisher for CollectingPublisher {
        async fn publish(
            &self,
            _target: &LogConfig,
            event_type: EventType,
            reason: &str,
            message: String,
        ) {
            let type_str = match event_type {
                EventType::Normal => "Normal",
                EventType::Warning => "Warning",
            };
            self.events
                .lock()
                .unwrap()
                .push((type_str.to_string(), reason.to_string(), message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::CollectingPublisher;
    use super::*;
    use crate::crd::{LogConfigSpec, PipelineSpec, Selector};

    fn sample_target() -> LogConfig {
        LogConfig::new(
            "lg1",
            LogConfigSpec {
                selector: Selector::Node {
                    cluster: String::new(),
                },
                pipeline: PipelineSpec {
                    sources: vec![],
                    sink_ref: "es".to_string(),
                    interceptor_ref: "icp".to_string(),
                },
            },
        )
    }

    #[tokio::test]
    async fn success_with_keys_emits_normal_event() {
        let publisher = CollectingPublisher::default();
        emit_sync_result(
            &publisher,
            &sample_target(),
            "pod",
            &["web-1".to_string()],
            &Ok(()),
        )
        .await;
        let events = publisher.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "Normal");
        assert_eq!(events[0].1, REASON_SYNC_SUCCESS);
    }

    #[tokio::test]
    async fn success_with_no_keys_emits_nothing() {
        let publisher = CollectingPublisher::default();
        emit_sync_result(&publisher, &sample_target(), "pod", &[], &Ok(())).await;
        assert!(publisher.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failure_emits_warning_event() {
        let publisher = CollectingPublisher::default();
        emit_sync_result(
            &publisher,
            &sample_target(),
            "pod",
            &["web-1".to_string()],
            &Err("boom".to_string()),
        )
        .await;
        let events = publisher.events.lock().unwrap();
        assert_eq!(events[0].0, "Warning");
        assert_eq!(events[0].1, REASON_SYNC_FAILED);
        assert!(events[0].2.contains("boom"));
    }
}
