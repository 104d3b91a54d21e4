//! Event envelope exchanged between hosts and clients.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Topic of the automatic reply sent when a subscriber returns a value.
pub const REPLY_TOPIC: &str = "ftrack.meta.reply";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub source: EventSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to_event: Option<String>,
    pub sent: DateTime<Utc>,
}

impl Event {
    pub fn new(topic: impl Into<String>, data: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.into(),
            data,
            source: EventSource::default(),
            in_reply_to_event: None,
            sent: Utc::now(),
        }
    }

    pub fn with_source(mut self, id: impl Into<String>) -> Self {
        self.source.id = id.into();
        self
    }

    /// Reply event addressed to this one.
    pub fn reply(&self, data: Value) -> Event {
        let mut reply = Event::new(REPLY_TOPIC, data);
        reply.in_reply_to_event = Some(self.id.clone());
        reply
    }

    pub fn is_reply(&self) -> bool {
        self.topic == REPLY_TOPIC && self.in_reply_to_event.is_some()
    }

    /// Value at a dotted path inside `data` (`pipeline.host_id`).
    pub fn data_at(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(&self.data, |value, segment| value.get(segment))
    }

    /// One newline-terminated JSON frame.
    pub fn to_frame(&self) -> Result<String> {
        let mut frame = serde_json::to_string(self)?;
        frame.push('\n');
        Ok(frame)
    }

    pub fn from_frame(frame: &str) -> Result<Event> {
        Ok(serde_json::from_str(frame.trim_end())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_at_walks_nested_objects() {
        let event = Event::new("t", json!({"pipeline": {"host_id": "h1", "type": "publisher"}}));
        assert_eq!(event.data_at("pipeline.host_id"), Some(&json!("h1")));
        assert!(event.data_at("pipeline.missing").is_none());
    }

    #[test]
    fn test_reply_points_at_original() {
        let event = Event::new("ftrack.pipeline.host.discover", json!({}));
        let reply = event.reply(json!({"host_id": "h1"}));
        assert!(reply.is_reply());
        assert_eq!(reply.in_reply_to_event.as_deref(), Some(event.id.as_str()));
        assert_ne!(reply.id, event.id);
    }

    #[test]
    fn test_frame_is_single_line() {
        let event = Event::new("t", json!({"text": "a\nb"})).with_source("hub");
        let frame = event.to_frame().unwrap();
        assert_eq!(frame.matches('\n').count(), 1);
        assert_eq!(Event::from_frame(&frame).unwrap(), event);
    }
}
