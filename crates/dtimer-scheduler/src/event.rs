//! Event records and post-time validation.

use crate::error::{Result, SchedulerError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An event as persisted in the store and handed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Unique event identifier.
    pub id: String,
    /// How many times the event is redelivered after an unconfirmed lease.
    #[serde(default)]
    pub max_retries: u32,
    /// Redeliveries so far. Zero on first delivery.
    #[serde(default)]
    pub retry_count: u32,
    /// Producer data.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl EventRecord {
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| SchedulerError::Protocol(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| SchedulerError::Protocol(e.to_string()))
    }
}

/// An event a producer wants to post.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewEvent {
    id: Option<String>,
    max_retries: u32,
    payload: Map<String, Value>,
}

impl NewEvent {
    pub fn new(payload: Map<String, Value>) -> Self {
        Self {
            id: None,
            max_retries: 0,
            payload,
        }
    }

    /// Use a caller-chosen id instead of a generated one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Build an event from a JSON object.
    ///
    /// `id` and `maxRetries` are lifted out of the object when present; every
    /// other field becomes payload. A fractional `maxRetries` is truncated and
    /// a negative one means no retries.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut payload) = value else {
            return Err(SchedulerError::Validation(
                "event must be a JSON object".into(),
            ));
        };

        let id = match payload.remove("id") {
            None => None,
            Some(Value::String(id)) if !id.is_empty() => Some(id),
            Some(_) => {
                return Err(SchedulerError::Validation(
                    "event id must be a non-empty string".into(),
                ))
            }
        };

        let max_retries = match payload.remove("maxRetries") {
            None => 0,
            Some(Value::Number(n)) => {
                if let Some(n) = n.as_u64() {
                    n.min(u32::MAX as u64) as u32
                } else {
                    n.as_f64()
                        .map(|f| f.max(0.0).min(u32::MAX as f64) as u32)
                        .unwrap_or(0)
                }
            }
            Some(_) => {
                return Err(SchedulerError::Validation(
                    "maxRetries must be a number".into(),
                ))
            }
        };

        Ok(Self {
            id,
            max_retries,
            payload,
        })
    }

    /// Check the event and turn it into a record, generating an id if none
    /// was supplied.
    pub fn into_record(self) -> Result<EventRecord> {
        let id = match self.id {
            Some(id) if id.is_empty() => {
                return Err(SchedulerError::Validation(
                    "event id must be a non-empty string".into(),
                ))
            }
            Some(id) => id,
            None => uuid::Uuid::new_v4().to_string(),
        };

        Ok(EventRecord {
            id,
            max_retries: self.max_retries,
            retry_count: 0,
            payload: self.payload,
        })
    }
}

/// Parse a delay given as text, in milliseconds.
pub fn parse_delay_ms(text: &str) -> Result<u64> {
    text.trim().parse::<u64>().map_err(|_| {
        SchedulerError::Validation(format!(
            "delay must be a non-negative number of milliseconds, got {:?}",
            text
        ))
    })
}
