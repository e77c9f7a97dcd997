//! Defines a _trigger_, the part of an S3 notification the handler
//! acts upon. The trigger is built from the raw event, so that
//! malformed events can be told apart from valid ones and answered
//! accordingly.

use crate::error::HandlerError;
use serde_json::Value;
use tracing::{instrument, warn};

/// The uploaded object that caused the invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    /// The bucket named in the record, if any.
    pub bucket: Option<String>,

    /// The key of the uploaded object.
    pub key: String,
}

impl Trigger {
    /// Extracts the trigger from the first record of an S3
    /// notification. Any further records are ignored.
    #[instrument(skip(event))]
    pub fn from_event(event: &Value) -> Result<Self, HandlerError> {
        let records = event
            .get("Records")
            .and_then(Value::as_array)
            .filter(|records| !records.is_empty())
            .ok_or_else(|| {
                HandlerError::MalformedEvent(String::from("missing or empty Records"))
            })?;
        if records.len() > 1 {
            warn!(
                "Event carries {} records; only the first one is handled",
                records.len()
            );
        }
        let s3 = &records[0]["s3"];
        let key = s3["object"]["key"]
            .as_str()
            .ok_or_else(|| {
                HandlerError::MalformedEvent(String::from("first record has no object key"))
            })?
            .to_string();
        let bucket = s3["bucket"]["name"].as_str().map(String::from);
        Ok(Trigger { bucket, key })
    }

    /// Whether the uploaded object is under the given prefix. The
    /// prefix is compared literally.
    pub fn in_folder(&self, prefix: &str) -> bool {
        self.key.starts_with(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_key_and_bucket_from_first_record() {
        let trigger = Trigger::from_event(&json!({
            "Records": [
                {"s3": {"bucket": {"name": "zeyonewbuck"}, "object": {"key": "trigger/a.csv"}}},
                {"s3": {"bucket": {"name": "zeyonewbuck"}, "object": {"key": "other/b.csv"}}}
            ]
        }))
        .unwrap();
        assert_eq!(trigger.key, "trigger/a.csv");
        assert_eq!(trigger.bucket.as_deref(), Some("zeyonewbuck"));
    }

    #[test]
    fn bucket_is_optional() {
        let trigger =
            Trigger::from_event(&json!({"Records": [{"s3": {"object": {"key": "x"}}}]})).unwrap();
        assert_eq!(trigger.bucket, None);
    }

    #[test]
    fn rejects_events_without_records() {
        for event in [
            json!({}),
            json!({"Records": []}),
            json!({"Records": "nope"}),
            json!([1, 2, 3]),
            json!({"Records": [{"s3": {"object": {}}}]}),
            json!({"Records": [{"s3": {"object": {"key": 42}}}]}),
        ] {
            assert!(matches!(
                Trigger::from_event(&event),
                Err(HandlerError::MalformedEvent(_))
            ));
        }
    }

    #[test]
    fn folder_check_is_a_literal_prefix_match() {
        let trigger = |key: &str| Trigger {
            bucket: None,
            key: String::from(key),
        };
        assert!(trigger("trigger/foo.csv").in_folder("trigger/"));
        assert!(trigger("trigger/").in_folder("trigger/"));
        assert!(!trigger("triggers/foo.csv").in_folder("trigger/"));
        assert!(!trigger("data/trigger/foo.csv").in_folder("trigger/"));
        assert!(!trigger("Trigger/foo.csv").in_folder("trigger/"));
        assert!(!trigger("trigger*foo").in_folder("trigger/*"));
    }
}
