//! Tweet record model.
//!
//! Only the attributes the pipeline reasons about are typed; every other
//! field is carried through untouched in [`Tweet::other`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON object with arbitrary fields
pub type Object = Map<String, Value>;

/// A decoded tweet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Author sub-record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Object>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place: Option<Object>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_status: Option<Box<Tweet>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retweeted_status: Option<Box<Tweet>>,
    #[serde(flatten)]
    pub other: Object,
}

impl Tweet {
    /// Minimal tweet with only an id.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            text: None,
            user: None,
            place: None,
            quoted_status: None,
            retweeted_status: None,
            other: Object::new(),
        }
    }

    /// Decode a tweet from raw JSON bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, sonic_rs::Error> {
        sonic_rs::from_slice(data)
    }

    /// Nested quoted and retweeted tweets, if present.
    pub fn nested_mut(&mut self) -> impl Iterator<Item = &mut Tweet> {
        self.quoted_status
            .as_deref_mut()
            .into_iter()
            .chain(self.retweeted_status.as_deref_mut())
    }
}

/// Whether a decoded stream message is a tweet, as opposed to a control
/// message (deletion notice, stall warning, limit notice, ...).
pub fn is_tweet_message(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    obj.get("id").is_some_and(Value::is_u64)
        && ["text", "full_text", "retweet_count"]
            .iter()
            .any(|k| obj.contains_key(*k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_keeps_unknown_fields() {
        let raw = br#"{"id":7,"text":"hi","lang":"pt","retweet_count":3}"#;
        let tweet = Tweet::from_slice(raw).unwrap();
        assert_eq!(tweet.id, 7);
        assert_eq!(tweet.text.as_deref(), Some("hi"));
        assert_eq!(tweet.other.get("lang"), Some(&json!("pt")));
        assert_eq!(tweet.other.get("retweet_count"), Some(&json!(3)));
    }

    #[test]
    fn decode_nested_retweet() {
        let raw = br#"{"id":2,"retweeted_status":{"id":1,"user":{"screen_name":"a"}}}"#;
        let tweet = Tweet::from_slice(raw).unwrap();
        let rt = tweet.retweeted_status.as_deref().unwrap();
        assert_eq!(rt.id, 1);
        assert!(tweet.quoted_status.is_none());
    }

    #[test]
    fn decode_null_optionals() {
        let raw = br#"{"id":3,"place":null,"quoted_status":null}"#;
        let tweet = Tweet::from_slice(raw).unwrap();
        assert!(tweet.place.is_none());
        assert!(tweet.quoted_status.is_none());
    }

    #[test]
    fn decode_rejects_malformed() {
        assert!(Tweet::from_slice(b"{\"id\":").is_err());
        assert!(Tweet::from_slice(b"[1,2]").is_err());
        assert!(Tweet::from_slice(br#"{"id":"abc"}"#).is_err());
        assert!(Tweet::from_slice(br#"{"text":"no id"}"#).is_err());
    }

    #[test]
    fn serialize_omits_absent_fields() {
        let line = serde_json::to_string(&Tweet::new(9)).unwrap();
        assert_eq!(line, r#"{"id":9}"#);
    }

    #[test]
    fn classify_messages() {
        assert!(is_tweet_message(&json!({"id": 1, "text": "x"})));
        assert!(!is_tweet_message(&json!({"delete": {"status": {"id": 1}}})));
        assert!(!is_tweet_message(&json!({"warning": {"code": "FALLING_BEHIND"}})));
        assert!(!is_tweet_message(&json!([1])));
    }
}
