use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of a JSONL trace file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// RFC 3339 timestamp with milliseconds
    pub ts: String,
    pub level: String,
    /// Node that wrote the entry
    pub instance: String,
    /// Module path of the event
    pub target: String,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,
    /// Enclosing spans, outermost first, joined with " > "
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

impl TraceEntry {
    pub fn new(
        level: impl Into<String>,
        instance: impl Into<String>,
        target: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: level.into(),
            instance: instance.into(),
            target: target.into(),
            msg: msg.into(),
            fields: None,
            span: None,
        }
    }

    pub fn with_fields(mut self, fields: Value) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Look up a structured field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.as_ref().and_then(|f| f.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_parts_are_omitted() {
        let line = TraceEntry::new("info", "creator", "pairchat_core::sync", "Log initialized")
            .to_json_line()
            .unwrap();
        assert!(!line.contains("fields"));
        assert!(!line.contains("span"));
        assert!(line.contains("\"instance\":\"creator\""));
    }

    #[test]
    fn test_field_lookup() {
        let entry = TraceEntry::new("debug", "joiner", "t", "m")
            .with_fields(serde_json::json!({ "peer": "abc", "channel_idx": 7 }));
        let parsed = TraceEntry::from_json_line(&entry.to_json_line().unwrap()).unwrap();
        assert_eq!(parsed.field("channel_idx"), Some(&serde_json::json!(7)));
        assert_eq!(parsed.field("missing"), None);
    }
}
