use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single GraphQL execution result as it appears on the wire:
/// `{"data": ..., "errors": [...]}` with `data` omitted when absent.
///
/// Queries and mutations produce exactly one of these; subscriptions produce
/// a stream of them until the source closes or the operation is cancelled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphqlError>,
}

impl Response {
    pub fn from_data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<GraphqlError>) -> Self {
        Self {
            data: None,
            errors,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// A formatted error object:
/// `{"message", "locations"?, "path"?, "extensions"?}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<PathSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Map<String, Value>>,
}

impl GraphqlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Line/column position within the originating query source, 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

/// One step of a response path: a field name or a list index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// Folds multiple errors into the single error object the `graphql-ws`
/// dialect expects. A lone error passes through unchanged; otherwise the
/// individual errors are listed under `extensions.errors` with a summary
/// message joining their texts.
pub fn combine_errors(errors: Vec<GraphqlError>) -> GraphqlError {
    if errors.len() == 1 {
        let mut errors = errors;
        return errors.remove(0);
    }

    let mut message = String::from("preparing operation");
    let mut extensions = serde_json::Map::new();
    let mut texts = Vec::with_capacity(errors.len());

    for error in &errors {
        if let Some(ext) = &error.extensions {
            for (key, value) in ext {
                extensions.insert(key.clone(), value.clone());
            }
        }
        texts.push(error.message.clone());
    }

    if !texts.is_empty() {
        message.push_str(": ");
        message.push_str(&texts.join("; "));
    }

    let mut combined = GraphqlError::new(message);

    if !errors.is_empty() {
        extensions.insert(
            "errors".to_string(),
            serde_json::to_value(&errors).unwrap_or(Value::Null),
        );
        combined.extensions = Some(extensions);
    }

    combined
}
