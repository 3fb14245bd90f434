mod buffer;
mod request;

pub use buffer::{ConversationBuffer, SummarizeOutcome, DEFAULT_CHAR_BUDGET};
pub use request::RequestBuilder;

use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of the conversation context. Turns are owned by the buffer that
/// created them and are never mutated after creation, only appended or
/// cleared.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub images: Option<Vec<String>>,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            images: None,
        }
    }

    pub fn with_images(role: Role, text: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            role,
            text: text.into(),
            images: Some(images),
        }
    }

    /// Wire shape: `{"role", "content"}` plus `"images"` when present.
    pub fn to_value(&self) -> Value {
        let mut message = Map::new();
        message.insert(
            "role".to_string(),
            Value::String(self.role.as_str().to_string()),
        );
        message.insert("content".to_string(), Value::String(self.text.clone()));
        if let Some(images) = &self.images {
            message.insert(
                "images".to_string(),
                Value::Array(images.iter().cloned().map(Value::String).collect()),
            );
        }
        Value::Object(message)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Role, Turn};

    #[test]
    fn turn_wire_shape_omits_absent_images() {
        let plain = Turn::new(Role::User, "hello");
        assert_eq!(plain.to_value(), json!({"role": "user", "content": "hello"}));

        let with_image = Turn::with_images(Role::User, "look", vec!["YWJj".to_string()]);
        assert_eq!(
            with_image.to_value(),
            json!({"role": "user", "content": "look", "images": ["YWJj"]})
        );
    }
}
