use serde_json::{json, Map, Value};

use super::{Role, Turn};

/// Assembles one chat request for the inference endpoint:
/// `{"model", "messages", "stream"}` plus any tuning settings. Settings set
/// by the caller always win over the sampling guards.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    model: String,
    stream: bool,
    turns: Vec<Turn>,
    settings: Map<String, Value>,
}

impl RequestBuilder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            stream: false,
            turns: Vec::new(),
            settings: Map::new(),
        }
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn push_system(&mut self, text: impl Into<String>) -> &mut Self {
        self.turns.push(Turn::new(Role::System, text));
        self
    }

    pub fn push_user(&mut self, text: impl Into<String>) -> &mut Self {
        self.turns.push(Turn::new(Role::User, text));
        self
    }

    pub fn push_user_with_image(
        &mut self,
        text: impl Into<String>,
        image_b64: impl Into<String>,
    ) -> &mut Self {
        self.turns
            .push(Turn::with_images(Role::User, text, vec![image_b64.into()]));
        self
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) -> &mut Self {
        self.turns.push(Turn::new(Role::Assistant, text));
        self
    }

    pub fn push_turn(&mut self, turn: Turn) -> &mut Self {
        self.turns.push(turn);
        self
    }

    pub fn set_setting(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.settings.insert(key.into(), value);
        self
    }

    /// Conservative sampling defaults that keep small models from looping
    /// while transcribing chat history into JSON. Applied only where the
    /// caller has not already chosen a value.
    pub fn apply_sampling_guards(&mut self) -> &mut Self {
        let guards = [
            ("temperature", json!(0.7)),
            ("top_k", json!(40)),
            ("top_p", json!(0.9)),
            ("min_p", json!(0.05)),
            ("max_tokens", json!(300)),
            ("repeat_penalty", json!(1.2)),
            ("tfs_z", json!(1.0)),
            ("typical_p", json!(1.0)),
            ("early_stopping", json!(true)),
            ("keep_alive", json!("10m")),
        ];
        for (key, value) in guards {
            if !self.settings.contains_key(key) {
                self.settings.insert(key.to_string(), value);
            }
        }
        self
    }

    pub fn build(&self) -> Value {
        let mut request = Map::new();
        request.insert("model".to_string(), Value::String(self.model.clone()));
        request.insert(
            "messages".to_string(),
            Value::Array(self.turns.iter().map(Turn::to_value).collect()),
        );
        request.insert("stream".to_string(), Value::Bool(self.stream));
        for (key, value) in &self.settings {
            request.insert(key.clone(), value.clone());
        }
        Value::Object(request)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::RequestBuilder;

    #[test]
    fn build_produces_model_messages_and_stream() {
        let mut builder = RequestBuilder::new("chat-model");
        builder.push_system("be brief").push_user("hello");
        let request = builder.build();
        assert_eq!(request["model"], json!("chat-model"));
        assert_eq!(request["stream"], json!(false));
        assert_eq!(
            request["messages"],
            json!([
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hello"},
            ])
        );
    }

    #[test]
    fn stream_flag_is_carried() {
        let request = RequestBuilder::new("m").stream(true).build();
        assert_eq!(request["stream"], json!(true));
    }

    #[test]
    fn sampling_guards_do_not_override_explicit_settings() {
        let mut builder = RequestBuilder::new("vision-model");
        builder.set_setting("temperature", json!(0.1));
        builder.apply_sampling_guards();
        let request = builder.build();
        assert_eq!(request["temperature"], json!(0.1));
        assert_eq!(request["top_k"], json!(40));
        assert_eq!(request["keep_alive"], json!("10m"));
    }

    #[test]
    fn image_turns_carry_the_blob() {
        let mut builder = RequestBuilder::new("vision-model");
        builder.push_user_with_image("read this", "aGk=");
        let request = builder.build();
        assert_eq!(
            request["messages"][0]["images"],
            Value::Array(vec![json!("aGk=")])
        );
    }
}
