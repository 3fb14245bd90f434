//! Blocking client for an Ollama-style chat endpoint.
//!
//! The chat path propagates failures as errors for the driver to log and
//! absorb. The screen-description path never fails: timeout-class errors
//! are retried on a fixed backoff and everything else degrades to a
//! diagnostic string, so one bad request can never stall the loop.

use std::io::{BufRead, BufReader};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use perch_contracts::conversation::RequestBuilder;
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;

pub const DEFAULT_RETRY_ATTEMPTS: usize = 3;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Sentinel reply after exhausting timeout retries.
pub const TIMED_OUT_REPLY: &str = "the screen description request timed out";
/// Diagnostic reply for non-retryable description failures.
pub const DESCRIPTION_FAILED_REPLY: &str = "the screen description request failed";

#[derive(Debug, Clone)]
pub struct OllamaClient {
    endpoint: String,
    http: HttpClient,
    retry_attempts: usize,
    retry_backoff: Duration,
}

impl OllamaClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build the HTTP client")?;
        Ok(Self {
            endpoint: endpoint.into(),
            http,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        })
    }

    pub fn with_retry(mut self, attempts: usize, backoff: Duration) -> Self {
        self.retry_attempts = attempts.max(1);
        self.retry_backoff = backoff;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One synchronous chat query. Transport errors, non-200 statuses, and
    /// unusable reply bodies all come back as errors whose message is the
    /// diagnostic; nothing here panics.
    pub fn query(&self, payload: &Value) -> Result<String> {
        let value = self.post_chat(payload)?;
        reply_content(&value).context("model reply had no message content")
    }

    /// Streaming chat query: NDJSON lines, each fragment handed to `sink` as
    /// it arrives; the concatenation of fragments is the full reply.
    pub fn query_stream(&self, payload: &Value, sink: impl FnMut(&str)) -> Result<String> {
        log::debug!("streaming chat request to {}", self.endpoint);
        let response = self
            .http
            .post(&self.endpoint)
            .json(payload)
            .send()
            .with_context(|| format!("chat request failed ({})", self.endpoint))?;
        let status = response.status();
        if !status.is_success() {
            bail!("chat request failed with status {}", status.as_u16());
        }
        Ok(collect_stream(BufReader::new(response), sink))
    }

    /// Asks a vision model to transcribe the captured region: builds the
    /// request (sampling guards plus the image turn) and runs it through
    /// the retrying [`Self::describe`] path.
    pub fn describe_region(&self, model: &str, prompt: &str, image_b64: &str) -> String {
        let mut request = RequestBuilder::new(model);
        request.apply_sampling_guards();
        request.push_user_with_image(prompt, image_b64);
        self.describe(&request.build())
    }

    /// Screen-description query with bounded retries: timeout-class failures
    /// are retried up to the configured attempts with a fixed backoff, then
    /// degrade to the timed-out sentinel; other failures degrade to a
    /// diagnostic reply immediately.
    pub fn describe(&self, payload: &Value) -> String {
        let mut attempt = 1;
        loop {
            match self.post_chat(payload) {
                Ok(value) => {
                    return reply_content(&value).unwrap_or_else(|| {
                        log::error!("description reply had no message content");
                        DESCRIPTION_FAILED_REPLY.to_string()
                    })
                }
                Err(err) if is_timeout_error(&err) => {
                    log::warn!(
                        "description request timed out (attempt {attempt}/{})",
                        self.retry_attempts
                    );
                    if attempt >= self.retry_attempts {
                        return TIMED_OUT_REPLY.to_string();
                    }
                    attempt += 1;
                    thread::sleep(self.retry_backoff);
                }
                Err(err) => {
                    log::error!("description request failed: {err:#}");
                    return DESCRIPTION_FAILED_REPLY.to_string();
                }
            }
        }
    }

    fn post_chat(&self, payload: &Value) -> Result<Value> {
        log::debug!("chat request to {}", self.endpoint);
        let response = self
            .http
            .post(&self.endpoint)
            .json(payload)
            .send()
            .with_context(|| format!("chat request failed ({})", self.endpoint))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!(
                "chat request failed with status {}: {}",
                status.as_u16(),
                truncate(&body, 512)
            );
        }
        response
            .json::<Value>()
            .context("failed to parse the chat response body")
    }
}

/// Reads NDJSON stream lines and concatenates every `message.content`
/// fragment, feeding each one to `sink`. Malformed lines are skipped.
pub fn collect_stream(reader: impl BufRead, mut sink: impl FnMut(&str)) -> String {
    let mut reply = String::new();
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                log::warn!("stream read interrupted: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(chunk) => {
                if let Some(content) = chunk
                    .get("message")
                    .and_then(|message| message.get("content"))
                    .and_then(Value::as_str)
                {
                    if !content.is_empty() {
                        reply.push_str(content);
                        sink(content);
                    }
                }
            }
            Err(err) => log::warn!("skipping malformed stream line: {err}"),
        }
    }
    reply
}

fn reply_content(value: &Value) -> Option<String> {
    value
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn is_timeout_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .is_some_and(reqwest::Error::is_timeout)
    })
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{collect_stream, reply_content, truncate};

    #[test]
    fn reply_content_reads_the_message_body() {
        let value = json!({"message": {"role": "assistant", "content": "hello"}});
        assert_eq!(reply_content(&value).as_deref(), Some("hello"));
    }

    #[test]
    fn reply_content_is_none_without_a_content_field() {
        assert!(reply_content(&json!({"message": {}})).is_none());
        assert!(reply_content(&json!({"done": true})).is_none());
    }

    #[test]
    fn stream_fragments_concatenate_in_order() {
        let body = concat!(
            "{\"message\":{\"content\":\"hel\"}}\n",
            "{\"message\":{\"content\":\"lo \"}}\n",
            "not json\n",
            "{\"message\":{\"content\":\"there\"},\"done\":true}\n",
        );
        let mut fragments = Vec::new();
        let reply = collect_stream(body.as_bytes(), |fragment| {
            fragments.push(fragment.to_string());
        });
        assert_eq!(reply, "hello there");
        assert_eq!(fragments, vec!["hel", "lo ", "there"]);
    }

    #[test]
    fn empty_stream_yields_an_empty_reply() {
        let reply = collect_stream("".as_bytes(), |_| {});
        assert!(reply.is_empty());
    }

    #[test]
    fn truncate_caps_long_bodies() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 3), "abc…");
    }
}
