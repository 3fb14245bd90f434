mod prompts;

use std::io::{self, Write as _};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use perch_contracts::conversation::{ConversationBuffer, SummarizeOutcome};
use perch_contracts::events::{EventPayload, EventWriter};
use perch_contracts::reply::{parse_directive, split_think, ReplyDirective};
use perch_contracts::transcript::{diff_transcripts, extract, extract_lenient, format_lines};
use perch_engine::{inject, CaptureOutcome, CapturePipeline, ChangeGate, OllamaClient};

#[derive(Debug, Parser)]
#[command(
    name = "perch",
    version,
    about = "Watches the chat region between two screen markers and replies through the keyboard"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the watch-and-reply loop.
    Run(RunArgs),
    /// Locate the region once, save it, and report the gate verdict.
    Capture(CaptureArgs),
}

#[derive(Debug, Parser)]
struct RunArgs {
    /// Chat endpoint (Ollama-compatible).
    #[arg(long, default_value = "http://127.0.0.1:11434/api/chat")]
    endpoint: String,
    /// Text model that decides on replies.
    #[arg(long, default_value = "qwen3:8b")]
    chat_model: String,
    /// Vision model that transcribes the captured region.
    #[arg(long, default_value = "qwen2.5vl:7b")]
    vision_model: String,
    /// Template image for the region's top-left anchor.
    #[arg(long)]
    left_marker: PathBuf,
    /// Template image for the region's bottom-right anchor.
    #[arg(long)]
    right_marker: PathBuf,
    /// Cached-frame slot used for change detection.
    #[arg(long, default_value = "capture_result.png")]
    cache: PathBuf,
    /// Session event log.
    #[arg(long, default_value = "events.jsonl")]
    events: PathBuf,
    /// Minimum normalized-correlation score for a marker match.
    #[arg(long, default_value_t = 0.8)]
    match_threshold: f64,
    /// Differing-pixel count below which a capture counts as unchanged.
    #[arg(long, default_value_t = 500)]
    change_threshold: u32,
    /// Inference request timeout in seconds.
    #[arg(long, default_value_t = 180)]
    timeout_secs: u64,
    /// Stream the chat reply to stdout as it is generated.
    #[arg(long)]
    stream: bool,
    /// Override the built-in chat persona prompt.
    #[arg(long)]
    system_prompt: Option<String>,
    /// Override the built-in screen transcription prompt.
    #[arg(long)]
    read_prompt: Option<String>,
    /// Override the built-in summarization prompt.
    #[arg(long)]
    summarize_prompt: Option<String>,
}

#[derive(Debug, Parser)]
struct CaptureArgs {
    /// Template image for the region's top-left anchor.
    #[arg(long)]
    left_marker: PathBuf,
    /// Template image for the region's bottom-right anchor.
    #[arg(long)]
    right_marker: PathBuf,
    /// Where to save the captured region.
    #[arg(long, default_value = "region.png")]
    out: PathBuf,
    /// Cached-frame slot compared against (read-only here).
    #[arg(long, default_value = "capture_result.png")]
    cache: PathBuf,
    /// Minimum normalized-correlation score for a marker match.
    #[arg(long, default_value_t = 0.8)]
    match_threshold: f64,
    /// Differing-pixel count below which a capture counts as unchanged.
    #[arg(long, default_value_t = 500)]
    change_threshold: u32,
}

/// Everything the agent needs, resolved once at startup. No ambient
/// globals; components receive what they use through constructors.
#[derive(Debug, Clone)]
struct AgentConfig {
    endpoint: String,
    chat_model: String,
    vision_model: String,
    left_marker: PathBuf,
    right_marker: PathBuf,
    cache: PathBuf,
    events: PathBuf,
    match_threshold: f64,
    change_threshold: u32,
    timeout: Duration,
    retry_attempts: usize,
    retry_backoff: Duration,
    stream: bool,
    system_prompt: String,
    read_prompt: String,
    summarize_prompt: String,
    settle_delay: Duration,
    tick_delay: Duration,
    error_delay: Duration,
}

impl AgentConfig {
    fn from_args(args: RunArgs) -> Self {
        Self {
            endpoint: args.endpoint,
            chat_model: args.chat_model,
            vision_model: args.vision_model,
            left_marker: args.left_marker,
            right_marker: args.right_marker,
            cache: args.cache,
            events: args.events,
            match_threshold: args.match_threshold,
            change_threshold: args.change_threshold,
            timeout: Duration::from_secs(args.timeout_secs),
            retry_attempts: perch_engine::ollama::DEFAULT_RETRY_ATTEMPTS,
            retry_backoff: perch_engine::ollama::DEFAULT_RETRY_BACKOFF,
            stream: args.stream,
            system_prompt: args
                .system_prompt
                .unwrap_or_else(|| prompts::CHAT_SYSTEM_PROMPT.to_string()),
            read_prompt: args
                .read_prompt
                .unwrap_or_else(|| prompts::READ_SCREEN_PROMPT.to_string()),
            summarize_prompt: args
                .summarize_prompt
                .unwrap_or_else(|| prompts::SUMMARIZE_PROMPT.to_string()),
            settle_delay: Duration::from_secs(5),
            tick_delay: Duration::from_secs(1),
            error_delay: Duration::from_secs(5),
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("perch error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => Agent::new(AgentConfig::from_args(args))?.run(),
        Command::Capture(args) => run_capture(args),
    }
}

enum TickOutcome {
    /// Iteration completed (with or without a delivered reply).
    Acted,
    /// Region unchanged; everything downstream was skipped.
    Skipped,
    /// The model asked to end the conversation.
    Quit,
}

struct Agent {
    config: AgentConfig,
    client: OllamaClient,
    pipeline: CapturePipeline,
    events: EventWriter,
    buffer: ConversationBuffer,
    /// Raw vision replies for this and the previous processed capture; the
    /// diff works on these, so a corrupt snapshot degrades gracefully.
    current_raw: String,
    previous_raw: String,
}

impl Agent {
    fn new(config: AgentConfig) -> Result<Self> {
        let client = OllamaClient::new(&config.endpoint, config.timeout)?
            .with_retry(config.retry_attempts, config.retry_backoff);
        let gate = ChangeGate::new(&config.cache, config.change_threshold);
        let pipeline = CapturePipeline::new(
            &config.left_marker,
            &config.right_marker,
            config.match_threshold,
            gate,
        );
        let events = EventWriter::with_generated_session(&config.events);
        let mut buffer = ConversationBuffer::new(&config.chat_model, &config.system_prompt);
        buffer.set_stream(config.stream);
        Ok(Self {
            config,
            client,
            pipeline,
            events,
            buffer,
            current_raw: String::new(),
            previous_raw: String::new(),
        })
    }

    fn run(&mut self) -> Result<i32> {
        self.events.emit(
            "agent_started",
            payload(json!({
                "endpoint": self.config.endpoint,
                "chat_model": self.config.chat_model,
                "vision_model": self.config.vision_model,
            })),
        )?;
        log::info!(
            "watching for markers; first capture in {}s",
            self.config.settle_delay.as_secs()
        );
        thread::sleep(self.config.settle_delay);

        loop {
            match self.tick() {
                Ok(TickOutcome::Acted) => thread::sleep(self.config.tick_delay),
                Ok(TickOutcome::Skipped) => thread::sleep(self.config.error_delay),
                Ok(TickOutcome::Quit) => {
                    self.events.emit("agent_quit", EventPayload::new())?;
                    log::info!("conversation ended by the model");
                    return Ok(0);
                }
                Err(err) => {
                    log::error!("iteration failed: {err:#}");
                    thread::sleep(self.config.error_delay);
                }
            }
        }
    }

    /// One pass through capture → extract → diff → format → query → act →
    /// cache update. Returns without mutating the buffer or the cache on
    /// any failure path.
    fn tick(&mut self) -> Result<TickOutcome> {
        let capture = match self.pipeline.capture()? {
            CaptureOutcome::Unchanged => {
                log::info!("capture region unchanged; skipping");
                self.events.emit("region_unchanged", EventPayload::new())?;
                return Ok(TickOutcome::Skipped);
            }
            CaptureOutcome::Changed(capture) => capture,
        };

        let described = self.client.describe_region(
            &self.config.vision_model,
            &self.config.read_prompt,
            &capture.png_base64,
        );
        log::debug!("vision transcript: {described}");

        if !self.current_raw.is_empty() {
            self.previous_raw = std::mem::take(&mut self.current_raw);
        }
        self.current_raw = described;

        let current = extract(&self.current_raw)?;
        let previous = extract_lenient(&self.previous_raw);
        let fresh = diff_transcripts(&current, &previous);
        let formatted = format_lines(&fresh);
        if formatted.is_empty() {
            log::info!("no new messages in the region");
            self.pipeline.commit(&capture)?;
            return Ok(TickOutcome::Acted);
        }
        self.events.emit(
            "messages_extracted",
            payload(json!({"count": fresh.len()})),
        )?;
        log::info!("{} new message(s)", fresh.len());

        // Query against a probe copy so a failed request leaves the live
        // buffer exactly as it was.
        let request = {
            let mut probe = self.buffer.clone();
            probe.push_user(&formatted);
            probe.build()
        };
        let reply = self.query_chat(&request)?;
        let parsed = split_think(&reply);
        if !parsed.thinking.is_empty() {
            log::debug!("model thinking: {}", parsed.thinking);
        }

        match parse_directive(&parsed.answer) {
            ReplyDirective::Quit => {
                log::info!("model asked to quit");
                return Ok(TickOutcome::Quit);
            }
            ReplyDirective::Reject => {
                log::info!("model declined to reply");
                self.events.emit("reply_rejected", EventPayload::new())?;
            }
            ReplyDirective::Say(text) => {
                inject::paste_and_send(&text)?;
                self.events.emit(
                    "reply_sent",
                    payload(json!({"chars": text.chars().count()})),
                )?;
            }
        }

        self.buffer.push_user(&formatted);
        self.buffer.push_assistant(&parsed.answer);
        self.pipeline.commit(&capture)?;

        let client = &self.client;
        let summarize_prompt = self.config.summarize_prompt.as_str();
        match self
            .buffer
            .maybe_summarize_and_clear(summarize_prompt, |request| client.query(request))
        {
            SummarizeOutcome::Skipped => {}
            SummarizeOutcome::Summarized => {
                log::info!("conversation condensed into memory");
                self.events.emit("memory_summarized", EventPayload::new())?;
            }
            SummarizeOutcome::Failed(reason) => {
                log::warn!("summarization failed, keeping the live buffer: {reason}");
            }
        }

        Ok(TickOutcome::Acted)
    }

    fn query_chat(&self, request: &Value) -> Result<String> {
        if self.config.stream {
            let reply = self.client.query_stream(request, |fragment| {
                print!("{fragment}");
                let _ = io::stdout().flush();
            })?;
            println!();
            Ok(reply)
        } else {
            self.client.query(request)
        }
    }
}

fn run_capture(args: CaptureArgs) -> Result<i32> {
    let gate = ChangeGate::new(&args.cache, args.change_threshold);
    let pipeline = CapturePipeline::new(
        &args.left_marker,
        &args.right_marker,
        args.match_threshold,
        gate,
    );
    match pipeline.capture()? {
        CaptureOutcome::Unchanged => {
            println!("region unchanged relative to {}", args.cache.display());
        }
        CaptureOutcome::Changed(capture) => {
            capture.image.save(&args.out)?;
            println!(
                "saved {}x{} region ({}, {})-({}, {}) to {}",
                capture.region.width(),
                capture.region.height(),
                capture.region.left,
                capture.region.top,
                capture.region.right,
                capture.region.bottom,
                args.out.display()
            );
        }
    }
    Ok(0)
}

fn payload(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}
