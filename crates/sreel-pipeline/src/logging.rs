//! Tracing setup and the buffered error log.
//!
//! Every formatted event is mirrored into an in-memory ring buffer. Fatal
//! exit paths flush the buffer to `logs/error_<timestamp>.log` so the tail
//! of a crashed run survives even when stdout is gone.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

/// Most recent lines kept in memory.
const BUFFER_CAP: usize = 1000;

/// Shared handle to the buffered log lines.
#[derive(Clone, Default)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl LogBuffer {
    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() >= BUFFER_CAP {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn is_empty(&self) -> bool {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    /// Write the buffered lines to `logs/error_<timestamp>.log` and return
    /// the path. Returns `None` when nothing was buffered.
    pub fn flush_to(&self, logs_dir: &Path) -> std::io::Result<Option<PathBuf>> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.is_empty() {
            return Ok(None);
        }
        std::fs::create_dir_all(logs_dir)?;
        let path = logs_dir.join(format!("error_{}.log", Utc::now().format("%Y%m%d_%H%M%S")));
        let mut body: String = lines.iter().cloned().collect::<Vec<_>>().join("\n");
        body.push('\n');
        std::fs::write(&path, body)?;
        Ok(Some(path))
    }
}

/// Tracing layer that mirrors formatted events into a [`LogBuffer`].
pub struct BufferLayer {
    buffer: LogBuffer,
}

impl BufferLayer {
    pub fn new(buffer: LogBuffer) -> Self {
        Self { buffer }
    }
}

impl<S: Subscriber> Layer<S> for BufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let meta = event.metadata();
        let mut line = format!(
            "{} {:>5} {}: {}",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            meta.level(),
            meta.target(),
            visitor.message,
        );
        if !visitor.fields.is_empty() {
            line.push(' ');
            line.push_str(&visitor.fields.join(" "));
        }
        self.buffer.push(line);
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: Vec<String>,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

/// Initialize tracing with colored output for dev, JSON for production,
/// plus the error-log buffer. Returns the buffer handle for flushing.
pub fn init_tracing() -> LogBuffer {
    let buffer = LogBuffer::default();

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("sreel=info".parse().unwrap())
        .add_directive("aws_config=warn".parse().unwrap())
        .add_directive("hyper=warn".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(BufferLayer::new(buffer.clone()))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(BufferLayer::new(buffer.clone()))
            .with(env_filter)
            .init();
    }

    buffer
}
