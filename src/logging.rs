//! Structured logging to the browser console.
//!
//! Events go through a small `tracing_subscriber` layer that renders one line
//! per event and hands it to the matching `console.*` method.  Off the
//! browser the same line goes to stderr.

use std::fmt::{self, Write as _};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use crate::config::LogLevel;

/// Install the console subscriber.  Returns `false` when a global subscriber
/// was already set (e.g. a second app instance on the page).
pub fn init(level: &LogLevel) -> bool {
    let subscriber = tracing_subscriber::registry()
        .with(LevelFilter::from_level(level.to_level()))
        .with(ConsoleLayer);
    tracing::subscriber::set_global_default(subscriber).is_ok()
}

pub struct ConsoleLayer;

impl<S: Subscriber> Layer<S> for ConsoleLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let mut line = LineVisitor::default();
        event.record(&mut line);
        emit(*meta.level(), &format!("{:>5} {}: {}", meta.level(), meta.target(), line.finish()));
    }
}

/// Collects `message` plus `key=value` pairs in declaration order.
#[derive(Default)]
pub(crate) struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    pub(crate) fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

#[cfg(target_arch = "wasm32")]
fn emit(level: Level, line: &str) {
    let value = wasm_bindgen::JsValue::from_str(line);
    match level {
        Level::ERROR => web_sys::console::error_1(&value),
        Level::WARN => web_sys::console::warn_1(&value),
        Level::INFO => web_sys::console::info_1(&value),
        _ => web_sys::console::debug_1(&value),
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn emit(_level: Level, line: &str) {
    eprintln!("{}", line);
}
