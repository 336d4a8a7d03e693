//! Host error signal capture
//!
//! Errors can surface on any thread: panics, `tracing` events at ERROR
//! level, or signals the host forwards itself. [`SignalSink`] moves each one
//! onto the coordination thread through the dispatcher, where the manager
//! deduplicates it and records an `app_exception` event.
//!
//! Nothing here may panic or block: it runs inside panic hooks and
//! subscriber callbacks.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::dispatcher::Dispatcher;
use crate::manager::EventManager;
use crate::types::{LogLevel, LogSignal};

/// Cloneable, thread-safe entry point for log signals.
#[derive(Clone)]
pub struct SignalSink {
    dispatcher: Dispatcher<EventManager>,
}

impl SignalSink {
    pub(crate) fn new(dispatcher: Dispatcher<EventManager>) -> Self {
        Self { dispatcher }
    }

    /// Forward a signal. Levels that are not captured are ignored here so
    /// they never occupy the dispatcher.
    pub fn submit(&self, signal: LogSignal) {
        if !signal.level.is_captured() {
            return;
        }
        self.dispatcher
            .enqueue(move |manager: &mut EventManager| manager.capture_log(signal));
    }

    /// Report panics as `Exception` signals, then run the previous hook.
    pub fn install_panic_hook(&self) {
        let sink = self.clone();
        let previous = std::panic::take_hook();

        std::panic::set_hook(Box::new(move |info| {
            let payload = info.payload();
            let condition = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "Box<dyn Any>".to_string());

            let mut stack_trace = info
                .location()
                .map(|l| format!("at {}:{}:{}", l.file(), l.line(), l.column()))
                .unwrap_or_default();
            let backtrace = Backtrace::capture();
            if backtrace.status() == BacktraceStatus::Captured {
                stack_trace.push('\n');
                stack_trace.push_str(&backtrace.to_string());
            }

            sink.submit(LogSignal::new(condition, stack_trace, LogLevel::Exception));
            previous(info);
        }));
    }

    /// `tracing` layer forwarding ERROR events from the host's own code.
    pub fn layer(&self) -> ErrorCaptureLayer {
        ErrorCaptureLayer { sink: self.clone() }
    }
}

impl fmt::Debug for SignalSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalSink")
            .field("pending", &self.dispatcher.pending())
            .finish()
    }
}

/// Forwards ERROR-level `tracing` events as `Error` signals.
///
/// Events emitted by this crate are skipped so delivery errors cannot feed
/// back into new events.
pub struct ErrorCaptureLayer {
    sink: SignalSink,
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            value.clone_into(&mut self.message);
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

impl<S> Layer<S> for ErrorCaptureLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() != Level::ERROR
            || metadata.target().starts_with(env!("CARGO_CRATE_NAME"))
        {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let mut condition = visitor.message;
        if !visitor.fields.is_empty() {
            condition.push_str(" (");
            condition.push_str(&visitor.fields.join(", "));
            condition.push(')');
        }

        let stack_trace = match (metadata.file(), metadata.line()) {
            (Some(file), Some(line)) => format!("at {} ({}:{})", metadata.target(), file, line),
            _ => format!("at {}", metadata.target()),
        };

        self.sink
            .submit(LogSignal::new(condition, stack_trace, LogLevel::Error));
    }
}
