//! The structured logger.

use std::fmt::{self, Write as _};
use std::panic::Location;
use std::sync::{Arc, Mutex, PoisonError};

use opentelemetry::Context;
use tracing::Dispatch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;

use crate::config::LogConfig;
use crate::context;
use crate::log::buffer::with_buffer;
use crate::log::rotate::RotatingFile;
use crate::log::{short_caller, Field, LoggerKind};

/// What to do after a fatal line has been written.
#[derive(Clone)]
pub enum FatalPolicy {
    /// Flush the sink and exit the process with this code.
    Exit(i32),
    /// Panic with the logged message.
    Panic,
    /// Hand the message to a callback and keep running.
    Hook(Arc<dyn Fn(&str) + Send + Sync>),
}

impl Default for FatalPolicy {
    fn default() -> Self {
        Self::Exit(1)
    }
}

impl fmt::Debug for FatalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exit(code) => f.debug_tuple("Exit").field(code).finish(),
            Self::Panic => f.write_str("Panic"),
            Self::Hook(_) => f.write_str("Hook(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

macro_rules! event_at {
    ($severity:expr, $($rest:tt)+) => {
        match $severity {
            Severity::Debug => tracing::debug!($($rest)+),
            Severity::Info => tracing::info!($($rest)+),
            Severity::Warn => tracing::warn!($($rest)+),
            Severity::Error | Severity::Fatal => tracing::error!($($rest)+),
        }
    };
}

struct Sink {
    dispatch: Dispatch,
    guard: Mutex<Option<WorkerGuard>>,
}

impl Sink {
    /// Drains the non-blocking worker, if any.
    fn close(&self) {
        let guard = self
            .guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(guard);
    }
}

/// Leveled logger writing to a file or stdout.
///
/// Cloning is cheap and clones share the sink.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<Sink>,
    prefix: Arc<str>,
    fatal: FatalPolicy,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("prefix", &self.prefix)
            .field("fatal", &self.fatal)
            .finish_non_exhaustive()
    }
}

impl Logger {
    /// Build a logger for the given sink.
    ///
    /// The file sink uses `config` (or the defaults when `None`) with zero
    /// fields substituted; stdout always logs at DEBUG.
    pub fn new(config: Option<&LogConfig>, kind: LoggerKind) -> Self {
        match kind {
            LoggerKind::File => {
                let config = config.cloned().unwrap_or_default().with_defaults();
                let (writer, guard) = tracing_appender::non_blocking(RotatingFile::open(&config));
                Self::build(writer, config.debug, Some(guard))
            }
            LoggerKind::Stdout => Self::build(std::io::stdout, true, None),
        }
    }

    /// Build a logger over any writer, e.g. an in-memory buffer.
    pub fn from_writer<W>(writer: W, debug: bool) -> Self
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        Self::build(writer, debug, None)
    }

    fn build<W>(writer: W, debug: bool, guard: Option<WorkerGuard>) -> Self
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let level = if debug {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        let subscriber = tracing_subscriber::fmt()
            .with_writer(writer)
            .with_max_level(level)
            .with_ansi(false)
            .with_target(false)
            .finish();

        Self {
            sink: Arc::new(Sink {
                dispatch: Dispatch::new(subscriber),
                guard: Mutex::new(guard),
            }),
            prefix: Arc::from(""),
            fatal: FatalPolicy::default(),
        }
    }

    /// A copy of this logger whose plain calls start with `prefix`.
    pub fn with_prefix(&self, prefix: impl Into<String>) -> Self {
        Self {
            prefix: Arc::from(prefix.into()),
            ..self.clone()
        }
    }

    /// A copy of this logger with a different fatal policy.
    pub fn with_fatal_policy(&self, fatal: FatalPolicy) -> Self {
        Self {
            fatal,
            ..self.clone()
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[track_caller]
    pub fn debug(&self, msg: impl fmt::Display) {
        self.plain(Severity::Debug, Location::caller(), &msg);
    }

    #[track_caller]
    pub fn info(&self, msg: impl fmt::Display) {
        self.plain(Severity::Info, Location::caller(), &msg);
    }

    /// Like [`info`](Self::info), with the caller's `dir/file.rs:line` in front.
    #[track_caller]
    pub fn warn(&self, msg: impl fmt::Display) {
        self.plain(Severity::Warn, Location::caller(), &msg);
    }

    #[track_caller]
    pub fn error(&self, msg: impl fmt::Display) {
        self.plain(Severity::Error, Location::caller(), &msg);
    }

    /// Logs at ERROR, then applies the fatal policy.
    #[track_caller]
    pub fn fatal(&self, msg: impl fmt::Display) {
        self.plain(Severity::Fatal, Location::caller(), &msg);
    }

    #[track_caller]
    pub fn info_with_ctx(&self, cx: &Context, msg: &str, fields: impl IntoIterator<Item = Field>) {
        self.with_ctx(Severity::Info, Location::caller(), cx, msg, fields);
    }

    #[track_caller]
    pub fn warn_with_ctx(&self, cx: &Context, msg: &str, fields: impl IntoIterator<Item = Field>) {
        self.with_ctx(Severity::Warn, Location::caller(), cx, msg, fields);
    }

    #[track_caller]
    pub fn error_with_ctx(&self, cx: &Context, msg: &str, fields: impl IntoIterator<Item = Field>) {
        self.with_ctx(Severity::Error, Location::caller(), cx, msg, fields);
    }

    /// Logs at ERROR, then applies the fatal policy.
    #[track_caller]
    pub fn fatal_with_ctx(&self, cx: &Context, msg: &str, fields: impl IntoIterator<Item = Field>) {
        self.with_ctx(Severity::Fatal, Location::caller(), cx, msg, fields);
    }

    fn plain(&self, severity: Severity, location: &Location<'_>, msg: &dyn fmt::Display) {
        let caller = short_caller(location);
        with_buffer(|buf| {
            if severity == Severity::Warn {
                let _ = write!(buf, "{} ", caller);
            }
            if !self.prefix.is_empty() {
                let _ = write!(buf, "{} ", self.prefix);
            }
            let _ = write!(buf, "{}", msg);
            self.emit(severity, &caller, None, buf);
        });
    }

    fn with_ctx(
        &self,
        severity: Severity,
        location: &Location<'_>,
        cx: &Context,
        msg: &str,
        fields: impl IntoIterator<Item = Field>,
    ) {
        let mut line = String::from(msg);
        for field in fields {
            let _ = write!(line, " {}", field);
        }
        let trace_id = context::trace_id(cx);
        self.emit(severity, &short_caller(location), Some(&trace_id), &line);
    }

    fn emit(&self, severity: Severity, caller: &str, trace_id: Option<&str>, message: &str) {
        tracing::dispatcher::with_default(&self.sink.dispatch, || match trace_id {
            Some(trace_id) => {
                event_at!(severity, caller = %caller, trace_id = %trace_id, "{}", message)
            }
            None => event_at!(severity, caller = %caller, "{}", message),
        });

        if severity == Severity::Fatal {
            self.on_fatal(message);
        }
    }

    fn on_fatal(&self, message: &str) {
        match &self.fatal {
            FatalPolicy::Exit(code) => {
                self.sink.close();
                std::process::exit(*code);
            }
            FatalPolicy::Panic => panic!("{}", message),
            FatalPolicy::Hook(hook) => hook(message),
        }
    }
}
