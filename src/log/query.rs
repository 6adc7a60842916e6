//! Database query logging.
//!
//! A database client calls [`QueryLogger::trace`] once per finished query;
//! the other calls are free-form messages from the client itself. Every line
//! starts with the caller as `parent/file.rs:line`.

use std::error::Error;
use std::fmt;
use std::panic::Location;
use std::time::Instant;

use opentelemetry::Context;

use crate::log::{any, short_caller, Logger};

/// How much the query logger emits. Each level includes the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryLogLevel {
    Silent = 1,
    Error,
    Warn,
    Info,
}

#[derive(Debug, Clone)]
pub struct QueryLogger {
    logger: Logger,
    level: QueryLogLevel,
}

impl QueryLogger {
    pub fn new(logger: Logger, level: QueryLogLevel) -> Self {
        Self { logger, level }
    }

    /// A copy of this adapter at another level.
    pub fn log_mode(&self, level: QueryLogLevel) -> Self {
        Self {
            level,
            ..self.clone()
        }
    }

    pub fn level(&self) -> QueryLogLevel {
        self.level
    }

    #[track_caller]
    pub fn info(&self, cx: &Context, msg: &str, data: &[&dyn fmt::Display]) {
        if self.level >= QueryLogLevel::Info {
            let line = message_line(Location::caller(), msg, data);
            self.logger.info_with_ctx(cx, &line, []);
        }
    }

    #[track_caller]
    pub fn warn(&self, cx: &Context, msg: &str, data: &[&dyn fmt::Display]) {
        if self.level >= QueryLogLevel::Warn {
            let line = message_line(Location::caller(), msg, data);
            self.logger.warn_with_ctx(cx, &line, []);
        }
    }

    #[track_caller]
    pub fn error(&self, cx: &Context, msg: &str, data: &[&dyn fmt::Display]) {
        if self.level >= QueryLogLevel::Error {
            let line = message_line(Location::caller(), msg, data);
            self.logger.error_with_ctx(cx, &line, []);
        }
    }

    /// Log a finished query started at `begin`, whatever the adapter level.
    ///
    /// `fc` yields the SQL text and affected row count.
    #[track_caller]
    pub fn trace<F>(&self, cx: &Context, begin: Instant, fc: F, err: Option<&dyn Error>)
    where
        F: FnOnce() -> (String, i64),
    {
        let caller = short_caller(Location::caller());
        let elapsed = format!("{}ms", begin.elapsed().as_secs_f64() * 1e3);
        let (sql, rows) = fc();

        match err {
            Some(err) => {
                self.logger.error_with_ctx(
                    cx,
                    &caller,
                    [
                        any("err", err.to_string()),
                        any("elapsed", elapsed),
                        any("rows", rows),
                        any("sql", sql),
                    ],
                );
            }
            None => {
                self.logger.info_with_ctx(
                    cx,
                    &caller,
                    [any("elapsed", elapsed), any("rows", rows), any("sql", sql)],
                );
            }
        }
    }
}

fn message_line(location: &Location<'_>, msg: &str, data: &[&dyn fmt::Display]) -> String {
    let mut line = short_caller(location);
    if !msg.is_empty() {
        line.push(' ');
        line.push_str(msg);
    }
    for item in data {
        line.push(' ');
        line.push_str(&item.to_string());
    }
    line
}
