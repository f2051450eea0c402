// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Subscriber setup for applications that do not install their own.

use std::io;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Target of every event this crate emits.
const CRATE_TARGET: &str = "weave";

/// Output layout of formatted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One line per event, span fields inline.
    Compact,
    /// Span context and fields on separate lines.
    Full,
}

/// How [`init_telemetry`] filters and formats logs.
///
/// The crate's own events (target `weave`) and everything else (HTTP client,
/// runtime, application code) get separate levels, so transport debugging
/// does not drown in connection-pool noise.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Level for the `weave` target.
    pub weave_level: Level,
    /// Level for all other targets.
    pub other_level: Level,
    /// Log `op` span open/close, which brackets each traced call.
    pub op_span_events: bool,
    pub include_file_line: bool,
    pub include_target: bool,
    pub ansi_colors: bool,
    pub format: LogFormat,
    /// Full directive; replaces the two levels when set.
    pub filter_directive: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            weave_level: Level::INFO,
            other_level: Level::WARN,
            op_span_events: false,
            include_file_line: false,
            include_target: true,
            ansi_colors: true,
            format: LogFormat::Compact,
            filter_directive: None,
        }
    }
}

impl TelemetryConfig {
    /// Debug-level crate logs with every traced call's span logged.
    pub fn development() -> Self {
        Self {
            weave_level: Level::DEBUG,
            other_level: Level::INFO,
            op_span_events: true,
            include_file_line: true,
            format: LogFormat::Full,
            ..Self::default()
        }
    }

    /// Only warnings and transport errors, uncolored for log collectors.
    pub fn production() -> Self {
        Self {
            weave_level: Level::WARN,
            other_level: Level::WARN,
            include_target: false,
            ansi_colors: false,
            ..Self::default()
        }
    }

    pub fn testing() -> Self {
        Self {
            weave_level: Level::TRACE,
            other_level: Level::WARN,
            op_span_events: true,
            include_file_line: true,
            include_target: true,
            ansi_colors: false,
            format: LogFormat::Full,
            filter_directive: None,
        }
    }

    pub fn with_weave_level(mut self, level: Level) -> Self {
        self.weave_level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter_directive = Some(filter.into());
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi_colors = ansi;
        self
    }

    /// The `EnvFilter` directive used when RUST_LOG is unset.
    pub fn directive(&self) -> String {
        match &self.filter_directive {
            Some(directive) => directive.clone(),
            None => format!(
                "{},{}={}",
                level_name(self.other_level),
                CRATE_TARGET,
                level_name(self.weave_level)
            ),
        }
    }
}

fn level_name(level: Level) -> String {
    level.as_str().to_ascii_lowercase()
}

/// Returned by [`init_telemetry`]; keep it alive for the life of the program.
#[must_use]
pub struct TelemetryGuard {
    _private: (),
}

/// RUST_LOG wins; an unparsable configured directive falls back to the levels.
fn build_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(config.directive()).unwrap_or_else(|_| {
            let levels = TelemetryConfig {
                filter_directive: None,
                ..config.clone()
            };
            EnvFilter::new(levels.directive())
        })
    })
}

/// Install a global `tracing` subscriber for weave's logs and op spans.
///
/// Fails if a global subscriber is already set.
///
/// # Example
///
/// ```rust,ignore
/// use weave::telemetry::{init_telemetry, TelemetryConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let _guard = init_telemetry(&TelemetryConfig::default())?;
///     let client = weave::init("acme/chat")?;
///     // traced application code
///     client.wait_for_batch_processing().await;
///     Ok(())
/// }
/// ```
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<TelemetryGuard> {
    let filter = build_filter(config);
    let span_events = if config.op_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let fmt_layer = fmt::layer()
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_file(config.include_file_line)
        .with_line_number(config.include_file_line)
        .with_span_events(span_events);

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Compact => registry.with(fmt_layer.compact()).try_init(),
        LogFormat::Full => registry.with(fmt_layer).try_init(),
    };
    installed.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    Ok(TelemetryGuard { _private: () })
}
