//! Console log format for the mesh application.
//!
//! `[timestamp] [component] [level] message key=value...`

use std::fmt;
use std::io::IsTerminal;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const COLOR_RESET: &str = "\x1b[0m";
const COLOR_CYAN: &str = "\x1b[36m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_BRIGHT_YELLOW: &str = "\x1b[93m";
const COLOR_BRIGHT_RED: &str = "\x1b[91m";
const COLOR_BRIGHT_GRAY: &str = "\x1b[90m";

const COMPONENT_WIDTH: usize = 16;
const LOG_LEVEL_WIDTH: usize = 9;

/// Crates whose events are shown at the requested level
const CRATES: [&str; 4] = ["mesh_app", "mesh_session", "mesh_registry", "mesh_wire"];

/// Event formatter with a fixed-width component column
pub struct MeshAppLogFormatter {
    service_name: String,
    color_enabled: bool,
}

/// Log with a `component` field shown in the component column
#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

/// Warning with a `component` field
#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

/// Error with a `component` field
#[macro_export]
macro_rules! component_error {
    ($component:expr, $($arg:tt)*) => {
        tracing::error!(component = $component, $($arg)*)
    };
}

impl MeshAppLogFormatter {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            color_enabled: color_supported(),
        }
    }

    #[cfg(test)]
    fn without_color(mut self) -> Self {
        self.color_enabled = false;
        self
    }

    /// Component column: explicit component, else the emitting crate
    fn format_component(&self, component: Option<&str>, target: &str) -> String {
        let name = match component {
            Some(comp) => format!("{}-{}", self.service_name, comp),
            None => match target.split("::").next() {
                Some("mesh_session") => "session".to_string(),
                Some("mesh_registry") => "registry".to_string(),
                Some("mesh_wire") => "wire".to_string(),
                _ => self.service_name.clone(),
            },
        };

        if name.chars().count() > COMPONENT_WIDTH {
            let truncated: String = name.chars().take(COMPONENT_WIDTH - 1).collect();
            format!("{}…", truncated)
        } else {
            format!("{:<width$}", name, width = COMPONENT_WIDTH)
        }
    }

    fn format_log_level(level: &tracing::Level) -> String {
        let level_str = match *level {
            tracing::Level::ERROR => "✗ ERROR",
            tracing::Level::WARN => "⚠ WARN",
            tracing::Level::INFO => "ℹ INFO",
            tracing::Level::DEBUG => "◦ DEBUG",
            tracing::Level::TRACE => "◦ TRACE",
        };
        format!("{:<width$}", level_str, width = LOG_LEVEL_WIDTH)
    }

    fn color_for_level(&self, level: &tracing::Level) -> &'static str {
        if !self.color_enabled {
            return "";
        }
        match *level {
            tracing::Level::ERROR => COLOR_BRIGHT_RED,
            tracing::Level::WARN => COLOR_BRIGHT_YELLOW,
            tracing::Level::INFO => COLOR_GREEN,
            tracing::Level::DEBUG | tracing::Level::TRACE => COLOR_BRIGHT_GRAY,
        }
    }

    fn render(&self, level: &tracing::Level, target: &str, fields: &FieldVisitor) -> String {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let (cyan, color, reset) = if self.color_enabled {
            (COLOR_CYAN, self.color_for_level(level), COLOR_RESET)
        } else {
            ("", "", "")
        };

        let mut line = format!(
            "{}[{}] [{}] [{}{}{}] {}",
            cyan,
            timestamp,
            self.format_component(fields.component.as_deref(), target),
            color,
            Self::format_log_level(level),
            reset,
            fields.message
        );
        for (key, value) in &fields.extra {
            line.push_str(&format!(" {}={}", key, value));
        }
        line.push_str(reset);
        line
    }
}

impl<S, N> FormatEvent<S, N> for MeshAppLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        writeln!(
            writer,
            "{}",
            self.render(metadata.level(), metadata.target(), &visitor)
        )
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    component: Option<String>,
    extra: Vec<(&'static str, String)>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        let rendered = format!("{:?}", value);
        let unquoted = rendered
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .map(str::to_string)
            .unwrap_or(rendered);
        self.record_str(field, &unquoted);
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            name => self.extra.push((name, value.to_string())),
        }
    }
}

fn color_supported() -> bool {
    if std::env::var("TERM").map_or(false, |term| term == "dumb") {
        return false;
    }
    std::io::stderr().is_terminal()
}

/// Filter showing our crates at `level` and everything else at `warn`,
/// unless `RUST_LOG` is set
pub fn env_filter(level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    CRATES
        .iter()
        .fold(EnvFilter::new("warn"), |filter, krate| {
            match format!("{}={}", krate, level).parse() {
                Ok(directive) => filter.add_directive(directive),
                Err(_) => filter,
            }
        })
}

/// Install the global subscriber writing to stderr
pub fn init(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr)
        .event_format(MeshAppLogFormatter::new("mesh-app"))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> MeshAppLogFormatter {
        MeshAppLogFormatter::new("mesh-app").without_color()
    }

    #[test]
    fn test_component_column() {
        let formatter = plain();

        assert_eq!(
            formatter.format_component(None, "mesh_session::session"),
            format!("{:<16}", "session")
        );
        assert_eq!(
            formatter.format_component(Some("cli"), "mesh_app"),
            format!("{:<16}", "mesh-app-cli")
        );
        assert_eq!(
            formatter.format_component(Some("a-very-long-component"), "mesh_app"),
            "mesh-app-a-very…"
        );
    }

    #[test]
    fn test_render_without_color() {
        let fields = FieldVisitor {
            message: "Attach to meshnet as /example".to_string(),
            component: None,
            extra: vec![("attempt", "2".to_string())],
        };

        let line = plain().render(&tracing::Level::INFO, "mesh_session::session", &fields);

        assert!(!line.contains('\x1b'));
        assert!(line.contains("[session         ]"));
        assert!(line.contains("[ℹ INFO   ]"));
        assert!(line.ends_with("Attach to meshnet as /example attempt=2"));
    }
}
