use std::io::Write;

use nu_ansi_term::Color::{Blue, Cyan, DarkGray, Green, Magenta, Red, Yellow};
use tracing::{field::Field, Event, Level, Metadata, Subscriber};
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields, MakeWriter},
    registry::LookupSpan,
    EnvFilter,
};

use crate::{cli::Args, utils::Colored};

/// Environment variable that replaces the filter derived from `-v`/`-q`.
const LOG_ENV: &str = "ARMI_LOG";

/// The fields armi attaches to its events, split out of the rest.
///
/// The engine tags events with `repo` (an `arch/branch` pair) and `file`
/// (a package or index file name); those lead the line instead of trailing
/// it as `key=value` pairs.
#[derive(Default)]
struct EventFields {
    message: Option<String>,
    repo: Option<String>,
    file: Option<String>,
    extra: Vec<(&'static str, String)>,
}

impl EventFields {
    fn store(&mut self, name: &'static str, value: String) {
        match name {
            "message" => self.message = Some(value),
            "repo" => self.repo = Some(value),
            "file" => self.file = Some(value),
            _ => self.extra.push((name, value)),
        }
    }
}

impl tracing::field::Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.store(field.name(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.store(field.name(), format!("{value:?}"));
    }
}

/// Human-readable event format.
///
/// Info lines carry no level tag. The `repo` and `file` fields prefix the
/// message; any other fields are appended only when `show_fields` is set.
pub struct ArmiFormatter {
    show_fields: bool,
}

impl<S, N> FormatEvent<S, N> for ArmiFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let mut fields = EventFields::default();
        event.record(&mut fields);

        match *event.metadata().level() {
            Level::TRACE => write!(writer, "{} ", Colored(Magenta, "[TRACE]"))?,
            Level::DEBUG => write!(writer, "{} ", Colored(Blue, "[DEBUG]"))?,
            Level::INFO => {}
            Level::WARN => write!(writer, "{} ", Colored(Yellow, "[WARN]"))?,
            Level::ERROR => write!(writer, "{} ", Colored(Red, "[ERROR]"))?,
        }

        match (&fields.repo, &fields.file) {
            (Some(repo), Some(file)) => {
                write!(writer, "{} {}: ", Colored(Cyan, repo), Colored(Green, file))?
            }
            (Some(repo), None) => write!(writer, "{}: ", Colored(Cyan, repo))?,
            (None, Some(file)) => write!(writer, "{}: ", Colored(Green, file))?,
            (None, None) => {}
        }

        if let Some(message) = &fields.message {
            write!(writer, "{message}")?;
        }

        if self.show_fields && !fields.extra.is_empty() {
            let extra = fields
                .extra
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join(" ");
            write!(writer, " {}", Colored(DarkGray, extra))?;
        }

        writeln!(writer)
    }
}

/// Buffers one log line and prints it with the progress bars suspended.
struct SuspendingWriter {
    buffer: Vec<u8>,
    use_stderr: bool,
}

impl Write for SuspendingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for SuspendingWriter {
    fn drop(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let output = String::from_utf8_lossy(&self.buffer);
        let output = output.trim_end_matches('\n');
        let use_stderr = self.use_stderr;
        crate::progress::suspend(|| {
            if use_stderr {
                eprintln!("{output}");
            } else {
                println!("{output}");
            }
        });
    }
}

/// Picks the stream for each event.
///
/// Plain info lines go to stdout next to the sync summary and everything
/// else to stderr. JSON records all go to stdout so the stream stays
/// parseable as one document per line.
struct LogWriter {
    json: bool,
}

impl LogWriter {
    fn writer(&self, use_stderr: bool) -> SuspendingWriter {
        SuspendingWriter {
            buffer: Vec::new(),
            use_stderr: use_stderr && !self.json,
        }
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = SuspendingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.writer(false)
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        self.writer(meta.level() != &Level::INFO)
    }
}

/// Filter directive for the armi crates derived from `-q` and `-v`.
fn default_directive(quiet: bool, verbose: u8) -> String {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };
    format!("armi={level}")
}

fn build_filter(args: &Args) -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(directives) if !directives.trim().is_empty() => {
            match EnvFilter::try_new(&directives) {
                Ok(filter) => return filter,
                Err(err) => eprintln!("Ignoring invalid {LOG_ENV} '{directives}': {err}"),
            }
        }
        _ => {}
    }
    EnvFilter::new(default_directive(args.quiet, args.verbose))
}

pub fn setup_logging(args: &Args) {
    let writer = LogWriter {
        json: args.json,
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = if args.json {
        Box::new(
            fmt::Subscriber::builder()
                .with_env_filter(build_filter(args))
                .with_writer(writer)
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .with_span_list(false)
                .with_target(true)
                .finish(),
        )
    } else {
        Box::new(
            fmt::Subscriber::builder()
                .with_env_filter(build_filter(args))
                .with_writer(writer)
                .event_format(ArmiFormatter {
                    show_fields: args.verbose > 0,
                })
                .finish(),
        )
    };

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {err}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tracing::{info, warn};

    use super::*;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture<F: FnOnce()>(show_fields: bool, f: F) -> String {
        let capture = Capture::default();
        let sink = capture.clone();
        let subscriber = fmt::Subscriber::builder()
            .with_max_level(Level::TRACE)
            .with_writer(move || sink.clone())
            .event_format(ArmiFormatter { show_fields })
            .finish();
        tracing::subscriber::with_default(subscriber, f);

        let bytes = capture.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_repo_and_file_lead_the_line() {
        let output = capture(false, || {
            warn!(
                repo = "x86_64/core",
                file = "foo-1.0-1-x86_64.pkg.tar.zst",
                attempt = 3,
                "giving up on package"
            );
        });

        assert!(output.contains("[WARN]"));
        assert!(output.contains("x86_64/core"));
        assert!(output.contains("foo-1.0-1-x86_64.pkg.tar.zst"));
        assert!(output.contains("giving up on package"));
        assert!(!output.contains("attempt=3"));
        assert!(output.find("x86_64/core") < output.find("giving up"));
    }

    #[test]
    fn test_info_has_no_tag_and_extra_fields_when_verbose() {
        let output = capture(true, || {
            info!(repo = "x86_64/extra", packages = 12, "index loaded");
        });

        assert!(!output.contains("[INFO]"));
        assert!(!output.contains("[WARN]"));
        assert!(output.contains("index loaded"));
        assert!(output.contains("packages=12"));
        assert!(output.ends_with('\n'));
    }

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false, 0), "armi=INFO");
        assert_eq!(default_directive(false, 1), "armi=DEBUG");
        assert_eq!(default_directive(false, 5), "armi=TRACE");
        assert_eq!(default_directive(true, 2), "armi=ERROR");
    }
}
