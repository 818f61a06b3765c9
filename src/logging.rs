//! Logging utilities
//!
//! Messages of the bootloader client (`espflash`) are part of the status shown
//! to the user. While [capture_loader_output] runs, the client's records on
//! the calling thread are collected instead of being printed, and can then be
//! replayed into a [LogSink].

use std::{cell::RefCell, io::Write};

use env_logger::{Builder, Env, Logger};
use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::log_panel::LogSink;

/// Target of the records logged by the bootloader client
const LOADER_TARGET: &str = "espflash";

thread_local! {
    static LOADER_OUTPUT: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Initialize the logger with the given [LevelFilter]
///
/// The `RUST_LOG` environment variable takes precedence over `filter`.
pub fn initialize_logger(filter: LevelFilter) {
    let logger = Builder::from_env(Env::default().default_filter_or(filter.as_str()))
        .format(|buf, record| {
            let style = buf.default_level_style(record.level());
            writeln!(buf, "[{style}{}{style:#}] {}", record.level(), record.args())
        })
        .build();

    // Informational loader records are always needed for the log panel, even
    // when they are not printed.
    let max_level = logger.filter().max(LevelFilter::Info);
    if log::set_boxed_logger(Box::new(LoaderBridge::new(logger))).is_ok() {
        log::set_max_level(max_level);
    }
}

/// Logger printing through env_logger, except for bootloader client records
/// logged while they are being captured
pub struct LoaderBridge {
    inner: Logger,
}

impl LoaderBridge {
    pub fn new(inner: Logger) -> Self {
        Self { inner }
    }

    fn capture(record: &Record<'_>) -> bool {
        if record.level() > Level::Info || !is_loader_target(record.target()) {
            return false;
        }

        LOADER_OUTPUT.with(|output| match output.borrow_mut().as_mut() {
            Some(text) => {
                text.push_str(&record.args().to_string());
                text.push('\n');
                true
            }
            None => false,
        })
    }
}

impl Log for LoaderBridge {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.inner.enabled(metadata)
            || (metadata.level() <= Level::Info && is_loader_target(metadata.target()))
    }

    fn log(&self, record: &Record<'_>) {
        if !Self::capture(record) {
            self.inner.log(record);
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

fn is_loader_target(target: &str) -> bool {
    target
        .strip_prefix(LOADER_TARGET)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

/// Run `f`, collecting what the bootloader client logs meanwhile
pub fn capture_loader_output<T>(f: impl FnOnce() -> T) -> (T, LoaderOutput) {
    let previous = LOADER_OUTPUT.with(|output| output.replace(Some(String::new())));
    let value = f();
    let text = LOADER_OUTPUT
        .with(|output| output.replace(previous))
        .unwrap_or_default();

    (value, LoaderOutput(text))
}

/// Text written by the bootloader client
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoaderOutput(String);

impl LoaderOutput {
    pub fn text(&self) -> &str {
        &self.0
    }

    /// Write the output to `log`, one entry per line
    pub fn replay(&self, log: &mut dyn LogSink) {
        LoaderTerminal::new(log).write(&self.0);
    }
}

/// Shows terminal style output in a [LogSink]
///
/// Every line becomes an entry. Text written without a line break stays open
/// and is extended by the next write, so output trickling in one fragment at
/// a time forms a single growing entry.
pub struct LoaderTerminal<'a> {
    log: &'a mut dyn LogSink,
    line_open: bool,
}

impl<'a> LoaderTerminal<'a> {
    pub fn new(log: &'a mut dyn LogSink) -> Self {
        Self {
            log,
            line_open: false,
        }
    }

    pub fn write(&mut self, text: &str) {
        for piece in text.split_inclusive('\n') {
            let (content, line_end) = match piece.strip_suffix('\n') {
                Some(content) => (content.trim_end_matches('\r'), true),
                None => (piece, false),
            };

            if self.line_open {
                self.log.append_or_extend(content);
            } else {
                self.log.append_line(content.into());
            }
            self.line_open = !line_end;
        }
    }
}

/// Install the logger once for the unit tests relying on captured records
#[cfg(test)]
pub(crate) fn init_test_logger() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| initialize_logger(LevelFilter::Info));
}

#[cfg(test)]
mod tests {
    use log::{info, warn};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::log_panel::LogPanel;

    fn logged(panel: &LogPanel<Vec<u8>>) -> Vec<&str> {
        panel.entries().iter().map(|entry| entry.text()).collect()
    }

    fn bridge() -> LoaderBridge {
        LoaderBridge::new(Builder::new().filter_level(LevelFilter::Warn).build())
    }

    #[test]
    fn loader_targets() {
        assert!(is_loader_target("espflash"));
        assert!(is_loader_target("espflash::flasher"));
        assert!(!is_loader_target("espflashy"));
        assert!(!is_loader_target("relflash::workflow"));
    }

    #[test]
    fn loader_records_are_captured() {
        let bridge = bridge();

        let (value, output) = capture_loader_output(|| {
            bridge.log(
                &Record::builder()
                    .args(format_args!("Using flash stub"))
                    .level(Level::Info)
                    .target("espflash::flasher")
                    .build(),
            );
            bridge.log(
                &Record::builder()
                    .args(format_args!("Erasing flash"))
                    .level(Level::Debug)
                    .target("espflash::flasher")
                    .build(),
            );
            bridge.log(
                &Record::builder()
                    .args(format_args!("Connected successfully"))
                    .level(Level::Info)
                    .target("relflash::workflow")
                    .build(),
            );
            42
        });

        assert_eq!(value, 42);
        assert_eq!(output.text(), "Using flash stub\n");
    }

    #[test]
    fn nothing_is_captured_outside_a_capture() {
        let bridge = bridge();
        bridge.log(
            &Record::builder()
                .args(format_args!("Using flash stub"))
                .level(Level::Info)
                .target("espflash")
                .build(),
        );

        let ((), output) = capture_loader_output(|| ());
        assert_eq!(output, LoaderOutput::default());
    }

    #[test]
    fn captured_records_reach_the_log_panel() {
        init_test_logger();

        let ((), output) = capture_loader_output(|| {
            info!(target: "espflash::flasher", "Using flash stub");
            warn!(target: "espflash::flasher", "Setting baud rate higher than 115,200 can cause issues");
        });

        let mut panel = LogPanel::with_writer(Vec::new(), false);
        panel.append_line("Connecting...".into());
        output.replay(&mut panel);

        assert_eq!(
            logged(&panel),
            [
                "Connecting...",
                "Using flash stub",
                "Setting baud rate higher than 115,200 can cause issues",
            ]
        );
    }

    #[test]
    fn terminal_fragments_grow_one_entry() {
        let mut panel = LogPanel::with_writer(Vec::new(), false);
        {
            let mut terminal = LoaderTerminal::new(&mut panel);
            terminal.write("Connecting");
            terminal.write(".");
            terminal.write(".\n");
            terminal.write("Chip is ESP32-C3\r\nUploading stub");
            terminal.write("... done\n");
        }

        assert_eq!(
            logged(&panel),
            ["Connecting..", "Chip is ESP32-C3", "Uploading stub... done"]
        );
    }
}
