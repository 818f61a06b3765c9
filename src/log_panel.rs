//! User facing status panel
//!
//! The [LogPanel] is the single status-reporting surface of the application.
//! Each entry is one line of text; the most recent entry may be extended in
//! place, which gives terminal-style output from the loader the appearance of
//! a single growing status line.

use std::{
    fmt,
    io::{self, IsTerminal, Stdout, Write},
};

use crossterm::{
    cursor::MoveTo,
    queue,
    style::StyledContent,
    terminal::{Clear, ClearType},
};
use log::debug;

/// Content of a single panel entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogContent {
    /// Plain text
    Text(String),
    /// Text carrying a terminal style
    Rich(StyledContent<String>),
}

impl LogContent {
    /// The text of the entry without any styling
    pub fn text(&self) -> &str {
        match self {
            LogContent::Text(text) => text,
            LogContent::Rich(styled) => styled.content(),
        }
    }

    fn extend(&mut self, fragment: &str) {
        match self {
            LogContent::Text(text) => text.push_str(fragment),
            LogContent::Rich(styled) => {
                let content = format!("{}{}", styled.content(), fragment);
                *styled = StyledContent::new(*styled.style(), content);
            }
        }
    }
}

impl fmt::Display for LogContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogContent::Text(text) => f.write_str(text),
            LogContent::Rich(styled) => write!(f, "{styled}"),
        }
    }
}

impl From<String> for LogContent {
    fn from(text: String) -> Self {
        LogContent::Text(text)
    }
}

impl From<&str> for LogContent {
    fn from(text: &str) -> Self {
        LogContent::Text(text.to_owned())
    }
}

impl From<StyledContent<String>> for LogContent {
    fn from(styled: StyledContent<String>) -> Self {
        LogContent::Rich(styled)
    }
}

/// A sink for status messages
pub trait LogSink {
    /// Remove all entries
    fn clear(&mut self);
    /// Append a new entry and keep the view scrolled to it
    fn append_line(&mut self, content: LogContent);
    /// Extend the most recent entry, or start one if the panel is empty
    fn append_or_extend(&mut self, text: &str);
}

/// Log panel rendering its entries to a writer
pub struct LogPanel<W: Write> {
    entries: Vec<LogContent>,
    writer: W,
    styled: bool,
    /// The cursor is still on the line of the last entry
    line_open: bool,
}

impl LogPanel<Stdout> {
    /// A panel on standard output, styled when attached to a terminal
    pub fn stdout() -> Self {
        let stdout = io::stdout();
        let styled = stdout.is_terminal();

        Self::with_writer(stdout, styled)
    }
}

impl<W: Write> LogPanel<W> {
    /// A panel rendering to `writer`; `styled` enables ANSI sequences
    pub fn with_writer(writer: W, styled: bool) -> Self {
        Self {
            entries: Vec::new(),
            writer,
            styled,
            line_open: false,
        }
    }

    pub fn entries(&self) -> &[LogContent] {
        &self.entries
    }

    pub fn last(&self) -> Option<&LogContent> {
        self.entries.last()
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    fn render<F>(&mut self, f: F)
    where
        F: FnOnce(&mut W, bool) -> io::Result<()>,
    {
        let result = f(&mut self.writer, self.styled).and_then(|_| self.writer.flush());
        if let Err(err) = result {
            debug!("Failed to render log panel: {err}");
        }
    }

    fn render_new_entry(&mut self, content: &LogContent) {
        let line_open = self.line_open;
        self.render(|w, styled| {
            if line_open {
                writeln!(w)?;
            }
            if styled {
                write!(w, "{content}")
            } else {
                w.write_all(content.text().as_bytes())
            }
        });
        self.line_open = true;
    }
}

impl<W: Write> LogSink for LogPanel<W> {
    fn clear(&mut self) {
        self.entries.clear();
        let line_open = self.line_open;
        self.render(|w, styled| {
            if styled {
                queue!(w, Clear(ClearType::All), MoveTo(0, 0))
            } else if line_open {
                writeln!(w)
            } else {
                Ok(())
            }
        });
        self.line_open = false;
    }

    fn append_line(&mut self, content: LogContent) {
        self.render_new_entry(&content);
        self.entries.push(content);
    }

    fn append_or_extend(&mut self, text: &str) {
        let Some(last) = self.entries.last_mut() else {
            self.append_line(LogContent::from(text));
            return;
        };

        last.extend(text);
        self.render(|w, _| w.write_all(text.as_bytes()));
    }
}

impl<W: Write> Drop for LogPanel<W> {
    fn drop(&mut self) {
        if self.line_open {
            self.render(|w, _| writeln!(w));
        }
    }
}

#[cfg(test)]
mod tests {
    use crossterm::style::Stylize;
    use pretty_assertions::assert_eq;

    use super::*;

    fn panel() -> LogPanel<Vec<u8>> {
        LogPanel::with_writer(Vec::new(), false)
    }

    fn output(panel: &LogPanel<Vec<u8>>) -> String {
        String::from_utf8_lossy(panel.writer()).into_owned()
    }

    #[test]
    fn lines_are_rendered_in_order() {
        let mut panel = panel();
        panel.append_line("Connecting...".into());
        panel.append_line("Connected successfully".into());

        assert_eq!(panel.entries().len(), 2);
        assert_eq!(output(&panel), "Connecting...\nConnected successfully");
    }

    #[test]
    fn fragments_extend_a_single_entry() {
        let mut panel = panel();
        for fragment in ["Con", "necting", ".", ".", "."] {
            panel.append_or_extend(fragment);
        }

        assert_eq!(panel.entries().len(), 1);
        assert_eq!(panel.entries()[0].text(), "Connecting...");
        assert_eq!(output(&panel), "Connecting...");
    }

    #[test]
    fn fragments_extend_the_most_recent_entry() {
        let mut panel = panel();
        panel.append_line("Chip type: esp32c3".into());
        panel.append_line("Erasing".into());
        panel.append_or_extend("...");
        panel.append_or_extend(" done");

        assert_eq!(panel.entries().len(), 2);
        assert_eq!(panel.last().unwrap().text(), "Erasing... done");
        assert_eq!(output(&panel), "Chip type: esp32c3\nErasing... done");
    }

    #[test]
    fn rich_entries_keep_their_style_when_extended() {
        let mut panel = panel();
        panel.append_line("Flashing".to_string().green().into());
        panel.append_or_extend(" completed");

        let LogContent::Rich(styled) = panel.last().unwrap() else {
            panic!("expected rich content");
        };
        assert_eq!(styled.content(), "Flashing completed");
        assert_eq!(styled.style(), "x".green().style());
    }

    #[test]
    fn clear_removes_all_entries() {
        let mut panel = panel();
        panel.append_line("one".into());
        panel.append_line("two".into());
        panel.clear();

        assert!(panel.entries().is_empty());
        assert!(panel.last().is_none());

        panel.append_or_extend("three");
        assert_eq!(panel.entries().len(), 1);
        assert_eq!(output(&panel), "one\ntwo\nthree");
    }
}
