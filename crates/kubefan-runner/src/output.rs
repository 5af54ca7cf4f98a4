//! Serialized output from concurrent tasks.
//!
//! Each task hands over its whole captured output once it finishes. The
//! block is rendered without holding any lock and then written to the shared
//! sink under the lock in one piece, so blocks from different tasks never
//! interleave below block granularity and a slow command never holds up
//! anyone else's output.

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossterm::style::{Attribute, Color, ContentStyle, Stylize};

/// Width the target name is right-justified to in line prefixes.
pub const LABEL_WIDTH: usize = 10;

/// Colors handed out round-robin in [`OutputMode::Color`].
pub const PALETTE: [(Color, Option<Attribute>); 18] = [
    (Color::DarkRed, None),
    (Color::DarkGreen, None),
    (Color::DarkYellow, None),
    (Color::DarkBlue, None),
    (Color::DarkMagenta, None),
    (Color::DarkCyan, None),
    (Color::DarkRed, Some(Attribute::Bold)),
    (Color::DarkGreen, Some(Attribute::Bold)),
    (Color::DarkYellow, Some(Attribute::Bold)),
    (Color::DarkBlue, Some(Attribute::Bold)),
    (Color::DarkMagenta, Some(Attribute::Bold)),
    (Color::DarkCyan, Some(Attribute::Bold)),
    (Color::DarkRed, Some(Attribute::Dim)),
    (Color::DarkGreen, Some(Attribute::Dim)),
    (Color::DarkYellow, Some(Attribute::Dim)),
    (Color::DarkBlue, Some(Attribute::Dim)),
    (Color::DarkMagenta, Some(Attribute::Dim)),
    (Color::DarkCyan, Some(Attribute::Dim)),
];

/// How captured command output is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OutputMode {
    /// Discard output.
    None,
    /// Raw output, unchanged.
    Plain,
    /// Every line prefixed with the target name.
    Prefix,
    /// Like `Prefix`, with a per-emission color.
    #[default]
    Color,
}

impl OutputMode {
    pub const ALL: [OutputMode; 4] = [Self::Plain, Self::Color, Self::Prefix, Self::None];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Plain => "plain",
            Self::Prefix => "prefix",
            Self::Color => "color",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| {
                let options: Vec<&str> = Self::ALL.iter().map(OutputMode::as_str).collect();
                format!("unknown output mode {:?} (one of {})", s, options.join(","))
            })
    }
}

/// Writes task output blocks to one sink, one block at a time.
pub struct OutputMultiplexer {
    mode: OutputMode,
    sink: Mutex<Box<dyn Write + Send>>,
    next_color: AtomicUsize,
}

impl OutputMultiplexer {
    pub fn new(mode: OutputMode, sink: impl Write + Send + 'static) -> Self {
        Self {
            mode,
            sink: Mutex::new(Box::new(sink)),
            next_color: AtomicUsize::new(0),
        }
    }

    /// Multiplexer writing to the process's stdout.
    pub fn stdout(mode: OutputMode) -> Self {
        Self::new(mode, io::stdout())
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Emit one task's captured output as a single block.
    ///
    /// Empty output emits nothing and does not advance the color rotation.
    pub fn emit(&self, name: &str, output: &[u8]) -> io::Result<()> {
        if self.mode == OutputMode::None || output.is_empty() {
            return Ok(());
        }

        let block = self.render(name, output);
        self.write_block(&block)
    }

    /// Like [`emit`](Self::emit), for callers on the async runtime.
    ///
    /// The locked write runs on the blocking pool, so a stalled sink holds up
    /// other emissions but never a runtime thread.
    pub async fn emit_async(self: Arc<Self>, name: &str, output: &[u8]) -> io::Result<()> {
        if self.mode == OutputMode::None || output.is_empty() {
            return Ok(());
        }

        let block = self.render(name, output);
        tokio::task::spawn_blocking(move || self.write_block(&block))
            .await
            .map_err(io::Error::other)?
    }

    fn write_block(&self, block: &[u8]) -> io::Result<()> {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        sink.write_all(block)?;
        sink.flush()
    }

    fn render(&self, name: &str, output: &[u8]) -> Vec<u8> {
        if self.mode == OutputMode::Plain {
            let mut block = output.to_vec();
            if !block.ends_with(b"\n") {
                block.push(b'\n');
            }
            return block;
        }

        let label = format!("{:>width$}|", name, width = LABEL_WIDTH);
        let style = match self.mode {
            OutputMode::Color => Some(self.next_style()),
            _ => None,
        };

        let text = String::from_utf8_lossy(output);
        let mut block = String::with_capacity(text.len() + label.len() * 8);
        for line in text.lines() {
            match style {
                Some(style) => block.push_str(&style.apply(format!("{}{}", label, line)).to_string()),
                None => {
                    block.push_str(&label);
                    block.push_str(line);
                }
            }
            block.push('\n');
        }
        block.into_bytes()
    }

    fn next_style(&self) -> ContentStyle {
        let index = self.next_color.fetch_add(1, Ordering::Relaxed) % PALETTE.len();
        let (color, attribute) = PALETTE[index];
        let style = ContentStyle::new().with(color);
        match attribute {
            Some(attribute) => style.attribute(attribute),
            None => style,
        }
    }
}

impl fmt::Debug for OutputMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputMultiplexer")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
