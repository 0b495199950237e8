//! Injected host interfaces.
//!
//! The VM talks to the outside world through two trait objects supplied by
//! the embedding host: a blocking [`InputSource`](trait.InputSource.html)
//! and a fire-and-forget [`OutputSink`](trait.OutputSink.html). Both are
//! called from the VM thread only; implementations provide their own
//! synchronisation (typically a condition variable fed by a UI thread).

use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ScreenMode {
    Text,
    Graphics,
}

/// Keyboard input as seen by the VM. `read_line` and `read_char` are the
/// only blocking operations in the whole machine.
pub trait InputSource {
    fn read_line(&self) -> String;
    fn read_char(&self) -> u8;
    /// The most recent raw key, for `PEEK(-16384)`.
    fn last_key(&self) -> u8;
    /// The most recent completed line.
    fn last_entry(&self) -> String;
    fn echo_input(&self) -> bool {
        true
    }
}

/// Display output. All operations are fire-and-forget; the sink renders on
/// its own schedule.
pub trait OutputSink {
    fn write(&self, s: &str);
    fn goto_column(&self, column: i32);
    fn goto_row(&self, row: i32);
    fn home(&self);
    fn inverse(&self);
    fn normal(&self);
    fn set_screen_mode(&self, mode: ScreenMode);
    fn notify_hires_loaded(&self);
    fn flush(&self);
    /// Cursor position for `PEEK(36)`.
    fn cursor_column(&self) -> i32 {
        0
    }
    /// Cursor position for `PEEK(37)`.
    fn cursor_row(&self) -> i32 {
        0
    }
}

/// An input source fed from a fixed transcript. Intended for tests and
/// scripted runs; `read_line` on an exhausted transcript returns an empty
/// line instead of blocking.
pub struct ScriptedInput {
    lines: Mutex<VecDeque<String>>,
    last: Mutex<(u8, String)>,
}

impl ScriptedInput {
    pub fn new<S: Into<String>, I: IntoIterator<Item = S>>(lines: I) -> ScriptedInput {
        ScriptedInput {
            lines: Mutex::new(lines.into_iter().map(Into::into).collect()),
            last: Mutex::new((0, String::new())),
        }
    }
}

impl InputSource for ScriptedInput {
    fn read_line(&self) -> String {
        let line = self
            .lines
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        let mut last = self.last.lock().unwrap();
        last.0 = *line.as_bytes().last().unwrap_or(&b'\r');
        last.1 = line.clone();
        line
    }

    fn read_char(&self) -> u8 {
        let mut lines = self.lines.lock().unwrap();
        let ch = match lines.front_mut() {
            Some(line) if !line.is_empty() => line.remove(0) as u8,
            _ => {
                lines.pop_front();
                b'\r'
            }
        };
        self.last.lock().unwrap().0 = ch;
        ch
    }

    fn last_key(&self) -> u8 {
        self.last.lock().unwrap().0
    }

    fn last_entry(&self) -> String {
        self.last.lock().unwrap().1.clone()
    }

    fn echo_input(&self) -> bool {
        false
    }
}

/// Every call a sink can receive, in order. Drives the end-to-end tests and
/// doubles as a tracing sink for embeddings.
#[derive(Clone, Debug, PartialEq)]
pub enum SinkEvent {
    Write(String),
    GotoColumn(i32),
    GotoRow(i32),
    Home,
    Inverse,
    Normal,
    SetScreenMode(ScreenMode),
    HiresLoaded,
}

/// An output sink that records every call.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    cursor: Mutex<(i32, i32)>,
}

impl RecordingSink {
    pub fn new() -> RecordingSink {
        RecordingSink::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Only the `write` payloads, in order.
    pub fn writes(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Write(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    /// Everything written, concatenated.
    pub fn text(&self) -> String {
        self.writes().concat()
    }

    fn record(&self, event: SinkEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl OutputSink for RecordingSink {
    fn write(&self, s: &str) {
        let mut cursor = self.cursor.lock().unwrap();
        for b in s.bytes() {
            if b == b'\n' {
                cursor.0 = 0;
                cursor.1 += 1;
            } else {
                cursor.0 += 1;
            }
        }
        self.record(SinkEvent::Write(s.to_string()));
    }

    fn goto_column(&self, column: i32) {
        self.cursor.lock().unwrap().0 = column;
        self.record(SinkEvent::GotoColumn(column));
    }

    fn goto_row(&self, row: i32) {
        self.cursor.lock().unwrap().1 = row;
        self.record(SinkEvent::GotoRow(row));
    }

    fn home(&self) {
        *self.cursor.lock().unwrap() = (0, 0);
        self.record(SinkEvent::Home);
    }

    fn inverse(&self) {
        self.record(SinkEvent::Inverse);
    }

    fn normal(&self) {
        self.record(SinkEvent::Normal);
    }

    fn set_screen_mode(&self, mode: ScreenMode) {
        self.record(SinkEvent::SetScreenMode(mode));
    }

    fn notify_hires_loaded(&self) {
        self.record(SinkEvent::HiresLoaded);
    }

    fn flush(&self) {}

    fn cursor_column(&self) -> i32 {
        self.cursor.lock().unwrap().0
    }

    fn cursor_row(&self) -> i32 {
        self.cursor.lock().unwrap().1
    }
}
