//! Terminal-backed implementations of the VM's host interfaces.

use abasic::{InputSource, OutputSink, ScreenMode};
use log::debug;
use std::io::{self, Read, Write};
use std::sync::Mutex;

#[derive(Default)]
struct InputState {
    last_key: u8,
    last_entry: String,
}

/// Reads lines and keys from standard input. `read_char` consumes the next
/// non-newline byte, so a key press must be followed by return on a
/// line-buffered terminal.
#[derive(Default)]
pub struct StdinSource {
    state: Mutex<InputState>,
}

impl StdinSource {
    pub fn new() -> StdinSource {
        StdinSource::default()
    }
}

impl InputSource for StdinSource {
    fn read_line(&self) -> String {
        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_err() {
            line.clear();
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        let mut state = self.state.lock().unwrap();
        state.last_key = *line.as_bytes().last().unwrap_or(&b'\r');
        state.last_entry = line.clone();
        line
    }

    fn read_char(&self) -> u8 {
        let stdin = io::stdin();
        let mut handle = stdin.lock();
        let mut byte = [0u8; 1];
        loop {
            if handle.read_exact(&mut byte).is_err() {
                byte[0] = b'\r';
                break;
            }
            if byte[0] != b'\n' && byte[0] != b'\r' {
                break;
            }
        }
        self.state.lock().unwrap().last_key = byte[0];
        byte[0]
    }

    fn last_key(&self) -> u8 {
        self.state.lock().unwrap().last_key
    }

    fn last_entry(&self) -> String {
        self.state.lock().unwrap().last_entry.clone()
    }

    fn echo_input(&self) -> bool {
        // The terminal echoes typed input by itself.
        false
    }
}

/// Writes to standard output, using ANSI escapes for cursor motion and
/// inverse video. Tracks the cursor position for `PEEK(36)`/`PEEK(37)`.
#[derive(Default)]
pub struct ConsoleSink {
    cursor: Mutex<(i32, i32)>,
}

impl ConsoleSink {
    pub fn new() -> ConsoleSink {
        ConsoleSink::default()
    }
}

impl OutputSink for ConsoleSink {
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
        print!("{}", s);
    }

    fn goto_column(&self, column: i32) {
        let column = column.max(0);
        self.cursor.lock().unwrap().0 = column;
        print!("\x1b[{}G", column + 1);
    }

    fn goto_row(&self, row: i32) {
        let row = row.max(0);
        self.cursor.lock().unwrap().1 = row;
        print!("\x1b[{}d", row + 1);
    }

    fn home(&self) {
        *self.cursor.lock().unwrap() = (0, 0);
        print!("\x1b[2J\x1b[H");
    }

    fn inverse(&self) {
        print!("\x1b[7m");
    }

    fn normal(&self) {
        print!("\x1b[0m");
    }

    fn set_screen_mode(&self, mode: ScreenMode) {
        debug!("screen mode: {:?}", mode);
    }

    fn notify_hires_loaded(&self) {
        debug!("hires page loaded");
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
    }

    fn cursor_column(&self) -> i32 {
        self.cursor.lock().unwrap().0
    }

    fn cursor_row(&self) -> i32 {
        self.cursor.lock().unwrap().1
    }
}
