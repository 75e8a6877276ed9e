//! Non-interleaved terminal output for concurrently running groups.
//!
//! Every write to the terminal goes through one [`OutputSerializer`], and
//! every write takes the same lock, so two groups finishing at the same
//! moment can never interleave their output mid-line.
//!
//! Three ways to write are offered, matching the executor's output modes:
//!
//! - [`print_line`](OutputSerializer::print_line): one complete line as it
//!   is produced (streaming).
//! - [`print_completed`](OutputSerializer::print_completed): a finished
//!   group's whole output at once, in completion order.
//! - [`rewrite`](OutputSerializer::rewrite): a live display with one slot
//!   per group, redrawn from the top on every update.

use std::io::Write;
use std::sync::Mutex;

/// Moves the cursor up one line.
pub const CURSOR_UP: &str = "\x1b[1A";

/// Clears the line under the cursor.
pub const CLEAR_LINE: &str = "\x1b[2K";

struct State {
    slots: Vec<String>,
    printed_lines: usize,
    writer: Box<dyn Write + Send>,
}

/// Serializes terminal writes from concurrently running groups.
pub struct OutputSerializer {
    state: Mutex<State>,
}

impl OutputSerializer {
    /// Creates a serializer writing to `writer`, with one live slot per group.
    pub fn new(num_groups: usize, writer: Box<dyn Write + Send>) -> Self {
        Self {
            state: Mutex::new(State {
                slots: vec![String::new(); num_groups],
                printed_lines: 0,
                writer,
            }),
        }
    }

    /// Creates a serializer writing to the process's stdout.
    pub fn stdout(num_groups: usize) -> Self {
        Self::new(num_groups, Box::new(std::io::stdout()))
    }

    /// Replaces slot `index` with `output` and redraws every slot.
    ///
    /// The previous drawing is erased first, one cursor-up per line it
    /// printed, so the display stays in group order regardless of which
    /// group updated.
    pub fn rewrite(&self, output: &str, index: usize) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };

        if state.slots.len() <= index {
            state.slots.resize(index + 1, String::new());
        }
        state.slots[index] = output.to_string();

        let mut frame = erase(state.printed_lines);
        let drawn = draw(&state.slots);
        frame.push_str(&drawn);

        state.printed_lines = drawn.matches('\n').count();
        let _ = state.writer.write_all(frame.as_bytes());
        let _ = state.writer.flush();
    }

    /// Writes a finished group's output in one piece.
    pub fn print_completed(&self, output: &str) {
        if output.is_empty() {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            let _ = state.writer.write_all(output.as_bytes());
            if !output.ends_with('\n') {
                let _ = state.writer.write_all(b"\n");
            }
            let _ = state.writer.flush();
        }
    }

    /// Writes a single line.
    ///
    /// While a live display is on screen the line goes above it and the
    /// display is redrawn underneath.
    pub fn print_line(&self, line: &str) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };

        let mut frame = erase(state.printed_lines);
        frame.push_str(line);
        frame.push('\n');
        if state.printed_lines > 0 {
            frame.push_str(&draw(&state.slots));
        }

        let _ = state.writer.write_all(frame.as_bytes());
        let _ = state.writer.flush();
    }
}

fn erase(lines: usize) -> String {
    format!("{}{}", CURSOR_UP, CLEAR_LINE).repeat(lines)
}

fn draw(slots: &[String]) -> String {
    let mut drawn = String::new();
    for slot in slots {
        drawn.push_str(slot);
        if !slot.is_empty() && !slot.ends_with('\n') {
            drawn.push('\n');
        }
    }
    drawn
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    /// A cloneable in-memory writer for asserting on terminal output.
    #[derive(Clone, Default)]
    pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
