use std::collections::VecDeque;
use std::io::{self, IsTerminal, Write};

use console::{Key, Term};

use super::PROMPT_COLOR;
use crate::dprintln;

/// Where debugger commands come from.
#[allow(private_interfaces)]
#[derive(Debug)]
pub enum SourceMode {
    Script(Script),
    Terminal(Terminal),
}

pub trait SourceReader {
    /// Next command, or `None` once the source is exhausted.
    /// The command MAY carry surrounding whitespace.
    fn read(&mut self) -> Option<&str>;
}

impl SourceMode {
    pub fn from(argument: Option<String>) -> Self {
        if let Some(argument) = argument {
            return SourceMode::Script(Script::from_argument(&argument));
        }
        if io::stdin().is_terminal() {
            return SourceMode::Terminal(Terminal::new());
        }
        SourceMode::Script(Script::from_stdin())
    }
}

impl SourceReader for SourceMode {
    fn read(&mut self) -> Option<&str> {
        match self {
            Self::Script(script) => script.read(),
            Self::Terminal(terminal) => terminal.read(),
        }
    }
}

/// Split a line into commands separated by `;` or newlines.
fn split_commands(line: &str) -> impl Iterator<Item = String> + '_ {
    line.split([';', '\n']).map(str::to_string)
}

/// Commands given up front or piped in, echoed as they run.
#[derive(Debug)]
struct Script {
    pending: VecDeque<String>,
    /// Read further lines from here once `pending` runs dry.
    stdin: Option<io::Stdin>,
    current: String,
}

impl Script {
    fn from_argument(argument: &str) -> Self {
        Self {
            pending: split_commands(argument).collect(),
            stdin: None,
            current: String::new(),
        }
    }

    fn from_stdin() -> Self {
        Self {
            pending: VecDeque::new(),
            stdin: Some(io::stdin()),
            current: String::new(),
        }
    }
}

impl SourceReader for Script {
    fn read(&mut self) -> Option<&str> {
        while self.pending.is_empty() {
            let stdin = self.stdin.as_ref()?;
            let mut line = String::new();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => return None,
                Ok(_) => {
                    let line = line.strip_suffix('\n').unwrap_or(&line);
                    self.pending.extend(split_commands(line));
                }
            }
        }
        self.current = self.pending.pop_front()?;
        let command = self.current.trim();
        if !command.is_empty() {
            dprintln!(Sometimes, "\x1b[1m> {}", command);
        }
        Some(self.current.as_str())
    }
}

/// Interactive terminal with line editing and history.
#[derive(Debug)]
struct Terminal {
    term: Term,
    pending: VecDeque<String>,
    history: Vec<String>,
    current: String,
}

impl Terminal {
    fn new() -> Self {
        Self {
            term: Term::stdout(),
            pending: VecDeque::new(),
            history: Vec::new(),
            current: String::new(),
        }
    }

    fn draw(&mut self, buffer: &str, cursor: usize) -> io::Result<()> {
        self.term.clear_line()?;
        write!(self.term, "\x1b[1;{}mtoyasm> \x1b[0m{}", PROMPT_COLOR, buffer)?;
        self.term.move_cursor_left(buffer.len() - cursor)?;
        self.term.flush()
    }

    /// Edit one non-blank line. The buffer holds ASCII only, so byte and column indexes agree.
    fn read_line(&mut self) -> io::Result<String> {
        let mut buffer = String::new();
        let mut cursor = 0;
        let mut recalled = self.history.len();
        loop {
            self.draw(&buffer, cursor)?;
            match self.term.read_key()? {
                Key::Enter | Key::Char('\n') => {
                    if !buffer.trim().is_empty() {
                        break;
                    }
                    buffer.clear();
                    cursor = 0;
                    self.term.write_line("")?;
                }
                Key::Char(ch) if ch.is_ascii() && !ch.is_ascii_control() => {
                    buffer.insert(cursor, ch);
                    cursor += 1;
                }
                Key::Backspace if cursor > 0 => {
                    cursor -= 1;
                    buffer.remove(cursor);
                }
                Key::Del if cursor < buffer.len() => {
                    buffer.remove(cursor);
                }
                Key::ArrowLeft => cursor = cursor.saturating_sub(1),
                Key::ArrowRight => cursor = (cursor + 1).min(buffer.len()),
                Key::ArrowUp => {
                    recalled = recalled.saturating_sub(1);
                    buffer = self.history.get(recalled).cloned().unwrap_or_default();
                    cursor = buffer.len();
                }
                Key::ArrowDown => {
                    recalled = (recalled + 1).min(self.history.len());
                    buffer = self.history.get(recalled).cloned().unwrap_or_default();
                    cursor = buffer.len();
                }
                _ => (),
            }
        }
        self.term.write_line("")?;
        if self.history.last() != Some(&buffer) {
            self.history.push(buffer.clone());
        }
        Ok(buffer)
    }
}

impl SourceReader for Terminal {
    fn read(&mut self) -> Option<&str> {
        if self.pending.is_empty() {
            // A terminal which can no longer be read from is as good as closed
            let line = self.read_line().ok()?;
            self.pending.extend(split_commands(&line));
        }
        self.current = self.pending.pop_front()?;
        Some(self.current.as_str())
    }
}
