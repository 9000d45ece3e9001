use std::cell::Cell;
use std::io::{stdout, Write};

use colored::Colorize;

use crate::debugger::SessionState;

#[macro_export]
macro_rules! dprint {
    ( $cond:expr, $fmt:literal $($tt:tt)* ) => {{
        #[allow(unused_imports)]
        use crate::output::Condition::*;
        let s = format!(
            $fmt
            $($tt)*
        );
        crate::output::Output::Debugger($cond).print_str(&s);
    }};
    // Trigger type error if missing condition
    ( $fmt:literal $($tt:tt)* ) => {{
        crate::output::Output::Debugger($fmt);
    }};
}

#[macro_export]
macro_rules! dprintln {
    ( $cond:expr ) => {{
        #[allow(unused_imports)]
        use crate::output::Condition::*;
        crate::output::Output::Debugger($cond).print_str("\n");
    }};
    ( $cond:expr, $fmt:literal $($tt:tt)* ) => {{
        #[allow(unused_imports)]
        use crate::output::Condition::*;
        let s = format!(
            concat!($fmt, "\n")
            $($tt)*
        );
        crate::output::Output::Debugger($cond).print_str(&s);
    }};
    // Trigger type error if missing condition
    ( $fmt:literal $($tt:tt)* ) => {{
        crate::output::Output::Debugger($fmt);
    }};
}

/// Where text goes: program output to stdout, debugger chatter to stderr.
#[derive(Clone, Copy, Debug)]
pub enum Output {
    Normal,
    Debugger(Condition),
}

/// Whether a debugger line survives `--minimal`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    Always,
    Sometimes,
}

thread_local! {
    static AT_LINE_START: Cell<bool> = const { Cell::new(true) };
    static MINIMAL: Cell<bool> = const { Cell::new(false) };
}

impl Output {
    pub fn set_minimal(minimal: bool) {
        MINIMAL.with(|value| value.set(minimal));
    }

    pub fn is_minimal() -> bool {
        MINIMAL.with(Cell::get)
    }

    pub fn print_str(&self, text: &str) {
        match *self {
            Self::Normal => {
                print!("{}", text);
                let _ = stdout().flush();
            }
            Self::Debugger(condition) => {
                if !Self::is_minimal() {
                    eprint!("{}", text.blue());
                } else if condition == Condition::Always {
                    eprint!("{}", strip_escapes(text));
                } else {
                    return;
                }
            }
        }
        if let Some(last) = strip_escapes(text).chars().last() {
            AT_LINE_START.with(|value| value.set(last == '\n'));
        }
    }

    /// End a partial line left by program or debugger output.
    pub fn start_new_line(&self) {
        if !AT_LINE_START.with(Cell::get) {
            self.print_str("\n");
        }
    }

    /// Register box, or one `NAME value` line each when minimal.
    pub fn print_registers(&self, state: &SessionState) {
        let named = state
            .registers
            .iter()
            .enumerate()
            .map(|(i, value)| (format!("R{}", i), *value))
            .chain([("SP".to_string(), state.sp), ("BP".to_string(), state.bp)]);

        if Self::is_minimal() {
            for (name, value) in named {
                self.print_str(&format!("{} {}\n", name, value));
            }
            self.print_str(&format!("IP {}\n{}\n", state.ip, state.flags));
            return;
        }

        self.print_str(&format!("{DIM}┌{}┐{RESET}\n", "─".repeat(37)));
        self.print_str(&format!(
            "{DIM}│         \x1b[3mhex     int    uint    char{RESET}{DIM} │{RESET}\n"
        ));
        for (name, value) in named {
            self.print_str(&format!("{DIM}│{RESET} \x1b[1m{:<3}{RESET}  ", name));
            self.print_integer(value as u16);
            self.print_str(&format!(" {DIM}│{RESET}\n"));
        }
        self.print_str(&format!(
            "{DIM}│{RESET} \x1b[1mIP{RESET}   0x{:04x}  {:<23} {DIM}│{RESET}\n",
            state.ip,
            state.flags.to_string()
        ));
        self.print_str(&format!("{DIM}└{}┘{RESET}\n", "─".repeat(37)));
    }

    /// Hex, unsigned, signed and character views of a word. Signed decimal only when minimal.
    pub fn print_integer(&self, value: u16) {
        if Self::is_minimal() {
            self.print_str(&format!("{}", value as i16));
            return;
        }
        self.print_str(&format!(
            "0x{:04x}  {:-6}  {:-6}     {}",
            value,
            value,
            value as i16,
            char_cell(value)
        ));
    }
}

const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Three columns showing `value` as a character.
fn char_cell(value: u16) -> String {
    let name = match value {
        0x00 => "NUL",
        0x08 => "BS ",
        0x09 => "HT ",
        0x0a => "LF ",
        0x0b => "VT ",
        0x0c => "FF ",
        0x0d => "CR ",
        0x1b => "ESC",
        0x7f => "DEL",
        0x20 => "[_]",
        0x21..=0x7e => return format!("{:-6}", value as u8 as char),
        0x00..=0x7f => return format!("{DIM}───{RESET}"),
        0x0080.. => return format!("{DIM}┄┄┄{RESET}"),
    };
    name.to_string()
}

/// `text` without ANSI `ESC ... m` sequences.
fn strip_escapes(text: &str) -> String {
    let mut plain = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' {
            for skipped in chars.by_ref() {
                if skipped == 'm' {
                    break;
                }
            }
        } else {
            plain.push(ch);
        }
    }
    plain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_are_stripped() {
        assert_eq!(strip_escapes("R0 12"), "R0 12");
        assert_eq!(strip_escapes("R0\x1b[0;2m 12\x1b[0m"), "R0 12");
        assert_eq!(strip_escapes("R0\x1b[0xyz"), "R0");
    }

    #[test]
    fn char_cells() {
        assert_eq!(char_cell(0x0a), "LF ");
        assert_eq!(char_cell(0x20), "[_]");
        assert_eq!(char_cell(b'A' as u16), "A     ");
        assert_eq!(char_cell(0x01), "\x1b[2m───\x1b[0m");
        assert_eq!(char_cell(0x1234), "\x1b[2m┄┄┄\x1b[0m");
    }
}
