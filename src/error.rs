use std::error::Error;
use std::fmt;

use miette::{miette, LabeledSpan, Report, Severity};

/// Uniform error shape for both assembly-time and run-time failures.
///
/// Lines and columns count from 1. A line of 0 means the diagnostic is not tied to source
/// (eg. stepping before anything was assembled).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub column: usize,
    pub message: String,
    pub suggestion: Option<String>,
    /// Short machine-readable category, eg. `asm::undefined_symbol`.
    pub code: &'static str,
}

impl Diagnostic {
    pub fn new(line: usize, column: usize, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
            suggestion: None,
            code,
        }
    }

    /// Diagnostic without a source location.
    pub fn detached(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(0, 0, code, message)
    }

    pub fn with_suggestion(mut self, suggestion: Option<String>) -> Self {
        self.suggestion = suggestion;
        self
    }

    /// Build a labelled report pointing into `src`.
    pub fn report(&self, src: &str) -> Report {
        let help = match &self.suggestion {
            Some(suggestion) => format!("did you mean `{}`?", suggestion),
            None => help_for(self.code).to_string(),
        };
        let labels = match offset_of(src, self.line, self.column) {
            Some((offset, len)) => vec![LabeledSpan::at(offset..offset + len, "here")],
            None => Vec::new(),
        };
        miette!(
            severity = Severity::Error,
            code = self.code,
            help = help,
            labels = labels,
            "{}",
            self.message
        )
        .with_source_code(src.to_string())
    }
}

impl Error for Diagnostic {}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "line {}, column {}: ", self.line, self.column)?;
        }
        write!(f, "{}", self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (did you mean `{}`?)", suggestion)?;
        }
        Ok(())
    }
}

fn help_for(code: &str) -> &'static str {
    match code {
        "asm::literal" => "literals may be decimal, 0x/$ hex, 0b/% binary, or 'c' characters",
        "asm::duplicate_label" => "labels and constants may only be defined once per file",
        "asm::operand_count" | "asm::operand_kind" => "check the operands for this instruction",
        "asm::undefined_symbol" => "define the label with `name:` or the constant with `.EQU`",
        "asm::misplaced" => "byte directives belong in .DATA, instructions in .TEXT",
        "asm::data_overflow" => "the data section must fit inside 64KiB",
        "run::division_by_zero" => "check the divisor before dividing",
        "run::bounds" => "word accesses must leave room for 2 bytes below 0x10000",
        "run::stack" => "every POP or RET needs a matching PUSH or CALL",
        _ => "see the instruction set reference",
    }
}

/// Convert a 1-based line/column into a byte offset and the length of the token there.
fn offset_of(src: &str, line: usize, column: usize) -> Option<(usize, usize)> {
    if line == 0 {
        return None;
    }
    let mut offset = 0;
    for (i, text) in src.split_inclusive('\n').enumerate() {
        if i + 1 == line {
            let col = column.saturating_sub(1).min(text.trim_end().len());
            let rest = &text[col..];
            let len = rest
                .find(|c: char| c.is_whitespace() || c == ',')
                .unwrap_or(rest.trim_end().len())
                .max(1);
            return Some((offset + col, len.min(rest.len().max(1))));
        }
        offset += text.len();
    }
    None
}

/// Failure to read a literal token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LiteralError {
    MalformedHex,
    MalformedBinary,
    MalformedChar,
    MalformedDecimal,
    MalformedString,
    UnknownEscape(char),
    OutOfRange { min: i32, max: i32 },
}

impl Error for LiteralError {}

impl fmt::Display for LiteralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedHex => write!(f, "malformed hexadecimal literal"),
            Self::MalformedBinary => write!(f, "malformed binary literal"),
            Self::MalformedChar => write!(f, "malformed character literal"),
            Self::MalformedDecimal => write!(f, "malformed decimal literal"),
            Self::MalformedString => write!(f, "malformed string literal"),
            Self::UnknownEscape(ch) => write!(f, "unknown escape sequence `\\{}`", ch),
            Self::OutOfRange { min, max } => {
                write!(f, "literal out of range (allowed {} to {})", min, max)
            }
        }
    }
}

/// Assembly-time failure categories.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AsmErrorKind {
    BadLiteral {
        token: String,
        error: LiteralError,
    },
    BadOperand {
        token: String,
    },
    UnknownInstruction {
        name: String,
    },
    UnknownDirective {
        name: String,
    },
    DuplicateLabel {
        name: String,
        first_line: usize,
    },
    BadLabel {
        name: String,
    },
    OperandCount {
        opcode: &'static str,
        expected: usize,
        found: usize,
    },
    OperandKind {
        opcode: &'static str,
        position: usize,
        expected: String,
        found: &'static str,
    },
    DirectiveArguments {
        directive: &'static str,
        expected: &'static str,
    },
    UndefinedSymbol {
        name: String,
    },
    NotCodeLabel {
        name: String,
    },
    DataOutsideSection {
        directive: String,
    },
    InstructionOutsideText,
    LateTextOrigin,
    BackwardOrigin {
        cursor: u32,
        target: u32,
    },
    BadAlignment {
        value: i32,
    },
    DataOverflow,
    TextOverflow,
}

impl AsmErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadLiteral { .. } => "asm::literal",
            Self::BadOperand { .. } => "asm::operand",
            Self::UnknownInstruction { .. } => "asm::unknown_instruction",
            Self::UnknownDirective { .. } => "asm::unknown_directive",
            Self::DuplicateLabel { .. } => "asm::duplicate_label",
            Self::BadLabel { .. } => "asm::label",
            Self::OperandCount { .. } => "asm::operand_count",
            Self::OperandKind { .. } => "asm::operand_kind",
            Self::DirectiveArguments { .. } => "asm::directive",
            Self::UndefinedSymbol { .. } | Self::NotCodeLabel { .. } => "asm::undefined_symbol",
            Self::DataOutsideSection { .. }
            | Self::InstructionOutsideText
            | Self::LateTextOrigin
            | Self::BackwardOrigin { .. } => "asm::misplaced",
            Self::BadAlignment { .. } => "asm::directive",
            Self::DataOverflow | Self::TextOverflow => "asm::data_overflow",
        }
    }

    /// Attach a location, producing the uniform diagnostic.
    pub fn at(self, line: usize, column: usize) -> Diagnostic {
        Diagnostic::new(line, column, self.code(), self.to_string())
    }
}

impl fmt::Display for AsmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadLiteral { token, error } => write!(f, "invalid literal `{}`: {}", token, error),
            Self::BadOperand { token } => write!(f, "invalid operand `{}`", token),
            Self::UnknownInstruction { name } => write!(f, "unknown instruction `{}`", name),
            Self::UnknownDirective { name } => write!(f, "unknown directive `{}`", name),
            Self::DuplicateLabel { name, first_line } => write!(
                f,
                "duplicate label `{}` (first defined on line {})",
                name, first_line
            ),
            Self::BadLabel { name } => write!(f, "invalid label name `{}`", name),
            Self::OperandCount {
                opcode,
                expected,
                found,
            } => write!(
                f,
                "`{}` expects {} operand{}, found {}",
                opcode,
                expected,
                if *expected == 1 { "" } else { "s" },
                found
            ),
            Self::OperandKind {
                opcode,
                position,
                expected,
                found,
            } => write!(
                f,
                "operand {} of `{}` must be {}, found {}",
                position, opcode, expected, found
            ),
            Self::DirectiveArguments {
                directive,
                expected,
            } => write!(f, "`{}` expects {}", directive, expected),
            Self::UndefinedSymbol { name } => write!(f, "undefined label or constant `{}`", name),
            Self::NotCodeLabel { name } => {
                write!(f, "`{}` is not a label inside .TEXT and cannot be a jump target", name)
            }
            Self::DataOutsideSection { directive } => {
                write!(f, "`{}` is only allowed inside .DATA", directive)
            }
            Self::InstructionOutsideText => write!(f, "instructions are only allowed inside .TEXT"),
            Self::LateTextOrigin => {
                write!(f, "`.ORG` inside .TEXT must come before the first instruction")
            }
            Self::BackwardOrigin { cursor, target } => write!(
                f,
                "`.ORG 0x{:04x}` would move the data cursor backwards from 0x{:04x}",
                target, cursor
            ),
            Self::BadAlignment { value } => {
                write!(f, "`.ALIGN` requires a positive power of two, found {}", value)
            }
            Self::DataOverflow => write!(f, "data section overflows the 64KiB address space"),
            Self::TextOverflow => write!(f, "too many instructions for a 16-bit instruction index"),
        }
    }
}

/// Failure while executing a single instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuntimeError {
    DivisionByZero,
    AddressOutOfBounds { address: i32 },
    StackUnderflow,
    StackOverflow { stack_pointer: u16 },
    /// `RET` popped something that is not an instruction index.
    CorruptReturn { target: u16 },
    /// Operand shape the opcode cannot execute. Only reachable for hand-built programs.
    InvalidOperand { opcode: &'static str, position: usize },
    UndefinedSymbol { name: String },
    UnknownSyscall { number: i16 },
}

impl RuntimeError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DivisionByZero => "run::division_by_zero",
            Self::AddressOutOfBounds { .. } => "run::bounds",
            Self::StackUnderflow | Self::StackOverflow { .. } | Self::CorruptReturn { .. } => {
                "run::stack"
            }
            Self::InvalidOperand { .. } => "run::operand",
            Self::UndefinedSymbol { .. } => "run::undefined_symbol",
            Self::UnknownSyscall { .. } => "run::syscall",
        }
    }

    pub fn at(&self, line: usize, column: usize) -> Diagnostic {
        Diagnostic::new(line, column, self.code(), self.to_string())
    }
}

impl Error for RuntimeError {}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DivisionByZero => write!(f, "division by zero"),
            Self::AddressOutOfBounds { address } => {
                write!(f, "address {} is out of bounds for a word access", address)
            }
            Self::StackUnderflow => write!(f, "stack underflow: nothing left to pop"),
            Self::StackOverflow { stack_pointer } => write!(
                f,
                "stack overflow: stack pointer 0x{:04x} ran into the data section",
                stack_pointer
            ),
            Self::CorruptReturn { target } => write!(
                f,
                "corrupted stack: return address {} is not an instruction",
                target
            ),
            Self::InvalidOperand { opcode, position } => {
                write!(f, "operand {} of `{}` cannot be executed", position, opcode)
            }
            Self::UndefinedSymbol { name } => write!(f, "undefined label `{}`", name),
            Self::UnknownSyscall { number } => write!(f, "unknown syscall {}", number),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_point_at_token() {
        let src = "MOV R0, #1\n  ADD R0, R9\n";
        assert_eq!(offset_of(src, 1, 1), Some((0, 3)));
        assert_eq!(offset_of(src, 2, 3), Some((13, 3)));
        assert_eq!(offset_of(src, 2, 11), Some((21, 2)));
        assert_eq!(offset_of(src, 0, 0), None);
        assert_eq!(offset_of(src, 9, 1), None);
    }

    #[test]
    fn display_includes_location_and_suggestion() {
        let diag = AsmErrorKind::UnknownInstruction {
            name: "MOVV".to_string(),
        }
        .at(3, 5)
        .with_suggestion(Some("MOV".to_string()));
        assert_eq!(
            diag.to_string(),
            "line 3, column 5: unknown instruction `MOVV` (did you mean `MOV`?)"
        );
        assert_eq!(diag.code, "asm::unknown_instruction");
    }
}
