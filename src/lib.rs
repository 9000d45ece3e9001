#[macro_use]
mod output;
pub use output::Output;

// Assembling
mod error;
pub use error::{AsmErrorKind, Diagnostic, LiteralError, RuntimeError};
mod lexer;
mod literal;
mod operand;
mod parser;
pub use parser::assemble;
mod program;
pub use program::{Instruction, Program};
mod suggest;
mod symbol;
pub use symbol::{Opcode, Register, Symbol, SymbolKind, SymbolTable};

// Running
mod runtime;
pub use runtime::{Cpu, Flags, Memory, MEMORY_MAX};
mod syscall;
pub use syscall::{Console, StandardSyscalls, SyscallHandler};

// Debugging
pub mod debugger;
pub use debugger::{PauseReason, Session, SessionConfig, SessionState};
pub mod protocol;
pub mod worker;
pub use worker::{CancelToken, Engine};
mod repl;
pub use repl::{DebuggerOptions, Repl};

pub mod env;

/// Amount of lines to show as context, each side of focus line (line containing span).
pub const DIAGNOSTIC_CONTEXT_LINES: usize = 8;
