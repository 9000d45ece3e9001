mod command;
pub mod error;
mod source;

use std::sync::Arc;

use self::command::{Command, Location, MemoryLocation};
use self::source::{SourceMode, SourceReader as _};
use crate::debugger::{line_context, Breakpoint, Session, Watchpoint};
use crate::output::{Condition, Output};
use crate::program::Program;
use crate::protocol::{self, Response};
use crate::suggest::suggest;
use crate::worker::CancelToken;
use crate::{dprint, dprintln};

const HELP: &str = include_str!("help.txt");

/// ANSI colour of the interactive prompt.
const PROMPT_COLOR: u8 = 34;

pub struct DebuggerOptions {
    /// Commands to run instead of reading from stdin.
    pub command: Option<String>,
}

/// Interactive front-end over a [`Session`].
pub struct Repl {
    session: Session,
    src: String,
    source: SourceMode,
}

enum Flow {
    Continue,
    Quit,
}

impl Repl {
    /// `session` must already have `src` assembled.
    pub fn new(session: Session, src: String, opts: DebuggerOptions) -> Self {
        Self {
            session,
            src,
            source: SourceMode::from(opts.command),
        }
    }

    pub fn run(&mut self) {
        dprintln!(Sometimes, "Debugger started. Type `help` for a list of commands.");
        self.show_location();
        loop {
            let Some(line) = self.source.read() else {
                break;
            };
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            let command = match Command::try_from(line.as_str()) {
                Ok(command) => command,
                Err(error) => {
                    dprintln!(Always, "{}", error);
                    continue;
                }
            };
            if let Flow::Quit = self.execute(command) {
                break;
            }
        }
        Output::Normal.start_new_line();
        dprintln!(Sometimes, "Stopping debugger.");
    }

    fn execute(&mut self, command: Command) -> Flow {
        match command {
            Command::Help => dprintln!(Always, "{}", HELP),
            Command::Quit => return Flow::Quit,

            Command::Step { count } => {
                for _ in 0..count {
                    let response = self.exchange(protocol::Command::Step);
                    let stop = match &response {
                        Response::StepComplete { state, watchpoints } => {
                            for hit in watchpoints {
                                dprintln!(Always, "Watchpoint: {}", hit);
                            }
                            !watchpoints.is_empty() || state.halted
                        }
                        _ => true,
                    };
                    if stop {
                        self.report(&response);
                        break;
                    }
                }
                self.show_location();
            }
            Command::Back { count } => {
                for _ in 0..count {
                    let response = self.exchange(protocol::Command::StepBack);
                    if matches!(response, Response::Error { .. }) {
                        self.report(&response);
                        break;
                    }
                }
                self.show_location();
            }
            Command::Continue => {
                let response = self.exchange(protocol::Command::Continue { step_limit: None });
                self.report(&response);
            }
            Command::Until { location } => {
                let Some(address) = self.resolve(&location) else {
                    return Flow::Continue;
                };
                let response = self.exchange(protocol::Command::ContinueToCursor {
                    address,
                    step_limit: None,
                });
                self.report(&response);
            }
            Command::Reset => {
                let response = self.exchange(protocol::Command::Reset);
                self.report(&response);
                dprintln!(Always, "Reset program.");
                self.show_location();
            }

            Command::Registers => {
                let state = self.session.state();
                Output::Debugger(Condition::Always).print_registers(&state);
            }
            Command::Get { location } => match location {
                Location::Register(register) => {
                    let value = self.session.cpu().reg(register);
                    dprint!(Always, "{}: ", register);
                    Output::Debugger(Condition::Always).print_integer(value as u16);
                    dprintln!(Always);
                }
                Location::Memory(location) => {
                    let Some(address) = self.resolve(&location) else {
                        return Flow::Continue;
                    };
                    match self.session.memory().read_word(address as i32) {
                        Ok(value) => {
                            dprint!(Always, "[0x{:04x}]: ", address);
                            Output::Debugger(Condition::Always).print_integer(value as u16);
                            dprintln!(Always);
                        }
                        Err(error) => dprintln!(Always, "{}", error),
                    }
                }
            },
            Command::Disasm => self.print_disassembly(),
            Command::Source { location } => {
                if let Some(address) = self.resolve(&location) {
                    self.print_source(address);
                }
            }
            Command::Trace { count } => self.print_trace(count as usize),
            Command::Output => {
                let lines = self.session.console().lines();
                if lines.is_empty() {
                    dprintln!(Always, "No output.");
                }
                for line in lines {
                    println!("{}", line);
                }
            }

            Command::BreakList => {
                if self.session.breakpoints().is_empty() {
                    dprintln!(Always, "No breakpoints exist.");
                } else {
                    dprintln!(Always, "Breakpoints:");
                }
                for breakpoint in self.session.breakpoints() {
                    let label = self.label_at(breakpoint.address);
                    dprintln!(Always, "    0x{:04x}{}", breakpoint.address, label);
                }
            }
            Command::BreakAdd { location } => {
                let Some(address) = self.resolve(&location) else {
                    return Flow::Continue;
                };
                if self.session.breakpoints().get(address).is_some() {
                    dprintln!(Always, "Breakpoint already exists at 0x{:04x}.", address);
                } else {
                    self.session.breakpoints_mut().insert(Breakpoint::new(address));
                    dprintln!(Always, "Added breakpoint at 0x{:04x}.", address);
                }
            }
            Command::BreakRemove { location } => {
                let Some(address) = self.resolve(&location) else {
                    return Flow::Continue;
                };
                if self.session.breakpoints_mut().remove(address) {
                    dprintln!(Always, "Removed breakpoint at 0x{:04x}.", address);
                } else {
                    dprintln!(Always, "No breakpoint exists at 0x{:04x}.", address);
                }
            }

            Command::WatchList => {
                if self.session.watchpoints().is_empty() {
                    dprintln!(Always, "No watchpoints exist.");
                } else {
                    dprintln!(Always, "Watchpoints:");
                }
                for watchpoint in self.session.watchpoints().iter() {
                    dprintln!(Always, "    {}", watchpoint);
                }
            }
            Command::WatchAdd {
                location,
                width,
                condition,
            } => {
                let Some(address) = self.resolve(&location) else {
                    return Flow::Continue;
                };
                let watchpoint = match Watchpoint::new(address, width) {
                    Ok(watchpoint) => watchpoint.with_condition(condition),
                    Err(error) => {
                        dprintln!(Always, "{}", error);
                        return Flow::Continue;
                    }
                };
                dprintln!(Always, "Added watchpoint at {}.", watchpoint);
                let mut watchpoints: Vec<_> = self.session.watchpoints().iter().cloned().collect();
                watchpoints.retain(|existing| existing.address != address);
                watchpoints.push(watchpoint);
                self.exchange(protocol::Command::SetWatchpoints(watchpoints));
            }
            Command::WatchRemove { location } => {
                let Some(address) = self.resolve(&location) else {
                    return Flow::Continue;
                };
                let mut watchpoints: Vec<_> = self.session.watchpoints().iter().cloned().collect();
                let before = watchpoints.len();
                watchpoints.retain(|existing| existing.address != address);
                if watchpoints.len() == before {
                    dprintln!(Always, "No watchpoint exists at 0x{:04x}.", address);
                } else {
                    dprintln!(Always, "Removed watchpoint at 0x{:04x}.", address);
                    self.exchange(protocol::Command::SetWatchpoints(watchpoints));
                }
            }
        }
        Flow::Continue
    }

    /// Run one protocol command to completion, returning its terminal response.
    fn exchange(&mut self, command: protocol::Command) -> Response {
        let mut terminal = None;
        protocol::dispatch(&mut self.session, command, &CancelToken::new(), &mut |response| {
            if response.is_terminal() {
                terminal = Some(response);
            }
        });
        // `dispatch` always emits exactly one terminal response
        terminal.unwrap_or_else(|| Response::Error {
            diagnostic: crate::error::Diagnostic::detached(
                "session::panic",
                "Command produced no response",
            ),
            state: None,
        })
    }

    fn report(&self, response: &Response) {
        match response {
            Response::Paused { reason, .. } => {
                Output::Normal.start_new_line();
                dprintln!(Always, "{}", reason);
                self.show_location();
            }
            Response::Error { diagnostic, .. } => {
                Output::Normal.start_new_line();
                if diagnostic.line > 0 {
                    eprintln!("{:?}", diagnostic.report(&self.src));
                } else {
                    dprintln!(Always, "{}", diagnostic);
                }
            }
            Response::StepComplete { state, .. } if state.halted => {
                Output::Normal.start_new_line();
                dprintln!(Always, "Program halted");
            }
            _ => (),
        }
    }

    fn program(&self) -> Option<&Arc<Program>> {
        self.session.program()
    }

    /// Show the source around the next instruction.
    fn show_location(&self) {
        if Output::is_minimal() || self.session.cpu().halted {
            return;
        }
        self.print_source(self.session.cpu().ip);
    }

    fn print_source(&self, address: u16) {
        let Some(program) = self.program() else {
            return;
        };
        match line_context(&self.src, program, address) {
            Some(report) => eprintln!("{:?}", report),
            None => dprintln!(Always, "No instruction at 0x{:04x}.", address),
        }
    }

    fn print_disassembly(&mut self) {
        let lines = match self.session.disassemble() {
            Ok(lines) => lines,
            Err(error) => {
                dprintln!(Always, "{}", error);
                return;
            }
        };
        let ip = self.session.cpu().ip;
        for line in lines {
            let marker = match (line.address == ip, self.session.breakpoints().is_active(line.address)) {
                (true, _) => ">",
                (false, true) => "*",
                (false, false) => " ",
            };
            dprintln!(Always, "{} {}", marker, line);
        }
    }

    fn print_trace(&self, count: usize) {
        let Some(trace) = self.session.trace() else {
            dprintln!(Always, "Trace recording is disabled.");
            return;
        };
        let end = trace.cursor() + 1;
        let start = end.saturating_sub(count);
        for (index, snapshot) in trace.iter().enumerate().take(end).skip(start) {
            let instruction = match snapshot.opcode {
                Some(opcode) => format!("{} {}", opcode, snapshot.operands),
                None => "(end of program)".to_string(),
            };
            let line = snapshot
                .line
                .map(|line| format!("line {}", line))
                .unwrap_or_default();
            dprintln!(
                Always,
                "{} #{:<4} 0x{:04x}  {:<24} {}",
                if index + 1 == end { ">" } else { " " },
                index,
                snapshot.ip,
                instruction.trim_end(),
                line
            );
        }
    }

    fn label_at(&self, address: u16) -> String {
        self.program()
            .and_then(|program| program.symbols().code_label_at(address))
            .map(|symbol| format!(" ({})", symbol.name))
            .unwrap_or_default()
    }

    /// Resolve a location to an address, printing why not if it fails.
    fn resolve(&self, location: &MemoryLocation) -> Option<u16> {
        let value = match location {
            MemoryLocation::IpOffset(offset) => self.session.cpu().ip as i32 + *offset as i32,
            MemoryLocation::Address(address) => *address as i32,
            MemoryLocation::Label(label) => {
                let program = self.program()?;
                let Some(value) = program.resolve(label.name) else {
                    dprint!(Always, "Label not found named `{}`.", label.name);
                    let names = program.symbols().iter().map(|symbol| symbol.name.as_str());
                    if let Some(suggested) = suggest(label.name, names) {
                        dprint!(Always, " Did you mean `{}`?", suggested);
                    }
                    dprintln!(Always);
                    return None;
                };
                value + label.offset as i32
            }
        };
        match u16::try_from(value) {
            Ok(address) => Some(address),
            Err(_) => {
                dprintln!(Always, "Address out of range: {}.", value);
                None
            }
        }
    }
}
