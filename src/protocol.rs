use crate::debugger::{
    Breakpoint, DisassemblyLine, PauseReason, Session, SessionState, WatchHit, Watchpoint,
};
use crate::error::Diagnostic;
use crate::worker::CancelToken;

/// Request from the host. Exactly one terminal [`Response`] is produced for each.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Assemble, reset, and run until a pause.
    AssembleRun { source: String },
    /// Assemble and reset, ready for stepping.
    AssembleStep { source: String },
    Step,
    Reset,
    Continue { step_limit: Option<u64> },
    ContinueToCursor { address: u16, step_limit: Option<u64> },
    SetBreakpoints(Vec<Breakpoint>),
    SetWatchpoints(Vec<Watchpoint>),
    StepBack,
    GetDisassembly,
}

impl Command {
    /// Whether this command makes any run still in flight pointless.
    pub fn supersedes(&self) -> bool {
        matches!(
            self,
            Self::AssembleRun { .. } | Self::AssembleStep { .. } | Self::Reset
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AssembleRun { .. } => "assemble_run",
            Self::AssembleStep { .. } => "assemble_step",
            Self::Step => "step",
            Self::Reset => "reset",
            Self::Continue { .. } => "continue",
            Self::ContinueToCursor { .. } => "continue_to_cursor",
            Self::SetBreakpoints(_) => "set_breakpoints",
            Self::SetWatchpoints(_) => "set_watchpoints",
            Self::StepBack => "step_back",
            Self::GetDisassembly => "get_disassembly",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Success {
        state: SessionState,
    },
    /// Runtime errors carry the state as of just before the failing instruction.
    Error {
        diagnostic: Diagnostic,
        state: Option<SessionState>,
    },
    StepComplete {
        state: SessionState,
        /// Watchpoints that fired on this step, possibly none.
        watchpoints: Vec<WatchHit>,
    },
    Paused {
        reason: PauseReason,
        state: SessionState,
    },
    Disassembly {
        lines: Vec<DisassemblyLine>,
    },
    /// Emitted at yield points during a run. Not terminal.
    Progress {
        state: SessionState,
    },
}

impl Response {
    /// Outcome tag.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Error { .. } => "error",
            Self::StepComplete { .. } => "step_complete",
            Self::Paused { reason, .. } => reason.outcome(),
            Self::Disassembly { .. } => "disassembly",
            Self::Progress { .. } => "progress",
        }
    }

    pub fn pause_reason(&self) -> Option<&'static str> {
        match self {
            Self::Paused { reason, .. } => Some(reason.name()),
            Self::StepComplete { watchpoints, .. } if !watchpoints.is_empty() => {
                Some("watchpoint")
            }
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }

    pub fn state(&self) -> Option<&SessionState> {
        match self {
            Self::Success { state }
            | Self::StepComplete { state, .. }
            | Self::Paused { state, .. }
            | Self::Progress { state } => Some(state),
            Self::Error { state, .. } => state.as_ref(),
            Self::Disassembly { .. } => None,
        }
    }
}

/// Execute one command against `session`, emitting progress and then exactly one
/// terminal response.
pub fn dispatch(
    session: &mut Session,
    command: Command,
    cancel: &CancelToken,
    emit: &mut dyn FnMut(Response),
) {
    let response = match command {
        Command::AssembleRun { source } => match session.assemble(&source) {
            Ok(()) => run(session, None, None, cancel, emit),
            Err(diagnostic) => Response::Error {
                diagnostic,
                state: None,
            },
        },
        Command::AssembleStep { source } => match session.assemble(&source) {
            Ok(()) => Response::Success {
                state: session.state(),
            },
            Err(diagnostic) => Response::Error {
                diagnostic,
                state: None,
            },
        },
        Command::Step => match session.step() {
            Ok(watchpoints) => Response::StepComplete {
                state: session.state(),
                watchpoints,
            },
            Err(diagnostic) => error_with_state(session, diagnostic),
        },
        Command::Reset => {
            session.reset();
            Response::Success {
                state: session.state(),
            }
        }
        Command::Continue { step_limit } => run(session, None, step_limit, cancel, emit),
        Command::ContinueToCursor {
            address,
            step_limit,
        } => run(session, Some(address), step_limit, cancel, emit),
        Command::SetBreakpoints(breakpoints) => {
            session.set_breakpoints(breakpoints);
            Response::Success {
                state: session.state(),
            }
        }
        Command::SetWatchpoints(watchpoints) => {
            session.set_watchpoints(watchpoints);
            Response::Success {
                state: session.state(),
            }
        }
        Command::StepBack => match session.step_back() {
            Ok(()) => Response::Success {
                state: session.state(),
            },
            Err(diagnostic) => error_with_state(session, diagnostic),
        },
        Command::GetDisassembly => match session.disassemble() {
            Ok(lines) => Response::Disassembly { lines },
            Err(diagnostic) => Response::Error {
                diagnostic,
                state: None,
            },
        },
    };
    emit(response);
}

fn run(
    session: &mut Session,
    cursor: Option<u16>,
    step_limit: Option<u64>,
    cancel: &CancelToken,
    emit: &mut dyn FnMut(Response),
) -> Response {
    let mut on_yield = |session: &mut Session| {
        emit(Response::Progress {
            state: session.state(),
        })
    };
    let result = match cursor {
        Some(address) => session.run_to_cursor(address, step_limit, cancel, &mut on_yield),
        None => session.run(step_limit, cancel, &mut on_yield),
    };
    match result {
        Ok(reason) => Response::Paused {
            reason,
            state: session.state(),
        },
        Err(diagnostic) => error_with_state(session, diagnostic),
    }
}

fn error_with_state(session: &mut Session, diagnostic: Diagnostic) -> Response {
    let state = session.program().is_some().then(|| session.state());
    Response::Error { diagnostic, state }
}
