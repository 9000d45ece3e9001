mod asm;
mod breakpoint;
mod diff;
mod error;
mod trace;
mod watchpoint;

use std::fmt;
use std::sync::Arc;

pub use self::asm::{disassemble, line_context, DisassemblyLine};
pub use self::breakpoint::{Breakpoint, Breakpoints};
pub use self::diff::{diff, MemoryRegion};
pub use self::error::SessionError;
pub use self::trace::{Snapshot, Trace, DEFAULT_CAPACITY};
pub use self::watchpoint::{WatchCondition, WatchHit, Watchpoint, Watchpoints};
use crate::error::Diagnostic;
use crate::parser::assemble;
use crate::program::Program;
use crate::runtime::{self, Cpu, Flags, Memory};
use crate::symbol::GENERAL_REGISTERS;
use crate::syscall::{Console, StandardSyscalls, SyscallHandler};
use crate::worker::CancelToken;

pub const DEFAULT_STEP_LIMIT: u64 = 100_000;
pub const DEFAULT_YIELD_INTERVAL: u64 = 256;

/// Tunables for a [`Session`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Record a snapshot after every step, enabling `step_back`.
    pub trace: bool,
    pub trace_capacity: usize,
    /// Most steps a single run may take.
    pub step_limit: u64,
    /// Steps between yields to the host (and checks for cancellation).
    pub yield_interval: u64,
    /// Print program output to stdout as it is produced.
    pub echo: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            trace: true,
            trace_capacity: DEFAULT_CAPACITY,
            step_limit: DEFAULT_STEP_LIMIT,
            yield_interval: DEFAULT_YIELD_INTERVAL,
            echo: false,
        }
    }
}

/// Why a run stopped without error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PauseReason {
    Halted,
    /// Stopped before executing the instruction at `address`.
    Breakpoint { address: u16 },
    /// Every watchpoint whose value changed in the last step.
    Watchpoint(Vec<WatchHit>),
    Cursor { address: u16 },
    StepLimit { steps: u64 },
    Cancelled,
}

impl PauseReason {
    /// Protocol outcome tag.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Halted | Self::StepLimit { .. } | Self::Cancelled => "run_complete",
            Self::Breakpoint { .. } => "breakpoint_hit",
            Self::Watchpoint(_) => "watchpoint_hit",
            Self::Cursor { .. } => "cursor_reached",
        }
    }

    /// Protocol `pauseReason`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Halted => "halted",
            Self::Breakpoint { .. } => "breakpoint",
            Self::Watchpoint(_) => "watchpoint",
            Self::Cursor { .. } => "cursor",
            Self::StepLimit { .. } => "step_limit",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Halted => write!(f, "Program halted"),
            Self::Breakpoint { address } => write!(f, "Breakpoint at 0x{:04x}", address),
            Self::Watchpoint(hits) => {
                f.write_str("Watchpoint: ")?;
                for (i, hit) in hits.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{}", hit)?;
                }
                Ok(())
            }
            Self::Cursor { address } => write!(f, "Reached 0x{:04x}", address),
            Self::StepLimit { steps } => write!(f, "Stopped after {} steps", steps),
            Self::Cancelled => write!(f, "Run cancelled"),
        }
    }
}

/// Host-facing copy of the machine state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionState {
    pub registers: [i16; GENERAL_REGISTERS],
    pub sp: i16,
    pub bp: i16,
    pub ip: u16,
    pub flags: Flags,
    pub halted: bool,
    /// Source line of the next instruction.
    pub line: Option<usize>,
    pub console: Vec<String>,
    /// Memory regions changed since the previous state was taken.
    pub changed: Vec<MemoryRegion>,
    /// Instructions executed since the last reset.
    pub steps: u64,
}

/// One debugging session over one program.
pub struct Session {
    config: SessionConfig,
    program: Option<Arc<Program>>,
    cpu: Cpu,
    memory: Memory,
    /// Memory after the previous step.
    previous: Memory,
    /// Memory as of the previous [`Session::state`].
    reported: Memory,
    breakpoints: Breakpoints,
    watchpoints: Watchpoints,
    console: Console,
    trace: Option<Trace>,
    syscalls: Box<dyn SyscallHandler + Send>,
    steps: u64,
    /// Where the last run stopped on a breakpoint or cursor, until anything else moves on.
    resume_from: Option<u16>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_syscalls(config, Box::new(StandardSyscalls))
    }

    pub fn with_syscalls(config: SessionConfig, syscalls: Box<dyn SyscallHandler + Send>) -> Self {
        let trace = config.trace.then(|| Trace::new(config.trace_capacity));
        let console = if config.echo {
            Console::echoing()
        } else {
            Console::new()
        };
        Self {
            config,
            program: None,
            cpu: Cpu::default(),
            memory: Memory::new(),
            previous: Memory::new(),
            reported: Memory::new(),
            breakpoints: Breakpoints::default(),
            watchpoints: Watchpoints::default(),
            console,
            trace,
            syscalls,
            steps: 0,
            resume_from: None,
        }
    }

    /// Assemble `src` and load the result. On failure the loaded program is kept.
    pub fn assemble(&mut self, src: &str) -> Result<(), Diagnostic> {
        let program = assemble(src)?;
        self.load(Arc::new(program));
        Ok(())
    }

    /// Load an already assembled program and reset.
    pub fn load(&mut self, program: Arc<Program>) {
        self.program = Some(program);
        self.reset();
    }

    /// Return to the state right after loading the current program.
    pub fn reset(&mut self) {
        self.cpu = match &self.program {
            Some(program) => Cpu::new(program),
            None => Cpu::default(),
        };
        self.memory = match &self.program {
            Some(program) => Memory::with_program(program),
            None => Memory::new(),
        };
        self.previous = self.memory.clone();
        self.reported = self.memory.clone();
        self.console.clear();
        self.watchpoints.prime(&self.memory);
        self.steps = 0;
        self.resume_from = None;
        if let Some(trace) = &mut self.trace {
            trace.clear();
            if let Some(program) = &self.program {
                trace.record(Snapshot::capture(&self.cpu, program));
            }
        }
    }

    fn program_handle(&self) -> Result<Arc<Program>, Diagnostic> {
        self.program
            .clone()
            .ok_or_else(|| SessionError::NoProgram.into())
    }

    /// Execute exactly one instruction.
    ///
    /// Returns every watchpoint that fired. On error the state is as it was just
    /// before the failing instruction, and the diagnostic points at that instruction.
    pub fn step(&mut self) -> Result<Vec<WatchHit>, Diagnostic> {
        let program = self.program_handle()?;
        self.resume_from = None;
        if self.cpu.halted {
            return Ok(Vec::new());
        }
        let location = program
            .instruction_at(self.cpu.ip)
            .map(|instr| (instr.line, instr.column));

        runtime::step(
            &mut self.cpu,
            &program,
            &mut self.memory,
            self.syscalls.as_mut(),
            &mut self.console,
        )
        .map_err(|error| {
            let (line, column) = location.unwrap_or((0, 0));
            error.at(line, column)
        })?;
        self.steps += 1;

        let changed = diff(self.previous.as_bytes(), self.memory.as_bytes());
        for region in &changed {
            let start = region.start as usize;
            let bytes = &self.memory.as_bytes()[start..region.end() as usize];
            self.previous.load(region.start, bytes);
        }
        let hits = self.watchpoints.check(&self.memory, &changed);

        if let Some(trace) = &mut self.trace {
            trace.record(Snapshot::capture(&self.cpu, &program));
        }
        Ok(hits)
    }

    /// Run until halted, a breakpoint, a watchpoint, or `step_limit` steps.
    ///
    /// `on_yield` is called every `yield_interval` steps, after checking `cancel`.
    pub fn run(
        &mut self,
        step_limit: Option<u64>,
        cancel: &CancelToken,
        on_yield: &mut dyn FnMut(&mut Session),
    ) -> Result<PauseReason, Diagnostic> {
        self.run_until(None, step_limit, cancel, on_yield)
    }

    /// Like [`Session::run`], but also stop when the pointer reaches `address`.
    ///
    /// A breakpoint at `address` itself is ignored.
    ///
    /// Runs resumed from the breakpoint or cursor they last stopped at leave that
    /// instruction before checking again.
    pub fn run_to_cursor(
        &mut self,
        address: u16,
        step_limit: Option<u64>,
        cancel: &CancelToken,
        on_yield: &mut dyn FnMut(&mut Session),
    ) -> Result<PauseReason, Diagnostic> {
        self.run_until(Some(address), step_limit, cancel, on_yield)
    }

    fn run_until(
        &mut self,
        cursor: Option<u16>,
        step_limit: Option<u64>,
        cancel: &CancelToken,
        on_yield: &mut dyn FnMut(&mut Session),
    ) -> Result<PauseReason, Diagnostic> {
        self.program_handle()?;
        let limit = step_limit.unwrap_or(self.config.step_limit);
        let interval = self.config.yield_interval.max(1);
        let mut count: u64 = 0;
        let mut resuming = self.resume_from.take() == Some(self.cpu.ip);

        loop {
            if self.cpu.halted {
                return Ok(PauseReason::Halted);
            }
            let ip = self.cpu.ip;
            if !resuming {
                if cursor == Some(ip) {
                    self.resume_from = Some(ip);
                    return Ok(PauseReason::Cursor { address: ip });
                }
                if self.breakpoints.is_active(ip) {
                    self.resume_from = Some(ip);
                    return Ok(PauseReason::Breakpoint { address: ip });
                }
            }
            resuming = false;
            if count >= limit {
                return Ok(PauseReason::StepLimit { steps: count });
            }
            let hits = self.step()?;
            if !hits.is_empty() {
                return Ok(PauseReason::Watchpoint(hits));
            }
            count += 1;
            if count % interval == 0 {
                if cancel.is_cancelled() {
                    return Ok(PauseReason::Cancelled);
                }
                on_yield(self);
            }
        }
    }

    /// Restore registers, flags and pointer from the previous snapshot. Memory is untouched.
    pub fn step_back(&mut self) -> Result<(), Diagnostic> {
        self.program_handle()?;
        let trace = self.trace.as_mut().ok_or(SessionError::TraceDisabled)?;
        let snapshot = trace.step_back().ok_or(SessionError::TraceExhausted)?;
        snapshot.restore(&mut self.cpu);
        self.resume_from = None;
        Ok(())
    }

    pub fn set_breakpoints(&mut self, breakpoints: impl Into<Breakpoints>) {
        self.breakpoints = breakpoints.into();
    }

    /// Replace all watchpoints, priming each with the current memory value.
    pub fn set_watchpoints(&mut self, watchpoints: impl Into<Watchpoints>) {
        self.watchpoints = watchpoints.into();
        self.watchpoints.prime(&self.memory);
    }

    pub fn disassemble(&self) -> Result<Vec<DisassemblyLine>, Diagnostic> {
        let program = self.program_handle()?;
        Ok(disassemble(&program))
    }

    /// Copy of the current state, including memory changes since the last call.
    pub fn state(&mut self) -> SessionState {
        let changed = diff(self.reported.as_bytes(), self.memory.as_bytes());
        for region in &changed {
            let start = region.start as usize;
            let bytes = &self.memory.as_bytes()[start..region.end() as usize];
            self.reported.load(region.start, bytes);
        }
        SessionState {
            registers: self.cpu.registers,
            sp: self.cpu.sp,
            bp: self.cpu.bp,
            ip: self.cpu.ip,
            flags: self.cpu.flags,
            halted: self.cpu.halted,
            line: self
                .program
                .as_ref()
                .and_then(|program| program.instruction_at(self.cpu.ip))
                .map(|instr| instr.line),
            console: self.console.lines(),
            changed,
            steps: self.steps,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn program(&self) -> Option<&Arc<Program>> {
        self.program.as_ref()
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn breakpoints(&self) -> &Breakpoints {
        &self.breakpoints
    }

    pub fn breakpoints_mut(&mut self) -> &mut Breakpoints {
        &mut self.breakpoints
    }

    pub fn watchpoints(&self) -> &Watchpoints {
        &self.watchpoints
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn trace(&self) -> Option<&Trace> {
        self.trace.as_ref()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Register;

    fn session(src: &str) -> Session {
        let mut session = Session::new(SessionConfig::default());
        session.assemble(src).unwrap();
        session
    }

    fn run(session: &mut Session) -> Result<PauseReason, Diagnostic> {
        session.run(None, &CancelToken::new(), &mut |_| ())
    }

    const COUNTER: &str = "\
.DATA
count: .WORD 0
.TEXT
        MOV R0, #0
loop:   INC R0
        STORE [count], R0
        CMP R0, #3
        JL loop
        HLT
";

    #[test]
    fn step_before_assembly_fails() {
        let mut session = Session::new(SessionConfig::default());
        let err = session.step().unwrap_err();
        assert_eq!(err.code, "session::no_program");
        assert_eq!(err.line, 0);
    }

    #[test]
    fn failed_assembly_keeps_program() {
        let mut session = session("MOV R0, #1\nHLT");
        session.step().unwrap();
        let err = session.assemble("MOV R0").unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(session.program().unwrap().len(), 2);
        assert_eq!(session.cpu().ip, 1);
    }

    #[test]
    fn runs_to_halt() {
        let mut session = session(COUNTER);
        assert_eq!(run(&mut session), Ok(PauseReason::Halted));
        assert_eq!(session.cpu().reg(Register::General(0)), 3);
        assert_eq!(session.memory().read_word(0), Ok(3));
    }

    #[test]
    fn breakpoint_stops_before_instruction() {
        let mut session = session(COUNTER);
        session.set_breakpoints(vec![Breakpoint::new(2)]);
        assert_eq!(run(&mut session), Ok(PauseReason::Breakpoint { address: 2 }));
        assert_eq!(session.cpu().ip, 2);
        assert!(!session.cpu().halted);
        assert_eq!(session.memory().read_word(0), Ok(0));
        // Resuming passes the breakpoint, then stops on it again
        assert_eq!(run(&mut session), Ok(PauseReason::Breakpoint { address: 2 }));
        assert_eq!(session.memory().read_word(0), Ok(1));
    }

    #[test]
    fn breakpoint_at_entry() {
        let mut session = session("MOV R0, #1\nMOV R0, #2\nHLT");
        session.set_breakpoints(vec![Breakpoint::new(0)]);
        assert_eq!(run(&mut session), Ok(PauseReason::Breakpoint { address: 0 }));
        assert_eq!(session.cpu().ip, 0);
        assert_eq!(session.steps(), 0);
        assert_eq!(run(&mut session), Ok(PauseReason::Halted));

        // Stepping off and back onto a breakpoint stops there again
        session.reset();
        session.set_breakpoints(vec![Breakpoint::new(1)]);
        assert_eq!(run(&mut session), Ok(PauseReason::Breakpoint { address: 1 }));
        session.step_back().unwrap();
        session.step().unwrap();
        assert_eq!(run(&mut session), Ok(PauseReason::Breakpoint { address: 1 }));
    }

    #[test]
    fn cursor_at_current_pointer() {
        let mut session = session("loop: INC R0\nJMP loop");
        let reason = session
            .run_to_cursor(0, None, &CancelToken::new(), &mut |_| ())
            .unwrap();
        assert_eq!(reason, PauseReason::Cursor { address: 0 });
        assert_eq!(session.steps(), 0);
        // Resumed from the cursor, the loop goes round once
        let reason = session
            .run_to_cursor(0, None, &CancelToken::new(), &mut |_| ())
            .unwrap();
        assert_eq!(reason, PauseReason::Cursor { address: 0 });
        assert_eq!(session.steps(), 2);
    }

    #[test]
    fn disabled_breakpoint_is_ignored() {
        let mut session = session(COUNTER);
        session.set_breakpoints(vec![Breakpoint {
            enabled: false,
            ..Breakpoint::new(2)
        }]);
        assert_eq!(run(&mut session), Ok(PauseReason::Halted));
    }

    #[test]
    fn cursor_wins_over_breakpoint() {
        let mut session = session(COUNTER);
        session.set_breakpoints(vec![Breakpoint::new(2), Breakpoint::new(4)]);
        let reason = session
            .run_to_cursor(2, None, &CancelToken::new(), &mut |_| ())
            .unwrap();
        assert_eq!(reason, PauseReason::Cursor { address: 2 });
        let reason = session
            .run_to_cursor(5, None, &CancelToken::new(), &mut |_| ())
            .unwrap();
        assert_eq!(reason, PauseReason::Breakpoint { address: 4 });
    }

    #[test]
    fn watchpoint_fires_per_change() {
        let mut session = session(COUNTER);
        session.set_watchpoints(vec![Watchpoint::new(0, 2).unwrap()]);
        for expected in 1..=3 {
            let reason = run(&mut session).unwrap();
            assert_eq!(
                reason,
                PauseReason::Watchpoint(vec![WatchHit {
                    address: 0,
                    width: 2,
                    old: expected - 1,
                    new: expected,
                }])
            );
            assert_eq!(reason.outcome(), "watchpoint_hit");
        }
        assert_eq!(run(&mut session), Ok(PauseReason::Halted));
    }

    #[test]
    fn watchpoints_changed_together() {
        let mut session = session(".DATA\nv: .WORD 0\n.TEXT\nSTORE [v], #0x0102\nHLT");
        session.set_watchpoints(vec![
            Watchpoint::new(0, 1).unwrap(),
            Watchpoint::new(1, 1).unwrap(),
        ]);
        let reason = run(&mut session).unwrap();
        assert_eq!(
            reason,
            PauseReason::Watchpoint(vec![
                WatchHit {
                    address: 0,
                    width: 1,
                    old: 0,
                    new: 2,
                },
                WatchHit {
                    address: 1,
                    width: 1,
                    old: 0,
                    new: 1,
                },
            ])
        );
        assert_eq!(
            reason.to_string(),
            "Watchpoint: 0x0000 changed from 0x0 to 0x2; 0x0001 changed from 0x0 to 0x1"
        );
        assert_eq!(run(&mut session), Ok(PauseReason::Halted));
    }

    #[test]
    fn unrelated_watchpoint_stays_quiet() {
        let mut session = session(COUNTER);
        session.set_watchpoints(vec![Watchpoint::new(2, 2).unwrap()]);
        assert_eq!(run(&mut session), Ok(PauseReason::Halted));
    }

    #[test]
    fn step_limit() {
        let mut session = session("loop: JMP loop");
        let reason = session.run(Some(50), &CancelToken::new(), &mut |_| ()).unwrap();
        assert_eq!(reason, PauseReason::StepLimit { steps: 50 });
        assert_eq!(reason.outcome(), "run_complete");
        assert_eq!(session.steps(), 50);
    }

    #[test]
    fn cancellation_at_yield() {
        let mut session = Session::new(SessionConfig {
            yield_interval: 10,
            ..SessionConfig::default()
        });
        session.assemble("loop: JMP loop").unwrap();
        let cancel = CancelToken::new();
        let mut yields = 0;
        let reason = session
            .run(None, &cancel, &mut |_| {
                yields += 1;
                if yields == 3 {
                    cancel.cancel();
                }
            })
            .unwrap();
        assert_eq!(reason, PauseReason::Cancelled);
        assert_eq!(session.steps(), 40);
    }

    #[test]
    fn step_back_walks_trace() {
        let mut session = session("MOV R0, #1\nMOV R0, #2\nMOV R0, #3\nHLT");
        session.step().unwrap();
        session.step().unwrap();
        let after_one = {
            let mut cpu = session.cpu().clone();
            cpu.set_reg(Register::General(0), 1);
            cpu.ip = 1;
            cpu
        };
        session.step().unwrap();
        session.step_back().unwrap();
        assert_eq!(session.cpu().reg(Register::General(0)), 2);
        session.step_back().unwrap();
        assert_eq!(session.cpu(), &after_one);
        session.step_back().unwrap();
        assert_eq!(session.cpu().ip, 0);
        assert_eq!(session.cpu().reg(Register::General(0)), 0);
        let err = session.step_back().unwrap_err();
        assert_eq!(err.code, "session::trace");
    }

    #[test]
    fn step_back_keeps_memory() {
        let mut session = session(".DATA\nv: .WORD 0\n.TEXT\nSTORE [v], #7\nHLT");
        session.step().unwrap();
        session.step_back().unwrap();
        assert_eq!(session.cpu().ip, 0);
        assert_eq!(session.memory().read_word(0), Ok(7));
    }

    #[test]
    fn trace_disabled() {
        let mut session = Session::new(SessionConfig {
            trace: false,
            ..SessionConfig::default()
        });
        session.assemble("NOP\nNOP").unwrap();
        session.step().unwrap();
        assert_eq!(session.step_back().unwrap_err().code, "session::trace");
    }

    #[test]
    fn runtime_error_points_at_instruction() {
        let mut session = session("MOV R0, #4\nMOV R1, #0\n\n  DIV R0, R1\nHLT");
        let err = run(&mut session).unwrap_err();
        assert_eq!((err.line, err.column), (4, 3));
        assert_eq!(err.code, "run::division_by_zero");
        assert_eq!(session.cpu().ip, 2);
        assert_eq!(session.cpu().reg(Register::General(0)), 4);
    }

    #[test]
    fn state_reports_changes_once() {
        let mut session = session(COUNTER);
        session.step().unwrap();
        session.step().unwrap();
        session.step().unwrap();
        let state = session.state();
        assert_eq!(state.changed, vec![MemoryRegion { start: 0, len: 1 }]);
        assert_eq!(state.steps, 3);
        assert_eq!(state.line, Some(7));
        assert!(session.state().changed.is_empty());
    }

    #[test]
    fn console_output_is_collected() {
        let src = "\
.DATA
msg: .ASCIZ \"sum=\"
.TEXT
    MOV R0, msg
    SYS #2
    MOV R0, #40
    ADD R0, #2
    SYS #1
    SYS #4
    SYS #0
    NOP
";
        let mut session = session(src);
        assert_eq!(run(&mut session), Ok(PauseReason::Halted));
        assert_eq!(session.state().console, vec!["sum=42"]);
        assert_eq!(session.cpu().ip, 6);
        session.reset();
        assert!(session.console().is_empty());
        assert_eq!(session.cpu().ip, 0);
    }

    #[test]
    fn disassembly_needs_program() {
        let session = Session::new(SessionConfig::default());
        assert!(session.disassemble().is_err());
    }
}
