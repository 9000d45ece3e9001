use std::collections::VecDeque;
use std::time::SystemTime;

use crate::program::Program;
use crate::runtime::{Cpu, Flags};
use crate::symbol::{Opcode, GENERAL_REGISTERS};

pub const DEFAULT_CAPACITY: usize = 1024;

/// CPU state at one point in time. Memory is not captured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub ip: u16,
    /// Source line of the instruction at `ip`, if any.
    pub line: Option<usize>,
    pub opcode: Option<Opcode>,
    pub operands: String,
    pub registers: [i16; GENERAL_REGISTERS],
    pub sp: i16,
    pub bp: i16,
    pub flags: Flags,
    pub halted: bool,
    pub timestamp: SystemTime,
}

impl Snapshot {
    pub fn capture(cpu: &Cpu, program: &Program) -> Self {
        let instr = program.instruction_at(cpu.ip);
        Snapshot {
            ip: cpu.ip,
            line: instr.map(|instr| instr.line),
            opcode: instr.map(|instr| instr.opcode),
            operands: instr.map(|instr| instr.operand_text()).unwrap_or_default(),
            registers: cpu.registers,
            sp: cpu.sp,
            bp: cpu.bp,
            flags: cpu.flags,
            halted: cpu.halted,
            timestamp: SystemTime::now(),
        }
    }

    /// Overwrite everything but memory.
    pub fn restore(&self, cpu: &mut Cpu) {
        cpu.ip = self.ip;
        cpu.registers = self.registers;
        cpu.sp = self.sp;
        cpu.bp = self.bp;
        cpu.flags = self.flags;
        cpu.halted = self.halted;
    }
}

/// Bounded history of snapshots with a cursor at the present one.
///
/// The oldest snapshot is evicted once `capacity` is exceeded. Recording after stepping
/// back discards the snapshots ahead of the cursor.
#[derive(Clone, Debug)]
pub struct Trace {
    entries: VecDeque<Snapshot>,
    capacity: usize,
    cursor: usize,
}

impl Trace {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Trace {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
            cursor: 0,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }

    pub fn record(&mut self, snapshot: Snapshot) {
        if !self.entries.is_empty() {
            self.entries.truncate(self.cursor + 1);
        }
        self.entries.push_back(snapshot);
        if self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        self.cursor = self.entries.len() - 1;
    }

    /// Move the cursor one snapshot back and return it.
    pub fn step_back(&mut self) -> Option<&Snapshot> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor)
    }

    pub fn current(&self) -> Option<&Snapshot> {
        self.entries.get(self.cursor)
    }

    /// Snapshots from oldest to newest, including any ahead of the cursor.
    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.entries.iter()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::assemble;

    fn snapshot(ip: u16) -> Snapshot {
        let program = assemble("NOP").unwrap();
        let cpu = Cpu {
            ip,
            ..Cpu::default()
        };
        Snapshot::capture(&cpu, &program)
    }

    #[test]
    fn evicts_oldest() {
        let mut trace = Trace::new(3);
        for ip in 0..5 {
            trace.record(snapshot(ip));
        }
        let ips: Vec<_> = trace.iter().map(|s| s.ip).collect();
        assert_eq!(ips, vec![2, 3, 4]);
        assert_eq!(trace.step_back().map(|s| s.ip), Some(3));
        assert_eq!(trace.step_back().map(|s| s.ip), Some(2));
        assert_eq!(trace.step_back(), None);
        assert_eq!(trace.cursor(), 0);
    }

    #[test]
    fn recording_discards_future() {
        let mut trace = Trace::new(10);
        for ip in 0..4 {
            trace.record(snapshot(ip));
        }
        trace.step_back();
        trace.step_back();
        trace.record(snapshot(9));
        let ips: Vec<_> = trace.iter().map(|s| s.ip).collect();
        assert_eq!(ips, vec![0, 1, 9]);
        assert_eq!(trace.current().map(|s| s.ip), Some(9));
    }

    #[test]
    fn captures_instruction() {
        let snap = snapshot(0);
        assert_eq!(snap.line, Some(1));
        assert_eq!(snap.opcode, Some(Opcode::Nop));
        let past_end = snapshot(1);
        assert_eq!(past_end.opcode, None);
        assert_eq!(past_end.operands, "");
    }
}
