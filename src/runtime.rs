use std::fmt;

use crate::error::RuntimeError;
use crate::operand::{Address, Operand};
use crate::program::{Instruction, Program};
use crate::symbol::{Opcode, Register, GENERAL_REGISTERS};
use crate::syscall::{Console, SyscallHandler};

/// Data memory is 64KiB of bytes.
pub const MEMORY_MAX: usize = 0x10000;

/// Size of a machine word in bytes.
const WORD: i32 = 2;

/// Condition flags.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Flags {
    pub zero: bool,
    pub negative: bool,
    pub carry: bool,
    pub overflow: bool,
}

impl Flags {
    fn from_result(result: i16, carry: bool, overflow: bool) -> Self {
        Flags {
            zero: result == 0,
            negative: result < 0,
            carry,
            overflow,
        }
    }

    /// Whether a conditional jump is taken. Non-branch opcodes never jump.
    pub fn jumps(&self, opcode: Opcode) -> bool {
        match opcode {
            Opcode::Jmp | Opcode::Call => true,
            Opcode::Je => self.zero,
            Opcode::Jnz => !self.zero,
            Opcode::Jg => !self.zero && self.negative == self.overflow,
            Opcode::Jge => self.negative == self.overflow,
            Opcode::Jl => self.negative != self.overflow,
            Opcode::Jle => self.zero || self.negative != self.overflow,
            Opcode::Jc => self.carry,
            Opcode::Jnc => !self.carry,
            _ => false,
        }
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bit = |set: bool| if set { '1' } else { '0' };
        write!(
            f,
            "ZF={} NF={} CF={} OF={}",
            bit(self.zero),
            bit(self.negative),
            bit(self.carry),
            bit(self.overflow)
        )
    }
}

/// Mutable machine state, excluding memory.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct Cpu {
    /// `R0`..`R15`
    pub registers: [i16; GENERAL_REGISTERS],
    /// Stack pointer. Zero means empty; the stack grows down from the top of memory.
    pub sp: i16,
    pub bp: i16,
    /// Instruction index, not a byte address.
    pub ip: u16,
    pub flags: Flags,
    pub halted: bool,
}

impl Cpu {
    /// Fresh state positioned at the first instruction of `program`.
    pub fn new(program: &Program) -> Self {
        Cpu {
            ip: program.text_start(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn reg(&self, register: Register) -> i16 {
        match register {
            Register::General(index) => self.registers[index as usize],
            Register::Sp => self.sp,
            Register::Bp => self.bp,
        }
    }

    /// Store the low 16 bits of `value`, sign extended.
    #[inline]
    pub fn set_reg(&mut self, register: Register, value: i32) {
        let value = value as u16 as i16;
        match register {
            Register::General(index) => self.registers[index as usize] = value,
            Register::Sp => self.sp = value,
            Register::Bp => self.bp = value,
        }
    }
}

/// Byte-addressed data memory.
#[derive(Clone, PartialEq, Eq)]
pub struct Memory(Box<[u8]>);

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let used = self.0.iter().filter(|b| **b != 0).count();
        write!(f, "Memory({} non-zero bytes)", used)
    }
}

impl Memory {
    /// Zeroed memory.
    pub fn new() -> Self {
        Memory(vec![0; MEMORY_MAX].into_boxed_slice())
    }

    /// Memory initialised from a program's data section.
    pub fn with_program(program: &Program) -> Self {
        let mut memory = Self::new();
        memory.load(program.data_start(), program.data());
        memory
    }

    /// Copy `bytes` in at `start`, truncating at the end of memory.
    pub fn load(&mut self, start: u16, bytes: &[u8]) {
        let start = start as usize;
        let len = bytes.len().min(MEMORY_MAX - start);
        self.0[start..start + len].copy_from_slice(&bytes[..len]);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Everything from `address` to the end of memory.
    pub fn bytes_from(&self, address: u16) -> &[u8] {
        &self.0[address as usize..]
    }

    /// Little-endian value of `width` bytes, or `None` if it would run past the end.
    pub fn read(&self, address: u16, width: u8) -> Option<u32> {
        let start = address as usize;
        let bytes = self.0.get(start..start + width as usize)?;
        Some(
            bytes
                .iter()
                .rev()
                .fold(0u32, |acc, byte| (acc << 8) | *byte as u32),
        )
    }

    fn check(address: i32) -> Result<usize, RuntimeError> {
        if address < 0 || address + WORD > MEMORY_MAX as i32 {
            return Err(RuntimeError::AddressOutOfBounds { address });
        }
        Ok(address as usize)
    }

    pub fn read_word(&self, address: i32) -> Result<i16, RuntimeError> {
        let at = Self::check(address)?;
        Ok(i16::from_le_bytes([self.0[at], self.0[at + 1]]))
    }

    pub fn write_word(&mut self, address: i32, value: i16) -> Result<(), RuntimeError> {
        let at = Self::check(address)?;
        self.0[at..at + 2].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}

/// Execute the instruction at `cpu.ip`.
///
/// Halted machines and pointers outside the program set `halted` and do nothing else.
/// On error, neither `cpu` nor `memory` has been modified.
pub fn step(
    cpu: &mut Cpu,
    program: &Program,
    memory: &mut Memory,
    syscalls: &mut dyn SyscallHandler,
    console: &mut Console,
) -> Result<(), RuntimeError> {
    if cpu.halted {
        return Ok(());
    }
    let Some(instr) = program.instruction_at(cpu.ip) else {
        cpu.halted = true;
        return Ok(());
    };
    let mut exec = Exec {
        cpu,
        program,
        memory,
        instr,
    };
    match exec.execute(syscalls, console)? {
        Flow::Next => match exec.cpu.ip.checked_add(1) {
            Some(next) => exec.cpu.ip = next,
            None => exec.cpu.halted = true,
        },
        Flow::Jump(target) => exec.cpu.ip = target,
        Flow::Stay => (),
    }
    Ok(())
}

/// What happens to the instruction pointer after executing.
enum Flow {
    Next,
    Jump(u16),
    Stay,
}

struct Exec<'a> {
    cpu: &'a mut Cpu,
    program: &'a Program,
    memory: &'a mut Memory,
    instr: &'a Instruction,
}

impl<'a> Exec<'a> {
    fn execute(
        &mut self,
        syscalls: &mut dyn SyscallHandler,
        console: &mut Console,
    ) -> Result<Flow, RuntimeError> {
        use Opcode::*;
        let opcode = self.instr.opcode;
        match opcode {
            Mov => {
                let value = self.value(1)? as i16;
                self.write(value, false, false)?;
            }
            Load => {
                let address = self.address(1)?;
                let value = self.memory.read_word(address)?;
                self.write(value, false, false)?;
            }
            Store => {
                let address = self.address(0)?;
                let value = self.value(1)? as i16;
                self.memory.write_word(address, value)?;
            }
            Push => {
                let value = self.value(0)? as i16;
                self.push(value)?;
            }
            Pop => {
                let dst = self.register(0)?;
                let value = self.pop()?;
                self.cpu.set_reg(dst, value as i32);
                self.cpu.flags = Flags::from_result(value, false, false);
            }
            Add | Sub | Cmp | Mul | Div | Mod | And | Or | Xor | Shl | Shr => {
                let a = self.cpu.reg(self.register(0)?);
                let b = self.value(1)? as i16;
                let (result, carry, overflow) = binary(opcode, a, b)?;
                if opcode == Cmp {
                    self.cpu.flags = Flags::from_result(result, carry, overflow);
                } else {
                    self.write(result, carry, overflow)?;
                }
            }
            Inc | Dec | Neg | Not => {
                let a = self.cpu.reg(self.register(0)?);
                let (result, carry, overflow) = match opcode {
                    Inc => add(a, 1),
                    Dec => sub(a, 1),
                    Neg => sub(0, a),
                    _ => (!a, false, false),
                };
                self.write(result, carry, overflow)?;
            }
            Jmp | Je | Jnz | Jg | Jge | Jl | Jle | Jc | Jnc => {
                if self.cpu.flags.jumps(opcode) {
                    return Ok(Flow::Jump(self.target()?));
                }
            }
            Call => {
                let target = self.target()?;
                let ret = self.cpu.ip.wrapping_add(1);
                self.push(ret as i16)?;
                return Ok(Flow::Jump(target));
            }
            Ret => {
                let target = self.peek()? as u16;
                // Returning past the last instruction ends the program like falling off it
                let in_program = self.program.instruction_at(target).is_some()
                    || target as usize == self.program.len();
                if !in_program {
                    return Err(RuntimeError::CorruptReturn { target });
                }
                self.pop()?;
                return Ok(Flow::Jump(target));
            }
            Sys => {
                let number = self.value(0)? as i16;
                syscalls.syscall(number, &mut *self.cpu, &*self.memory, console)?;
                if self.cpu.halted {
                    return Ok(Flow::Stay);
                }
            }
            Nop => (),
            Hlt => {
                self.cpu.halted = true;
                return Ok(Flow::Stay);
            }
        }
        Ok(Flow::Next)
    }

    fn operand(&self, position: usize) -> Result<&'a Operand, RuntimeError> {
        self.instr
            .operands
            .get(position)
            .ok_or_else(|| self.invalid(position))
    }

    fn invalid(&self, position: usize) -> RuntimeError {
        RuntimeError::InvalidOperand {
            opcode: self.instr.opcode.mnemonic(),
            position: position + 1,
        }
    }

    fn register(&self, position: usize) -> Result<Register, RuntimeError> {
        match self.operand(position)? {
            Operand::Register(register) => Ok(*register),
            _ => Err(self.invalid(position)),
        }
    }

    fn resolve(&self, name: &str) -> Result<i32, RuntimeError> {
        self.program
            .resolve(name)
            .ok_or_else(|| RuntimeError::UndefinedSymbol {
                name: name.to_string(),
            })
    }

    /// Value of a register, immediate or label operand.
    fn value(&self, position: usize) -> Result<i32, RuntimeError> {
        match self.operand(position)? {
            Operand::Register(register) => Ok(self.cpu.reg(*register) as i32),
            Operand::Immediate(value) => Ok(*value),
            Operand::Label(name) => self.resolve(name),
            Operand::Memory(_) => Err(self.invalid(position)),
        }
    }

    /// Byte address named by a memory operand.
    fn address(&self, position: usize) -> Result<i32, RuntimeError> {
        let Operand::Memory(address) = self.operand(position)? else {
            return Err(self.invalid(position));
        };
        match address {
            Address::Absolute(address) => Ok(*address as i32),
            Address::Label(name) => self.resolve(name),
            Address::Register { base, offset } => {
                Ok(self.cpu.reg(*base) as u16 as i32 + *offset as i32)
            }
        }
    }

    /// Instruction index named by a jump or call operand.
    fn target(&self) -> Result<u16, RuntimeError> {
        let target = match self.operand(0)? {
            Operand::Immediate(value) => *value,
            Operand::Label(name) => self.resolve(name)?,
            _ => return Err(self.invalid(0)),
        };
        u16::try_from(target).map_err(|_| self.invalid(0))
    }

    /// Write the destination register and set flags from the result.
    fn write(&mut self, value: i16, carry: bool, overflow: bool) -> Result<(), RuntimeError> {
        let dst = self.register(0)?;
        self.cpu.set_reg(dst, value as i32);
        self.cpu.flags = Flags::from_result(value, carry, overflow);
        Ok(())
    }

    fn push(&mut self, value: i16) -> Result<(), RuntimeError> {
        let sp = (self.cpu.sp as u16).wrapping_sub(WORD as u16);
        // Zero is reserved for the empty stack
        let start = sp as u32;
        let clashes = start < self.program.data_end()
            && start + WORD as u32 > self.program.data_start() as u32
            && !self.program.data().is_empty();
        if sp == 0 || clashes {
            return Err(RuntimeError::StackOverflow { stack_pointer: sp });
        }
        self.memory.write_word(sp as i32, value)?;
        self.cpu.sp = sp as i16;
        Ok(())
    }

    /// Top of the stack, left in place.
    fn peek(&self) -> Result<i16, RuntimeError> {
        let sp = self.cpu.sp as u16;
        if sp == 0 {
            return Err(RuntimeError::StackUnderflow);
        }
        self.memory.read_word(sp as i32)
    }

    fn pop(&mut self) -> Result<i16, RuntimeError> {
        let value = self.peek()?;
        self.cpu.sp = (self.cpu.sp as u16).wrapping_add(WORD as u16) as i16;
        Ok(value)
    }
}

fn add(a: i16, b: i16) -> (i16, bool, bool) {
    let (result, carry) = (a as u16).overflowing_add(b as u16);
    let (_, overflow) = a.overflowing_add(b);
    (result as i16, carry, overflow)
}

fn sub(a: i16, b: i16) -> (i16, bool, bool) {
    let (result, borrow) = (a as u16).overflowing_sub(b as u16);
    let (_, overflow) = a.overflowing_sub(b);
    (result as i16, borrow, overflow)
}

/// Two-operand arithmetic and logic. Returns `(result, carry, overflow)`.
fn binary(opcode: Opcode, a: i16, b: i16) -> Result<(i16, bool, bool), RuntimeError> {
    Ok(match opcode {
        Opcode::Add => add(a, b),
        Opcode::Sub | Opcode::Cmp => sub(a, b),
        Opcode::Mul => {
            let product = a as i32 * b as i32;
            let clamped = product.clamp(i16::MIN as i32, i16::MAX as i32);
            let saturated = clamped != product;
            (clamped as i16, saturated, saturated)
        }
        Opcode::Div | Opcode::Mod if b == 0 => return Err(RuntimeError::DivisionByZero),
        Opcode::Div => {
            let (quotient, overflow) = a.overflowing_div(b);
            (quotient, false, overflow)
        }
        Opcode::Mod => {
            let (remainder, overflow) = a.overflowing_rem(b);
            (remainder, false, overflow)
        }
        Opcode::And => (a & b, false, false),
        Opcode::Or => (a | b, false, false),
        Opcode::Xor => (a ^ b, false, false),
        Opcode::Shl => (((a as u16) << (b as u16 & 0xF)) as i16, false, false),
        Opcode::Shr => (((a as u16) >> (b as u16 & 0xF)) as i16, false, false),
        _ => unreachable!("{} is not a binary operation", opcode),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::assemble;

    fn no_syscalls(
        number: i16,
        _: &mut Cpu,
        _: &Memory,
        _: &mut Console,
    ) -> Result<(), RuntimeError> {
        Err(RuntimeError::UnknownSyscall { number })
    }

    struct Machine {
        program: Program,
        cpu: Cpu,
        memory: Memory,
        console: Console,
    }

    impl Machine {
        fn new(src: &str) -> Self {
            let program = assemble(src).unwrap();
            Machine {
                cpu: Cpu::new(&program),
                memory: Memory::with_program(&program),
                console: Console::new(),
                program,
            }
        }

        fn step(&mut self) -> Result<(), RuntimeError> {
            step(
                &mut self.cpu,
                &self.program,
                &mut self.memory,
                &mut no_syscalls,
                &mut self.console,
            )
        }

        fn steps(&mut self, n: usize) {
            for _ in 0..n {
                self.step().unwrap();
            }
        }

        fn r(&self, index: u8) -> i16 {
            self.cpu.reg(Register::General(index))
        }
    }

    #[test]
    fn mov_immediate() {
        let mut m = Machine::new("MOV R0, #42\nHLT");
        m.step().unwrap();
        assert_eq!(m.r(0), 42);
        assert_eq!(m.cpu.ip, 1);
        assert!(!m.cpu.halted);
        m.step().unwrap();
        assert!(m.cpu.halted);
        assert_eq!(m.cpu.ip, 1);
        // Further steps do nothing
        m.step().unwrap();
        assert_eq!(m.cpu.ip, 1);
    }

    #[test]
    fn writes_sign_extend() {
        let mut m = Machine::new("MOV R0, #65535\nMOV R1, #0x8000\nMOV SP, #-2");
        m.steps(3);
        assert_eq!(m.r(0), -1);
        assert_eq!(m.r(1), i16::MIN);
        assert_eq!(m.cpu.sp, -2);
        assert!(m.cpu.flags.negative);
    }

    #[test]
    fn sub_flags() {
        let mut m = Machine::new("MOV R0, #5\nSUB R0, #5\nMOV R1, #5\nSUB R1, #10");
        m.steps(2);
        assert_eq!(m.r(0), 0);
        assert!(m.cpu.flags.zero);
        assert!(!m.cpu.flags.negative);
        m.steps(2);
        assert_eq!(m.r(1), -5);
        assert!(m.cpu.flags.negative);
        assert!(!m.cpu.flags.zero);
        assert!(m.cpu.flags.carry);
    }

    #[test]
    fn arithmetic_table() {
        #[rustfmt::skip]
        let cases: &[(Opcode, i16, i16, i16, bool, bool)] = &[
            // (op, a, b, result, carry, overflow)
            (Opcode::Add, 1, 2, 3, false, false),
            (Opcode::Add, i16::MAX, 1, i16::MIN, false, true),
            (Opcode::Add, -1, 1, 0, true, false),
            (Opcode::Add, i16::MIN, -1, i16::MAX, true, true),
            (Opcode::Sub, 0, 1, -1, true, false),
            (Opcode::Sub, i16::MIN, 1, i16::MAX, false, true),
            (Opcode::Mul, 300, 300, i16::MAX, true, true),
            (Opcode::Mul, -300, 300, i16::MIN, true, true),
            (Opcode::Mul, -3, 7, -21, false, false),
            (Opcode::Div, -7, 2, -3, false, false),
            (Opcode::Div, i16::MIN, -1, i16::MIN, false, true),
            (Opcode::Mod, -7, 2, -1, false, false),
            (Opcode::And, 0b1100, 0b1010, 0b1000, false, false),
            (Opcode::Xor, -1, 0x00ff, -256, false, false),
            (Opcode::Shl, 1, 15, i16::MIN, false, false),
            (Opcode::Shl, 1, 16, 1, false, false),
            (Opcode::Shr, -1, 12, 0xf, false, false),
        ];
        for &(op, a, b, result, carry, overflow) in cases {
            assert_eq!(
                binary(op, a, b),
                Ok((result, carry, overflow)),
                "{} {}, {}",
                op,
                a,
                b
            );
        }
        assert_eq!(binary(Opcode::Div, 1, 0), Err(RuntimeError::DivisionByZero));
        assert_eq!(binary(Opcode::Mod, 1, 0), Err(RuntimeError::DivisionByZero));
    }

    #[test]
    fn conditional_jumps() {
        #[rustfmt::skip]
        let cases: &[(i16, i16, &[Opcode])] = &[
            // (a, b, jumps taken after CMP a, b)
            (3, 3, &[Opcode::Je, Opcode::Jge, Opcode::Jle, Opcode::Jnc]),
            (5, 3, &[Opcode::Jnz, Opcode::Jg, Opcode::Jge, Opcode::Jnc]),
            (3, 5, &[Opcode::Jnz, Opcode::Jl, Opcode::Jle, Opcode::Jc]),
            (-1, 1, &[Opcode::Jnz, Opcode::Jl, Opcode::Jle, Opcode::Jnc]),
        ];
        let conditional = [
            Opcode::Je,
            Opcode::Jnz,
            Opcode::Jg,
            Opcode::Jge,
            Opcode::Jl,
            Opcode::Jle,
            Opcode::Jc,
            Opcode::Jnc,
        ];
        for &(a, b, taken) in cases {
            let (result, carry, overflow) = binary(Opcode::Cmp, a, b).unwrap();
            let flags = Flags::from_result(result, carry, overflow);
            for op in conditional {
                assert_eq!(flags.jumps(op), taken.contains(&op), "CMP {}, {} then {}", a, b, op);
            }
        }
    }

    #[test]
    fn push_pop_round_trip() {
        let mut m = Machine::new("MOV R2, #-9\nPUSH R2\nMOV R2, #0\nPOP R2");
        m.steps(2);
        assert_eq!(m.cpu.sp as u16, 0xfffe);
        assert_eq!(m.memory.read_word(0xfffe), Ok(-9));
        m.steps(2);
        assert_eq!(m.r(2), -9);
        assert_eq!(m.cpu.sp, 0);
    }

    #[test]
    fn call_ret() {
        let src = "\
            CALL sub
            HLT
        sub:
            MOV R0, #1
            RET
        ";
        let mut m = Machine::new(src);
        m.step().unwrap();
        assert_eq!(m.cpu.ip, 2);
        assert_eq!(m.cpu.sp as u16, 0xfffe);
        m.steps(2);
        assert_eq!(m.cpu.ip, 1);
        assert_eq!(m.cpu.sp, 0);
        assert_eq!(m.r(0), 1);
    }

    #[test]
    fn ret_to_corrupt_address() {
        let mut m = Machine::new("PUSH #999\nRET\nHLT");
        m.step().unwrap();
        let before = m.cpu.clone();
        assert_eq!(m.step(), Err(RuntimeError::CorruptReturn { target: 999 }));
        assert_eq!(m.cpu, before);
        assert_eq!(m.cpu.sp as u16, 0xfffe);
    }

    #[test]
    fn ret_past_last_instruction() {
        let mut m = Machine::new("PUSH #2\nRET");
        m.steps(2);
        assert_eq!(m.cpu.ip, 2);
        assert_eq!(m.cpu.sp, 0);
    }

    #[test]
    fn stack_underflow() {
        let mut m = Machine::new("POP R0");
        let before = m.cpu.clone();
        assert_eq!(m.step(), Err(RuntimeError::StackUnderflow));
        assert_eq!(m.cpu, before);
        let mut m = Machine::new("RET");
        assert_eq!(m.step(), Err(RuntimeError::StackUnderflow));
    }

    #[test]
    fn stack_overflow_into_data() {
        let mut m = Machine::new(".DATA\n.ORG 0xfff0\n.SPACE 14\n.TEXT\nPUSH #1\nPUSH #2");
        m.step().unwrap();
        assert_eq!(
            m.step(),
            Err(RuntimeError::StackOverflow {
                stack_pointer: 0xfffc
            })
        );
        assert_eq!(m.cpu.sp as u16, 0xfffe);
    }

    #[test]
    fn division_by_zero_keeps_state() {
        let mut m = Machine::new("MOV R0, #10\nCMP R0, #10\nDIV R0, #0");
        m.steps(2);
        let before = m.cpu.clone();
        assert_eq!(m.step(), Err(RuntimeError::DivisionByZero));
        assert_eq!(m.cpu, before);
        assert!(m.cpu.flags.zero);
    }

    #[test]
    fn memory_access() {
        let src = "\
.DATA
value: .WORD 0x1234
.TEXT
    LOAD R0, [value]
    MOV R1, value
    STORE [R1+2], #-1
    LOAD R2, [R1+2]
    LOAD R3, [0xffff]
";
        let mut m = Machine::new(src);
        m.steps(4);
        assert_eq!(m.r(0), 0x1234);
        assert_eq!(m.r(1), 0);
        assert_eq!(m.r(2), -1);
        assert_eq!(m.memory.read(2, 2), Some(0xffff));
        assert_eq!(m.memory.read(0, 1), Some(0x34));
        assert_eq!(
            m.step(),
            Err(RuntimeError::AddressOutOfBounds { address: 0xffff })
        );
    }

    #[test]
    fn runs_off_the_end() {
        let mut m = Machine::new("NOP");
        m.step().unwrap();
        assert!(!m.cpu.halted);
        m.step().unwrap();
        assert!(m.cpu.halted);
    }

    #[test]
    fn loop_counts_down() {
        let src = "\
            MOV R0, #3
            MOV R1, #0
        again:
            ADD R1, R0
            DEC R0
            JNZ again
            HLT
        ";
        let mut m = Machine::new(src);
        while !m.cpu.halted {
            m.step().unwrap();
        }
        assert_eq!(m.r(1), 6);
        assert_eq!(m.r(0), 0);
    }
}
