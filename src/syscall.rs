use crate::error::RuntimeError;
use crate::output::Output;
use crate::runtime::{Cpu, Memory};
use crate::symbol::Register;

/// Longest string `SYS 2` will print before giving up on finding a terminator.
const MAX_STRING: usize = 4096;

/// Host side of the `SYS` instruction.
///
/// The engine defines no syscall behaviour of its own. Implementations must not touch
/// any state before deciding to fail, so that a failing `SYS` leaves the machine as it was.
pub trait SyscallHandler {
    fn syscall(
        &mut self,
        number: i16,
        cpu: &mut Cpu,
        memory: &Memory,
        console: &mut Console,
    ) -> Result<(), RuntimeError>;
}

impl<F> SyscallHandler for F
where
    F: FnMut(i16, &mut Cpu, &Memory, &mut Console) -> Result<(), RuntimeError>,
{
    fn syscall(
        &mut self,
        number: i16,
        cpu: &mut Cpu,
        memory: &Memory,
        console: &mut Console,
    ) -> Result<(), RuntimeError> {
        self(number, cpu, memory, console)
    }
}

/// Conventional syscall table.
///
/// | number | effect                                      |
/// |--------|---------------------------------------------|
/// | 0      | exit (halt)                                 |
/// | 1      | print `R0` as a signed integer              |
/// | 2      | print the zero-terminated string at `R0`    |
/// | 3      | print `R0` as a character                   |
/// | 4      | print a newline                             |
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardSyscalls;

impl SyscallHandler for StandardSyscalls {
    fn syscall(
        &mut self,
        number: i16,
        cpu: &mut Cpu,
        memory: &Memory,
        console: &mut Console,
    ) -> Result<(), RuntimeError> {
        let r0 = cpu.reg(Register::General(0));
        match number {
            0 => cpu.halted = true,
            1 => console.write(&r0.to_string()),
            2 => {
                let bytes: Vec<u8> = memory
                    .bytes_from(r0 as u16)
                    .iter()
                    .take(MAX_STRING)
                    .take_while(|b| **b != 0)
                    .copied()
                    .collect();
                console.write(&String::from_utf8_lossy(&bytes));
            }
            3 => console.write(&char::from(r0 as u8).to_string()),
            4 => console.newline(),
            _ => return Err(RuntimeError::UnknownSyscall { number }),
        }
        Ok(())
    }
}

/// Program output accumulated over a session, split into lines.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Console {
    lines: Vec<String>,
    current: String,
    /// Also print to stdout as output arrives.
    echo: bool,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn echoing() -> Self {
        Console {
            echo: true,
            ..Self::default()
        }
    }

    pub fn write(&mut self, text: &str) {
        if self.echo {
            Output::Normal.print_str(text);
        }
        let mut parts = text.split('\n');
        if let Some(first) = parts.next() {
            self.current.push_str(first);
        }
        for part in parts {
            self.lines.push(std::mem::take(&mut self.current));
            self.current.push_str(part);
        }
    }

    pub fn newline(&mut self) {
        self.write("\n");
    }

    /// Completed lines, followed by the unfinished one if it has any text.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = self.lines.clone();
        if !self.current.is_empty() {
            lines.push(self.current.clone());
        }
        lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.current.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.current.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_splits_lines() {
        let mut console = Console::new();
        console.write("12");
        console.write("3\nab");
        console.newline();
        console.write("tail");
        assert_eq!(console.lines(), vec!["123", "ab", "tail"]);
        console.clear();
        assert!(console.is_empty());
    }

    #[test]
    fn standard_table() {
        let mut cpu = Cpu::default();
        let mut memory = Memory::new();
        memory.load(0x10, b"hey\0");
        let mut console = Console::new();
        let mut sys = StandardSyscalls;

        cpu.set_reg(Register::General(0), -7);
        sys.syscall(1, &mut cpu, &memory, &mut console).unwrap();
        sys.syscall(4, &mut cpu, &memory, &mut console).unwrap();
        cpu.set_reg(Register::General(0), 0x10);
        sys.syscall(2, &mut cpu, &memory, &mut console).unwrap();
        cpu.set_reg(Register::General(0), '!' as i32);
        sys.syscall(3, &mut cpu, &memory, &mut console).unwrap();
        assert_eq!(console.lines(), vec!["-7", "hey!"]);

        assert!(!cpu.halted);
        sys.syscall(0, &mut cpu, &memory, &mut console).unwrap();
        assert!(cpu.halted);

        let before = cpu.clone();
        assert_eq!(
            sys.syscall(99, &mut cpu, &memory, &mut console),
            Err(RuntimeError::UnknownSyscall { number: 99 })
        );
        assert_eq!(cpu, before);
    }
}
