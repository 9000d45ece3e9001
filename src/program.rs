use std::fmt;

use crate::operand::Operand;
use crate::symbol::{Opcode, SymbolTable};

/// One decoded instruction line.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    /// Line of the instruction in source, counting from 1.
    pub line: usize,
    /// Column of the mnemonic, counting from 1.
    pub column: usize,
    /// Raw source text of the statement, without label or comment.
    pub source: String,
    /// Instruction index. Jumps and calls target these, not byte addresses.
    pub address: u16,
}

impl Instruction {
    /// Operands rendered as in disassembly, comma separated.
    pub fn operand_text(&self) -> String {
        self.operands
            .iter()
            .map(|operand| operand.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        if !self.operands.is_empty() {
            write!(f, " {}", self.operand_text())?;
        }
        Ok(())
    }
}

/// Result of assembly. Never mutated once built, so sessions may share it.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Program {
    instructions: Vec<Instruction>,
    symbols: SymbolTable,
    data: Vec<u8>,
    /// Index of the first instruction.
    text_start: u16,
    /// Byte address of the first data byte.
    data_start: u16,
}

impl Program {
    pub(crate) fn new(
        instructions: Vec<Instruction>,
        symbols: SymbolTable,
        data: Vec<u8>,
        text_start: u16,
        data_start: u16,
    ) -> Self {
        Program {
            instructions,
            symbols,
            data,
            text_start,
            data_start,
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Instruction at instruction index `address`, if inside the text section.
    pub fn instruction_at(&self, address: u16) -> Option<&Instruction> {
        let index = address.checked_sub(self.text_start)?;
        self.instructions.get(index as usize)
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Value of a label or constant.
    pub fn resolve(&self, name: &str) -> Option<i32> {
        self.symbols.get(name).map(|sym| sym.value)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn text_start(&self) -> u16 {
        self.text_start
    }

    pub fn data_start(&self) -> u16 {
        self.data_start
    }

    /// One past the last data byte.
    pub fn data_end(&self) -> u32 {
        self.data_start as u32 + self.data.len() as u32
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

impl<'a> IntoIterator for &'a Program {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;
    fn into_iter(self) -> Self::IntoIter {
        self.instructions.iter()
    }
}
