use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::AsmErrorKind;
use crate::lexer::is_identifier;
use crate::literal::{check_range, is_numeric_start, parse_number};
use crate::symbol::{Opcode, Register, Symbol, SymbolKind, SymbolTable};

lazy_static! {
    static ref REGISTER_OFFSET: Regex =
        Regex::new(r"^([A-Za-z0-9]+)\s*([+-])\s*(\S+)$").unwrap();
}

/// Where a memory operand points.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Address {
    /// `[0x1000]`, or `[NAME]` where `NAME` is a constant.
    Absolute(u16),
    /// `[msg]`, resolved against the label table when executed.
    Label(String),
    /// `[R1]`, `[SP+4]`, `[BP-2]`.
    Register { base: Register, offset: i16 },
}

impl Address {
    /// `[R]`-style access, as opposed to `[address]`-style.
    pub fn is_indirect(&self) -> bool {
        matches!(self, Address::Register { .. })
    }
}

/// A single parsed operand.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Operand {
    Register(Register),
    Immediate(i32),
    Memory(Address),
    /// Symbolic reference, eg. a jump target.
    Label(String),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperandKind {
    Register,
    Immediate,
    Memory,
    Label,
}

impl Operand {
    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::Register(_) => OperandKind::Register,
            Operand::Immediate(_) => OperandKind::Immediate,
            Operand::Memory(_) => OperandKind::Memory,
            Operand::Label(_) => OperandKind::Label,
        }
    }

    /// Name of the label this operand refers to, if any.
    pub fn label_name(&self) -> Option<&str> {
        match self {
            Operand::Label(name) | Operand::Memory(Address::Label(name)) => Some(name),
            _ => None,
        }
    }
}

impl OperandKind {
    fn article_name(self) -> &'static str {
        match self {
            OperandKind::Register => "a register",
            OperandKind::Immediate => "an immediate",
            OperandKind::Memory => "a memory reference",
            OperandKind::Label => "a label",
        }
    }
}

/// Parse one operand token.
///
/// Attempts, in order: `#` immediate, `[...]` memory, register name, numeric literal,
/// identifier. Constants are substituted by value; labels stay symbolic.
pub fn parse_operand(token: &str, symbols: &SymbolTable) -> Result<Operand, AsmErrorKind> {
    if let Some(value) = token.strip_prefix('#') {
        return parse_value(value.trim(), symbols).map(Operand::Immediate);
    }
    if let Some(inner) = token.strip_prefix('[') {
        let Some(inner) = inner.strip_suffix(']') else {
            return Err(bad_operand(token));
        };
        return parse_address(inner.trim(), symbols).map(Operand::Memory);
    }
    if let Ok(register) = token.parse::<Register>() {
        return Ok(Operand::Register(register));
    }
    if is_numeric_start(token) {
        return number(token).map(Operand::Immediate);
    }
    if is_identifier(token) {
        return Ok(match constant(token, symbols) {
            Some(sym) => Operand::Immediate(sym.value),
            None => Operand::Label(token.to_string()),
        });
    }
    Err(bad_operand(token))
}

fn parse_address(inner: &str, symbols: &SymbolTable) -> Result<Address, AsmErrorKind> {
    if let Some(caps) = REGISTER_OFFSET.captures(inner) {
        if let Ok(base) = caps[1].parse::<Register>() {
            let magnitude = parse_value(&caps[3], symbols)?;
            let offset = if &caps[2] == "-" { -magnitude } else { magnitude };
            let offset = check_range(offset, i16::MIN as i32, i16::MAX as i32).map_err(|error| {
                AsmErrorKind::BadLiteral {
                    token: caps[3].to_string(),
                    error,
                }
            })?;
            return Ok(Address::Register {
                base,
                offset: offset as i16,
            });
        }
    }
    if let Ok(base) = inner.parse::<Register>() {
        return Ok(Address::Register { base, offset: 0 });
    }
    if is_numeric_start(inner) {
        return absolute(inner, number(inner)?);
    }
    if is_identifier(inner) {
        return match constant(inner, symbols) {
            Some(sym) => absolute(inner, sym.value),
            None => Ok(Address::Label(inner.to_string())),
        };
    }
    Err(bad_operand(inner))
}

/// Number or constant, as allowed after `#` or as an offset.
fn parse_value(token: &str, symbols: &SymbolTable) -> Result<i32, AsmErrorKind> {
    if is_identifier(token) {
        return symbols
            .get(token)
            .map(|sym| sym.value)
            .ok_or_else(|| AsmErrorKind::UndefinedSymbol {
                name: token.to_string(),
            });
    }
    number(token)
}

fn number(token: &str) -> Result<i32, AsmErrorKind> {
    parse_number(token).map_err(|error| AsmErrorKind::BadLiteral {
        token: token.to_string(),
        error,
    })
}

fn absolute(token: &str, value: i32) -> Result<Address, AsmErrorKind> {
    check_range(value, 0, u16::MAX as i32)
        .map(|address| Address::Absolute(address as u16))
        .map_err(|error| AsmErrorKind::BadLiteral {
            token: token.to_string(),
            error,
        })
}

fn constant<'a>(name: &str, symbols: &'a SymbolTable) -> Option<&'a Symbol> {
    symbols.get(name).filter(|sym| sym.kind == SymbolKind::Constant)
}

fn bad_operand(token: &str) -> AsmErrorKind {
    AsmErrorKind::BadOperand {
        token: token.to_string(),
    }
}

const REG: &[OperandKind] = &[OperandKind::Register];
const VALUE: &[OperandKind] = &[
    OperandKind::Register,
    OperandKind::Immediate,
    OperandKind::Label,
];
const MEM: &[OperandKind] = &[OperandKind::Memory];
const TARGET: &[OperandKind] = &[OperandKind::Label, OperandKind::Immediate];
const IMM: &[OperandKind] = &[OperandKind::Immediate];

/// Accepted operand kinds, per position, for each opcode.
pub fn signature(opcode: Opcode) -> &'static [&'static [OperandKind]] {
    use Opcode::*;
    match opcode {
        Mov | Add | Sub | Mul | Div | Mod | Cmp | And | Or | Xor | Shl | Shr => &[REG, VALUE],
        Load => &[REG, MEM],
        Store => &[MEM, VALUE],
        Push => &[VALUE],
        Pop | Inc | Dec | Neg | Not => &[REG],
        Jmp | Je | Jnz | Jg | Jge | Jl | Jle | Jc | Jnc | Call => &[TARGET],
        Sys => &[IMM],
        Ret | Nop | Hlt => &[],
    }
}

/// Validate operand count and kinds against [`signature`].
///
/// On a kind mismatch, returns the index of the offending operand alongside the error.
pub fn check_operands(opcode: Opcode, operands: &[Operand]) -> Result<(), (usize, AsmErrorKind)> {
    let expected = signature(opcode);
    if expected.len() != operands.len() {
        return Err((
            0,
            AsmErrorKind::OperandCount {
                opcode: opcode.mnemonic(),
                expected: expected.len(),
                found: operands.len(),
            },
        ));
    }
    for (i, (kinds, operand)) in expected.iter().zip(operands).enumerate() {
        if !kinds.contains(&operand.kind()) {
            return Err((
                i,
                AsmErrorKind::OperandKind {
                    opcode: opcode.mnemonic(),
                    position: i + 1,
                    expected: describe(kinds),
                    found: operand.kind().article_name(),
                },
            ));
        }
    }
    Ok(())
}

fn describe(kinds: &[OperandKind]) -> String {
    let names: Vec<_> = kinds.iter().map(|kind| kind.article_name()).collect();
    match names.split_last() {
        Some((last, [])) => last.to_string(),
        Some((last, rest)) => format!("{} or {}", rest.join(", "), last),
        None => String::new(),
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Absolute(address) => write!(f, "[0x{:04x}]", address),
            Address::Label(name) => write!(f, "[{}]", name),
            Address::Register { base, offset: 0 } => write!(f, "[{}]", base),
            Address::Register { base, offset } if *offset < 0 => {
                write!(f, "[{}-{}]", base, -(*offset as i32))
            }
            Address::Register { base, offset } => write!(f, "[{}+{}]", base, offset),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(register) => write!(f, "{}", register),
            Operand::Immediate(value) => write!(f, "#{}", value),
            Operand::Memory(address) => write!(f, "{}", address),
            Operand::Label(name) => f.write_str(name),
        }
    }
}
