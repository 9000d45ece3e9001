use std::fmt;
use std::str::FromStr;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;

type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Amount of general purpose registers.
pub const GENERAL_REGISTERS: usize = 16;

/// Represents the CPU registers.
///
/// `SP` and `BP` are addressed like any other register, but live outside the general
/// register file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Register {
    /// `R0`..`R15`
    General(u8),
    /// Stack pointer.
    Sp,
    /// Base pointer.
    Bp,
}

impl Register {
    pub fn general(index: u8) -> Option<Self> {
        ((index as usize) < GENERAL_REGISTERS).then_some(Register::General(index))
    }
}

impl FromStr for Register {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("sp") {
            return Ok(Register::Sp);
        }
        if s.eq_ignore_ascii_case("bp") {
            return Ok(Register::Bp);
        }
        let digits = s.strip_prefix(['r', 'R']).ok_or(())?;
        // Reject `R01`, `R+1` and friends
        if digits.is_empty()
            || (digits.len() > 1 && digits.starts_with('0'))
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(());
        }
        let index: u8 = digits.parse().map_err(|_| ())?;
        Register::general(index).ok_or(())
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::General(index) => write!(f, "R{}", index),
            Register::Sp => f.write_str("SP"),
            Register::Bp => f.write_str("BP"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Opcode {
    Mov,
    Load,
    Store,
    Push,
    Pop,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Cmp,
    Inc,
    Dec,
    Neg,
    Not,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Jmp,
    Je,
    Jnz,
    Jg,
    Jge,
    Jl,
    Jle,
    Jc,
    Jnc,
    Call,
    Ret,
    Sys,
    Nop,
    Hlt,
}

#[rustfmt::skip]
const OPCODES: &[(Opcode, &str)] = &[
    (Opcode::Mov,   "MOV"),
    (Opcode::Load,  "LOAD"),
    (Opcode::Store, "STORE"),
    (Opcode::Push,  "PUSH"),
    (Opcode::Pop,   "POP"),
    (Opcode::Add,   "ADD"),
    (Opcode::Sub,   "SUB"),
    (Opcode::Mul,   "MUL"),
    (Opcode::Div,   "DIV"),
    (Opcode::Mod,   "MOD"),
    (Opcode::Cmp,   "CMP"),
    (Opcode::Inc,   "INC"),
    (Opcode::Dec,   "DEC"),
    (Opcode::Neg,   "NEG"),
    (Opcode::Not,   "NOT"),
    (Opcode::And,   "AND"),
    (Opcode::Or,    "OR"),
    (Opcode::Xor,   "XOR"),
    (Opcode::Shl,   "SHL"),
    (Opcode::Shr,   "SHR"),
    (Opcode::Jmp,   "JMP"),
    (Opcode::Je,    "JE"),
    (Opcode::Jnz,   "JNZ"),
    (Opcode::Jg,    "JG"),
    (Opcode::Jge,   "JGE"),
    (Opcode::Jl,    "JL"),
    (Opcode::Jle,   "JLE"),
    (Opcode::Jc,    "JC"),
    (Opcode::Jnc,   "JNC"),
    (Opcode::Call,  "CALL"),
    (Opcode::Ret,   "RET"),
    (Opcode::Sys,   "SYS"),
    (Opcode::Nop,   "NOP"),
    (Opcode::Hlt,   "HLT"),
];

/// Alternative spellings, resolved before the canonical table is consulted.
#[rustfmt::skip]
const ALIASES: &[(&str, &str)] = &[
    ("HALT",    "HLT"),
    ("JNE",     "JNZ"),
    ("JEQ",     "JE"),
    ("JZ",      "JE"),
    ("SYSCALL", "SYS"),
    ("LD",      "LOAD"),
    ("ST",      "STORE"),
];

impl Opcode {
    /// Find opcode by mnemonic or alias (case insensitive).
    pub fn lookup(name: &str) -> Option<Opcode> {
        let canonical = ALIASES
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
            .map_or(name, |(_, canonical)| canonical);
        OPCODES
            .iter()
            .find(|(_, mnemonic)| mnemonic.eq_ignore_ascii_case(canonical))
            .map(|(opcode, _)| *opcode)
    }

    pub fn mnemonic(self) -> &'static str {
        OPCODES
            .iter()
            .find(|(opcode, _)| *opcode == self)
            .map(|(_, mnemonic)| *mnemonic)
            .expect("every opcode has a mnemonic")
    }

    /// Every accepted instruction name, canonical names first.
    pub fn vocabulary() -> impl Iterator<Item = &'static str> {
        OPCODES
            .iter()
            .map(|(_, name)| *name)
            .chain(ALIASES.iter().map(|(alias, _)| *alias))
    }

    /// Whether the single operand is an instruction index rather than a value.
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Jmp
                | Opcode::Je
                | Opcode::Jnz
                | Opcode::Jg
                | Opcode::Jge
                | Opcode::Jl
                | Opcode::Jle
                | Opcode::Jc
                | Opcode::Jnc
                | Opcode::Call
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DirKind {
    Data,
    Text,
    Org,
    Equ,
    Byte,
    Word,
    Ascii,
    Asciz,
    Space,
    Align,
}

#[rustfmt::skip]
const DIRECTIVES: &[(DirKind, &str)] = &[
    (DirKind::Data,  ".DATA"),
    (DirKind::Text,  ".TEXT"),
    (DirKind::Org,   ".ORG"),
    (DirKind::Equ,   ".EQU"),
    (DirKind::Byte,  ".BYTE"),
    (DirKind::Word,  ".WORD"),
    (DirKind::Ascii, ".ASCII"),
    (DirKind::Ascii, ".STRING"),
    (DirKind::Asciz, ".ASCIZ"),
    (DirKind::Space, ".SPACE"),
    (DirKind::Align, ".ALIGN"),
];

impl DirKind {
    /// Find directive by name, including the leading `.` (case insensitive).
    pub fn lookup(name: &str) -> Option<DirKind> {
        DIRECTIVES
            .iter()
            .find(|(_, candidate)| candidate.eq_ignore_ascii_case(name))
            .map(|(kind, _)| *kind)
    }

    pub fn vocabulary() -> impl Iterator<Item = &'static str> {
        DIRECTIVES.iter().map(|(_, name)| *name)
    }

    /// Canonical spelling.
    pub fn name(self) -> &'static str {
        DIRECTIVES
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, name)| *name)
            .expect("every directive has a name")
    }

    /// Directives which write bytes, and so only make sense inside `.DATA`.
    pub fn emits_bytes(self) -> bool {
        matches!(
            self,
            DirKind::Byte
                | DirKind::Word
                | DirKind::Ascii
                | DirKind::Asciz
                | DirKind::Space
                | DirKind::Align
        )
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SymbolKind {
    /// Instruction index inside `.TEXT`.
    Code,
    /// Byte address inside `.DATA`.
    Data,
    /// Defined with `.EQU`.
    Constant,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Symbol {
    /// Name as spelled at the definition.
    pub name: String,
    pub value: i32,
    pub kind: SymbolKind,
    /// Line of definition, counting from 1.
    pub line: usize,
}

/// Labels and constants share one case-insensitive namespace, kept in definition order.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct SymbolTable(FxMap<String, Symbol>);

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing definition if the name is already taken.
    pub fn insert(&mut self, symbol: Symbol) -> Result<(), &Symbol> {
        let key = symbol.name.to_ascii_uppercase();
        if self.0.contains_key(&key) {
            return Err(&self.0[&key]);
        }
        self.0.insert(key, symbol);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.0.get(&name.to_ascii_uppercase())
    }

    /// First code label bound to instruction `address`.
    pub fn code_label_at(&self, address: u16) -> Option<&Symbol> {
        self.iter()
            .find(|sym| sym.kind == SymbolKind::Code && sym.value == address as i32)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.0.values()
    }

    /// Move every `kind` symbol bound to `from` over to `to`.
    pub fn rebase(&mut self, kind: SymbolKind, from: i32, to: i32) {
        for symbol in self.0.values_mut() {
            if symbol.kind == kind && symbol.value == from {
                symbol.value = to;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_names() {
        assert_eq!("r0".parse(), Ok(Register::General(0)));
        assert_eq!("R15".parse(), Ok(Register::General(15)));
        assert_eq!("sp".parse(), Ok(Register::Sp));
        assert_eq!("Bp".parse(), Ok(Register::Bp));
        assert!("R16".parse::<Register>().is_err());
        assert!("R01".parse::<Register>().is_err());
        assert!("R".parse::<Register>().is_err());
        assert!("RX".parse::<Register>().is_err());
    }

    #[test]
    fn aliases_resolve_to_canonical() {
        assert_eq!(Opcode::lookup("halt"), Some(Opcode::Hlt));
        assert_eq!(Opcode::lookup("JNE"), Some(Opcode::Jnz));
        assert_eq!(Opcode::lookup("jeq"), Some(Opcode::Je));
        assert_eq!(Opcode::lookup("JZ"), Some(Opcode::Je));
        assert_eq!(Opcode::lookup("syscall"), Some(Opcode::Sys));
        assert_eq!(Opcode::lookup("mov"), Some(Opcode::Mov));
        assert_eq!(Opcode::lookup("move"), None);
    }

    #[test]
    fn symbols_are_case_insensitive() {
        let mut table = SymbolTable::new();
        let sym = |name: &str| Symbol {
            name: name.to_string(),
            value: 3,
            kind: SymbolKind::Code,
            line: 1,
        };
        assert!(table.insert(sym("Loop")).is_ok());
        assert!(table.insert(sym("LOOP")).is_err());
        assert_eq!(table.get("loop").map(|s| s.name.as_str()), Some("Loop"));
        assert_eq!(table.code_label_at(3).map(|s| s.value), Some(3));
        assert!(table.code_label_at(4).is_none());
    }
}
