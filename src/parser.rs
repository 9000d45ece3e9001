use crate::error::{AsmErrorKind, Diagnostic};
use crate::lexer::{self, is_identifier, split_operands, split_word, Piece};
use crate::literal::{check_range, parse_number, parse_string, MAX_VALUE, MIN_VALUE};
use crate::operand::{check_operands, parse_operand, Operand};
use crate::program::{Instruction, Program};
use crate::suggest::suggest;
use crate::symbol::{DirKind, Opcode, Register, Symbol, SymbolKind, SymbolTable};

/// Size of the byte-addressed data space.
const ADDRESS_SPACE: u32 = 0x10000;

/// Assemble `src` into a [`Program`]. Fails atomically on the first error.
pub fn assemble(src: &str) -> Result<Program, Diagnostic> {
    AsmParser::new(src).parse()
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Section {
    Data,
    Text,
}

/// Instruction found by the first pass, with operands still unparsed.
struct Skeleton<'a> {
    opcode: Opcode,
    line: usize,
    column: usize,
    source: &'a str,
    operands: Option<Piece<'a>>,
}

/// Transforms source text into a resolved [`Program`].
pub struct AsmParser<'a> {
    /// Reference to the source file
    src: &'a str,
    symbols: SymbolTable,
    section: Section,
    data: Vec<u8>,
    /// Byte address of `data[0]`
    data_start: u32,
    /// Instruction index of the first instruction
    text_start: u32,
    skeleton: Vec<Skeleton<'a>>,
}

impl<'a> AsmParser<'a> {
    pub fn new(src: &'a str) -> Self {
        AsmParser {
            src,
            symbols: SymbolTable::new(),
            // Code is the default, as most programs never declare `.TEXT`
            section: Section::Text,
            data: Vec::new(),
            data_start: 0,
            text_start: 0,
            skeleton: Vec::new(),
        }
    }

    /// Run all passes, consuming the parser.
    pub fn parse(mut self) -> Result<Program, Diagnostic> {
        self.scan()?;
        let instructions = self.resolve()?;
        self.validate(&instructions)?;
        Ok(Program::new(
            instructions,
            self.symbols,
            self.data,
            self.text_start as u16,
            self.data_start as u16,
        ))
    }

    /// First pass: labels, directives and the instruction skeleton.
    fn scan(&mut self) -> Result<(), Diagnostic> {
        for line in lexer::lines(self.src) {
            if let Some(label) = line.label {
                self.define_label(label, line.number)?;
            }
            let Some(stmt) = line.statement else {
                continue;
            };
            if stmt.text.starts_with('.') {
                self.directive(stmt, line.number)?;
            } else {
                self.instruction(stmt, line.number)?;
            }
        }
        Ok(())
    }

    fn data_cursor(&self) -> u32 {
        self.data_start + self.data.len() as u32
    }

    fn text_cursor(&self) -> u32 {
        self.text_start + self.skeleton.len() as u32
    }

    fn define_label(&mut self, label: Piece<'a>, line: usize) -> Result<(), Diagnostic> {
        let name = label.text;
        if !is_identifier(name) || name.parse::<Register>().is_ok() {
            return Err(AsmErrorKind::BadLabel {
                name: name.to_string(),
            }
            .at(line, label.column));
        }
        let (value, kind) = match self.section {
            Section::Data => {
                if self.data_cursor() >= ADDRESS_SPACE {
                    return Err(AsmErrorKind::DataOverflow.at(line, label.column));
                }
                (self.data_cursor(), SymbolKind::Data)
            }
            Section::Text => (self.text_cursor(), SymbolKind::Code),
        };
        self.insert(name, value as i32, kind, line, label.column)
    }

    fn insert(
        &mut self,
        name: &str,
        value: i32,
        kind: SymbolKind,
        line: usize,
        column: usize,
    ) -> Result<(), Diagnostic> {
        self.symbols
            .insert(Symbol {
                name: name.to_string(),
                value,
                kind,
                line,
            })
            .map_err(|first| {
                AsmErrorKind::DuplicateLabel {
                    name: name.to_string(),
                    first_line: first.line,
                }
                .at(line, column)
            })
    }

    fn instruction(&mut self, stmt: Piece<'a>, line: usize) -> Result<(), Diagnostic> {
        let (word, operands) = split_word(stmt);
        let Some(opcode) = Opcode::lookup(word.text) else {
            let suggestion = suggest(word.text, Opcode::vocabulary());
            return Err(AsmErrorKind::UnknownInstruction {
                name: word.text.to_string(),
            }
            .at(line, word.column)
            .with_suggestion(suggestion.map(str::to_string)));
        };
        if self.section != Section::Text {
            return Err(AsmErrorKind::InstructionOutsideText.at(line, word.column));
        }
        if self.text_cursor() > u16::MAX as u32 {
            return Err(AsmErrorKind::TextOverflow.at(line, word.column));
        }
        self.skeleton.push(Skeleton {
            opcode,
            line,
            column: word.column,
            source: stmt.text,
            operands,
        });
        Ok(())
    }

    fn directive(&mut self, stmt: Piece<'a>, line: usize) -> Result<(), Diagnostic> {
        let (word, args) = split_word(stmt);
        let Some(kind) = DirKind::lookup(word.text) else {
            let suggestion = suggest(word.text, DirKind::vocabulary());
            return Err(AsmErrorKind::UnknownDirective {
                name: word.text.to_string(),
            }
            .at(line, word.column)
            .with_suggestion(suggestion.map(str::to_string)));
        };
        if kind.emits_bytes() && self.section != Section::Data {
            return Err(AsmErrorKind::DataOutsideSection {
                directive: word.text.to_ascii_uppercase(),
            }
            .at(line, word.column));
        }
        let args = args.map(split_operands).unwrap_or_default();
        let wrong_args = |expected: &'static str| {
            AsmErrorKind::DirectiveArguments {
                directive: kind.name(),
                expected,
            }
            .at(line, word.column)
        };

        match kind {
            DirKind::Data | DirKind::Text => {
                if !args.is_empty() {
                    return Err(wrong_args("no arguments"));
                }
                self.section = if kind == DirKind::Data {
                    Section::Data
                } else {
                    Section::Text
                };
            }
            DirKind::Org => {
                let [arg] = args[..] else {
                    return Err(wrong_args("a single address"));
                };
                let target = self.value(arg, line, 0, u16::MAX as i32)? as u32;
                self.origin(target, line, word.column)?;
            }
            DirKind::Equ => {
                let (name, value) = match args[..] {
                    [name, value] => (name, value),
                    // `.EQU NAME 4`
                    [single] => match split_word(single) {
                        (name, Some(value)) => (name, value),
                        _ => return Err(wrong_args("a name and a value")),
                    },
                    _ => return Err(wrong_args("a name and a value")),
                };
                if !is_identifier(name.text) || name.text.parse::<Register>().is_ok() {
                    return Err(AsmErrorKind::BadLabel {
                        name: name.text.to_string(),
                    }
                    .at(line, name.column));
                }
                let value = self.value(value, line, MIN_VALUE, MAX_VALUE)?;
                self.insert(name.text, value, SymbolKind::Constant, line, name.column)?;
            }
            DirKind::Byte => {
                if args.is_empty() {
                    return Err(wrong_args("at least one value"));
                }
                for arg in args {
                    let value = self.value(arg, line, i8::MIN as i32, u8::MAX as i32)?;
                    self.data.push(value as u8);
                }
            }
            DirKind::Word => {
                if args.is_empty() {
                    return Err(wrong_args("at least one value"));
                }
                for arg in args {
                    let value = self.value(arg, line, MIN_VALUE, MAX_VALUE)?;
                    self.data.extend_from_slice(&(value as u16).to_le_bytes());
                }
            }
            DirKind::Ascii | DirKind::Asciz => {
                if args.is_empty() {
                    return Err(wrong_args("at least one quoted string"));
                }
                for arg in args {
                    let bytes = parse_string(arg.text).map_err(|error| {
                        AsmErrorKind::BadLiteral {
                            token: arg.text.to_string(),
                            error,
                        }
                        .at(line, arg.column)
                    })?;
                    self.data.extend(bytes);
                    if kind == DirKind::Asciz {
                        self.data.push(0);
                    }
                }
            }
            DirKind::Space => {
                let [arg] = args[..] else {
                    return Err(wrong_args("a single byte count"));
                };
                let count = self.value(arg, line, 0, ADDRESS_SPACE as i32)? as usize;
                self.data.resize(self.data.len() + count, 0);
            }
            DirKind::Align => {
                let [arg] = args[..] else {
                    return Err(wrong_args("a single power of two"));
                };
                let value = self.value(arg, line, MIN_VALUE, MAX_VALUE)?;
                if value <= 0 || !(value as u32).is_power_of_two() {
                    return Err(AsmErrorKind::BadAlignment { value }.at(line, arg.column));
                }
                let align = value as u32;
                let padding = (align - self.data_cursor() % align) % align;
                self.data.resize(self.data.len() + padding as usize, 0);
            }
        }

        if self.data_cursor() > ADDRESS_SPACE {
            return Err(AsmErrorKind::DataOverflow.at(line, word.column));
        }
        Ok(())
    }

    /// Reposition the cursor of the current section.
    fn origin(&mut self, target: u32, line: usize, column: usize) -> Result<(), Diagnostic> {
        match self.section {
            Section::Text => {
                if !self.skeleton.is_empty() {
                    return Err(AsmErrorKind::LateTextOrigin.at(line, column));
                }
                // Labels already placed at the empty section move along with it
                self.symbols
                    .rebase(SymbolKind::Code, self.text_start as i32, target as i32);
                self.text_start = target;
            }
            Section::Data if self.data.is_empty() => {
                self.symbols
                    .rebase(SymbolKind::Data, self.data_start as i32, target as i32);
                self.data_start = target;
            }
            Section::Data => {
                let cursor = self.data_cursor();
                if target < cursor {
                    return Err(AsmErrorKind::BackwardOrigin { cursor, target }.at(line, column));
                }
                self.data.resize(self.data.len() + (target - cursor) as usize, 0);
            }
        }
        Ok(())
    }

    /// Numeric literal or previously defined symbol, range checked.
    fn value(&self, arg: Piece<'_>, line: usize, min: i32, max: i32) -> Result<i32, Diagnostic> {
        let token = arg.text;
        let value = if is_identifier(token) {
            self.symbols
                .get(token)
                .map(|sym| sym.value)
                .ok_or_else(|| {
                    AsmErrorKind::UndefinedSymbol {
                        name: token.to_string(),
                    }
                    .at(line, arg.column)
                })?
        } else {
            parse_number(token).map_err(|error| {
                AsmErrorKind::BadLiteral {
                    token: token.to_string(),
                    error,
                }
                .at(line, arg.column)
            })?
        };
        check_range(value, min, max).map_err(|error| {
            AsmErrorKind::BadLiteral {
                token: token.to_string(),
                error,
            }
            .at(line, arg.column)
        })
    }

    /// Second pass: parse and type-check operands against the finished symbol table.
    fn resolve(&self) -> Result<Vec<Instruction>, Diagnostic> {
        let mut instructions = Vec::with_capacity(self.skeleton.len());
        for (index, skel) in self.skeleton.iter().enumerate() {
            let pieces = skel.operands.map(split_operands).unwrap_or_default();
            let mut operands: Vec<Operand> = Vec::with_capacity(pieces.len());
            for piece in &pieces {
                if piece.text.is_empty() {
                    return Err(AsmErrorKind::BadOperand {
                        token: String::new(),
                    }
                    .at(skel.line, piece.column));
                }
                let operand = parse_operand(piece.text, &self.symbols)
                    .map_err(|kind| kind.at(skel.line, piece.column))?;
                operands.push(operand);
            }
            check_operands(skel.opcode, &operands).map_err(|(position, kind)| {
                let column = match kind {
                    AsmErrorKind::OperandCount { .. } => skel.column,
                    _ => pieces.get(position).map_or(skel.column, |p| p.column),
                };
                kind.at(skel.line, column)
            })?;
            instructions.push(Instruction {
                opcode: skel.opcode,
                operands,
                line: skel.line,
                column: skel.column,
                source: skel.source.to_string(),
                address: (self.text_start + index as u32) as u16,
            });
        }
        Ok(instructions)
    }

    /// Every symbolic reference must name a defined symbol, and jumps must land on code.
    fn validate(&self, instructions: &[Instruction]) -> Result<(), Diagnostic> {
        for instr in instructions {
            for operand in &instr.operands {
                let Some(name) = operand.label_name() else {
                    continue;
                };
                match self.symbols.get(name) {
                    None => {
                        return Err(AsmErrorKind::UndefinedSymbol {
                            name: name.to_string(),
                        }
                        .at(instr.line, instr.column))
                    }
                    Some(sym) if instr.opcode.is_branch() && sym.kind != SymbolKind::Code => {
                        return Err(AsmErrorKind::NotCodeLabel {
                            name: name.to_string(),
                        }
                        .at(instr.line, instr.column))
                    }
                    Some(_) => (),
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::Address;

    fn assert_error(src: &str, code: &str, line: usize, column: usize) -> Diagnostic {
        let err = assemble(src).expect_err("source should fail to assemble");
        assert_eq!(err.code, code, "{}", err);
        assert_eq!((err.line, err.column), (line, column), "{}", err);
        err
    }

    #[test]
    fn parse_basic() {
        let program = assemble("MOV R0, #42\nHLT\n").unwrap();
        assert_eq!(program.len(), 2);
        let mov = &program.instructions()[0];
        assert_eq!(mov.opcode, Opcode::Mov);
        assert_eq!(
            mov.operands,
            vec![
                Operand::Register(Register::General(0)),
                Operand::Immediate(42)
            ]
        );
        assert_eq!((mov.line, mov.column, mov.address), (1, 1, 0));
        assert_eq!(program.instructions()[1].address, 1);
    }

    #[test]
    fn parse_twice_identical() {
        let src = ".DATA\nmsg: .ASCIZ \"hi\"\n.TEXT\nstart: MOV R0, msg\nSYS #2\nHLT\n";
        assert_eq!(assemble(src).unwrap(), assemble(src).unwrap());
    }

    #[test]
    fn parse_forward_and_backward_labels() {
        let src = "\
            JMP skip
        back:
            HLT
        skip:
            JMP back
        ";
        let program = assemble(src).unwrap();
        assert_eq!(program.resolve("skip"), Some(2));
        assert_eq!(program.resolve("BACK"), Some(1));
        assert_eq!(program.symbols().get("back").unwrap().kind, SymbolKind::Code);
    }

    #[test]
    fn parse_aliases_match_canonical() {
        let aliased = assemble("l: JNE l\nHALT\nSYSCALL #1").unwrap();
        let canonical = assemble("l: JNZ l\nHLT\nSYS #1").unwrap();
        let opcodes = |p: &Program| p.instructions().iter().map(|i| i.opcode).collect::<Vec<_>>();
        assert_eq!(opcodes(&aliased), opcodes(&canonical));
    }

    #[test]
    fn parse_data_directives() {
        let src = "\
.DATA
bytes:  .BYTE 1, -1, 'A', 0xff
words:  .WORD 0x1234, -2
str:    .ASCII \"ab\"
strz:   .ASCIZ 'c'
        .ALIGN 4
gap:    .SPACE 3
";
        let program = assemble(src).unwrap();
        assert_eq!(
            program.data(),
            &[1, 0xff, 65, 0xff, 0x34, 0x12, 0xfe, 0xff, b'a', b'b', b'c', 0, 0, 0, 0]
        );
        assert_eq!(program.resolve("words"), Some(4));
        assert_eq!(program.resolve("strz"), Some(10));
        assert_eq!(program.resolve("gap"), Some(12));
        assert_eq!(program.symbols().get("gap").unwrap().kind, SymbolKind::Data);
    }

    #[test]
    fn parse_origin() {
        let src = "\
.DATA
.ORG 0x100
a: .BYTE 1
.ORG 0x104
b: .BYTE 2
.TEXT
.ORG 10
start: LOAD R0, [b]
";
        let program = assemble(src).unwrap();
        assert_eq!(program.data_start(), 0x100);
        assert_eq!(program.data(), &[1, 0, 0, 0, 2]);
        assert_eq!(program.resolve("b"), Some(0x104));
        assert_eq!(program.text_start(), 10);
        assert_eq!(program.resolve("start"), Some(10));
        assert_eq!(program.instructions()[0].address, 10);
        assert_eq!(
            program.instructions()[0].operands[1],
            Operand::Memory(Address::Label("b".to_string()))
        );
    }

    #[test]
    fn labels_follow_leading_origin() {
        let src = "\
.DATA
a:
.ORG 0x100
    .BYTE 7
.TEXT
entry:
.ORG 4
    LOAD R0, [a]
";
        let program = assemble(src).unwrap();
        assert_eq!(program.resolve("a"), Some(0x100));
        assert_eq!(program.resolve("entry"), Some(4));
        assert_eq!(program.symbols().code_label_at(4).map(|s| s.name.as_str()), Some("entry"));
    }

    #[test]
    fn parse_constants() {
        let src = "\
.EQU SIZE, 8
.EQU BASE 0x200
MOV R0, #SIZE
MOV R1, SIZE
LOAD R2, [BASE]
LOAD R3, [R1+SIZE]
";
        let program = assemble(src).unwrap();
        let ops: Vec<_> = program.instructions().iter().map(|i| i.operands[1].clone()).collect();
        assert_eq!(ops[0], Operand::Immediate(8));
        assert_eq!(ops[1], Operand::Immediate(8));
        assert_eq!(ops[2], Operand::Memory(Address::Absolute(0x200)));
        assert_eq!(
            ops[3],
            Operand::Memory(Address::Register {
                base: Register::General(1),
                offset: 8
            })
        );
    }

    #[test]
    fn parse_duplicate_label() {
        let err = assert_error("a: NOP\nA: NOP\n", "asm::duplicate_label", 2, 1);
        assert!(err.message.contains("line 1"));
    }

    #[test]
    fn parse_unknown_instruction_suggests() {
        let err = assert_error("  MOVE R0, #1", "asm::unknown_instruction", 1, 3);
        assert_eq!(err.suggestion.as_deref(), Some("MOV"));
        let err = assert_error("NOP\n.TXT", "asm::unknown_directive", 2, 1);
        assert_eq!(err.suggestion.as_deref(), Some(".TEXT"));
    }

    #[test]
    fn parse_operand_errors() {
        assert_error("ADD R0", "asm::operand_count", 1, 1);
        assert_error("ADD #1, R0", "asm::operand_kind", 1, 5);
        assert_error("STORE R0, R1", "asm::operand_kind", 1, 7);
        assert_error("POP #3", "asm::operand_kind", 1, 5);
        assert_error("MOV R0, #0x1G", "asm::literal", 1, 9);
        assert_error("MOV R0,, #1", "asm::operand", 1, 8);
    }

    #[test]
    fn parse_undefined_reference_points_at_instruction() {
        assert_error("NOP\n   JMP nowhere\n", "asm::undefined_symbol", 2, 4);
        assert_error("LOAD R0, [missing]", "asm::undefined_symbol", 1, 1);
        assert_error(".DATA\nv: .BYTE 1\n.TEXT\nJMP v", "asm::undefined_symbol", 4, 1);
    }

    #[test]
    fn parse_misplaced() {
        assert_error(".BYTE 1", "asm::misplaced", 1, 1);
        assert_error(".DATA\nx: MOV R0, #1", "asm::misplaced", 2, 4);
        assert_error("NOP\n.ORG 4", "asm::misplaced", 2, 1);
        assert_error(".DATA\n.BYTE 1, 2\n.ORG 1", "asm::misplaced", 3, 1);
    }

    #[test]
    fn parse_directive_ranges() {
        assert_error(".DATA\n.BYTE 256", "asm::literal", 2, 7);
        assert_error(".DATA\n.ALIGN 3", "asm::directive", 2, 8);
        assert_error(".DATA\n.SPACE", "asm::directive", 2, 1);
        assert_error(".DATA\n.ORG 0xFFFF\n.WORD 1", "asm::data_overflow", 3, 1);
    }

    #[test]
    fn parse_bad_labels() {
        assert_error("R1: NOP", "asm::label", 1, 1);
        assert_error("9lives: NOP", "asm::label", 1, 1);
    }
}
