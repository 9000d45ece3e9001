use std::fmt;

use miette::{LabeledSpan, Report, Severity};

use crate::program::{Instruction, Program};

/// One rendered instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisassemblyLine {
    /// Instruction index.
    pub address: u16,
    /// First code label bound to `address`.
    pub label: Option<String>,
    /// Canonical rendering, eg. `LOAD R0, [BP-4]`.
    pub text: String,
    /// Source line, counting from 1.
    pub line: usize,
}

impl fmt::Display for DisassemblyLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self
            .label
            .as_ref()
            .map(|label| format!("{}:", label))
            .unwrap_or_default();
        write!(f, "0x{:04x}  {:<12}{}", self.address, label, self.text)
    }
}

/// Render every instruction of `program`. Nothing is executed.
pub fn disassemble(program: &Program) -> Vec<DisassemblyLine> {
    program
        .instructions()
        .iter()
        .map(|instr| DisassemblyLine {
            address: instr.address,
            label: program
                .symbols()
                .code_label_at(instr.address)
                .map(|sym| sym.name.clone()),
            text: instr.to_string(),
            line: instr.line,
        })
        .collect()
}

/// Report pointing at the statement for instruction `address`, with surrounding source.
pub fn line_context(src: &str, program: &Program, address: u16) -> Option<Report> {
    let instr = program.instruction_at(address)?;
    let span = statement_span(src, instr)?;
    let report = miette::miette!(
        severity = Severity::Advice,
        labels = vec![LabeledSpan::at(
            span,
            format!("Next instruction, at address 0x{:04x}", address),
        )],
        "",
    )
    .with_source_code(src.to_string());
    Some(report)
}

/// Byte range of the instruction's statement text within `src`.
fn statement_span(src: &str, instr: &Instruction) -> Option<std::ops::Range<usize>> {
    let line_start: usize = src
        .split_inclusive('\n')
        .take(instr.line - 1)
        .map(str::len)
        .sum();
    let start = line_start + instr.column - 1;
    let end = start + instr.source.len();
    (end <= src.len()).then_some(start..end)
}
