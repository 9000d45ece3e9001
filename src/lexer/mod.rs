use lazy_static::lazy_static;
use regex::Regex;

use self::cursor::Cursor;

pub mod cursor;

lazy_static! {
    /// Anything up to a colon at the start of a line is a label candidate.
    static ref LABEL_PREFIX: Regex = Regex::new(r#"^([^\s:;,'"\[\]#]+)\s*:"#).unwrap();
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Test if a token is a valid label or constant name.
pub fn is_identifier(token: &str) -> bool {
    IDENTIFIER.is_match(token)
}

/// A piece of a line, with its 1-based column.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Piece<'a> {
    pub text: &'a str,
    pub column: usize,
}

impl<'a> Piece<'a> {
    fn new(line: &'a str, start: usize, end: usize) -> Self {
        Piece {
            text: &line[start..end],
            column: start + 1,
        }
    }
}

/// A non-blank source line, split into its optional label and remaining statement.
#[derive(Clone, Debug)]
pub struct Line<'a> {
    /// Line number, counting from 1.
    pub number: usize,
    /// Whole line, without comment or trailing whitespace.
    pub code: &'a str,
    pub label: Option<Piece<'a>>,
    /// Instruction or directive following the label, if any.
    pub statement: Option<Piece<'a>>,
}

/// Iterate over lines that contain something other than whitespace or comments.
pub fn lines(src: &str) -> impl Iterator<Item = Line<'_>> {
    src.lines().enumerate().filter_map(|(i, raw)| {
        let code = strip_comment(raw).trim_end();
        if code.trim_start().is_empty() {
            return None;
        }
        let (label, statement) = split_label(code);
        Some(Line {
            number: i + 1,
            code,
            label,
            statement,
        })
    })
}

/// Remove a trailing `;` or `//` comment, ignoring markers inside quotes.
pub fn strip_comment(line: &str) -> &str {
    let mut cur = Cursor::new(line);
    while let Some(ch) = cur.first() {
        match ch {
            '\'' | '"' => cur.skip_quoted(),
            ';' => break,
            '/' if cur.second() == Some('/') => break,
            _ => {
                cur.bump();
            }
        }
    }
    &line[..cur.pos()]
}

fn split_label(code: &str) -> (Option<Piece<'_>>, Option<Piece<'_>>) {
    let start = code.len() - code.trim_start().len();
    let Some(caps) = LABEL_PREFIX.captures(&code[start..]) else {
        return (None, Some(Piece::new(code, start, code.len())));
    };
    let name = caps.get(1).expect("label group always participates");
    let label = Piece::new(code, start + name.start(), start + name.end());

    let after = start + caps.get(0).expect("whole match").end();
    let rest = &code[after..];
    let rest_start = after + (rest.len() - rest.trim_start().len());
    let statement = (rest_start < code.len()).then(|| Piece::new(code, rest_start, code.len()));
    (Some(label), statement)
}

/// Split a statement into its leading word and the remainder.
pub fn split_word(piece: Piece<'_>) -> (Piece<'_>, Option<Piece<'_>>) {
    let text = piece.text;
    let end = text.find(char::is_whitespace).unwrap_or(text.len());
    let word = Piece {
        text: &text[..end],
        column: piece.column,
    };
    let rest = &text[end..];
    let offset = end + (rest.len() - rest.trim_start().len());
    let rest = (offset < text.len()).then(|| Piece {
        text: text[offset..].trim_end(),
        column: piece.column + offset,
    });
    (word, rest)
}

/// Split an operand list on commas, ignoring commas inside quotes or brackets.
///
/// Empty operands (eg. `a,,b` or a trailing comma) are kept so they can be reported.
pub fn split_operands(piece: Piece<'_>) -> Vec<Piece<'_>> {
    let text = piece.text;
    let mut operands = Vec::new();
    let mut cur = Cursor::new(text);
    let mut start = 0;
    let mut depth = 0u32;

    let mut push = |start: usize, end: usize| {
        let raw = &text[start..end];
        let lead = raw.len() - raw.trim_start().len();
        operands.push(Piece {
            text: raw.trim(),
            column: piece.column + start + lead,
        });
    };

    while let Some(ch) = cur.first() {
        match ch {
            '\'' | '"' => {
                cur.skip_quoted();
                continue;
            }
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                push(start, cur.pos());
                start = cur.pos() + 1;
            }
            _ => (),
        }
        cur.bump();
    }
    push(start, text.len());
    operands
}
