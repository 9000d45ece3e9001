// Heavily inspired by the cursor in `rustc_lexer` and adapted to suit line-oriented assembly.
// See https://doc.rust-lang.org/beta/nightly-rustc/src/rustc_lexer/cursor.rs.html

/// Peekable iterator over a char sequence, tracking its byte position.
#[derive(Clone, Debug)]
pub struct Cursor<'a> {
    src: &'a str,
    /// Byte index into `src`
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(src: &'a str) -> Cursor<'a> {
        Cursor { src, pos: 0 }
    }

    /// Peek the next char without consuming it.
    pub fn first(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Peek the char after next without consuming anything.
    pub fn second(&self) -> Option<char> {
        let mut chars = self.rest().chars();
        chars.next();
        chars.next()
    }

    /// Move to the next char.
    pub fn bump(&mut self) -> Option<char> {
        let ch = self.first()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    /// Eat chars while predicate returns true or until end of input.
    pub fn take_while(&mut self, mut predicate: impl FnMut(char) -> bool) {
        while self.first().is_some_and(&mut predicate) {
            self.bump();
        }
    }

    /// Skip over a quoted literal, assuming the opening quote is next.
    ///
    /// Stops after the closing quote, or at end of input if unterminated.
    pub fn skip_quoted(&mut self) {
        let Some(quote) = self.bump() else {
            return;
        };
        while let Some(ch) = self.bump() {
            match ch {
                '\\' => {
                    self.bump();
                }
                c if c == quote => return,
                _ => (),
            }
        }
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    /// Input remaining after the cursor.
    pub fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    pub fn pos(&self) -> usize {
        self.pos
    }
}
