//! IMAP lexer for tokenizing server responses.
//!
//! Operates on a complete response frame (as produced by
//! [`FramedStream::read_response`](crate::connection::FramedStream::read_response)),
//! so literal payloads are always fully present in the input.

#![allow(clippy::missing_errors_doc)]

mod token;

pub use token::Token;

use crate::{Error, Result};

/// IMAP lexer state.
pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given input.
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Returns the current position in the input.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Returns the remaining input.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.input[self.pos..]
    }

    /// Returns true if at end of input.
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Peeks at the current byte without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    /// Advances by one byte and returns it.
    pub fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    /// Skips `n` bytes, clamped to the end of input.
    pub fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.input.len());
    }

    /// Reads the next token.
    pub fn next_token(&mut self) -> Result<Token<'a>> {
        let Some(byte) = self.peek() else {
            return Ok(Token::Eof);
        };

        let single = match byte {
            b' ' => Some(Token::Space),
            b'(' => Some(Token::LParen),
            b')' => Some(Token::RParen),
            b'[' => Some(Token::LBracket),
            b']' => Some(Token::RBracket),
            b'*' => Some(Token::Asterisk),
            b'+' => Some(Token::Plus),
            _ => None,
        };
        if let Some(token) = single {
            self.advance();
            return Ok(token);
        }

        match byte {
            b'\r' if self.peek_at(1) == Some(b'\n') => {
                self.skip(2);
                Ok(Token::Crlf)
            }
            b'"' => self.read_quoted_string(),
            b'{' => self.read_literal(),
            _ if is_atom_char(byte) => Ok(self.read_atom_or_number()),
            _ => Err(self.error(&format!("Unexpected character: {byte:#04x}"))),
        }
    }

    fn read_quoted_string(&mut self) -> Result<Token<'a>> {
        self.advance();
        let mut value = Vec::new();

        loop {
            match self.advance() {
                Some(b'"') => break,
                Some(b'\\') => match self.advance() {
                    Some(c @ (b'"' | b'\\')) => value.push(c),
                    Some(c) => return Err(self.error(&format!("Invalid escape: \\{c}"))),
                    None => return Err(self.error("Unexpected EOF in quoted string")),
                },
                Some(c) => value.push(c),
                None => return Err(self.error("Unexpected EOF in quoted string")),
            }
        }

        Ok(Token::QuotedString(
            String::from_utf8_lossy(&value).into_owned(),
        ))
    }

    /// Reads `{n}` or `{n+}`, the CRLF, and the `n` payload bytes.
    fn read_literal(&mut self) -> Result<Token<'a>> {
        self.advance();
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.advance();
        }
        let digits = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("Invalid literal size"))?;
        let size: usize = digits
            .parse()
            .map_err(|_| self.error("Invalid literal size number"))?;

        if self.peek() == Some(b'+') {
            self.advance();
        }
        if self.advance() != Some(b'}') {
            return Err(self.error("Expected } after literal size"));
        }
        if self.advance() != Some(b'\r') || self.advance() != Some(b'\n') {
            return Err(self.error("Expected CRLF after literal size"));
        }
        if self.pos + size > self.input.len() {
            return Err(self.error("Incomplete literal data"));
        }

        let data = self.input[self.pos..self.pos + size].to_vec();
        self.skip(size);
        Ok(Token::Literal(data))
    }

    /// Reads an atom; all-digit atoms that fit in `u32` become numbers.
    fn read_atom_or_number(&mut self) -> Token<'a> {
        let start = self.pos;
        while self.peek().is_some_and(is_atom_char) {
            self.advance();
        }

        let raw = &self.input[start..self.pos];
        // Atom chars are ASCII, so this cannot fail.
        let s = std::str::from_utf8(raw).unwrap_or_default();

        if raw.iter().all(u8::is_ascii_digit)
            && let Ok(n) = s.parse::<u32>()
        {
            return Token::Number(n);
        }
        if s.eq_ignore_ascii_case("NIL") {
            Token::Nil
        } else {
            Token::Atom(s)
        }
    }

    /// Creates a parse error at the current position.
    pub(crate) fn error(&self, message: &str) -> Error {
        Error::Parse {
            position: self.pos,
            message: message.to_string(),
        }
    }

    /// Expects and consumes a token of the same kind as `expected`.
    #[allow(clippy::needless_pass_by_value)]
    pub fn expect(&mut self, expected: Token<'_>) -> Result<()> {
        let token = self.next_token()?;
        if std::mem::discriminant(&token) == std::mem::discriminant(&expected) {
            Ok(())
        } else {
            Err(self.error(&format!("Expected {expected:?}, got {token:?}")))
        }
    }

    /// Expects and consumes a space.
    pub fn expect_space(&mut self) -> Result<()> {
        self.expect(Token::Space)
    }

    /// Reads an astring (atom, quoted string or literal).
    pub fn read_astring(&mut self) -> Result<String> {
        match self.next_token()? {
            Token::Atom(s) => Ok(s.to_string()),
            Token::Number(n) => Ok(n.to_string()),
            Token::QuotedString(s) => Ok(s),
            Token::Literal(data) => Ok(String::from_utf8_lossy(&data).into_owned()),
            token => Err(self.error(&format!("Expected astring, got {token:?}"))),
        }
    }

    /// Reads an nstring (NIL, quoted string or literal).
    pub fn read_nstring(&mut self) -> Result<Option<Vec<u8>>> {
        match self.next_token()? {
            Token::Nil => Ok(None),
            Token::QuotedString(s) => Ok(Some(s.into_bytes())),
            Token::Literal(data) => Ok(Some(data)),
            token => Err(self.error(&format!("Expected nstring, got {token:?}"))),
        }
    }

    /// Reads a number.
    pub fn read_number(&mut self) -> Result<u32> {
        match self.next_token()? {
            Token::Number(n) => Ok(n),
            token => Err(self.error(&format!("Expected number, got {token:?}"))),
        }
    }

    /// Reads an atom.
    pub fn read_atom(&mut self) -> Result<&'a str> {
        match self.next_token()? {
            Token::Atom(s) => Ok(s),
            token => Err(self.error(&format!("Expected atom, got {token:?}"))),
        }
    }

    /// Reads the rest of the line as text and consumes the CRLF.
    pub fn read_text_until_crlf(&mut self) -> String {
        let remaining = self.remaining();
        let end = remaining
            .windows(2)
            .position(|w| w == b"\r\n")
            .unwrap_or(remaining.len());
        self.skip(end + 2);
        String::from_utf8_lossy(&remaining[..end]).into_owned()
    }
}

/// Returns true if the byte may appear in an atom.
///
/// `\` is accepted so that flags such as `\Seen` lex as a single atom,
/// and `.` so that `RFC822.SIZE` does.
#[must_use]
pub const fn is_atom_char(b: u8) -> bool {
    matches!(b,
        0x21 | 0x23..=0x24 | 0x26..=0x27 |
        0x2B..=0x5A |
        0x5C |
        0x5E..=0x7A |
        0x7C | 0x7E
    )
}
