//! IMAP token types.

/// Token types produced by the lexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// Atom (unquoted string without special characters).
    Atom(&'a str),
    /// Quoted string, unescaped.
    QuotedString(String),
    /// Literal `{n}\r\n` followed by `n` raw bytes.
    Literal(Vec<u8>),
    /// Number that fits in `u32`.
    Number(u32),
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// Single space.
    Space,
    /// `*`
    Asterisk,
    /// `+`
    Plus,
    /// NIL.
    Nil,
    /// CRLF line ending.
    Crlf,
    /// End of input.
    Eof,
}
