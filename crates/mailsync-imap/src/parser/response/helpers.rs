//! Parser helper functions.

use crate::parser::lexer::{Lexer, Token};
use crate::types::{Flag, Flags, ListEntry, MailboxAttribute, ResponseCode, Uid, UidValidity};
use crate::{Error, Result};

/// Parses a bracketed response code. The lexer is positioned on `[`.
pub fn parse_response_code(lexer: &mut Lexer<'_>) -> Result<ResponseCode> {
    lexer.expect(Token::LBracket)?;

    let atom = lexer.read_atom()?;
    let code = match atom.to_ascii_uppercase().as_str() {
        "ALERT" => ResponseCode::Alert,
        "READ-ONLY" => ResponseCode::ReadOnly,
        "READ-WRITE" => ResponseCode::ReadWrite,
        "UIDNEXT" => {
            lexer.expect_space()?;
            let n = lexer.read_number()?;
            ResponseCode::UidNext(Uid::new(n).ok_or_else(|| lexer.error("Invalid UIDNEXT 0"))?)
        }
        "UIDVALIDITY" => {
            lexer.expect_space()?;
            let n = lexer.read_number()?;
            ResponseCode::UidValidity(
                UidValidity::new(n).ok_or_else(|| lexer.error("Invalid UIDVALIDITY 0"))?,
            )
        }
        "CAPABILITY" => ResponseCode::Capability(parse_capability_data(lexer)?),
        _ => ResponseCode::Other(atom.to_string()),
    };

    // Skip any arguments we do not interpret.
    while lexer.peek().is_some_and(|b| b != b']') {
        lexer.advance();
    }
    lexer.expect(Token::RBracket)?;

    Ok(code)
}

/// Parses space-separated capability atoms.
pub fn parse_capability_data(lexer: &mut Lexer<'_>) -> Result<Vec<String>> {
    let mut caps = Vec::new();
    while lexer.peek() == Some(b' ') {
        lexer.advance();
        if let Token::Atom(s) = lexer.next_token()? {
            caps.push(s.to_string());
        }
    }
    Ok(caps)
}

/// Parses a parenthesized flag list.
pub fn parse_flag_list(lexer: &mut Lexer<'_>) -> Result<Flags> {
    lexer.expect(Token::LParen)?;
    let mut flags = Flags::new();

    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Atom(s) => flags.insert(Flag::parse(s)),
            Token::Space => {}
            // `\*` lexes as `\` followed by `*`.
            Token::Asterisk => flags.insert(Flag::Keyword("\\*".to_string())),
            token => {
                return Err(Error::Parse {
                    position: lexer.position(),
                    message: format!("Unexpected token in flag list: {token:?}"),
                });
            }
        }
    }

    Ok(flags)
}

/// Parses the body of a LIST response: `(attrs) delimiter name`.
pub fn parse_list_response(lexer: &mut Lexer<'_>) -> Result<ListEntry> {
    lexer.expect(Token::LParen)?;
    let mut attributes = Vec::new();

    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Atom(s) => attributes.push(MailboxAttribute::parse(s)),
            Token::Space => {}
            token => {
                return Err(Error::Parse {
                    position: lexer.position(),
                    message: format!("Unexpected token in LIST attributes: {token:?}"),
                });
            }
        }
    }

    lexer.expect_space()?;

    let delimiter = match lexer.next_token()? {
        Token::Nil => None,
        Token::QuotedString(s) => s.chars().next(),
        token => {
            return Err(Error::Parse {
                position: lexer.position(),
                message: format!("Expected delimiter, got {token:?}"),
            });
        }
    };

    lexer.expect_space()?;
    let name = lexer.read_astring()?;

    Ok(ListEntry {
        attributes,
        delimiter,
        name,
    })
}

/// Parses the numbers of a SEARCH response.
pub fn parse_search_response(lexer: &mut Lexer<'_>) -> Result<Vec<u32>> {
    let mut nums = Vec::new();

    while lexer.peek() == Some(b' ') {
        lexer.advance();
        match lexer.next_token()? {
            Token::Number(n) if n > 0 => nums.push(n),
            // ESEARCH-style trailers such as `(MODSEQ 123)` are ignored.
            Token::LParen => break,
            _ => {}
        }
    }

    Ok(nums)
}
