//! FETCH response parsing.

use crate::parser::lexer::{Lexer, Token};
use crate::types::Uid;
use crate::{Error, Result};

use super::helpers::parse_flag_list;
use super::types::FetchItem;

/// Parses the parenthesized data list of a FETCH response.
pub fn parse_fetch_response(lexer: &mut Lexer<'_>) -> Result<Vec<FetchItem>> {
    lexer.expect(Token::LParen)?;
    let mut items = Vec::new();

    loop {
        match lexer.next_token()? {
            Token::RParen | Token::Eof => break,
            Token::Atom(name) => match name.to_ascii_uppercase().as_str() {
                "FLAGS" => {
                    lexer.expect_space()?;
                    items.push(FetchItem::Flags(parse_flag_list(lexer)?));
                }
                "UID" => {
                    lexer.expect_space()?;
                    let n = lexer.read_number()?;
                    let uid = Uid::new(n).ok_or_else(|| Error::Parse {
                        position: lexer.position(),
                        message: "UID cannot be 0".to_string(),
                    })?;
                    items.push(FetchItem::Uid(uid));
                }
                "RFC822.SIZE" => {
                    lexer.expect_space()?;
                    items.push(FetchItem::Rfc822Size(lexer.read_number()?));
                }
                "INTERNALDATE" => {
                    lexer.expect_space()?;
                    if let Token::QuotedString(date) = lexer.next_token()? {
                        items.push(FetchItem::InternalDate(date));
                    }
                }
                // Bare `BODY (...)` is a body structure, not content.
                "BODY" if lexer.peek() != Some(b'[') => skip_fetch_value(lexer)?,
                "BODY" | "BODY.PEEK" | "RFC822" => {
                    let (section, origin) = parse_section_and_origin(lexer);
                    lexer.expect_space()?;
                    let data = lexer.read_nstring()?;
                    items.push(FetchItem::Body {
                        section,
                        origin,
                        data,
                    });
                }
                _ => skip_fetch_value(lexer)?,
            },
            _ => {}
        }
    }

    Ok(items)
}

/// Reads `[section]` and `<origin>` following `BODY`.
///
/// The section is taken verbatim up to the closing bracket, so nested
/// lists such as `HEADER.FIELDS (MESSAGE-ID)` survive intact.
fn parse_section_and_origin(lexer: &mut Lexer<'_>) -> (String, Option<u32>) {
    let mut section = String::new();
    if lexer.peek() == Some(b'[') {
        lexer.advance();
        while let Some(b) = lexer.advance() {
            if b == b']' {
                break;
            }
            section.push(char::from(b));
        }
    }

    let mut origin = None;
    if lexer.peek() == Some(b'<') {
        lexer.advance();
        let mut digits = String::new();
        while let Some(b) = lexer.advance() {
            if b == b'>' {
                break;
            }
            digits.push(char::from(b));
        }
        origin = digits.parse().ok();
    }

    (section, origin)
}

/// Skips the value of a data item we do not interpret (ENVELOPE, MODSEQ...).
fn skip_fetch_value(lexer: &mut Lexer<'_>) -> Result<()> {
    if lexer.peek() == Some(b' ') {
        lexer.advance();
    }

    let mut depth = 0usize;
    loop {
        match lexer.peek() {
            Some(b'(') => {
                depth += 1;
                lexer.advance();
            }
            Some(b')') if depth == 0 => break,
            Some(b')') => {
                depth -= 1;
                lexer.advance();
                if depth == 0 {
                    break;
                }
            }
            Some(b' ') if depth == 0 => break,
            // Strings and literals may contain parens; consume them whole.
            Some(b'"' | b'{') => {
                lexer.next_token()?;
            }
            Some(_) => {
                lexer.advance();
            }
            None => break,
        }
    }

    Ok(())
}
