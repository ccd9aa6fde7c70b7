//! Sans-I/O parser for IMAP server responses.
//!
//! - **Lexer**: tokenizes a response frame into atoms, strings, literals...
//! - **Response parser**: builds [`Response`] values from tokens
//!
//! ```
//! use mailsync_imap::parser::{Response, ResponseParser, UntaggedResponse};
//!
//! let response = ResponseParser::parse(b"* 12 EXISTS\r\n").unwrap();
//! assert!(matches!(response, Response::Untagged(UntaggedResponse::Exists(12))));
//! ```

pub mod lexer;
pub mod response;

pub use lexer::{Lexer, Token};
pub use response::{FetchItem, Response, ResponseParser, UntaggedResponse};
