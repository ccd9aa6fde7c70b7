//! Type-state IMAP client.
//!
//! `NotAuthenticated` → `Authenticated` → `Selected`; each state only
//! exposes the commands that are valid in it. One command is in flight at
//! a time: every method writes a command and reads until its tagged
//! completion before returning.

#![allow(clippy::missing_errors_doc)]

mod authenticated;
mod not_authenticated;
mod selected;
mod states;

use tokio::io::{AsyncRead, AsyncWrite};

pub use self::authenticated::{SelectError, SelectResult};
pub use self::states::{Authenticated, NotAuthenticated, Selected};
use super::framed::FramedStream;
use crate::command::{Command, TagGenerator};
use crate::parser::{Response, ResponseParser, UntaggedResponse};
use crate::types::{ResponseCode, Status};
use crate::{Error, Result};

/// IMAP client connection in state `State`.
pub struct Client<S, State> {
    stream: FramedStream<S>,
    tags: TagGenerator,
    capabilities: Vec<String>,
    state: State,
}

impl<S, State: std::fmt::Debug> std::fmt::Debug for Client<S, State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("capabilities", &self.capabilities)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Returns the server capabilities last seen.
    #[must_use]
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// Checks for a capability (case-insensitive).
    #[must_use]
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c.eq_ignore_ascii_case(name))
    }

    /// Literals larger than `limit` bytes are discarded and read as NIL.
    pub const fn set_max_literal_size(&mut self, limit: usize) {
        self.stream.set_max_literal_size(limit);
    }

    /// Sends LOGOUT and drops the connection. Errors after sending are ignored.
    pub async fn logout(mut self) -> Result<()> {
        let tag = self.tags.next_tag();
        self.stream
            .write_command(&Command::Logout.serialize(&tag))
            .await?;
        let _ = self.stream.read_until_tagged(&tag).await;
        Ok(())
    }

    /// Sends a command and returns every response up to and including its
    /// tagged completion, failing on NO/BAD/BYE.
    pub(crate) async fn execute(&mut self, command: &Command) -> Result<Vec<Vec<u8>>> {
        let tag = self.tags.next_tag();
        self.stream.write_command(&command.serialize(&tag)).await?;
        let responses = self.stream.read_until_tagged(&tag).await?;
        check_tagged_ok(&responses, &tag)?;
        self.absorb_capabilities(&responses);
        Ok(responses)
    }

    fn absorb_capabilities(&mut self, responses: &[Vec<u8>]) {
        for raw in responses {
            match ResponseParser::parse(raw) {
                Ok(
                    Response::Untagged(
                        UntaggedResponse::Capability(caps)
                        | UntaggedResponse::Ok {
                            code: Some(ResponseCode::Capability(caps)),
                            ..
                        },
                    )
                    | Response::Tagged {
                        code: Some(ResponseCode::Capability(caps)),
                        ..
                    },
                ) => self.capabilities = caps,
                _ => {}
            }
        }
    }

    fn transition<Next>(self, state: Next) -> Client<S, Next> {
        Client {
            stream: self.stream,
            tags: self.tags,
            capabilities: self.capabilities,
            state,
        }
    }
}

/// Checks the tagged completion at the end of `responses`.
///
/// An untagged BYE anywhere in the exchange wins over the tagged status:
/// the server is going away regardless of how the command ended.
fn check_tagged_ok(responses: &[Vec<u8>], tag: &str) -> Result<()> {
    for raw in responses {
        if let Ok(Response::Untagged(UntaggedResponse::Bye { text, .. })) =
            ResponseParser::parse(raw)
        {
            return Err(Error::Bye(text));
        }
    }

    let last = responses
        .last()
        .ok_or_else(|| Error::Protocol("missing tagged response".to_string()))?;

    match ResponseParser::parse(last)? {
        Response::Tagged {
            tag: got,
            status,
            text,
            ..
        } if got.as_str() == tag => match status {
            Status::Ok | Status::PreAuth => Ok(()),
            Status::No => Err(Error::No(text)),
            Status::Bad => Err(Error::Bad(text)),
            Status::Bye => Err(Error::Bye(text)),
        },
        _ => Err(Error::Protocol("missing tagged response".to_string())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn frames(lines: &[&str]) -> Vec<Vec<u8>> {
        lines.iter().map(|l| l.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_check_ok() {
        let responses = frames(&["* 3 EXISTS\r\n", "A0002 OK done\r\n"]);
        assert!(check_tagged_ok(&responses, "A0002").is_ok());
    }

    #[test]
    fn test_check_no() {
        let responses = frames(&["A0002 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n"]);
        let err = check_tagged_ok(&responses, "A0002").unwrap_err();
        assert!(matches!(err, Error::No(text) if text == "Invalid credentials"));
    }

    #[test]
    fn test_untagged_bye_wins() {
        let responses = frames(&["* BYE idle timeout\r\n", "A0002 OK done\r\n"]);
        assert!(matches!(
            check_tagged_ok(&responses, "A0002"),
            Err(Error::Bye(_))
        ));
    }

    #[test]
    fn test_wrong_tag() {
        let responses = frames(&["A0001 OK done\r\n"]);
        assert!(matches!(
            check_tagged_ok(&responses, "A0002"),
            Err(Error::Protocol(_))
        ));
    }
}
