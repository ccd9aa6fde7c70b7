//! Authenticated state: LIST and mailbox selection.

use tokio::io::{AsyncRead, AsyncWrite};

use super::Client;
use super::states::{Authenticated, Selected};
use crate::command::Command;
use crate::parser::{Response, ResponseParser, UntaggedResponse};
use crate::types::{ListEntry, MailboxStatus, ResponseCode};
use crate::{Error, Result};

/// Outcome of EXAMINE.
pub type SelectResult<S> = std::result::Result<(Client<S, Selected>, MailboxStatus), SelectError<S>>;

/// A failed EXAMINE.
///
/// When the server merely refused the mailbox the connection is left in the
/// authenticated state (RFC 3501 §6.3.1) and the client is handed back.
pub struct SelectError<S> {
    /// The still-usable client, or `None` if the connection broke.
    pub client: Option<Client<S, Authenticated>>,
    /// What went wrong.
    pub error: Error,
}

impl<S> std::fmt::Debug for SelectError<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectError")
            .field("recoverable", &self.client.is_some())
            .field("error", &self.error)
            .finish()
    }
}

impl<S> std::fmt::Display for SelectError<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl<S> From<SelectError<S>> for Error {
    fn from(err: SelectError<S>) -> Self {
        err.error
    }
}

impl<S> Client<S, Authenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Lists mailboxes matching `pattern` under `reference`.
    pub async fn list(&mut self, reference: &str, pattern: &str) -> Result<Vec<ListEntry>> {
        list_mailboxes(self, reference, pattern).await
    }

    /// Opens a mailbox read-only. Nothing done in this state changes flags.
    pub async fn examine(self, mailbox: &str) -> SelectResult<S> {
        open_mailbox(self, mailbox).await
    }
}

/// Runs LIST in either authenticated state.
pub(super) async fn list_mailboxes<S, State>(
    client: &mut Client<S, State>,
    reference: &str,
    pattern: &str,
) -> Result<Vec<ListEntry>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let responses = client
        .execute(&Command::List {
            reference: reference.to_string(),
            pattern: pattern.to_string(),
        })
        .await?;

    Ok(responses
        .iter()
        .filter_map(|raw| match ResponseParser::parse(raw) {
            Ok(Response::Untagged(UntaggedResponse::List(entry))) => Some(entry),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unparseable LIST line");
                None
            }
        })
        .collect())
}

/// Runs EXAMINE from any state and moves the client to `Selected`.
pub(super) async fn open_mailbox<S, State>(
    mut client: Client<S, State>,
    mailbox: &str,
) -> SelectResult<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let command = Command::Examine {
        mailbox: mailbox.to_string(),
    };
    let responses = match client.execute(&command).await {
        Ok(responses) => responses,
        Err(error) => {
            let client = (!error.is_connection_fault()).then(|| client.transition(Authenticated));
            return Err(SelectError { client, error });
        }
    };
    let status = parse_mailbox_status(&responses);

    tracing::debug!(
        mailbox,
        exists = status.exists,
        uid_validity = ?status.uid_validity,
        "mailbox opened"
    );

    let selected = Selected {
        mailbox: mailbox.to_string(),
        status: status.clone(),
    };
    Ok((client.transition(selected), status))
}

/// Collects EXISTS, RECENT, FLAGS and the UIDVALIDITY/UIDNEXT codes.
pub(super) fn parse_mailbox_status(responses: &[Vec<u8>]) -> MailboxStatus {
    let mut status = MailboxStatus::default();

    for raw in responses {
        let code = match ResponseParser::parse(raw) {
            Ok(Response::Untagged(UntaggedResponse::Exists(n))) => {
                status.exists = n;
                continue;
            }
            Ok(Response::Untagged(UntaggedResponse::Recent(n))) => {
                status.recent = n;
                continue;
            }
            Ok(Response::Untagged(UntaggedResponse::Flags(flags))) => {
                status.flags = flags;
                continue;
            }
            Ok(
                Response::Untagged(UntaggedResponse::Ok { code, .. })
                | Response::Tagged { code, .. },
            ) => code,
            _ => continue,
        };

        match code {
            Some(ResponseCode::UidValidity(v)) => status.uid_validity = Some(v),
            Some(ResponseCode::UidNext(uid)) => status.uid_next = Some(uid),
            Some(ResponseCode::ReadOnly) => status.read_only = true,
            Some(ResponseCode::ReadWrite) => status.read_only = false,
            _ => {}
        }
    }

    status
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mailbox_status() {
        let responses: Vec<Vec<u8>> = [
            "* 172 EXISTS\r\n",
            "* 1 RECENT\r\n",
            "* FLAGS (\\Answered \\Flagged \\Seen)\r\n",
            "* OK [UIDVALIDITY 3857529045] UIDs valid\r\n",
            "* OK [UIDNEXT 4392] Predicted next UID\r\n",
            "A0002 OK [READ-ONLY] EXAMINE completed\r\n",
        ]
        .iter()
        .map(|s| s.as_bytes().to_vec())
        .collect();

        let status = parse_mailbox_status(&responses);
        assert_eq!(status.exists, 172);
        assert_eq!(status.recent, 1);
        assert_eq!(status.flags.len(), 3);
        assert_eq!(status.uid_validity.unwrap().get(), 3_857_529_045);
        assert_eq!(status.uid_next.unwrap().get(), 4392);
        assert!(status.read_only);
    }

    #[tokio::test]
    async fn test_rejected_select_returns_client() {
        use tokio_test::io::Builder;

        use crate::connection::client::NotAuthenticated;

        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 LOGIN u p\r\n")
            .read(b"A0000 OK logged in\r\n")
            .write(b"A0001 EXAMINE Gone\r\n")
            .read(b"A0001 NO no such mailbox\r\n")
            .write(b"A0002 EXAMINE INBOX\r\n")
            .read(b"* 0 EXISTS\r\nA0002 OK [READ-ONLY] done\r\n")
            .build();

        let client: Client<_, NotAuthenticated> = Client::from_stream(mock).await.unwrap();
        let client = client.login("u", "p").await.unwrap();

        let rejected = client.examine("Gone").await.unwrap_err();
        assert!(matches!(rejected.error, Error::No(_)));
        let client = rejected.client.unwrap();

        let (client, status) = client.examine("INBOX").await.unwrap();
        assert_eq!(status.exists, 0);
        assert_eq!(client.selected().mailbox(), "INBOX");
    }
}
