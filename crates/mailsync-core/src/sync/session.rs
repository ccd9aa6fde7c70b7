//! The IMAP session as seen by the sync engine.
//!
//! [`Connector`] opens an authenticated [`MailSession`]; the engine only
//! ever issues the handful of commands declared here. [`ImapConnector`]
//! backs both with the typestate client from `mailsync-imap`, and tests
//! substitute a scripted fake.

use std::future::Future;
use std::time::Duration;

use chrono::NaiveDate;
use mailsync_imap::{
    Authenticated, Client, Error, FetchAttribute, FetchItem, ImapStream, ListEntry, MailboxStatus,
    Result, SearchKey, SelectError, Selected, UidSet,
};
use mailsync_mime::Headers;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::account::Account;

/// One message as returned by `UID FETCH (UID FLAGS RFC822.SIZE BODY.PEEK[])`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedMessage {
    /// Message UID.
    pub uid: u32,
    /// Flags, e.g. `\Seen`.
    pub flags: Vec<String>,
    /// RFC822.SIZE.
    pub size: Option<u32>,
    /// Raw RFC 5322 message, `None` if the server sent NIL.
    pub body: Option<Vec<u8>>,
}

/// An authenticated session.
///
/// Errors are `mailsync_imap` errors; callers tell connection faults from
/// command failures with [`Error::is_connection_fault`].
pub trait MailSession: Send {
    /// `LIST "" "*"`.
    fn list_folders(&mut self) -> impl Future<Output = Result<Vec<ListEntry>>> + Send;

    /// Opens `folder` read-only.
    fn select(&mut self, folder: &str) -> impl Future<Output = Result<MailboxStatus>> + Send;

    /// `UID SEARCH OR UID <after_uid+1>:* SINCE <date>` in the selected
    /// folder. Every UID above `after_uid` is a candidate whatever its date.
    fn search_new(
        &mut self,
        after_uid: u32,
        since: NaiveDate,
    ) -> impl Future<Output = Result<Vec<u32>>> + Send;

    /// `UID FETCH 1:* (UID BODY.PEEK[HEADER.FIELDS (MESSAGE-ID)])`, returning
    /// each UID with its Message-ID if it has one.
    fn fetch_message_ids(
        &mut self,
    ) -> impl Future<Output = Result<Vec<(u32, Option<String>)>>> + Send;

    /// `UID FETCH <uids> (UID FLAGS RFC822.SIZE BODY.PEEK[])`.
    fn fetch_messages(
        &mut self,
        uids: &[u32],
    ) -> impl Future<Output = Result<Vec<FetchedMessage>>> + Send;

    /// Best-effort LOGOUT.
    fn logout(self) -> impl Future<Output = ()> + Send;
}

/// Opens sessions for accounts.
pub trait Connector: Send + Sync {
    /// Session type produced.
    type Session: MailSession;

    /// Connects and logs in.
    fn connect(&self, account: &Account) -> impl Future<Output = Result<Self::Session>> + Send;
}

/// Connects over TCP with the account's transport security.
#[derive(Debug, Clone, Copy)]
pub struct ImapConnector {
    command_timeout: Duration,
    max_message_bytes: usize,
}

impl ImapConnector {
    /// Creates a connector whose sessions bound every command by
    /// `command_timeout` and drop message bodies over `max_message_bytes`.
    #[must_use]
    pub const fn new(command_timeout: Duration, max_message_bytes: usize) -> Self {
        Self {
            command_timeout,
            max_message_bytes,
        }
    }
}

impl Connector for ImapConnector {
    type Session = ImapSession<ImapStream>;

    async fn connect(&self, account: &Account) -> Result<Self::Session> {
        let imap = &account.imap;
        let client = mailsync_imap::connect(&imap.host, imap.port, imap.security.into()).await?;
        let mut client = client.login(&imap.username, &imap.password).await?;
        client.set_max_literal_size(self.max_message_bytes);
        tracing::debug!(account = ?account.id, host = %imap.host, "logged in");
        Ok(ImapSession::new(client, self.command_timeout))
    }
}

enum SessionState<S> {
    Authenticated(Client<S, Authenticated>),
    Selected(Client<S, Selected>),
    Broken,
}

/// [`MailSession`] over a typestate client.
///
/// SELECT consumes the client; when it fails without keeping the
/// connection the session becomes unusable and every later call fails
/// with a protocol error, which the engine treats as a connection fault.
pub struct ImapSession<S> {
    state: SessionState<S>,
    command_timeout: Duration,
}

impl<S> std::fmt::Debug for ImapSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            SessionState::Authenticated(_) => "authenticated",
            SessionState::Selected(_) => "selected",
            SessionState::Broken => "broken",
        };
        f.debug_struct("ImapSession")
            .field("state", &state)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl<S> ImapSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps a logged-in client.
    pub const fn new(client: Client<S, Authenticated>, command_timeout: Duration) -> Self {
        Self {
            state: SessionState::Authenticated(client),
            command_timeout,
        }
    }

    fn selected_client(&mut self) -> Result<&mut Client<S, Selected>> {
        match &mut self.state {
            SessionState::Selected(client) => Ok(client),
            SessionState::Authenticated(_) => {
                Err(Error::Protocol("no mailbox selected".to_string()))
            }
            SessionState::Broken => Err(broken()),
        }
    }
}

fn broken() -> Error {
    Error::Protocol("session is no longer usable".to_string())
}

async fn bounded<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(limit))?
}

impl<S> MailSession for ImapSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn list_folders(&mut self) -> Result<Vec<ListEntry>> {
        let limit = self.command_timeout;
        match &mut self.state {
            SessionState::Authenticated(client) => bounded(limit, client.list("", "*")).await,
            SessionState::Selected(client) => bounded(limit, client.list("", "*")).await,
            SessionState::Broken => Err(broken()),
        }
    }

    async fn select(&mut self, folder: &str) -> Result<MailboxStatus> {
        let limit = self.command_timeout;
        let outcome = match std::mem::replace(&mut self.state, SessionState::Broken) {
            SessionState::Authenticated(client) => {
                tokio::time::timeout(limit, client.examine(folder)).await
            }
            SessionState::Selected(client) => {
                tokio::time::timeout(limit, client.examine(folder)).await
            }
            SessionState::Broken => return Err(broken()),
        };

        match outcome {
            Ok(Ok((client, status))) => {
                self.state = SessionState::Selected(client);
                Ok(status)
            }
            Ok(Err(SelectError { client, error })) => {
                if let Some(client) = client {
                    self.state = SessionState::Authenticated(client);
                }
                Err(error)
            }
            Err(_) => Err(Error::Timeout(limit)),
        }
    }

    async fn search_new(&mut self, after_uid: u32, since: NaiveDate) -> Result<Vec<u32>> {
        let limit = self.command_timeout;
        let key = match UidSet::from_start(after_uid.saturating_add(1)) {
            Some(above) => SearchKey::Or(
                Box::new(SearchKey::Uid(above)),
                Box::new(SearchKey::Since(since)),
            ),
            None => SearchKey::Since(since),
        };
        let client = self.selected_client()?;
        let uids = bounded(limit, client.uid_search(&key)).await?;
        Ok(uids.into_iter().map(mailsync_imap::Uid::get).collect())
    }

    async fn fetch_message_ids(&mut self) -> Result<Vec<(u32, Option<String>)>> {
        let limit = self.command_timeout;
        let client = self.selected_client()?;
        let attributes = [
            FetchAttribute::Uid,
            FetchAttribute::header_fields(&["MESSAGE-ID"]),
        ];
        let fetched = bounded(limit, client.uid_fetch(&UidSet::all(), &attributes)).await?;

        Ok(fetched
            .into_iter()
            .filter_map(|(_, items)| {
                let mut uid = None;
                let mut message_id = None;
                for item in items {
                    match item {
                        FetchItem::Uid(u) => uid = Some(u.get()),
                        FetchItem::Body { data: Some(data), .. } => {
                            message_id = Headers::parse(&String::from_utf8_lossy(&data))
                                .get("message-id")
                                .map(str::trim)
                                .filter(|id| !id.is_empty())
                                .map(String::from);
                        }
                        _ => {}
                    }
                }
                uid.map(|uid| (uid, message_id))
            })
            .collect())
    }

    async fn fetch_messages(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>> {
        let Some(set) = UidSet::from_uids(uids.iter().copied()) else {
            return Ok(Vec::new());
        };
        let attributes = [
            FetchAttribute::Uid,
            FetchAttribute::Flags,
            FetchAttribute::Rfc822Size,
            FetchAttribute::full_message(),
        ];
        // The batch as a whole is bounded by the fetcher.
        let client = self.selected_client()?;
        let fetched = client.uid_fetch(&set, &attributes).await?;

        Ok(fetched
            .into_iter()
            .filter_map(|(_, items)| {
                let mut message = FetchedMessage::default();
                for item in items {
                    match item {
                        FetchItem::Uid(uid) => message.uid = uid.get(),
                        FetchItem::Flags(flags) => message.flags = flags.to_strings(),
                        FetchItem::Rfc822Size(size) => message.size = Some(size),
                        FetchItem::Body { section, data, .. } if section.is_empty() => {
                            message.body = data;
                        }
                        _ => {}
                    }
                }
                // Unsolicited FETCH updates carry no UID.
                (message.uid != 0).then_some(message)
            })
            .collect())
    }

    async fn logout(self) {
        let limit = self.command_timeout;
        let result = match self.state {
            SessionState::Authenticated(client) => bounded(limit, client.logout()).await,
            SessionState::Selected(client) => bounded(limit, client.logout()).await,
            SessionState::Broken => Ok(()),
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "logout failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use mailsync_imap::NotAuthenticated;
    use tokio_test::io::{Builder, Mock};

    use super::*;

    async fn session(mock: Mock) -> ImapSession<Mock> {
        let client: Client<_, NotAuthenticated> = Client::from_stream(mock).await.unwrap();
        let client = client.login("u", "p").await.unwrap();
        ImapSession::new(client, Duration::from_secs(30))
    }

    fn login(builder: &mut Builder) -> &mut Builder {
        builder
            .read(b"* OK ready\r\n")
            .write(b"A0000 LOGIN u p\r\n")
            .read(b"A0000 OK logged in\r\n")
    }

    #[tokio::test]
    async fn test_list_then_select_then_fetch() {
        let mock = login(&mut Builder::new())
            .write(b"A0001 LIST \"\" \"*\"\r\n")
            .read(b"* LIST (\\HasNoChildren) \"/\" INBOX\r\n")
            .read(b"A0001 OK done\r\n")
            .write(b"A0002 EXAMINE INBOX\r\n")
            .read(b"* 1 EXISTS\r\n* OK [UIDVALIDITY 9] ok\r\n* OK [UIDNEXT 12] ok\r\n")
            .read(b"A0002 OK [READ-ONLY] done\r\n")
            .write(b"A0003 UID FETCH 11 (UID FLAGS RFC822.SIZE BODY.PEEK[])\r\n")
            .read(b"* 1 FETCH (UID 11 FLAGS (\\Seen) RFC822.SIZE 8 BODY[] {8}\r\nA: b\r\n\r\n)\r\n")
            .read(b"A0003 OK done\r\n")
            .build();
        let mut session = session(mock).await;

        let folders = session.list_folders().await.unwrap();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].name, "INBOX");

        let status = session.select("INBOX").await.unwrap();
        assert_eq!(status.uid_validity.unwrap().get(), 9);

        let messages = session.fetch_messages(&[11]).await.unwrap();
        assert_eq!(
            messages,
            vec![FetchedMessage {
                uid: 11,
                flags: vec!["\\Seen".to_string()],
                size: Some(8),
                body: Some(b"A: b\r\n\r\n".to_vec()),
            }]
        );
    }

    #[tokio::test]
    async fn test_fetch_message_ids() {
        let mock = login(&mut Builder::new())
            .write(b"A0001 EXAMINE INBOX\r\n")
            .read(b"* 2 EXISTS\r\nA0001 OK [READ-ONLY] done\r\n")
            .write(b"A0002 UID FETCH 1:* (UID BODY.PEEK[HEADER.FIELDS (MESSAGE-ID)])\r\n")
            .read(b"* 1 FETCH (UID 3 BODY[HEADER.FIELDS (MESSAGE-ID)] {21}\r\nMessage-ID: <a@x>\r\n\r\n)\r\n")
            .read(b"* 2 FETCH (UID 4 BODY[HEADER.FIELDS (MESSAGE-ID)] {2}\r\n\r\n)\r\n")
            .read(b"A0002 OK done\r\n")
            .build();
        let mut session = session(mock).await;
        session.select("INBOX").await.unwrap();

        let ids = session.fetch_message_ids().await.unwrap();
        assert_eq!(ids, vec![(3, Some("<a@x>".to_string())), (4, None)]);
    }

    #[tokio::test]
    async fn test_rejected_select_keeps_session() {
        let mock = login(&mut Builder::new())
            .write(b"A0001 EXAMINE Missing\r\n")
            .read(b"A0001 NO no such folder\r\n")
            .write(b"A0002 LIST \"\" \"*\"\r\n")
            .read(b"A0002 OK done\r\n")
            .build();
        let mut session = session(mock).await;

        let err = session.select("Missing").await.unwrap_err();
        assert!(!err.is_connection_fault());
        assert!(session.list_folders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_requires_selection() {
        let mock = login(&mut Builder::new()).build();
        let mut session = session(mock).await;
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(session.search_new(100, date).await.is_err());
    }

    #[tokio::test]
    async fn test_search_new_includes_every_uid_above_cursor() {
        let mock = login(&mut Builder::new())
            .write(b"A0001 EXAMINE Archive\r\n")
            .read(b"* 3 EXISTS\r\nA0001 OK [READ-ONLY] done\r\n")
            .write(b"A0002 UID SEARCH OR UID 101:* SINCE 1-Mar-2024\r\n")
            .read(b"* SEARCH 100 101 102\r\n")
            .read(b"A0002 OK done\r\n")
            .build();
        let mut session = session(mock).await;
        session.select("Archive").await.unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let uids = session.search_new(100, date).await.unwrap();
        assert_eq!(uids, vec![100, 101, 102]);
    }
}
