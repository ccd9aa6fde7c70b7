//! Scripted fake server for engine tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use mailsync_imap::{Error, ListEntry, MailboxAttribute, MailboxStatus, Result, Uid, UidValidity};
use mailsync_mime::Headers;

use super::session::{Connector, FetchedMessage, MailSession};
use crate::account::Account;

#[derive(Debug, Clone)]
pub struct FakeMessage {
    pub raw: Vec<u8>,
    pub date: NaiveDate,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FakeMailbox {
    pub name: String,
    pub attributes: Vec<MailboxAttribute>,
    pub uid_validity: u32,
    pub messages: BTreeMap<u32, FakeMessage>,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub mailboxes: Vec<FakeMailbox>,
    pub delimiter: Option<char>,
    pub connect_failures: u32,
    pub hang_connect: bool,
    pub fetch_faults: u32,
    pub search_fails: bool,
    pub header_scan_fails: bool,
    pub connects: u32,
    pub logouts: u32,
    pub selects: Vec<String>,
    pub searches: u32,
    pub header_scans: u32,
    pub fetches: Vec<Vec<u32>>,
}

/// Cloneable handle to a shared fake server.
#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    pub state: Arc<Mutex<FakeState>>,
}

#[allow(clippy::unwrap_used)]
impl FakeConnector {
    pub fn new() -> Self {
        let connector = Self::default();
        connector.state.lock().unwrap().delimiter = Some('/');
        connector
    }

    pub fn with_folder(self, name: &str, uid_validity: u32) -> Self {
        self.with_folder_attrs(name, uid_validity, Vec::new())
    }

    pub fn with_folder_attrs(
        self,
        name: &str,
        uid_validity: u32,
        attributes: Vec<MailboxAttribute>,
    ) -> Self {
        self.state.lock().unwrap().mailboxes.push(FakeMailbox {
            name: name.to_string(),
            attributes,
            uid_validity,
            messages: BTreeMap::new(),
        });
        self
    }

    pub fn add_message(&self, folder: &str, uid: u32, raw: Vec<u8>) {
        self.add_dated_message(folder, uid, raw, date(2024, 3, 1));
    }

    pub fn add_dated_message(&self, folder: &str, uid: u32, raw: Vec<u8>, date: NaiveDate) {
        let mut state = self.state.lock().unwrap();
        let mailbox = state
            .mailboxes
            .iter_mut()
            .find(|m| m.name == folder)
            .unwrap();
        mailbox.messages.insert(
            uid,
            FakeMessage {
                raw,
                date,
                flags: vec!["\\Seen".to_string()],
            },
        );
    }

    pub fn set_uid_validity(&self, folder: &str, uid_validity: u32) {
        let mut state = self.state.lock().unwrap();
        if let Some(mailbox) = state.mailboxes.iter_mut().find(|m| m.name == folder) {
            mailbox.uid_validity = uid_validity;
        }
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn connect(&self, _account: &Account) -> Result<FakeSession> {
        let hang = {
            let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            state.connects += 1;
            if state.connect_failures > 0 {
                state.connect_failures -= 1;
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )));
            }
            state.hang_connect
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(FakeSession {
            state: Arc::clone(&self.state),
            selected: None,
        })
    }
}

#[derive(Debug)]
pub struct FakeSession {
    state: Arc<Mutex<FakeState>>,
    selected: Option<String>,
}

#[allow(clippy::unwrap_used)]
impl FakeSession {
    fn with_mailbox<T>(&self, f: impl FnOnce(&FakeMailbox) -> T) -> Result<T> {
        let state = self.state.lock().unwrap();
        let name = self
            .selected
            .as_deref()
            .ok_or_else(|| Error::Protocol("no mailbox selected".to_string()))?;
        let mailbox = state
            .mailboxes
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| Error::No("mailbox vanished".to_string()))?;
        Ok(f(mailbox))
    }
}

#[allow(clippy::unwrap_used)]
impl MailSession for FakeSession {
    async fn list_folders(&mut self) -> Result<Vec<ListEntry>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .mailboxes
            .iter()
            .map(|m| ListEntry {
                attributes: m.attributes.clone(),
                delimiter: state.delimiter,
                name: m.name.clone(),
            })
            .collect())
    }

    async fn select(&mut self, folder: &str) -> Result<MailboxStatus> {
        let mut state = self.state.lock().unwrap();
        state.selects.push(folder.to_string());
        let Some(mailbox) = state.mailboxes.iter().find(|m| m.name == folder) else {
            return Err(Error::No(format!("no such mailbox {folder}")));
        };
        let highest = mailbox.messages.keys().next_back().copied().unwrap_or(0);
        let status = MailboxStatus {
            exists: u32::try_from(mailbox.messages.len()).unwrap(),
            uid_next: Uid::new(highest + 1),
            uid_validity: UidValidity::new(mailbox.uid_validity),
            read_only: true,
            ..MailboxStatus::default()
        };
        drop(state);
        self.selected = Some(folder.to_string());
        Ok(status)
    }

    async fn search_new(&mut self, after_uid: u32, since: NaiveDate) -> Result<Vec<u32>> {
        {
            let mut state = self.state.lock().unwrap();
            state.searches += 1;
            if state.search_fails {
                return Err(Error::No("SEARCH not allowed".to_string()));
            }
        }
        self.with_mailbox(|m| {
            m.messages
                .iter()
                .filter(|(uid, msg)| **uid > after_uid || msg.date >= since)
                .map(|(uid, _)| *uid)
                .collect()
        })
    }

    async fn fetch_message_ids(&mut self) -> Result<Vec<(u32, Option<String>)>> {
        {
            let mut state = self.state.lock().unwrap();
            state.header_scans += 1;
            if state.header_scan_fails {
                return Err(Error::No("FETCH not allowed".to_string()));
            }
        }
        self.with_mailbox(|m| {
            m.messages
                .iter()
                .map(|(uid, msg)| {
                    let headers = Headers::parse(&String::from_utf8_lossy(&msg.raw));
                    (*uid, headers.get("message-id").map(String::from))
                })
                .collect()
        })
    }

    async fn fetch_messages(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>> {
        {
            let mut state = self.state.lock().unwrap();
            state.fetches.push(uids.to_vec());
            if state.fetch_faults > 0 {
                state.fetch_faults -= 1;
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                )));
            }
        }
        self.with_mailbox(|m| {
            uids.iter()
                .filter_map(|uid| {
                    m.messages.get(uid).map(|msg| FetchedMessage {
                        uid: *uid,
                        flags: msg.flags.clone(),
                        size: u32::try_from(msg.raw.len()).ok(),
                        body: Some(msg.raw.clone()),
                    })
                })
                .collect()
        })
    }

    async fn logout(self) {
        self.state.lock().unwrap().logouts += 1;
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

pub fn plain_message(message_id: &str, subject: &str) -> Vec<u8> {
    format!(
        "Message-ID: {message_id}\r\n\
         From: Alice <alice@example.com>\r\n\
         To: bob@example.com\r\n\
         Subject: {subject}\r\n\
         Date: Fri, 01 Mar 2024 10:00:00 +0000\r\n\
         \r\n\
         Hello Bob.\r\n"
    )
    .into_bytes()
}

pub fn html_message(message_id: &str) -> Vec<u8> {
    format!(
        "Message-ID: {message_id}\r\n\
         Subject: html\r\n\
         Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
         \r\n\
         --b1\r\n\
         Content-Type: text/plain\r\n\
         \r\n\
         Hello\r\n\
         --b1\r\n\
         Content-Type: text/html\r\n\
         \r\n\
         <p>Hello</p>\r\n\
         --b1--\r\n"
    )
    .into_bytes()
}

pub fn message_with_attachment(message_id: &str, filename: &str, payload_b64: &str) -> Vec<u8> {
    format!(
        "Message-ID: {message_id}\r\n\
         Subject: files\r\n\
         Content-Type: multipart/mixed; boundary=\"mix\"\r\n\
         \r\n\
         --mix\r\n\
         Content-Type: text/plain\r\n\
         \r\n\
         See attached.\r\n\
         --mix\r\n\
         Content-Type: application/octet-stream\r\n\
         Content-Disposition: attachment; filename=\"{filename}\"\r\n\
         Content-Transfer-Encoding: base64\r\n\
         \r\n\
         {payload_b64}\r\n\
         --mix--\r\n"
    )
    .into_bytes()
}

pub fn broken_message() -> Vec<u8> {
    b"this is not an RFC 5322 message\r\n".to_vec()
}

pub fn account(id: i64) -> Account {
    let mut account = Account::with_email(&format!("user{id}@example.com"));
    account.id = Some(crate::account::AccountId::new(id));
    account.imap.password = "secret".to_string();
    account
}

pub fn stored_message(message_id: &str, folder: &str, uid: u32) -> crate::store::StoredMessage {
    crate::store::StoredMessage {
        message_id: message_id.to_string(),
        uid: Some(uid),
        folder: folder.to_string(),
        subject: Some("stored".to_string()),
        from: None,
        to: None,
        cc: None,
        date: None,
        body_text: Some("body".to_string()),
        body_html: None,
        content_type: crate::store::ContentKind::Plain,
        flags: Vec::new(),
        size: None,
        has_attachments: false,
        attachments_path: None,
        attachments: Vec::new(),
        synced_at: chrono::Utc::now(),
    }
}
