//! Selected state: searching and fetching by UID.

use tokio::io::{AsyncRead, AsyncWrite};

use super::Client;
use super::authenticated::{SelectResult, list_mailboxes, open_mailbox};
use super::states::Selected;
use crate::command::{Command, FetchAttribute, SearchKey};
use crate::parser::{FetchItem, Response, ResponseParser, UntaggedResponse};
use crate::types::{ListEntry, SeqNum, Uid, UidSet};
use crate::Result;

impl<S> Client<S, Selected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Returns the open mailbox.
    #[must_use]
    pub fn selected(&self) -> &Selected {
        &self.state
    }

    /// Lists mailboxes matching `pattern` under `reference`.
    pub async fn list(&mut self, reference: &str, pattern: &str) -> Result<Vec<ListEntry>> {
        list_mailboxes(self, reference, pattern).await
    }

    /// Switches to another mailbox read-only.
    pub async fn examine(self, mailbox: &str) -> SelectResult<S> {
        open_mailbox(self, mailbox).await
    }

    /// Runs UID SEARCH and returns the matching UIDs in server order.
    pub async fn uid_search(&mut self, key: &SearchKey) -> Result<Vec<Uid>> {
        let responses = self
            .execute(&Command::UidSearch { key: key.clone() })
            .await?;

        let mut uids = Vec::new();
        for raw in &responses {
            if let Ok(Response::Untagged(UntaggedResponse::Search(found))) =
                ResponseParser::parse(raw)
            {
                uids.extend(found.into_iter().filter_map(Uid::new));
            }
        }
        Ok(uids)
    }

    /// Runs UID FETCH and returns each FETCH response's data items.
    ///
    /// A FETCH line that fails to parse is logged and left out; callers
    /// compare the returned UIDs against the requested set to notice.
    pub async fn uid_fetch(
        &mut self,
        set: &UidSet,
        attributes: &[FetchAttribute],
    ) -> Result<Vec<(SeqNum, Vec<FetchItem>)>> {
        let responses = self
            .execute(&Command::UidFetch {
                set: set.clone(),
                attributes: attributes.to_vec(),
            })
            .await?;

        let mut fetched = Vec::new();
        for raw in &responses {
            match ResponseParser::parse(raw) {
                Ok(Response::Untagged(UntaggedResponse::Fetch { seq, items })) => {
                    fetched.push((seq, items));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        mailbox = %self.state.mailbox,
                        error = %e,
                        "skipping unparseable FETCH response"
                    );
                }
            }
        }
        Ok(fetched)
    }
}
