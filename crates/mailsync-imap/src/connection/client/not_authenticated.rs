//! Greeting, STARTTLS and LOGIN.

use tokio::io::{AsyncRead, AsyncWrite};

use super::Client;
use super::states::{Authenticated, NotAuthenticated};
use crate::command::{Command, TagGenerator};
use crate::connection::framed::FramedStream;
use crate::connection::stream::ImapStream;
use crate::parser::{Response, ResponseParser, UntaggedResponse};
use crate::types::ResponseCode;
use crate::{Error, Result};

impl<S> Client<S, NotAuthenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Reads the server greeting from a freshly connected stream.
    ///
    /// A `BYE` greeting is returned as [`Error::Bye`]. Capabilities sent in
    /// the greeting's response code are recorded.
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut stream = FramedStream::new(stream);
        let greeting = stream.read_response().await?;

        let capabilities = match ResponseParser::parse(&greeting)? {
            Response::Untagged(
                UntaggedResponse::Ok { code, .. } | UntaggedResponse::PreAuth { code, .. },
            ) => match code {
                Some(ResponseCode::Capability(caps)) => caps,
                _ => Vec::new(),
            },
            Response::Untagged(UntaggedResponse::Bye { text, .. }) => {
                return Err(Error::Bye(text));
            }
            other => {
                return Err(Error::Protocol(format!("unexpected greeting: {other:?}")));
            }
        };

        tracing::debug!(?capabilities, "received server greeting");

        Ok(Self {
            stream,
            tags: TagGenerator::default(),
            capabilities,
            state: NotAuthenticated,
        })
    }

    /// Authenticates with LOGIN.
    ///
    /// Consumes the client; on NO the connection is dropped with it.
    pub async fn login(mut self, username: &str, password: &str) -> Result<Client<S, Authenticated>> {
        self.execute(&Command::Login {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await?;

        tracing::debug!(username, "logged in");
        Ok(self.transition(Authenticated))
    }
}

impl Client<ImapStream, NotAuthenticated> {
    /// Upgrades a plaintext connection with STARTTLS.
    ///
    /// Capabilities seen before the upgrade are discarded and re-queried
    /// over the encrypted channel.
    pub async fn starttls(mut self, host: &str) -> Result<Self> {
        self.execute(&Command::StartTls).await?;

        let tls = self.stream.into_inner().upgrade_to_tls(host).await?;
        let mut client = Self {
            stream: FramedStream::new(tls),
            tags: self.tags,
            capabilities: Vec::new(),
            state: NotAuthenticated,
        };
        client.execute(&Command::Capability).await?;
        Ok(client)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio_test::io::Builder;

    use super::*;

    #[tokio::test]
    async fn test_greeting_capabilities() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 STARTTLS] ready\r\n")
            .build();
        let client = Client::from_stream(mock).await.unwrap();
        assert!(client.has_capability("starttls"));
        assert!(client.has_capability("IMAP4rev1"));
    }

    #[tokio::test]
    async fn test_bye_greeting() {
        let mock = Builder::new().read(b"* BYE too many connections\r\n").build();
        let err = Client::from_stream(mock).await.unwrap_err();
        assert!(matches!(err, Error::Bye(text) if text == "too many connections"));
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 LOGIN user secret\r\n")
            .read(b"A0000 NO [AUTHENTICATIONFAILED] bad credentials\r\n")
            .build();
        let client = Client::from_stream(mock).await.unwrap();
        let err = client.login("user", "secret").await.unwrap_err();
        assert!(matches!(err, Error::No(_)));
        assert!(!err.is_connection_fault());
    }
}
