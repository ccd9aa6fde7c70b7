//! Connection management: transport, framing and the type-state client.

mod client;
mod framed;
mod stream;

pub use client::{Authenticated, Client, NotAuthenticated, SelectError, SelectResult, Selected};
pub use framed::FramedStream;
pub use stream::{ImapStream, Security, connect_plain, connect_tls, create_tls_connector};

use crate::Result;

/// Opens a connection with the requested transport security and reads the
/// greeting. For [`Security::StartTls`] the upgrade happens before this
/// returns, so credentials are never sent in the clear.
///
/// # Errors
///
/// Returns an error if the TCP connect, TLS handshake, greeting or
/// STARTTLS exchange fails.
pub async fn connect(
    host: &str,
    port: u16,
    security: Security,
) -> Result<Client<ImapStream, NotAuthenticated>> {
    tracing::debug!(host, port, ?security, "connecting");

    match security {
        Security::Implicit => Client::from_stream(connect_tls(host, port).await?).await,
        Security::None => Client::from_stream(connect_plain(host, port).await?).await,
        Security::StartTls => {
            let client = Client::from_stream(connect_plain(host, port).await?).await?;
            client.starttls(host).await
        }
    }
}
