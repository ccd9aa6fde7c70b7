//! Command line interface.

use clap::{Parser, Subcommand};
use mailsync_core::{AccountId, Security};

/// Mirror IMAP accounts into local storage.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the sync daemon until interrupted (default)
    Run,

    /// Run a single cycle and print each account's result as JSON
    Once,

    /// Add an account
    Add(AddArgs),

    /// List accounts and their sync status
    List,

    /// Re-enable sync for an account and reset its error count
    Enable {
        /// Account id, as shown by `mailsync list`
        id: AccountId,
    },
}

#[derive(Debug, clap::Args)]
pub struct AddArgs {
    /// Display name
    #[arg(long)]
    pub name: Option<String>,

    /// Email address
    #[arg(long)]
    pub email: String,

    /// IMAP host; guessed from the address when omitted
    #[arg(long)]
    pub host: Option<String>,

    /// IMAP port; defaults to 993 for TLS and 143 otherwise
    #[arg(long)]
    pub port: Option<u16>,

    /// Transport security: none, tls or starttls
    #[arg(long, default_value = "tls")]
    pub security: Security,

    /// Login name; defaults to the email address
    #[arg(long)]
    pub username: Option<String>,

    /// Password or app password
    #[arg(long, env = "MAILSYNC_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_no_subcommand() {
        let cli = Cli::try_parse_from(["mailsync"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_add_arguments() {
        let cli = Cli::try_parse_from([
            "mailsync",
            "add",
            "--email",
            "me@example.com",
            "--security",
            "starttls",
            "--password",
            "hunter2",
        ])
        .unwrap();
        let Some(Command::Add(args)) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(args.email, "me@example.com");
        assert_eq!(args.security, Security::StartTls);
        assert!(args.host.is_none());
    }

    #[test]
    fn test_enable_parses_id() {
        let cli = Cli::try_parse_from(["mailsync", "enable", "42"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Enable { id }) if id == AccountId::new(42)));
        assert!(Cli::try_parse_from(["mailsync", "enable", "abc"]).is_err());
    }

    #[test]
    fn test_unknown_security_rejected() {
        let result = Cli::try_parse_from([
            "mailsync", "add", "--email", "a@b.c", "--security", "ssl3", "--password", "x",
        ]);
        assert!(result.is_err());
    }
}
