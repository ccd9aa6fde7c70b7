//! Account model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for an account.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct AccountId(pub i64);

impl AccountId {
    /// Create a new account ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AccountId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Security/encryption mode for connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Security {
    /// No encryption (not recommended).
    None,
    /// Implicit TLS (connect directly with TLS).
    #[default]
    Tls,
    /// STARTTLS upgrade after plaintext connect.
    StartTls,
}

impl Security {
    /// Get display name for the security mode.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::None => "None (insecure)",
            Self::Tls => "SSL/TLS",
            Self::StartTls => "STARTTLS",
        }
    }

    /// Stable lowercase name used in storage and on the command line.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Tls => "tls",
            Self::StartTls => "starttls",
        }
    }
}

impl std::str::FromStr for Security {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "plain" => Ok(Self::None),
            "tls" | "ssl" => Ok(Self::Tls),
            "starttls" => Ok(Self::StartTls),
            other => Err(format!("unknown security mode {other:?} (none, tls, starttls)")),
        }
    }
}

impl From<Security> for mailsync_imap::Security {
    fn from(security: Security) -> Self {
        match security {
            Security::None => Self::None,
            Security::Tls => Self::Implicit,
            Security::StartTls => Self::StartTls,
        }
    }
}

/// IMAP server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImapConfig {
    /// Server hostname.
    pub host: String,
    /// Server port (default: 993 for TLS, 143 otherwise).
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Username for authentication.
    pub username: String,
    /// Password for authentication.
    #[serde(skip_serializing, default)]
    pub password: String,
}

impl ImapConfig {
    /// Get default port for the security mode.
    #[must_use]
    pub const fn default_port(security: Security) -> u16 {
        match security {
            Security::None | Security::StartTls => 143,
            Security::Tls => 993,
        }
    }
}

/// A mailbox to mirror, plus its sync bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier (None for unsaved accounts).
    pub id: Option<AccountId>,
    /// Display name for the account.
    pub name: String,
    /// Email address.
    pub email: String,
    /// IMAP configuration.
    pub imap: ImapConfig,
    /// Whether the account exists for syncing at all.
    pub is_active: bool,
    /// Cleared automatically once too many cycles fail in a row.
    pub sync_enabled: bool,
    /// Consecutive failed cycles.
    pub error_count: u32,
    /// Summary of the most recent failed cycle.
    pub error_message: Option<String>,
    /// End of the most recent successful cycle.
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            id: None,
            name: String::new(),
            email: String::new(),
            imap: ImapConfig::default(),
            is_active: true,
            sync_enabled: true,
            error_count: 0,
            error_message: None,
            last_sync_at: None,
        }
    }
}

impl Account {
    /// Create a new empty account.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create account with IMAP defaults for well-known providers.
    #[must_use]
    pub fn with_email(email: &str) -> Self {
        let mut account = Self {
            email: email.to_string(),
            ..Default::default()
        };

        if let Some(domain) = email.split('@').nth(1) {
            let (name, host) = match domain.to_lowercase().as_str() {
                "gmail.com" | "googlemail.com" => ("Gmail", "imap.gmail.com"),
                "outlook.com" | "hotmail.com" | "live.com" => ("Outlook", "outlook.office365.com"),
                "yahoo.com" | "ymail.com" => ("Yahoo", "imap.mail.yahoo.com"),
                "icloud.com" | "me.com" | "mac.com" => ("iCloud", "imap.mail.me.com"),
                _ => {
                    account.name = domain.to_string();
                    account.imap.host = format!("imap.{domain}");
                    ("", "")
                }
            };
            if !host.is_empty() {
                account.name = name.to_string();
                account.imap.host = host.to_string();
            }
        }

        account.imap.security = Security::Tls;
        account.imap.port = ImapConfig::default_port(Security::Tls);
        account.imap.username = email.to_string();
        account
    }

    /// Whether the scheduler should pick this account up.
    #[must_use]
    pub const fn is_eligible(&self, max_errors: u32) -> bool {
        self.is_active && self.sync_enabled && self.error_count < max_errors
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    mod account_id_tests {
        use super::*;

        #[test]
        fn test_display_and_parse() {
            let id = AccountId::new(42);
            assert_eq!(id.to_string(), "42");
            assert_eq!(" 42 ".parse::<AccountId>().unwrap(), id);
            assert!("abc".parse::<AccountId>().is_err());
        }

        #[test]
        fn test_serde() {
            let json = serde_json::to_string(&AccountId::new(7)).unwrap();
            assert_eq!(json, "7");
            let back: AccountId = serde_json::from_str(&json).unwrap();
            assert_eq!(back, AccountId::new(7));
        }
    }

    mod security_tests {
        use super::*;

        #[test]
        fn test_default_is_tls() {
            assert_eq!(Security::default(), Security::Tls);
        }

        #[test]
        fn test_parse() {
            assert_eq!("StartTLS".parse::<Security>().unwrap(), Security::StartTls);
            assert_eq!("none".parse::<Security>().unwrap(), Security::None);
            assert_eq!("ssl".parse::<Security>().unwrap(), Security::Tls);
            assert!("bogus".parse::<Security>().is_err());
        }

        #[test]
        fn test_as_str_roundtrips() {
            for security in [Security::None, Security::Tls, Security::StartTls] {
                assert_eq!(security.as_str().parse::<Security>().unwrap(), security);
            }
        }

        #[test]
        fn test_into_imap() {
            assert_eq!(
                mailsync_imap::Security::from(Security::Tls),
                mailsync_imap::Security::Implicit
            );
        }

        #[test]
        fn test_default_ports() {
            assert_eq!(ImapConfig::default_port(Security::Tls), 993);
            assert_eq!(ImapConfig::default_port(Security::StartTls), 143);
            assert_eq!(ImapConfig::default_port(Security::None), 143);
        }
    }

    mod account_tests {
        use super::*;

        #[test]
        fn test_new_account_is_syncable() {
            let account = Account::new();
            assert!(account.is_active);
            assert!(account.sync_enabled);
            assert_eq!(account.error_count, 0);
            assert!(account.is_eligible(5));
        }

        #[test]
        fn test_eligibility() {
            let mut account = Account::new();
            account.error_count = 5;
            assert!(!account.is_eligible(5));

            account.error_count = 0;
            account.sync_enabled = false;
            assert!(!account.is_eligible(5));

            account.sync_enabled = true;
            account.is_active = false;
            assert!(!account.is_eligible(5));
        }

        #[test]
        fn test_with_email_gmail() {
            let account = Account::with_email("user@gmail.com");
            assert_eq!(account.name, "Gmail");
            assert_eq!(account.imap.host, "imap.gmail.com");
            assert_eq!(account.imap.port, 993);
            assert_eq!(account.imap.username, "user@gmail.com");
        }

        #[test]
        fn test_with_email_unknown_domain() {
            let account = Account::with_email("me@example.org");
            assert_eq!(account.name, "example.org");
            assert_eq!(account.imap.host, "imap.example.org");
        }

        #[test]
        fn test_password_not_serialized() {
            let mut account = Account::with_email("user@example.com");
            account.imap.password = "hunter2".to_string();
            let json = serde_json::to_string(&account).unwrap();
            assert!(!json.contains("hunter2"));
        }
    }
}
