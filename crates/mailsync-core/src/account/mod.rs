//! Account management module.
//!
//! Provides the account model, validation, and the directory the
//! scheduler reads accounts from.

mod directory;
mod model;
mod repository;
mod validation;

pub use directory::{AccountDirectory, MemoryDirectory};
pub use model::{Account, AccountId, ImapConfig, Security};
pub use repository::AccountRepository;
pub use validation::{ValidationError, ValidationResult, validate_account};
