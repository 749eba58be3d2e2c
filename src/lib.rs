//! Passbook is a small personal-banking record-keeper.
//!
//! Users register, authenticate, and manage accounts and transactions;
//! administrators manage users directly. The heart of the library is the
//! ledger engine in [transaction]: every transaction insertion or deletion
//! atomically updates the owning account's balance, so balance and history
//! never diverge.
//!
//! All operations take an explicit [rusqlite::Connection]; there is no
//! ambient database state. Open one with [db::open] or [db::open_in_memory].

#![warn(missing_docs)]

pub mod account;
pub mod auth;
pub mod db;
pub mod password;
pub mod policy;
pub mod tables;
pub mod transaction;
pub mod user;

pub use account::{Account, AccountId};
pub use auth::authenticate;
pub use password::{PasswordHash, ValidatedPassword};
pub use policy::Actor;
pub use transaction::{Transaction, TransactionId, TransactionKind};
pub use user::{Role, User, UserId};

/// The errors that may occur while operating on the ledger.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The referenced user, account, or transaction does not exist, or it
    /// exists but is not visible to the caller. The two cases are deliberately
    /// indistinguishable so that callers cannot probe for other users'
    /// resources.
    #[error("the requested record could not be found")]
    NotFound,

    /// A user with the given id is already registered.
    #[error("a user with that id already exists")]
    DuplicateUser,

    /// The transaction kind was not `deposit` or `withdrawal`.
    #[error("\"{0}\" is not a valid transaction kind; use \"deposit\" or \"withdrawal\"")]
    InvalidTransactionKind(String),

    /// A transaction amount must be a positive, finite number.
    #[error("{0} is not a valid transaction amount; amounts must be positive")]
    InvalidAmount(f64),

    /// A withdrawal was attempted for more than the account holds.
    #[error("insufficient funds: the balance is {balance} but the withdrawal was for {requested}")]
    InsufficientFunds {
        /// The account balance at the time of the attempt.
        balance: f64,
        /// The amount the caller tried to withdraw.
        requested: f64,
    },

    /// An update was requested with no fields to change.
    #[error("no fields were provided to update")]
    EmptyUpdate,

    /// The presented user id and password did not match a registered user.
    ///
    /// An unknown id and a wrong password produce the same error so that the
    /// login flow does not reveal which ids are registered.
    #[error("incorrect user id or password")]
    InvalidCredentials,

    /// The caller is not allowed to perform the operation.
    #[error("you do not have permission to perform this action")]
    PermissionDenied,

    /// The user provided a password that is too easy to guess.
    #[error("password is too weak: {0}")]
    PasswordTooWeak(String),

    /// An unexpected error occurred in the underlying hashing library.
    ///
    /// The error string should only be logged on the server side; show the
    /// end user a generic failure notice instead.
    #[error("hashing failed: {0}")]
    HashingError(String),

    /// An unhandled/unexpected SQL error.
    ///
    /// The wrapped error should only be logged; show the end user a generic
    /// failure notice instead.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            // Code 1555 occurs when a PRIMARY KEY constraint failed, code 2067
            // when a UNIQUE constraint failed. Either way a second user row
            // was inserted with an id that is already taken.
            rusqlite::Error::SqliteFailure(sql_error, Some(ref desc))
                if (sql_error.extended_code == 1555 || sql_error.extended_code == 2067)
                    && desc.contains("user.id_user") =>
            {
                Error::DuplicateUser
            }
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {error}");
                Error::SqlError(error)
            }
        }
    }
}
