//! The account record and the directory operations over it.
//!
//! An account belongs to one user and holds a balance. Apart from the
//! admin-only [set_account_balance] override, the balance is only ever
//! changed by the ledger engine in [crate::transaction], which keeps it in
//! step with the transaction history.

use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    db::{CreateTable, MapRow},
    policy::Actor,
    user::{Role, UserId},
};

/// The row id for an account.
pub type AccountId = i64;

/// A bank account owned by a single user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// The account's row id.
    pub id: AccountId,
    /// The id of the owning user.
    pub user_id: UserId,
    /// The current balance.
    pub balance: f64,
    /// A free-form label such as "savings" or "checking".
    pub kind: String,
}

impl CreateTable for Account {
    fn create_table(connection: &Connection) -> Result<(), rusqlite::Error> {
        connection.execute(
            "CREATE TABLE IF NOT EXISTS account (
                    id_account INTEGER PRIMARY KEY AUTOINCREMENT,
                    id_user TEXT NOT NULL,
                    amount REAL NOT NULL,
                    type TEXT NOT NULL,
                    FOREIGN KEY (id_user) REFERENCES user (id_user) ON DELETE CASCADE
                    )",
            (),
        )?;

        Ok(())
    }
}

impl MapRow for Account {
    type ReturnType = Self;

    fn map_row_with_offset(row: &Row, offset: usize) -> Result<Self, rusqlite::Error> {
        let raw_user_id: String = row.get(offset + 1)?;

        Ok(Self {
            id: row.get(offset)?,
            user_id: UserId::new(raw_user_id),
            balance: row.get(offset + 2)?,
            kind: row.get(offset + 3)?,
        })
    }
}

/// Open an account for `user_id` with an opening balance (admin-only at the
/// policy layer).
///
/// # Errors
/// Returns [Error::NotFound] if the owner does not exist, or
/// [Error::SqlError] for an unexpected SQL error.
pub fn create_account(
    connection: &Connection,
    user_id: &UserId,
    opening_balance: f64,
    kind: &str,
) -> Result<Account, Error> {
    // Checked up front so a missing owner reads as NotFound rather than a
    // foreign key failure.
    connection
        .prepare("SELECT id_user FROM user WHERE id_user = :id")?
        .query_row(&[(":id", user_id.as_str())], |row| row.get::<_, String>(0))?;

    connection.execute(
        "INSERT INTO account (id_user, amount, type) VALUES (?1, ?2, ?3)",
        (user_id.as_str(), opening_balance, kind),
    )?;

    Ok(Account {
        id: connection.last_insert_rowid(),
        user_id: user_id.clone(),
        balance: opening_balance,
        kind: kind.to_string(),
    })
}

/// Retrieve the account with the given id.
///
/// # Errors
/// Returns [Error::NotFound] if no such account exists.
pub fn get_account(connection: &Connection, id: AccountId) -> Result<Account, Error> {
    let account = connection
        .prepare("SELECT id_account, id_user, amount, type FROM account WHERE id_account = :id")?
        .query_row(&[(":id", &id)], Account::map_row)?;

    Ok(account)
}

/// Retrieve every account owned by `user_id`.
///
/// # Errors
/// Returns [Error::SqlError] if there is an SQL error.
pub fn accounts_for_user(connection: &Connection, user_id: &UserId) -> Result<Vec<Account>, Error> {
    connection
        .prepare("SELECT id_account, id_user, amount, type FROM account WHERE id_user = :id")?
        .query_map(&[(":id", user_id.as_str())], Account::map_row)?
        .map(|maybe_account| maybe_account.map_err(Error::from))
        .collect()
}

/// Overwrite an account's balance directly (admin-only at the policy layer).
///
/// This bypasses the transaction trail: the new balance is not backed by a
/// ledger entry, so the append/undo invariant no longer holds for this
/// account. Kept as a deliberate administrative escape hatch.
///
/// # Errors
/// Returns [Error::NotFound] if no row was affected.
pub fn set_account_balance(
    connection: &Connection,
    id: AccountId,
    new_balance: f64,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE account SET amount = ?1 WHERE id_account = ?2",
        (new_balance, id),
    )?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Delete an account, cascading to its transactions.
///
/// A non-admin may only delete an account they own; for anyone else's
/// account the call fails with [Error::NotFound], the same error as for an
/// account that does not exist. An admin deletes unconditionally.
///
/// # Errors
/// Returns [Error::NotFound] as described above.
pub fn delete_account(connection: &Connection, id: AccountId, actor: &Actor) -> Result<(), Error> {
    if actor.role != Role::Admin {
        connection
            .prepare("SELECT id_account FROM account WHERE id_account = :id AND id_user = :user")?
            .query_row(
                rusqlite::named_params! {":id": id, ":user": actor.user_id.as_str()},
                |row| row.get::<_, i64>(0),
            )?;
    }

    let rows_affected = connection.execute("DELETE FROM account WHERE id_account = ?1", (id,))?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}
