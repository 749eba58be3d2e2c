//! The ledger engine: transaction records and the balance-mutating
//! operations over them.
//!
//! A transaction's existence implies the linked account's balance already
//! reflects its effect. To keep that invariant, every mutation here runs as
//! one SQLite transaction with an IMMEDIATE write lock: the balance update
//! and the history change commit together or not at all, and two concurrent
//! mutations on the same account cannot interleave their read-modify-write.
//!
//! Deleting a ledger entry is not "delete history" but "undo the ledger
//! event": the reversal is the mathematical inverse of the insertion.
//!
//! None of these operations is safely retryable without re-validation; a
//! blindly retried insert would double-apply a balance delta.

use std::fmt::Display;
use std::str::FromStr;

use rusqlite::{Connection, Row, Transaction as SqlTransaction, TransactionBehavior, named_params};
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    account::AccountId,
    db::{CreateTable, MapRow},
    user::UserId,
};

/// The row id for a ledger transaction.
pub type TransactionId = i64;

/// The direction of a ledger transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Money paid into the account.
    Deposit,
    /// Money taken out of the account.
    Withdrawal,
}

impl TransactionKind {
    /// The kind as the text stored in the `type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
        }
    }
}

impl Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "deposit" => Ok(TransactionKind::Deposit),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            other => Err(Error::InvalidTransactionKind(other.to_string())),
        }
    }
}

/// One entry in an account's ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// The transaction's row id.
    pub id: TransactionId,
    /// The account whose balance this entry affected.
    pub account_id: AccountId,
    /// The amount moved; always positive, the direction is in `kind`.
    pub amount: f64,
    /// Whether the amount was paid in or taken out.
    pub kind: TransactionKind,
    /// The user who performed the transaction, denormalized for audit.
    pub user_id: UserId,
}

impl CreateTable for Transaction {
    fn create_table(connection: &Connection) -> Result<(), rusqlite::Error> {
        connection.execute(
            "CREATE TABLE IF NOT EXISTS \"transaction\" (
                    id_transaction INTEGER PRIMARY KEY AUTOINCREMENT,
                    id_account INTEGER NOT NULL,
                    amount REAL NOT NULL,
                    type TEXT NOT NULL,
                    id_user TEXT NOT NULL,
                    FOREIGN KEY (id_account) REFERENCES account (id_account) ON DELETE CASCADE
                    )",
            (),
        )?;

        Ok(())
    }
}

impl MapRow for Transaction {
    type ReturnType = Self;

    fn map_row_with_offset(row: &Row, offset: usize) -> Result<Self, rusqlite::Error> {
        let raw_kind: String = row.get(offset + 3)?;
        let raw_user_id: String = row.get(offset + 4)?;

        let kind = raw_kind.parse().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                offset + 3,
                rusqlite::types::Type::Text,
                format!("{raw_kind:?} is not a valid transaction kind").into(),
            )
        })?;

        Ok(Self {
            id: row.get(offset)?,
            account_id: row.get(offset + 1)?,
            amount: row.get(offset + 2)?,
            kind,
            user_id: UserId::new(raw_user_id),
        })
    }
}

fn validate_amount(amount: f64) -> Result<(), Error> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidAmount(amount))
    }
}

// Balance transition for appending an entry. `InsufficientFunds` reports the
// balance the caller saw, not any intermediate value.
fn apply(balance: f64, amount: f64, kind: TransactionKind) -> Result<f64, Error> {
    match kind {
        TransactionKind::Deposit => Ok(balance + amount),
        TransactionKind::Withdrawal if amount > balance => Err(Error::InsufficientFunds {
            balance,
            requested: amount,
        }),
        TransactionKind::Withdrawal => Ok(balance - amount),
    }
}

// Balance transition for undoing an entry; the exact inverse of [apply].
fn reverse(balance: f64, amount: f64, kind: TransactionKind) -> f64 {
    match kind {
        TransactionKind::Deposit => balance - amount,
        TransactionKind::Withdrawal => balance + amount,
    }
}

/// Append a transaction to an account's ledger and update its balance.
///
/// Ownership is verified here, not only by the caller: the account must
/// exist *and* belong to `acting_user`, otherwise the call fails with
/// [Error::NotFound] even if the account exists for someone else.
///
/// Returns the new balance.
///
/// # Errors
/// - [Error::InvalidAmount] if `amount` is not a positive, finite number.
/// - [Error::NotFound] if the account does not exist for `acting_user`.
/// - [Error::InsufficientFunds] if a withdrawal exceeds the balance.
/// - [Error::SqlError] for an unexpected SQL error; nothing is committed.
pub fn insert_transaction(
    connection: &Connection,
    account_id: AccountId,
    amount: f64,
    kind: TransactionKind,
    acting_user: &UserId,
) -> Result<f64, Error> {
    validate_amount(amount)?;

    let unit_of_work = SqlTransaction::new_unchecked(connection, TransactionBehavior::Immediate)?;

    let balance: f64 = unit_of_work
        .prepare("SELECT amount FROM account WHERE id_account = :id AND id_user = :user")?
        .query_row(
            named_params! {":id": account_id, ":user": acting_user.as_str()},
            |row| row.get(0),
        )?;

    let new_balance = apply(balance, amount, kind)?;

    unit_of_work.execute(
        "UPDATE account SET amount = ?1 WHERE id_account = ?2",
        (new_balance, account_id),
    )?;
    unit_of_work.execute(
        "INSERT INTO \"transaction\" (id_account, amount, type, id_user) VALUES (?1, ?2, ?3, ?4)",
        (account_id, amount, kind.as_str(), acting_user.as_str()),
    )?;

    unit_of_work.commit()?;

    Ok(new_balance)
}

/// Undo a ledger entry: reverse its balance effect and remove the row.
///
/// Returns the reversed balance.
///
/// # Errors
/// - [Error::NotFound] if the transaction, or the account it references,
///   does not exist (an orphaned transaction is an invariant violation).
/// - [Error::InvalidTransactionKind] if the stored kind is unrecognized.
/// - [Error::SqlError] for an unexpected SQL error; nothing is committed.
pub fn delete_transaction(
    connection: &Connection,
    transaction_id: TransactionId,
) -> Result<f64, Error> {
    let unit_of_work = SqlTransaction::new_unchecked(connection, TransactionBehavior::Immediate)?;

    let (account_id, amount, raw_kind): (AccountId, f64, String) = unit_of_work
        .prepare("SELECT id_account, amount, type FROM \"transaction\" WHERE id_transaction = :id")?
        .query_row(&[(":id", &transaction_id)], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;

    let kind: TransactionKind = raw_kind.parse()?;

    let balance: f64 = unit_of_work
        .prepare("SELECT amount FROM account WHERE id_account = :id")?
        .query_row(&[(":id", &account_id)], |row| row.get(0))?;

    let new_balance = reverse(balance, amount, kind);

    unit_of_work.execute(
        "UPDATE account SET amount = ?1 WHERE id_account = ?2",
        (new_balance, account_id),
    )?;
    unit_of_work.execute(
        "DELETE FROM \"transaction\" WHERE id_transaction = ?1",
        (transaction_id,),
    )?;

    unit_of_work.commit()?;

    Ok(new_balance)
}

/// Correct a transaction's amount and/or kind (admin-only at the policy
/// layer), reconciling the account balance.
///
/// The old effect is reversed and the new effect applied inside the same
/// unit of work, with the same sufficient-funds check as an insertion, so
/// the balance always equals the signed sum of the stored entries.
///
/// Returns the reconciled balance.
///
/// # Errors
/// - [Error::EmptyUpdate] if neither field is supplied.
/// - [Error::NotFound] if the transaction or its account does not exist.
/// - [Error::InvalidAmount] if `new_amount` is not positive and finite.
/// - [Error::InvalidTransactionKind] if the stored kind is unrecognized.
/// - [Error::InsufficientFunds] if reapplying as a withdrawal would
///   overdraw the account; nothing is committed.
pub fn update_transaction(
    connection: &Connection,
    transaction_id: TransactionId,
    new_amount: Option<f64>,
    new_kind: Option<TransactionKind>,
) -> Result<f64, Error> {
    if new_amount.is_none() && new_kind.is_none() {
        return Err(Error::EmptyUpdate);
    }

    let unit_of_work = SqlTransaction::new_unchecked(connection, TransactionBehavior::Immediate)?;

    let (account_id, old_amount, raw_kind): (AccountId, f64, String) = unit_of_work
        .prepare("SELECT id_account, amount, type FROM \"transaction\" WHERE id_transaction = :id")?
        .query_row(&[(":id", &transaction_id)], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;

    let old_kind: TransactionKind = raw_kind.parse()?;
    let amount = new_amount.unwrap_or(old_amount);
    let kind = new_kind.unwrap_or(old_kind);
    validate_amount(amount)?;

    let balance: f64 = unit_of_work
        .prepare("SELECT amount FROM account WHERE id_account = :id")?
        .query_row(&[(":id", &account_id)], |row| row.get(0))?;

    let rolled_back = reverse(balance, old_amount, old_kind);
    let new_balance = apply(rolled_back, amount, kind)?;

    unit_of_work.execute(
        "UPDATE account SET amount = ?1 WHERE id_account = ?2",
        (new_balance, account_id),
    )?;
    unit_of_work.execute(
        "UPDATE \"transaction\" SET amount = ?1, type = ?2 WHERE id_transaction = ?3",
        (amount, kind.as_str(), transaction_id),
    )?;

    unit_of_work.commit()?;

    Ok(new_balance)
}

/// Retrieve the transaction with the given id.
///
/// # Errors
/// Returns [Error::NotFound] if no such transaction exists.
pub fn get_transaction(
    connection: &Connection,
    transaction_id: TransactionId,
) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(
            "SELECT id_transaction, id_account, amount, type, id_user
             FROM \"transaction\" WHERE id_transaction = :id",
        )?
        .query_row(&[(":id", &transaction_id)], Transaction::map_row)?;

    Ok(transaction)
}

/// Retrieve every transaction on accounts owned by `user_id`.
///
/// This follows account ownership, not the denormalized acting-user column,
/// so entries an admin made on the user's account are included.
///
/// # Errors
/// Returns [Error::SqlError] if there is an SQL error.
pub fn transactions_for_user(
    connection: &Connection,
    user_id: &UserId,
) -> Result<Vec<Transaction>, Error> {
    connection
        .prepare(
            "SELECT t.id_transaction, t.id_account, t.amount, t.type, t.id_user
             FROM \"transaction\" t
             INNER JOIN account a ON t.id_account = a.id_account
             WHERE a.id_user = :user",
        )?
        .query_map(&[(":user", user_id.as_str())], Transaction::map_row)?
        .map(|maybe_transaction| maybe_transaction.map_err(Error::from))
        .collect()
}

#[cfg(test)]
mod ledger_tests {
    use rusqlite::Connection;

    use crate::{
        Error,
        account::{create_account, get_account},
        db::{initialize, open_in_memory},
        password::PasswordHash,
        user::{Role, UserId, delete_user, register_user},
    };

    use super::{
        TransactionKind, delete_transaction, get_transaction, insert_transaction,
        transactions_for_user, update_transaction,
    };

    fn init_db_with_account(user_id: &str, opening_balance: f64) -> (Connection, UserId, i64) {
        let conn = open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let user_id = UserId::new(user_id);
        register_user(
            &conn,
            &user_id,
            "Account Holder",
            PasswordHash::new_unchecked("hash"),
            Role::Client,
        )
        .unwrap();
        let account = create_account(&conn, &user_id, opening_balance, "savings").unwrap();

        (conn, user_id, account.id)
    }

    fn transaction_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM \"transaction\"", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn deposit_increases_balance_and_appends_entry() {
        let (conn, user_id, account_id) = init_db_with_account("777", 200.0);

        let new_balance =
            insert_transaction(&conn, account_id, 100.0, TransactionKind::Deposit, &user_id)
                .unwrap();

        assert_eq!(new_balance, 300.0);
        assert_eq!(get_account(&conn, account_id).unwrap().balance, 300.0);

        let entries = transactions_for_user(&conn, &user_id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, 100.0);
        assert_eq!(entries[0].kind, TransactionKind::Deposit);
        assert_eq!(entries[0].user_id, user_id);
    }

    #[test]
    fn withdrawal_decreases_balance() {
        let (conn, user_id, account_id) = init_db_with_account("777", 200.0);

        let new_balance = insert_transaction(
            &conn,
            account_id,
            50.0,
            TransactionKind::Withdrawal,
            &user_id,
        )
        .unwrap();

        assert_eq!(new_balance, 150.0);
        assert_eq!(get_account(&conn, account_id).unwrap().balance, 150.0);
    }

    #[test]
    fn withdrawal_fails_on_insufficient_funds() {
        let (conn, user_id, account_id) = init_db_with_account("777", 100.0);

        let result = insert_transaction(
            &conn,
            account_id,
            100.01,
            TransactionKind::Withdrawal,
            &user_id,
        );

        assert_eq!(
            result,
            Err(Error::InsufficientFunds {
                balance: 100.0,
                requested: 100.01
            })
        );
        // Nothing was committed: balance and history are untouched.
        assert_eq!(get_account(&conn, account_id).unwrap().balance, 100.0);
        assert_eq!(transaction_count(&conn), 0);
    }

    #[test]
    fn withdrawal_of_exact_balance_succeeds() {
        let (conn, user_id, account_id) = init_db_with_account("777", 100.0);

        let new_balance = insert_transaction(
            &conn,
            account_id,
            100.0,
            TransactionKind::Withdrawal,
            &user_id,
        )
        .unwrap();

        assert_eq!(new_balance, 0.0);
    }

    #[test]
    fn insert_fails_on_non_positive_amount() {
        let (conn, user_id, account_id) = init_db_with_account("777", 100.0);

        for amount in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let result =
                insert_transaction(&conn, account_id, amount, TransactionKind::Deposit, &user_id);

            assert!(matches!(result, Err(Error::InvalidAmount(_))), "{amount}");
        }

        assert_eq!(transaction_count(&conn), 0);
    }

    #[test]
    fn insert_fails_on_someone_elses_account() {
        let (conn, _owner, account_id) = init_db_with_account("777", 200.0);
        let intruder = UserId::new("888");
        register_user(
            &conn,
            &intruder,
            "Someone Else",
            PasswordHash::new_unchecked("hash"),
            Role::Client,
        )
        .unwrap();

        let result =
            insert_transaction(&conn, account_id, 10.0, TransactionKind::Deposit, &intruder);

        // Indistinguishable from the account not existing at all.
        assert_eq!(result, Err(Error::NotFound));
        assert_eq!(get_account(&conn, account_id).unwrap().balance, 200.0);
    }

    #[test]
    fn insert_fails_on_missing_account() {
        let (conn, user_id, _) = init_db_with_account("777", 200.0);

        let result = insert_transaction(&conn, 1337, 10.0, TransactionKind::Deposit, &user_id);

        assert_eq!(result, Err(Error::NotFound));
    }

    #[test]
    fn delete_undoes_a_deposit() {
        let (conn, user_id, account_id) = init_db_with_account("777", 200.0);
        insert_transaction(&conn, account_id, 100.0, TransactionKind::Deposit, &user_id).unwrap();
        let entry = &transactions_for_user(&conn, &user_id).unwrap()[0];
        assert_eq!(get_account(&conn, account_id).unwrap().balance, 300.0);

        let reversed_balance = delete_transaction(&conn, entry.id).unwrap();

        assert_eq!(reversed_balance, 200.0);
        assert_eq!(get_account(&conn, account_id).unwrap().balance, 200.0);
        assert_eq!(transaction_count(&conn), 0);
    }

    #[test]
    fn delete_undoes_a_withdrawal() {
        let (conn, user_id, account_id) = init_db_with_account("777", 200.0);
        insert_transaction(
            &conn,
            account_id,
            75.0,
            TransactionKind::Withdrawal,
            &user_id,
        )
        .unwrap();
        let entry = &transactions_for_user(&conn, &user_id).unwrap()[0];

        let reversed_balance = delete_transaction(&conn, entry.id).unwrap();

        assert_eq!(reversed_balance, 200.0);
    }

    #[test]
    fn delete_fails_on_missing_transaction() {
        let (conn, _, _) = init_db_with_account("777", 200.0);

        assert_eq!(delete_transaction(&conn, 1337), Err(Error::NotFound));
    }

    #[test]
    fn delete_fails_on_corrupted_kind() {
        let (conn, user_id, account_id) = init_db_with_account("777", 200.0);
        insert_transaction(&conn, account_id, 100.0, TransactionKind::Deposit, &user_id).unwrap();
        let entry_id = transactions_for_user(&conn, &user_id).unwrap()[0].id;
        conn.execute(
            "UPDATE \"transaction\" SET type = 'transfer' WHERE id_transaction = ?1",
            (entry_id,),
        )
        .unwrap();

        let result = delete_transaction(&conn, entry_id);

        assert_eq!(
            result,
            Err(Error::InvalidTransactionKind("transfer".to_string()))
        );
        // The failed reversal must not touch the balance or the row.
        assert_eq!(get_account(&conn, account_id).unwrap().balance, 300.0);
        assert_eq!(transaction_count(&conn), 1);
    }

    #[test]
    fn update_amount_reconciles_balance() {
        let (conn, user_id, account_id) = init_db_with_account("777", 200.0);
        insert_transaction(&conn, account_id, 100.0, TransactionKind::Deposit, &user_id).unwrap();
        let entry_id = transactions_for_user(&conn, &user_id).unwrap()[0].id;

        let new_balance = update_transaction(&conn, entry_id, Some(50.0), None).unwrap();

        assert_eq!(new_balance, 250.0);
        let entry = get_transaction(&conn, entry_id).unwrap();
        assert_eq!(entry.amount, 50.0);
        assert_eq!(entry.kind, TransactionKind::Deposit);
    }

    #[test]
    fn update_kind_reconciles_balance() {
        let (conn, user_id, account_id) = init_db_with_account("777", 200.0);
        insert_transaction(&conn, account_id, 100.0, TransactionKind::Deposit, &user_id).unwrap();
        let entry_id = transactions_for_user(&conn, &user_id).unwrap()[0].id;
        assert_eq!(get_account(&conn, account_id).unwrap().balance, 300.0);

        let new_balance =
            update_transaction(&conn, entry_id, None, Some(TransactionKind::Withdrawal)).unwrap();

        // Undo the +100, then apply -100.
        assert_eq!(new_balance, 100.0);
        assert_eq!(
            get_transaction(&conn, entry_id).unwrap().kind,
            TransactionKind::Withdrawal
        );
    }

    #[test]
    fn update_rolls_back_when_reapplying_would_overdraw() {
        let (conn, user_id, account_id) = init_db_with_account("777", 200.0);
        insert_transaction(&conn, account_id, 100.0, TransactionKind::Deposit, &user_id).unwrap();
        let entry_id = transactions_for_user(&conn, &user_id).unwrap()[0].id;

        // Undoing the deposit leaves 200; a 500 withdrawal cannot be applied.
        let result =
            update_transaction(&conn, entry_id, Some(500.0), Some(TransactionKind::Withdrawal));

        assert_eq!(
            result,
            Err(Error::InsufficientFunds {
                balance: 200.0,
                requested: 500.0
            })
        );
        assert_eq!(get_account(&conn, account_id).unwrap().balance, 300.0);
        let entry = get_transaction(&conn, entry_id).unwrap();
        assert_eq!(entry.amount, 100.0);
        assert_eq!(entry.kind, TransactionKind::Deposit);
    }

    #[test]
    fn update_fails_with_nothing_to_update() {
        let (conn, user_id, account_id) = init_db_with_account("777", 200.0);
        insert_transaction(&conn, account_id, 100.0, TransactionKind::Deposit, &user_id).unwrap();
        let entry_id = transactions_for_user(&conn, &user_id).unwrap()[0].id;

        let result = update_transaction(&conn, entry_id, None, None);

        assert_eq!(result, Err(Error::EmptyUpdate));
    }

    #[test]
    fn update_fails_on_missing_transaction() {
        let (conn, _, _) = init_db_with_account("777", 200.0);

        let result = update_transaction(&conn, 1337, Some(5.0), None);

        assert_eq!(result, Err(Error::NotFound));
    }

    #[test]
    fn transactions_for_user_follows_account_ownership() {
        let (conn, owner, account_id) = init_db_with_account("777", 500.0);
        let other = UserId::new("888");
        register_user(
            &conn,
            &other,
            "Someone Else",
            PasswordHash::new_unchecked("hash"),
            Role::Client,
        )
        .unwrap();
        let other_account = create_account(&conn, &other, 500.0, "checking").unwrap();

        insert_transaction(&conn, account_id, 10.0, TransactionKind::Deposit, &owner).unwrap();
        insert_transaction(&conn, account_id, 20.0, TransactionKind::Deposit, &owner).unwrap();
        insert_transaction(
            &conn,
            other_account.id,
            30.0,
            TransactionKind::Deposit,
            &other,
        )
        .unwrap();

        let entries = transactions_for_user(&conn, &owner).unwrap();

        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|entry| entry.account_id == account_id));
    }

    #[test]
    fn deleting_a_user_cascades_to_their_transactions() {
        let (conn, user_id, account_id) = init_db_with_account("777", 200.0);
        insert_transaction(&conn, account_id, 10.0, TransactionKind::Deposit, &user_id).unwrap();
        insert_transaction(&conn, account_id, 20.0, TransactionKind::Deposit, &user_id).unwrap();
        assert_eq!(transaction_count(&conn), 2);

        delete_user(&conn, &user_id).unwrap();

        assert_eq!(transaction_count(&conn), 0);
    }
}
