/*! Explicit storage handle management and schema bootstrap.

Every operation in this crate takes a [rusqlite::Connection] rather than
relying on process-wide state. The helpers here open connections with
foreign keys enabled so that deleting a user cascades to their accounts and
deleting an account cascades to its transactions.
*/

use std::path::Path;

use rusqlite::{Connection, Error as SqlError, Row, Transaction as SqlTransaction};

use crate::{Error, account::Account, transaction::Transaction, user::User};

/// Open the database at `path`, enabling foreign key enforcement.
///
/// # Errors
/// Returns an error if the file cannot be opened as a SQLite database.
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection, Error> {
    let connection = Connection::open(path)?;
    enable_foreign_keys(&connection)?;

    Ok(connection)
}

/// Open a fresh in-memory database with foreign key enforcement enabled.
///
/// Intended for tests and experiments; the data is lost when the connection
/// is dropped.
pub fn open_in_memory() -> Result<Connection, Error> {
    let connection = Connection::open_in_memory()?;
    enable_foreign_keys(&connection)?;

    Ok(connection)
}

// SQLite does not enforce foreign keys unless the pragma is set on each
// connection.
fn enable_foreign_keys(connection: &Connection) -> Result<(), SqlError> {
    connection.pragma_update(None, "foreign_keys", true)
}

/// A trait for adding a record type's schema to the database.
pub trait CreateTable {
    /// Create the table for the model if it does not already exist.
    ///
    /// # Errors
    /// Returns an error if there is an SQL error.
    fn create_table(connection: &Connection) -> Result<(), SqlError>;
}

/// A trait for mapping a `rusqlite::Row` to a concrete record type.
///
/// Replaces dynamic row-to-object construction with fixed record types
/// decoded field-by-field.
pub trait MapRow {
    /// The record type produced from a row.
    type ReturnType;

    /// Convert a row into a concrete type.
    ///
    /// **Note:** This function expects that the row contains all the table
    /// columns in the order they were defined.
    ///
    /// # Errors
    /// Returns an error if a row item cannot be converted into the
    /// corresponding rust type, or if an invalid column index was used.
    fn map_row(row: &Row) -> Result<Self::ReturnType, SqlError> {
        Self::map_row_with_offset(row, 0)
    }

    /// Convert a row into a concrete type, reading from column `offset`.
    ///
    /// Useful when tables have been joined and two record types are built
    /// from the one query.
    ///
    /// # Errors
    /// Returns an error if a row item cannot be converted into the
    /// corresponding rust type, or if an invalid column index was used.
    fn map_row_with_offset(row: &Row, offset: usize) -> Result<Self::ReturnType, SqlError>;
}

/// Create the tables for the domain models.
///
/// All tables are created within one exclusive transaction so a half-built
/// schema is never left behind.
///
/// # Errors
/// Returns an error if a table cannot be created.
pub fn initialize(connection: &Connection) -> Result<(), Error> {
    let transaction =
        SqlTransaction::new_unchecked(connection, rusqlite::TransactionBehavior::Exclusive)?;

    User::create_table(&transaction)?;
    Account::create_table(&transaction)?;
    Transaction::create_table(&transaction)?;

    transaction.commit()?;

    Ok(())
}

#[cfg(test)]
mod initialize_tests {
    use super::{initialize, open_in_memory};

    #[test]
    fn creates_all_tables() {
        let conn = open_in_memory().unwrap();

        initialize(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name IN ('user', 'account', 'transaction')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn is_idempotent() {
        let conn = open_in_memory().unwrap();

        initialize(&conn).unwrap();

        assert_eq!(Ok(()), initialize(&conn));
    }

    #[test]
    fn enables_foreign_keys() {
        let conn = open_in_memory().unwrap();

        let enabled: i64 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .unwrap();

        assert_eq!(enabled, 1);
    }
}
