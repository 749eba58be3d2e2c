//! Whole-table reads for the viewing layer.
//!
//! Scans are limited to a fixed set of tables ([TableName]); caller-supplied
//! table names never reach the SQL text. Results come back as an ordered
//! list of column names plus one mapping per row, which is all a generic
//! table view needs.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use rusqlite::{Connection, types::ValueRef};
use serde::Serialize;
use serde_json::Value;

use crate::{Error, user::UserId};

/// The tables that may be scanned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableName {
    /// The registered users.
    User,
    /// The accounts.
    Account,
    /// The ledger transactions.
    Transaction,
}

impl TableName {
    // `transaction` is a SQL keyword and must stay quoted.
    fn quoted(&self) -> &'static str {
        match self {
            TableName::User => "user",
            TableName::Account => "account",
            TableName::Transaction => "\"transaction\"",
        }
    }

    /// Whether rows in this table carry an `id_user` column to scope by.
    fn is_scopable(&self) -> bool {
        matches!(self, TableName::Account | TableName::Transaction)
    }
}

impl Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TableName::User => "user",
            TableName::Account => "account",
            TableName::Transaction => "transaction",
        };
        f.write_str(name)
    }
}

impl FromStr for TableName {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "user" => Ok(TableName::User),
            "account" => Ok(TableName::Account),
            "transaction" => Ok(TableName::Transaction),
            other => Err(format!(
                "{other:?} is not a table; expected \"user\", \"account\", or \"transaction\""
            )),
        }
    }
}

/// The result of a table scan: column names in definition order, and one
/// column-to-value mapping per row.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableData {
    /// The column names, in the order they appear in the table definition.
    pub columns: Vec<String>,
    /// The rows, each mapping a column name to its value.
    pub rows: Vec<HashMap<String, Value>>,
}

/// Scan a table, optionally restricted to rows owned by one user.
///
/// `scope` is decided by [crate::policy::table_scope]: `None` reads the whole
/// table, `Some` filters `account`/`transaction` rows by their `id_user`
/// column. The `user` table has no owner column and is never scoped; the
/// policy layer refuses it to non-admins outright.
///
/// # Errors
/// Returns [Error::SqlError] if there is an SQL error.
pub fn get_table_data(
    connection: &Connection,
    table: TableName,
    scope: Option<&UserId>,
) -> Result<TableData, Error> {
    let scope = scope.filter(|_| table.is_scopable());

    let statement_text = match scope {
        Some(_) => format!("SELECT * FROM {} WHERE id_user = ?1", table.quoted()),
        None => format!("SELECT * FROM {}", table.quoted()),
    };

    let mut statement = connection.prepare(&statement_text)?;
    let columns: Vec<String> = statement
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();

    let mut raw_rows = match scope {
        Some(user_id) => statement.query((user_id.as_str(),))?,
        None => statement.query([])?,
    };

    let mut rows = Vec::new();
    while let Some(raw_row) = raw_rows.next()? {
        let mut row = HashMap::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            row.insert(column.clone(), decode_cell(raw_row.get_ref(index)?));
        }
        rows.push(row);
    }

    Ok(TableData { columns, rows })
}

fn decode_cell(cell: ValueRef) -> Value {
    match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(number) => Value::from(number),
        // Non-finite reals have no JSON representation.
        ValueRef::Real(number) => serde_json::Number::from_f64(number)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(text) => Value::from(String::from_utf8_lossy(text).into_owned()),
        // The schema has no blob columns.
        ValueRef::Blob(_) => Value::Null,
    }
}

#[cfg(test)]
mod table_data_tests {
    use serde_json::Value;

    use crate::{
        account::create_account,
        db::{initialize, open_in_memory},
        password::PasswordHash,
        transaction::{TransactionKind, insert_transaction},
        user::{Role, UserId, register_user},
    };

    use super::{TableName, get_table_data};

    fn init_db_with_two_users() -> (rusqlite::Connection, UserId, UserId) {
        let conn = open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let first = UserId::new("777");
        let second = UserId::new("888");
        for (id, name) in [(&first, "First"), (&second, "Second")] {
            register_user(
                &conn,
                id,
                name,
                PasswordHash::new_unchecked("hash"),
                Role::Client,
            )
            .unwrap();
        }

        (conn, first, second)
    }

    #[test]
    fn columns_come_back_in_definition_order() {
        let (conn, _, _) = init_db_with_two_users();

        let data = get_table_data(&conn, TableName::Account, None).unwrap();

        assert_eq!(data.columns, ["id_account", "id_user", "amount", "type"]);
    }

    #[test]
    fn unscoped_scan_sees_every_row() {
        let (conn, first, second) = init_db_with_two_users();
        create_account(&conn, &first, 100.0, "savings").unwrap();
        create_account(&conn, &second, 200.0, "checking").unwrap();

        let data = get_table_data(&conn, TableName::Account, None).unwrap();

        assert_eq!(data.rows.len(), 2);
    }

    #[test]
    fn scoped_scan_sees_only_the_owners_rows() {
        let (conn, first, second) = init_db_with_two_users();
        create_account(&conn, &first, 100.0, "savings").unwrap();
        create_account(&conn, &second, 200.0, "checking").unwrap();

        let data = get_table_data(&conn, TableName::Account, Some(&first)).unwrap();

        assert_eq!(data.rows.len(), 1);
        assert_eq!(
            data.rows[0].get("id_user"),
            Some(&Value::from(first.as_str()))
        );
        assert_eq!(data.rows[0].get("amount"), Some(&Value::from(100.0)));
    }

    #[test]
    fn scoped_transaction_scan_filters_by_acting_user() {
        let (conn, first, second) = init_db_with_two_users();
        let account = create_account(&conn, &first, 100.0, "savings").unwrap();
        let other_account = create_account(&conn, &second, 100.0, "savings").unwrap();
        insert_transaction(&conn, account.id, 10.0, TransactionKind::Deposit, &first).unwrap();
        insert_transaction(
            &conn,
            other_account.id,
            20.0,
            TransactionKind::Deposit,
            &second,
        )
        .unwrap();

        let data = get_table_data(&conn, TableName::Transaction, Some(&first)).unwrap();

        assert_eq!(data.rows.len(), 1);
        assert_eq!(data.rows[0].get("amount"), Some(&Value::from(10.0)));
    }

    #[test]
    fn user_table_scan_is_never_scoped() {
        let (conn, first, _) = init_db_with_two_users();

        let data = get_table_data(&conn, TableName::User, Some(&first)).unwrap();

        assert_eq!(data.rows.len(), 2);
    }

    #[test]
    fn table_names_parse_from_text() {
        assert_eq!("user".parse(), Ok(TableName::User));
        assert_eq!("account".parse(), Ok(TableName::Account));
        assert_eq!("transaction".parse(), Ok(TableName::Transaction));
        assert!("sqlite_master".parse::<TableName>().is_err());
    }
}
