//! The user record and the directory operations over it.
//!
//! Users are keyed by an external id string (e.g. a national ID), carry a
//! display name, a salted password hash, and a role. Deleting a user cascades
//! to their accounts and, through those, to their transactions.

use std::fmt::Display;
use std::str::FromStr;

use rusqlite::{Connection, Row, types::Value};
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    db::{CreateTable, MapRow},
    password::PasswordHash,
};

/// A newtype wrapper for external user ids.
///
/// User ids are caller-supplied strings rather than database row ids, so the
/// newtype keeps them from being mixed up with [crate::AccountId] and
/// [crate::TransactionId] integers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Wrap an external id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice, e.g. for use as a query parameter.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The role attached to a user, controlling what the access policy lets them
/// do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// May manage other users, accounts, and transaction corrections.
    Admin,
    /// A regular customer; sees and mutates only their own records.
    #[default]
    Client,
}

impl Role {
    /// The role as the text stored in the `role` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Client => "client",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "admin" => Ok(Role::Admin),
            "client" => Ok(Role::Client),
            other => Err(format!("{other:?} is not a valid role")),
        }
    }
}

/// A registered user of the record-keeper.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    id: UserId,
    name: String,
    password_hash: PasswordHash,
    role: Role,
}

impl User {
    /// The user's external id.
    pub fn id(&self) -> &UserId {
        &self.id
    }

    /// The user's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The user's stored password hash.
    pub fn password_hash(&self) -> &PasswordHash {
        &self.password_hash
    }

    /// The user's role.
    pub fn role(&self) -> Role {
        self.role
    }
}

impl CreateTable for User {
    fn create_table(connection: &Connection) -> Result<(), rusqlite::Error> {
        connection.execute(
            "CREATE TABLE IF NOT EXISTS user (
                    id_user TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    password_hash TEXT NOT NULL,
                    role TEXT NOT NULL DEFAULT 'client'
                    )",
            (),
        )?;

        Ok(())
    }
}

impl MapRow for User {
    type ReturnType = Self;

    fn map_row_with_offset(row: &Row, offset: usize) -> Result<Self, rusqlite::Error> {
        let raw_id: String = row.get(offset)?;
        let name = row.get(offset + 1)?;
        let raw_hash: String = row.get(offset + 2)?;
        let raw_role: String = row.get(offset + 3)?;

        let role = raw_role.parse().map_err(|message: String| {
            rusqlite::Error::FromSqlConversionFailure(
                offset + 3,
                rusqlite::types::Type::Text,
                message.into(),
            )
        })?;

        Ok(Self {
            id: UserId::new(raw_id),
            name,
            password_hash: PasswordHash::new_unchecked(&raw_hash),
            role,
        })
    }
}

/// Register a new user.
///
/// The id is checked proactively, and the primary key constraint catches the
/// race where two registrations for the same id interleave; both paths fail
/// with [Error::DuplicateUser].
///
/// The password must already be hashed: the directory never stores or
/// receives plaintext. See [PasswordHash::from_raw_password].
///
/// # Errors
/// Returns [Error::DuplicateUser] if the id is taken, or [Error::SqlError]
/// for an unexpected SQL error.
pub fn register_user(
    connection: &Connection,
    id: &UserId,
    name: &str,
    password_hash: PasswordHash,
    role: Role,
) -> Result<User, Error> {
    let already_exists: Option<String> = connection
        .prepare("SELECT id_user FROM user WHERE id_user = :id")?
        .query_row(&[(":id", id.as_str())], |row| row.get(0))
        .map(Some)
        .or_else(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            error => Err(error),
        })?;

    if already_exists.is_some() {
        return Err(Error::DuplicateUser);
    }

    connection.execute(
        "INSERT INTO user (id_user, name, password_hash, role) VALUES (?1, ?2, ?3, ?4)",
        (id.as_str(), name, password_hash.to_string(), role.as_str()),
    )?;

    Ok(User {
        id: id.clone(),
        name: name.to_string(),
        password_hash,
        role,
    })
}

/// Retrieve the user with the given id.
///
/// # Errors
/// Returns [Error::NotFound] if no such user exists.
pub fn get_user(connection: &Connection, id: &UserId) -> Result<User, Error> {
    let user = connection
        .prepare("SELECT id_user, name, password_hash, role FROM user WHERE id_user = :id")?
        .query_row(&[(":id", id.as_str())], User::map_row)?;

    Ok(user)
}

/// Retrieve every registered user, in registration order.
///
/// # Errors
/// Returns [Error::SqlError] if there is an SQL error.
pub fn get_all_users(connection: &Connection) -> Result<Vec<User>, Error> {
    connection
        .prepare("SELECT id_user, name, password_hash, role FROM user ORDER BY rowid")?
        .query_map([], User::map_row)?
        .map(|maybe_user| maybe_user.map_err(Error::from))
        .collect()
}

/// Change a user's display name (the admin "update user" operation).
///
/// # Errors
/// Returns [Error::NotFound] if no row was affected.
pub fn update_user_name(connection: &Connection, id: &UserId, new_name: &str) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE user SET name = ?1 WHERE id_user = ?2",
        (new_name, id.as_str()),
    )?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Update a user's own profile: display name and/or password hash.
///
/// Identity and role are never changed by this operation. Verifying the
/// user's current password first is the caller's job.
///
/// # Errors
/// Returns [Error::EmptyUpdate] if neither field is supplied, or
/// [Error::NotFound] if no row was affected.
pub fn update_user_profile(
    connection: &Connection,
    id: &UserId,
    new_name: Option<&str>,
    new_password_hash: Option<PasswordHash>,
) -> Result<(), Error> {
    let mut assignments = Vec::new();
    let mut parameters: Vec<Value> = Vec::new();

    if let Some(name) = new_name {
        assignments.push(format!("name = ?{}", parameters.len() + 1));
        parameters.push(Value::Text(name.to_string()));
    }

    if let Some(hash) = new_password_hash {
        assignments.push(format!("password_hash = ?{}", parameters.len() + 1));
        parameters.push(Value::Text(hash.to_string()));
    }

    if assignments.is_empty() {
        return Err(Error::EmptyUpdate);
    }

    let statement = format!(
        "UPDATE user SET {} WHERE id_user = ?{}",
        assignments.join(", "),
        parameters.len() + 1
    );
    parameters.push(Value::Text(id.as_str().to_string()));

    let rows_affected =
        connection.execute(&statement, rusqlite::params_from_iter(parameters.iter()))?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Delete a user, cascading to their accounts and those accounts'
/// transactions.
///
/// # Errors
/// Returns [Error::NotFound] if no such user exists.
pub fn delete_user(connection: &Connection, id: &UserId) -> Result<(), Error> {
    let rows_affected =
        connection.execute("DELETE FROM user WHERE id_user = ?1", (id.as_str(),))?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}
