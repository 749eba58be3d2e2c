//! Credential verification.
//!
//! The only place where a raw password meets the stored hash. Everything
//! downstream of a successful [authenticate] works with an [Actor], never a
//! password.

use rusqlite::Connection;

use crate::{Error, policy::Actor, user::UserId, user::get_user};

/// Look up the user and verify the presented credential against the stored
/// bcrypt hash.
///
/// An unknown id and a wrong password both fail with
/// [Error::InvalidCredentials] so the login flow cannot be used to probe
/// which ids are registered.
///
/// # Errors
/// - [Error::InvalidCredentials] as described above.
/// - [Error::HashingError] if the stored hash is malformed.
/// - [Error::SqlError] for an unexpected SQL error.
pub fn authenticate(
    connection: &Connection,
    user_id: &UserId,
    raw_password: &str,
) -> Result<Actor, Error> {
    let user = match get_user(connection, user_id) {
        Ok(user) => user,
        Err(Error::NotFound) => return Err(Error::InvalidCredentials),
        Err(error) => return Err(error),
    };

    if user.password_hash().verify(raw_password)? {
        Ok(Actor {
            user_id: user.id().clone(),
            role: user.role(),
        })
    } else {
        Err(Error::InvalidCredentials)
    }
}
