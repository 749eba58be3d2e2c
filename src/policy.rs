//! Authorization checks applied before mutations.
//!
//! Each check is an explicit function returning a [Result] the caller must
//! act on before touching the directory or the ledger, rather than a
//! cross-cutting wrapper. The ledger engine re-verifies ownership itself for
//! defense in depth; these checks are the first gate.

use crate::{
    Error,
    tables::TableName,
    user::{Role, UserId},
};

/// A pre-authenticated identity: who is asking, and with what role.
///
/// Obtained from [crate::auth::authenticate]; the policy layer trusts that
/// the credential check already happened.
#[derive(Clone, Debug, PartialEq)]
pub struct Actor {
    /// The authenticated user's id.
    pub user_id: UserId,
    /// The authenticated user's role.
    pub role: Role,
}

impl Actor {
    /// Whether this actor holds the admin role.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Require the admin role.
///
/// Guards user deletion/update, account creation/update, transaction
/// corrections, and unrestricted table reads.
///
/// # Errors
/// Returns [Error::PermissionDenied] for non-admins.
pub fn require_admin(actor: &Actor) -> Result<(), Error> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(Error::PermissionDenied)
    }
}

/// Require that the actor owns the target resource, or is an admin.
///
/// A non-admin non-owner gets [Error::NotFound], not a permission error:
/// the caller must not learn that the resource exists for someone else.
pub fn require_owner_or_admin(actor: &Actor, owner: &UserId) -> Result<(), Error> {
    if actor.is_admin() || actor.user_id == *owner {
        Ok(())
    } else {
        Err(Error::NotFound)
    }
}

/// Decide how a table scan should be scoped for this actor.
///
/// Admins read every table unrestricted (`None`). Clients may not read the
/// `user` table at all, and read `account`/`transaction` restricted to rows
/// carrying their own id (`Some`).
///
/// # Errors
/// Returns [Error::PermissionDenied] if the actor may not read the table.
pub fn table_scope<'a>(actor: &'a Actor, table: TableName) -> Result<Option<&'a UserId>, Error> {
    if actor.is_admin() {
        return Ok(None);
    }

    match table {
        TableName::User => Err(Error::PermissionDenied),
        TableName::Account | TableName::Transaction => Ok(Some(&actor.user_id)),
    }
}
