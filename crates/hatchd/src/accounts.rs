//! Resolution of numeric user ids to local account names.

use nix::unistd::{Uid, User};

/// Looks up local accounts by uid.
#[cfg_attr(test, mockall::automock)]
pub trait AccountResolver {
    /// Returns the account name for `uid`, or `None` when no account with
    /// exactly that uid exists.
    fn account_name(&self, uid: u32) -> Option<String>;
}

/// Resolver backed by the system password database.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAccounts;

impl AccountResolver for SystemAccounts {
    fn account_name(&self, uid: u32) -> Option<String> {
        match User::from_uid(Uid::from_raw(uid)) {
            Ok(Some(user)) if user.uid.as_raw() == uid => Some(user.name),
            Ok(_) => None,
            Err(error) => {
                tracing::warn!(
                    target: concat!(env!("CARGO_PKG_NAME"), "::dispatch"),
                    uid,
                    error = %error,
                    "account lookup failed"
                );
                None
            }
        }
    }
}
