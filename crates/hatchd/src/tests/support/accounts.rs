//! Fixed uid to account table.

use std::collections::HashMap;

use crate::accounts::AccountResolver;

#[derive(Debug, Clone, Default)]
pub struct FakeAccounts {
    names: HashMap<u32, String>,
}

impl FakeAccounts {
    #[must_use]
    pub fn with(mut self, uid: u32, name: &str) -> Self {
        self.names.insert(uid, name.to_owned());
        self
    }
}

impl AccountResolver for FakeAccounts {
    fn account_name(&self, uid: u32) -> Option<String> {
        self.names.get(&uid).cloned()
    }
}
