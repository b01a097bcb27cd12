//! Authentication boundary.  Sign-in itself happens in the host page; the
//! core only sees an opaque principal and a bearer token source.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub user_id: String,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Principal {
    pub fn new(user_id: &str, tenant_id: &str) -> Self {
        Self { user_id: user_id.to_string(), tenant_id: tenant_id.to_string(), display_name: None }
    }
}

/// Supplies the bearer token attached to store calls.
pub trait TokenProvider {
    fn bearer_token(&self) -> Option<String>;
}

/// Token handed over by the host's sign-in session.  Clones share the same
/// slot so the host can rotate the token after the store was built.
#[derive(Clone, Default)]
pub struct SessionToken {
    token: Rc<RefCell<Option<String>>>,
}

impl SessionToken {
    pub fn new(token: Option<String>) -> Self {
        Self { token: Rc::new(RefCell::new(token)) }
    }

    pub fn set(&self, token: Option<String>) {
        *self.token.borrow_mut() = token;
    }

    pub fn clear(&self) {
        self.set(None);
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present = self.token.borrow().is_some();
        f.debug_struct("SessionToken").field("present", &present).finish()
    }
}

impl TokenProvider for SessionToken {
    fn bearer_token(&self) -> Option<String> {
        self.token.borrow().clone()
    }
}
