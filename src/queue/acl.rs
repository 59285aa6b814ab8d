//! Queue access control lists.

use serde::Serialize;
use std::collections::BTreeSet;

/// Operations guarded by a queue ACL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum QueueAcl {
    SubmitApplications,
    AdministerQueue,
}

impl QueueAcl {
    pub const ALL: [QueueAcl; 2] = [QueueAcl::SubmitApplications, QueueAcl::AdministerQueue];
}

/// Users allowed by one ACL entry: everyone (`*`) or an explicit list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessControlList {
    all: bool,
    users: BTreeSet<String>,
}

impl AccessControlList {
    /// Parse `*` or a comma separated user list. Blank input allows nobody.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value == "*" {
            return Self::everyone();
        }
        Self {
            all: false,
            users: value
                .split(',')
                .map(str::trim)
                .filter(|user| !user.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn everyone() -> Self {
        Self {
            all: true,
            users: BTreeSet::new(),
        }
    }

    pub fn nobody() -> Self {
        Self::default()
    }

    pub fn is_user_allowed(&self, user: &str) -> bool {
        self.all || self.users.contains(user)
    }
}

/// ACLs a user holds on one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueUserAclInfo {
    pub queue_name: String,
    pub user_acls: Vec<QueueAcl>,
}
