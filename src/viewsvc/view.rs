//! View data model: server identifiers and versioned role assignments.

use std::fmt;

use serde::{Deserialize, Serialize};

/// View version number type.
pub type ViewNum = u64;

/// Opaque, equality-comparable server identifier. The empty identifier
/// denotes "no server assigned".
#[derive(
    Debug, PartialEq, Eq, Hash, Clone, Default, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    /// Creates a server ID from any string-like name.
    pub fn new(name: impl Into<String>) -> Self {
        ServerId(name.into())
    }

    /// The empty ID, meaning no server.
    pub fn none() -> Self {
        ServerId(String::new())
    }

    /// Returns true if this is the empty ID.
    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_none() {
            write!(f, "-")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<&str> for ServerId {
    fn from(name: &str) -> Self {
        ServerId::new(name)
    }
}

impl From<String> for ServerId {
    fn from(name: String) -> Self {
        ServerId(name)
    }
}

/// Role a server holds in some view.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum Role {
    Primary,
    Backup,
    Idle,
}

/// A versioned primary/backup role assignment.
#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
pub struct View {
    /// Version number; 0 only for the bootstrap view.
    pub viewnum: ViewNum,

    /// Current primary, empty only in the bootstrap view (or after
    /// unrecoverable failures).
    pub primary: ServerId,

    /// Current backup, possibly empty.
    pub backup: ServerId,
}

impl View {
    /// The bootstrap view `{0, "", ""}` a fresh view service starts with.
    pub fn bootstrap() -> Self {
        View::default()
    }

    pub fn is_primary(&self, id: &ServerId) -> bool {
        !id.is_none() && self.primary == *id
    }

    pub fn is_backup(&self, id: &ServerId) -> bool {
        !id.is_none() && self.backup == *id
    }

    /// Returns the role `id` holds in this view.
    pub fn role_of(&self, id: &ServerId) -> Role {
        if self.is_primary(id) {
            Role::Primary
        } else if self.is_backup(id) {
            Role::Backup
        } else {
            Role::Idle
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<{} P:{} B:{}>", self.viewnum, self.primary, self.backup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_view() {
        let view = View::bootstrap();
        assert_eq!(view.viewnum, 0);
        assert!(view.primary.is_none());
        assert!(view.backup.is_none());
        assert_eq!(format!("{}", view), "<0 P:- B:->");
    }

    #[test]
    fn roles() {
        let view = View {
            viewnum: 4,
            primary: "s1".into(),
            backup: "s2".into(),
        };
        assert_eq!(view.role_of(&"s1".into()), Role::Primary);
        assert_eq!(view.role_of(&"s2".into()), Role::Backup);
        assert_eq!(view.role_of(&"s3".into()), Role::Idle);
        // the empty ID never holds a role even if a slot is empty
        let half = View {
            viewnum: 1,
            primary: "s1".into(),
            backup: ServerId::none(),
        };
        assert_eq!(half.role_of(&ServerId::none()), Role::Idle);
    }

    #[test]
    fn server_id_wire_is_plain_string() {
        let bytes = rmp_serde::to_vec(&ServerId::new("s9")).unwrap();
        let name: String = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(name, "s9");
    }
}
