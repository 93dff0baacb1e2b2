//! Heuristic detection of directory attribute names and object classes.
//!
//! A detector is fed sampled entries one by one and then asked for the
//! candidate the sample supports best.
mod scorer;

pub use scorer::OccurrenceAndWeightDetector;

use std::fmt;

use crate::error::Result;
use crate::ldap::entry::DirectoryEntry;

/// Marker rendered for values the sample could not support.
pub const UNRESOLVED: &str = "N/A";

/// Result of a detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    Found(String),
    Unresolved,
}

impl Detection {
    pub fn value(&self) -> Option<&str> {
        match self {
            Detection::Found(value) => Some(value),
            Detection::Unresolved => None,
        }
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value().unwrap_or(UNRESOLVED))
    }
}

/// Collects evidence from entries, then reports a single best guess.
pub trait AttributeDetector: Send {
    /// Inspect one entry.
    fn collect(&mut self, entry: &DirectoryEntry);

    /// Best candidate so far.
    fn detect(&self) -> Result<Detection>;

    /// Forget every collected entry.
    fn reset(&mut self);
}

fn has_attribute(entry: &DirectoryEntry, candidate: &str) -> bool {
    entry.contains_attribute(candidate)
}

fn has_object_class(entry: &DirectoryEntry, candidate: &str) -> bool {
    entry.has_object_class(candidate)
}

/// Attribute holding the login name of a user.
pub fn user_name_attribute() -> OccurrenceAndWeightDetector {
    OccurrenceAndWeightDetector::new(
        "user name attribute",
        [("sAMAccountName", 5), ("uid", 3), ("cn", 1)],
        has_attribute,
    )
}

/// Object class shared by user entries.
pub fn user_object_class() -> OccurrenceAndWeightDetector {
    OccurrenceAndWeightDetector::new(
        "user object class",
        [("person", 1), ("posixAccount", 1)],
        has_object_class,
    )
}

/// Attribute listing the groups of a user, on the user entry.
pub fn user_group_member_attribute() -> OccurrenceAndWeightDetector {
    OccurrenceAndWeightDetector::new(
        "user group member attribute",
        [("memberOf", 1), ("ismemberOf", 1)],
        has_attribute,
    )
}

/// Attribute holding the name of a group.
pub fn group_name_attribute() -> OccurrenceAndWeightDetector {
    OccurrenceAndWeightDetector::new(
        "group name attribute",
        [("cn", 2), ("name", 1)],
        has_attribute,
    )
}

/// Object class shared by group entries.
pub fn group_object_class() -> OccurrenceAndWeightDetector {
    OccurrenceAndWeightDetector::new(
        "group object class",
        [
            ("group", 1),
            ("groupOfNames", 1),
            ("groupOfUniqueNames", 1),
            ("posixGroup", 1),
        ],
        has_object_class,
    )
}

/// Attribute listing the members of a group, on the group entry.
pub fn group_member_attribute() -> OccurrenceAndWeightDetector {
    OccurrenceAndWeightDetector::new(
        "group member attribute",
        [("member", 1), ("memberUid", 1), ("uniqueMember", 1)],
        has_attribute,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(uid: &str) -> DirectoryEntry {
        DirectoryEntry::new(format!("uid={uid},ou=people,dc=example,dc=com"))
            .with_attribute("uid", [uid])
            .with_attribute("cn", [uid])
            .with_attribute("objectClass", ["top", "person", "inetOrgPerson"])
    }

    #[test]
    fn test_openldap_users() {
        let mut name = user_name_attribute();
        let mut class = user_object_class();
        let mut member = user_group_member_attribute();

        for uid in ["einstein", "newton", "tesla"] {
            let entry = person(uid);
            name.collect(&entry);
            class.collect(&entry);
            member.collect(&entry);
        }

        assert_eq!(name.detect().unwrap(), Detection::Found("uid".into()));
        assert_eq!(class.detect().unwrap(), Detection::Found("person".into()));
        assert_eq!(member.detect().unwrap(), Detection::Unresolved);
    }

    #[test]
    fn test_active_directory_users() {
        let mut name = user_name_attribute();
        let mut member = user_group_member_attribute();

        let entry = DirectoryEntry::new("CN=Jane Doe,CN=Users,DC=corp,DC=example,DC=com")
            .with_attribute("sAMAccountName", ["jdoe"])
            .with_attribute("cn", ["Jane Doe"])
            .with_attribute("memberOf", ["CN=Admins,CN=Users,DC=corp,DC=example,DC=com"]);
        name.collect(&entry);
        member.collect(&entry);

        assert_eq!(name.detect().unwrap().to_string(), "sAMAccountName");
        assert_eq!(member.detect().unwrap().to_string(), "memberOf");
    }

    #[test]
    fn test_groups() {
        let mut name = group_name_attribute();
        let mut class = group_object_class();
        let mut member = group_member_attribute();

        let entry = DirectoryEntry::new("cn=scientists,ou=groups,dc=example,dc=com")
            .with_attribute("cn", ["scientists"])
            .with_attribute("objectClass", ["top", "groupOfUniqueNames"])
            .with_attribute("uniqueMember", ["uid=einstein,dc=example,dc=com"]);
        name.collect(&entry);
        class.collect(&entry);
        member.collect(&entry);

        assert_eq!(name.detect().unwrap().to_string(), "cn");
        assert_eq!(class.detect().unwrap().to_string(), "groupOfUniqueNames");
        assert_eq!(member.detect().unwrap().to_string(), "uniqueMember");
    }

    #[test]
    fn test_unresolved_renders_marker() {
        assert_eq!(Detection::Unresolved.to_string(), UNRESOLVED);
        assert_eq!(Detection::Unresolved.value(), None);
    }
}
