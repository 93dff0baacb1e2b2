//! Directory entries, search responses and search requests.

use std::collections::HashMap;
use std::time::Duration;

use ldap3::{SearchEntry, ldap_escape};

/// Attribute holding the object classes of an entry.
pub const OBJECT_CLASS: &str = "objectClass";
/// Request every user attribute.
pub const ALL_ATTRIBUTES: &str = "*";

/// One entry returned by a directory search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// Create a new [`DirectoryEntry`].
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attrs: HashMap::new(),
        }
    }

    /// Add (or extend) an attribute.
    pub fn with_attribute<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attrs
            .entry(name.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Attribute names are case-insensitive.
    pub fn values(&self, name: &str) -> Option<&[String]> {
        self.attrs
            .iter()
            .find(|(attr, _)| attr.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
    }

    pub fn contains_attribute(&self, name: &str) -> bool {
        self.values(name).is_some()
    }

    pub fn first_value(&self, name: &str) -> Option<&str> {
        self.values(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn has_object_class(&self, class: &str) -> bool {
        self.values(OBJECT_CLASS)
            .is_some_and(|values| values.iter().any(|v| v.eq_ignore_ascii_case(class)))
    }
}

// Values that are not valid UTF-8 land in `bin_attrs`; they are decoded
// lossily so the attribute still counts as present.
impl From<SearchEntry> for DirectoryEntry {
    fn from(entry: SearchEntry) -> Self {
        let mut attrs = entry.attrs;
        for (name, values) in entry.bin_attrs {
            attrs
                .entry(name)
                .or_default()
                .extend(values.iter().map(|value| String::from_utf8_lossy(value).into_owned()));
        }

        Self { dn: entry.dn, attrs }
    }
}

/// Every kind of response a search can stream back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchResponse {
    Entry(DirectoryEntry),
    Referral,
    Intermediate,
}

/// A subtree search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base: String,
    pub filter: String,
    pub attributes: Vec<String>,
    /// Server side size limit, `0` disables it.
    pub size_limit: i32,
    pub time_limit: Option<Duration>,
}

impl SearchRequest {
    /// Create a new subtree search requesting every attribute.
    pub fn subtree(base: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            filter: filter.into(),
            attributes: vec![ALL_ATTRIBUTES.to_owned()],
            size_limit: 0,
            time_limit: None,
        }
    }

    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn size_limit(mut self, limit: usize) -> Self {
        self.size_limit = i32::try_from(limit).unwrap_or(i32::MAX);
        self
    }

    pub fn time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }
}

/// `(attr=value)`, with the value escaped.
pub fn equality(attr: &str, value: &str) -> String {
    format!("({attr}={})", ldap_escape(value))
}

/// `(attr=*)`.
pub fn presence(attr: &str) -> String {
    format!("({attr}=*)")
}

/// `(&f1f2...)`.
pub fn and<I, S>(filters: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::from("(&");
    for filter in filters {
        out.push_str(filter.as_ref());
    }
    out.push(')');
    out
}
