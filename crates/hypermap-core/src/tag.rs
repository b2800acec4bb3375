//! Type tags naming semantic value types.
//!
//! A tag is the node identity in the resolution hypergraph. Two tags are
//! equal exactly when their names are equal; the shape of the values they
//! describe never takes part in the comparison.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Opaque identifier for a semantic value type (for example
/// `"config.raw"` or `"machine.handle"`).
///
/// Cloning is cheap; the name is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeTag(Arc<str>);

impl TypeTag {
    /// Creates a tag from a name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// Creates a tag named after a Rust type.
    ///
    /// Useful when the values exchanged are distinct Rust types and the
    /// caller does not want to invent names for them.
    pub fn of<T: ?Sized>() -> Self {
        Self(Arc::from(std::any::type_name::<T>()))
    }

    /// Returns the tag name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TypeTag {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TypeTag {
    fn from(name: &str) -> Self {
        Self(Arc::from(name))
    }
}

impl From<String> for TypeTag {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<&TypeTag> for TypeTag {
    fn from(tag: &TypeTag) -> Self {
        tag.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_tags_compare_by_name() {
        assert_eq!(TypeTag::from("raw"), TypeTag::new(String::from("raw")));
        assert_ne!(TypeTag::from("raw"), TypeTag::from("normalized"));
    }

    #[test]
    fn test_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(TypeTag::from("raw"), 1);
        assert_eq!(map.get("raw"), Some(&1));
    }

    #[test]
    fn test_tag_of_rust_type() {
        assert_eq!(TypeTag::of::<String>(), TypeTag::of::<String>());
        assert_ne!(TypeTag::of::<String>(), TypeTag::of::<u32>());
        assert_eq!(TypeTag::of::<u32>().as_str(), "u32");
    }
}
