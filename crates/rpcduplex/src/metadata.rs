use std::fmt;

use crate::error::MetadataError;

/// An ordered multi-map of call metadata.
///
/// Keys are case-insensitive and stored lowercase. Each key maps to one or
/// more values, and keys keep the order in which they were first inserted.
///
/// Two ways of adding values are offered on purpose:
/// - [`Metadata::set`] refuses to touch a key that already exists and reports
///   [`MetadataError::DuplicateKey`].
/// - [`Metadata::append`] concatenates onto whatever is already there.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, Vec<String>)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build metadata from key/value pairs with `set` semantics.
    pub fn try_from_pairs<I, K, V>(pairs: I) -> Result<Self, MetadataError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut md = Self::new();
        for (key, value) in pairs {
            md.set(key.as_ref(), value)?;
        }
        Ok(md)
    }

    /// Set a single value for a key that must not exist yet.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> Result<(), MetadataError> {
        let key = normalize(key);
        if self.position(&key).is_some() {
            return Err(MetadataError::DuplicateKey(key));
        }
        self.entries.push((key, vec![value.into()]));
        Ok(())
    }

    /// Append a value to a key, creating the key if needed.
    pub fn append(&mut self, key: &str, value: impl Into<String>) {
        let key = normalize(key);
        match self.position(&key) {
            Some(idx) => self.entries[idx].1.push(value.into()),
            None => self.entries.push((key, vec![value.into()])),
        }
    }

    /// Merge another map into this one, failing without modification if any
    /// key is present in both.
    pub fn merge(&mut self, other: Metadata) -> Result<(), MetadataError> {
        if let Some((key, _)) = other
            .entries
            .iter()
            .find(|(key, _)| self.position(key).is_some())
        {
            return Err(MetadataError::DuplicateKey(key.clone()));
        }
        self.entries.extend(other.entries);
        Ok(())
    }

    /// Merge another map into this one, concatenating value lists on collision.
    pub fn merge_append(&mut self, other: Metadata) {
        for (key, values) in other.entries {
            match self.position(&key) {
                Some(idx) => self.entries[idx].1.extend(values),
                None => self.entries.push((key, values)),
            }
        }
    }

    /// First value stored for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(String::as_str)
    }

    /// All values stored for `key`, empty if the key is absent.
    pub fn get_all(&self, key: &str) -> &[String] {
        match self.position(&normalize(key)) {
            Some(idx) => &self.entries[idx].1,
            None => &[],
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(&normalize(key)).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        let idx = self.position(&normalize(key))?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(key, values)| (key.as_str(), values.as_slice()))
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, normalized: &str) -> Option<usize> {
        self.entries.iter().position(|(key, _)| key == normalized)
    }
}

fn normalize(key: &str) -> String {
    key.to_ascii_lowercase()
}

impl<K, V> FromIterator<(K, V)> for Metadata
where
    K: AsRef<str>,
    V: Into<String>,
{
    /// Collects with `append` semantics; repeated keys accumulate values.
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut md = Metadata::new();
        for (key, value) in iter {
            md.append(key.as_ref(), value);
        }
        md
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, values)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}: [{}]", values.join(", "))?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_case_insensitive() {
        let mut md = Metadata::new();
        md.set("Token", "abc").unwrap();
        assert_eq!(md.get("token"), Some("abc"));
        assert_eq!(md.get("TOKEN"), Some("abc"));
        assert!(md.contains_key("tOkEn"));
    }

    #[test]
    fn test_set_rejects_existing_key() {
        let mut md = Metadata::new();
        md.set("from", "server").unwrap();

        let err = md.set("FROM", "client").unwrap_err();
        assert_eq!(err, MetadataError::DuplicateKey("from".to_string()));
        assert_eq!(md.get_all("from"), ["server".to_string()]);
    }

    #[test]
    fn test_append_concatenates() {
        let mut md = Metadata::new();
        md.append("user", "a");
        md.append("User", "b");
        assert_eq!(md.get_all("user"), ["a".to_string(), "b".to_string()]);
        assert_eq!(md.len(), 1);
    }

    #[test]
    fn test_try_from_pairs_and_collect_differ_on_duplicates() {
        let pairs = [("k", "1"), ("k", "2")];
        assert!(Metadata::try_from_pairs(pairs).is_err());

        let md: Metadata = pairs.into_iter().collect();
        assert_eq!(md.get_all("k").len(), 2);
    }

    #[test]
    fn test_merge_is_atomic_on_collision() {
        let mut base = Metadata::try_from_pairs([("a", "1")]).unwrap();
        let other = Metadata::try_from_pairs([("b", "2"), ("a", "3")]).unwrap();

        assert!(base.merge(other).is_err());
        assert!(!base.contains_key("b"));
        assert_eq!(base.len(), 1);
    }

    #[test]
    fn test_merge_append_concatenates() {
        let mut base = Metadata::try_from_pairs([("a", "1")]).unwrap();
        let other = Metadata::try_from_pairs([("a", "2"), ("b", "3")]).unwrap();

        base.merge_append(other);
        assert_eq!(base.get_all("a"), ["1".to_string(), "2".to_string()]);
        assert_eq!(base.get("b"), Some("3"));
    }

    #[test]
    fn test_order_and_display() {
        let mut md = Metadata::new();
        md.append("timestamp", "now");
        md.append("from", "server");
        md.append("timestamp", "later");

        let keys: Vec<&str> = md.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["timestamp", "from"]);
        assert_eq!(md.to_string(), "{timestamp: [now, later], from: [server]}");
    }

    #[test]
    fn test_remove() {
        let mut md = Metadata::try_from_pairs([("a", "1")]).unwrap();
        assert_eq!(md.remove("A"), Some(vec!["1".to_string()]));
        assert!(md.is_empty());
        assert_eq!(md.remove("a"), None);
    }
}
