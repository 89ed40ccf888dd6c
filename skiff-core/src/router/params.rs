//! Path parameters captured during route lookup

/// Ordered `:name` captures of a matched route
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    keys: Vec<String>,
    values: Vec<String>,
}

impl Params {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair `keys` with `values` position by position
    pub fn from_parts(keys: Vec<String>, values: Vec<String>) -> Self {
        debug_assert_eq!(keys.len(), values.len());
        Self { keys, values }
    }

    /// Value captured for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.keys
            .iter()
            .position(|k| k == name)
            .map(|i| self.values[i].as_str())
    }

    /// Parameter names in path order
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Captured values in path order
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Iterate `(name, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.keys
            .iter()
            .zip(&self.values)
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of captures
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether nothing was captured
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name() {
        let params = Params::from_parts(
            vec!["room".into(), "user".into()],
            vec!["lobby".into(), "42".into()],
        );
        assert_eq!(params.get("user"), Some("42"));
        assert_eq!(params.get("missing"), None);
        assert_eq!(params.iter().next(), Some(("room", "lobby")));
        assert_eq!(params.len(), 2);
    }
}
