//! Segment trie for route patterns
//!
//! Paths are split on `/`; empty segments are ignored, so `/a//b/` and
//! `a/b` address the same node. A segment starting with `:` is a parameter
//! and matches any single non-empty segment. Literal children are always
//! tried before the parameter child, and lookup backtracks into the
//! parameter branch when a literal branch dead-ends.

/// A segment trie mapping path patterns to values
#[derive(Debug, Clone)]
pub struct Trie<T> {
    root: Node<T>,
    len: usize,
}

#[derive(Debug, Clone)]
struct Node<T> {
    segment: String,
    // Sorted by segment for binary search
    literals: Vec<Node<T>>,
    param: Option<Box<Node<T>>>,
    // Parameter names of the pattern stored here
    keys: Vec<String>,
    value: Option<T>,
}

impl<T> Node<T> {
    fn new(segment: &str) -> Self {
        Self {
            segment: segment.to_string(),
            literals: Vec::new(),
            param: None,
            keys: Vec::new(),
            value: None,
        }
    }

    fn child_mut(&mut self, segment: &str) -> &mut Node<T> {
        if segment.starts_with(':') {
            return self.param.get_or_insert_with(|| Box::new(Node::new(segment)));
        }
        let idx = match self
            .literals
            .binary_search_by(|n| n.segment.as_str().cmp(segment))
        {
            Ok(idx) => idx,
            Err(idx) => {
                self.literals.insert(idx, Node::new(segment));
                idx
            }
        };
        &mut self.literals[idx]
    }

    fn find<'a>(&'a self, segments: &[&str], values: &mut Vec<String>) -> Option<&'a Node<T>> {
        let Some((head, rest)) = segments.split_first() else {
            return self.value.is_some().then_some(self);
        };

        if let Ok(idx) = self
            .literals
            .binary_search_by(|n| n.segment.as_str().cmp(head))
        {
            if let Some(found) = self.literals[idx].find(rest, values) {
                return Some(found);
            }
        }

        if let Some(param) = &self.param {
            values.push((*head).to_string());
            if let Some(found) = param.find(rest, values) {
                return Some(found);
            }
            values.pop();
        }

        None
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a T>) {
        if let Some(value) = &self.value {
            out.push(value);
        }
        for child in &self.literals {
            child.collect(out);
        }
        if let Some(param) = &self.param {
            param.collect(out);
        }
    }
}

/// A successful lookup
#[derive(Debug)]
pub struct Match<'a, T> {
    /// The stored value
    pub value: &'a T,
    /// Parameter names of the matched pattern
    pub keys: &'a [String],
    /// Values captured for `keys`, in the same order
    pub values: Vec<String>,
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Parameter names appearing in a pattern, in order
pub fn param_names(path: &str) -> Vec<String> {
    segments(path)
        .filter_map(|s| s.strip_prefix(':'))
        .map(str::to_string)
        .collect()
}

impl<T> Default for Trie<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Trie<T> {
    /// Create an empty trie
    pub fn new() -> Self {
        Self {
            root: Node::new(""),
            len: 0,
        }
    }

    fn node_mut(&mut self, path: &str) -> &mut Node<T> {
        let mut node = &mut self.root;
        for segment in segments(path) {
            node = node.child_mut(segment);
        }
        node
    }

    /// Store `value` under `path`, returning the value it replaced
    pub fn insert(&mut self, path: &str, value: T) -> Option<T> {
        let node = self.node_mut(path);
        node.keys = param_names(path);
        let old = node.value.replace(value);
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    /// Look up a concrete path, capturing parameter values
    pub fn get(&self, path: &str) -> Option<Match<'_, T>> {
        let parts: Vec<&str> = segments(path).collect();
        let mut values = Vec::with_capacity(parts.len());
        let node = self.root.find(&parts, &mut values)?;
        let value = node.value.as_ref()?;
        Some(Match {
            value,
            keys: &node.keys,
            values,
        })
    }

    /// Every stored value
    pub fn values(&self) -> Vec<&T> {
        let mut out = Vec::with_capacity(self.len);
        self.root.collect(&mut out);
        out
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the trie is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_literal_and_param() {
        let mut trie = Trie::new();
        trie.insert("/user/:id", "by-id");
        trie.insert("/user/list", "list");

        let m = trie.get("/user/list").unwrap();
        assert_eq!(*m.value, "list");
        assert!(m.values.is_empty());

        let m = trie.get("/user/42").unwrap();
        assert_eq!(*m.value, "by-id");
        assert_eq!(m.keys, ["id".to_string()]);
        assert_eq!(m.values, vec!["42".to_string()]);
    }

    #[test]
    fn test_backtracks_into_param_branch() {
        let mut trie = Trie::new();
        trie.insert("/a/b/c", 1);
        trie.insert("/a/:x", 2);
        trie.insert("/a/:x/d", 3);

        assert_eq!(*trie.get("/a/b").unwrap().value, 2);
        assert_eq!(*trie.get("/a/b/c").unwrap().value, 1);
        let m = trie.get("/a/b/d").unwrap();
        assert_eq!(*m.value, 3);
        assert_eq!(m.values, vec!["b".to_string()]);
    }

    #[test]
    fn test_multiple_params() {
        let mut trie = Trie::new();
        trie.insert("/room/:room/user/:user", ());
        let m = trie.get("/room/lobby/user/7").unwrap();
        assert_eq!(m.keys, ["room".to_string(), "user".to_string()]);
        assert_eq!(m.values, vec!["lobby".to_string(), "7".to_string()]);
    }

    #[test]
    fn test_empty_segments_ignored() {
        let mut trie = Trie::new();
        trie.insert("chat/send/", 1);
        assert_eq!(*trie.get("/chat//send").unwrap().value, 1);
        assert!(trie.get("/chat").is_none());
    }

    #[test]
    fn test_root_path() {
        let mut trie = Trie::new();
        trie.insert("/", "root");
        assert_eq!(*trie.get("").unwrap().value, "root");
        assert_eq!(*trie.get("/").unwrap().value, "root");
    }

    #[test]
    fn test_insert_replaces_and_counts() {
        let mut trie = Trie::new();
        assert!(trie.insert("/a", 1).is_none());
        assert_eq!(trie.insert("/a", 2), Some(1));
        assert_eq!(trie.len(), 1);
        trie.insert("/b", 3);
        assert_eq!(*trie.get("/b").unwrap().value, 3);
        assert_eq!(trie.len(), 2);
        assert_eq!(trie.values().len(), 2);
    }

    #[test]
    fn test_param_names() {
        assert_eq!(
            param_names("/a/:x/b/:y"),
            vec!["x".to_string(), "y".to_string()]
        );
        assert!(param_names("/a/b").is_empty());
    }

    proptest! {
        #[test]
        fn prop_literal_paths_resolve_to_themselves(
            paths in proptest::collection::hash_set("(/[a-z]{1,4}){1,4}", 1..16)
        ) {
            let mut trie = Trie::new();
            trie.insert("/:first", String::from(":first"));
            trie.insert("/:first/:second", String::from(":second"));
            for path in &paths {
                trie.insert(path, path.clone());
            }
            for path in &paths {
                let m = trie.get(path).unwrap();
                prop_assert_eq!(m.value, path);
                prop_assert!(m.values.is_empty());
            }
        }
    }
}
