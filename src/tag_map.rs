//! The seven-tag-roster metadata map.
//!
//! Insertion-ordered, case-sensitive. A plain `Vec<(String, String)>`
//! rather than a hash map or an ordered-map crate — this codebase reaches
//! for `Vec`-backed structures at this scale (a handful of tags per game)
//! rather than pulling in a dependency purely for ordering.

#[derive(Debug, Clone, Default)]
pub struct TagMap {
    entries: Vec<(String, String)>,
}

impl TagMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Insert or overwrite `key`, preserving its original insertion
    /// position on overwrite.
    pub fn set(&mut self, key: &str, value: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.to_string();
        } else {
            self.entries.push((key.to_string(), value.to_string()));
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_preserves_insertion_order_on_overwrite() {
        let mut tags = TagMap::new();
        tags.set("White", "Alice");
        tags.set("Black", "Bob");
        tags.set("White", "Alicia");
        let keys: Vec<&str> = tags.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["White", "Black"]);
        assert_eq!(tags.get("White"), Some("Alicia"));
    }

    #[test]
    fn remove_drops_the_entry() {
        let mut tags = TagMap::new();
        tags.set("Event", "Open");
        assert_eq!(tags.remove("Event"), Some("Open".to_string()));
        assert!(!tags.contains("Event"));
    }
}
