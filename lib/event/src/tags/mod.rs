mod key;
mod value;

use std::collections::BTreeMap;
use std::collections::btree_map;

pub use key::Key;
use serde::Serialize;
pub use value::Value;

/// An ordered attribute set. Iteration order is the key order, which keeps
/// `Display` output and equality checks stable.
#[derive(Clone, Debug, Default, Serialize, PartialEq, PartialOrd, Eq)]
pub struct Tags(BTreeMap<Key, Value>);

impl Tags {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Key, Value> {
        self.0.iter()
    }

    pub fn insert(&mut self, key: impl Into<Key>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Copy every entry of `other` into `self`, overwriting existing keys.
    pub fn extend(&mut self, other: &Tags) {
        for (k, v) in other.iter() {
            self.0.insert(k.clone(), v.clone());
        }
    }
}

impl FromIterator<(Key, Value)> for Tags {
    fn from_iter<T: IntoIterator<Item = (Key, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, String>> for Tags {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter()
            .map(|(k, v)| (Key::from(k), Value::from(v)))
            .collect()
    }
}

impl IntoIterator for Tags {
    type Item = (Key, Value);
    type IntoIter = btree_map::IntoIter<Key, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Tags {
    type Item = (&'a Key, &'a Value);
    type IntoIter = btree_map::Iter<'a, Key, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
