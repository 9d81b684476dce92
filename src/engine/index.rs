use crate::schema::IndexSchema;
use crate::types::{Key, KeyRange, Record, bounds_empty};
use bson::Bson;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Ordered secondary index: index key → primary keys holding it.
#[derive(Debug, Clone)]
pub struct IndexData {
    pub schema: IndexSchema,
    pub map: BTreeMap<Key, BTreeSet<Key>>,
}

impl IndexData {
    #[must_use]
    pub fn new(schema: IndexSchema) -> Self {
        Self {
            schema,
            map: BTreeMap::new(),
        }
    }

    /// Index keys a record contributes. Multi-entry indexes fan an array out
    /// into its distinct valid elements.
    #[must_use]
    pub fn keys_for(&self, record: &Record) -> Vec<Key> {
        if self.schema.multi_entry
            && let Some(Bson::Array(items)) = self.schema.key_path.raw(record)
        {
            let distinct: BTreeSet<Key> =
                items.iter().filter_map(Key::from_bson).collect();
            return distinct.into_iter().collect();
        }
        self.schema.key_path.extract(record).into_iter().collect()
    }

    pub fn insert(&mut self, record: &Record, primary: &Key) {
        for k in self.keys_for(record) {
            self.map.entry(k).or_default().insert(primary.clone());
        }
    }

    pub fn remove(&mut self, record: &Record, primary: &Key) {
        for k in self.keys_for(record) {
            if let Some(set) = self.map.get_mut(&k) {
                set.remove(primary);
                if set.is_empty() {
                    self.map.remove(&k);
                }
            }
        }
    }

    /// First index key in `keys` already held by a primary key other than
    /// `primary`, if this is a unique index.
    #[must_use]
    pub fn unique_conflict(&self, keys: &[Key], primary: &Key) -> Option<Key> {
        if !self.schema.unique {
            return None;
        }
        keys.iter()
            .find(|k| {
                self.map
                    .get(*k)
                    .is_some_and(|set| set.iter().any(|p| p != primary))
            })
            .cloned()
    }

    /// `(index key, primary key)` pairs within `range`, ascending.
    pub fn entries<'a>(
        &'a self,
        range: &KeyRange,
    ) -> impl Iterator<Item = (&'a Key, &'a Key)> + 'a {
        let empty = bounds_empty(&range.lower, &range.upper);
        let pairs = (!empty)
            .then(|| self.map.range((range.lower.clone(), range.upper.clone())))
            .into_iter()
            .flatten();
        pairs.flat_map(|(k, set)| set.iter().map(move |p| (k, p)))
    }

    #[must_use]
    pub fn count(&self, range: &KeyRange) -> usize {
        self.entries(range).count()
    }

    /// The position following `after` in traversal order, restricted to
    /// `range`. `after` is the last visited `(index key, primary key)`.
    /// With `unique` only the lowest primary key of each index key is visited
    /// and the cursor moves straight to the next distinct index key.
    #[must_use]
    pub fn seek(
        &self,
        range: &KeyRange,
        after: Option<&(Key, Key)>,
        reverse: bool,
        unique: bool,
    ) -> Option<(Key, Key)> {
        if let Some((ik, pk)) = after
            && !unique
            && let Some(set) = self.map.get(ik)
        {
            let within = if reverse {
                set.range(..pk.clone()).next_back()
            } else {
                set.range((Bound::Excluded(pk.clone()), Bound::Unbounded)).next()
            };
            if let Some(p) = within {
                return Some((ik.clone(), p.clone()));
            }
        }
        let (lower, upper) = match (after, reverse) {
            (None, _) => (range.lower.clone(), range.upper.clone()),
            (Some((ik, _)), false) => (tighter_lower(&range.lower, ik), range.upper.clone()),
            (Some((ik, _)), true) => (range.lower.clone(), tighter_upper(&range.upper, ik)),
        };
        if bounds_empty(&lower, &upper) {
            return None;
        }
        let mut keys = self.map.range((lower, upper));
        let (k, set) = if reverse {
            keys.next_back()?
        } else {
            keys.next()?
        };
        // Unique traversal visits the lowest primary key in both directions.
        let p = if reverse && !unique {
            set.iter().next_back()?
        } else {
            set.iter().next()?
        };
        Some((k.clone(), p.clone()))
    }
}

/// Lower bound strictly after `k`, never looser than `lower`.
pub(crate) fn tighter_lower(lower: &Bound<Key>, k: &Key) -> Bound<Key> {
    match lower {
        Bound::Included(l) | Bound::Excluded(l) if l > k => lower.clone(),
        _ => Bound::Excluded(k.clone()),
    }
}

/// Upper bound strictly before `k`, never looser than `upper`.
pub(crate) fn tighter_upper(upper: &Bound<Key>, k: &Key) -> Bound<Key> {
    match upper {
        Bound::Included(u) | Bound::Excluded(u) if u < k => upper.clone(),
        _ => Bound::Excluded(k.clone()),
    }
}
