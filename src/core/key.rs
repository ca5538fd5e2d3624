use serde::{Deserialize, Serialize};
use std::fmt;

/// Row key of a frame: a single id, or an `(id, t)` pair for time-indexed frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RowKey {
    Single(i64),
    Pair(i64, i64),
}

impl RowKey {
    pub fn id(&self) -> i64 {
        match self {
            Self::Single(id) | Self::Pair(id, _) => *id,
        }
    }

    pub fn t(&self) -> Option<i64> {
        match self {
            Self::Single(_) => None,
            Self::Pair(_, t) => Some(*t),
        }
    }

    /// Number of index levels this key spans.
    pub fn arity(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Pair(..) => 2,
        }
    }

    /// Key component at `level` (0 = id, 1 = t).
    pub fn level(&self, level: usize) -> Option<i64> {
        match (self, level) {
            (_, 0) => Some(self.id()),
            (Self::Pair(_, t), 1) => Some(*t),
            _ => None,
        }
    }

    pub fn from_levels(levels: &[i64]) -> Option<Self> {
        match levels {
            [id] => Some(Self::Single(*id)),
            [id, t] => Some(Self::Pair(*id, *t)),
            _ => None,
        }
    }

    /// Attaches a time level to a single-level key; pairs keep their own id.
    pub fn with_time(&self, t: i64) -> Self {
        Self::Pair(self.id(), t)
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(id) => write!(f, "({})", id),
            Self::Pair(id, t) => write!(f, "({}, {})", id, t),
        }
    }
}

impl From<i64> for RowKey {
    fn from(id: i64) -> Self {
        Self::Single(id)
    }
}

impl From<(i64, i64)> for RowKey {
    fn from((id, t): (i64, i64)) -> Self {
        Self::Pair(id, t)
    }
}

/// Row selector accepted by the mutation API.
#[derive(Debug, Clone, PartialEq)]
pub enum Ids {
    One(RowKey),
    Many(Vec<RowKey>),
    /// Every existing row of `id` whose time level is `>= t`.
    FromTime { id: i64, t: i64 },
}

impl Ids {
    pub fn one(key: impl Into<RowKey>) -> Self {
        Self::One(key.into())
    }

    pub fn many<K: Into<RowKey>>(keys: impl IntoIterator<Item = K>) -> Self {
        Self::Many(keys.into_iter().map(Into::into).collect())
    }

    pub fn from_time(id: i64, t: i64) -> Self {
        Self::FromTime { id, t }
    }

    pub fn matches(&self, key: &RowKey) -> bool {
        match self {
            Self::One(k) => k == key,
            Self::Many(keys) => keys.contains(key),
            Self::FromTime { id, t } => {
                key.id() == *id && key.t().is_some_and(|kt| kt >= *t)
            }
        }
    }
}

impl From<RowKey> for Ids {
    fn from(key: RowKey) -> Self {
        Self::One(key)
    }
}

impl From<Vec<RowKey>> for Ids {
    fn from(keys: Vec<RowKey>) -> Self {
        Self::Many(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering_is_id_then_time() {
        let mut keys = vec![RowKey::Pair(1, 0), RowKey::Pair(0, 2), RowKey::Pair(0, 1)];
        keys.sort();
        assert_eq!(keys, vec![RowKey::Pair(0, 1), RowKey::Pair(0, 2), RowKey::Pair(1, 0)]);
    }

    #[test]
    fn test_from_time_selector() {
        let ids = Ids::from_time(3, 1);
        assert!(ids.matches(&RowKey::Pair(3, 1)));
        assert!(ids.matches(&RowKey::Pair(3, 5)));
        assert!(!ids.matches(&RowKey::Pair(3, 0)));
        assert!(!ids.matches(&RowKey::Pair(4, 2)));
        assert!(!ids.matches(&RowKey::Single(3)));
    }
}
