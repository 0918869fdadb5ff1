//! Topology Terms
//!
//! A term is a conjunction of `key=value` segments. Terms are kept sorted
//! by key, then value, so that [`TopologyTerm::subset`] and
//! [`TopologyTerm::compare`] can work with a single linear merge.

use std::cmp::Ordering;
use std::fmt;

/// A single `key=value` location constraint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopologySegment {
    pub key: String,
    pub value: String,
}

impl TopologySegment {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for TopologySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Segments AND'd together.
///
/// Call [`TopologyTerm::sort`] after building a term by hand; `subset` and
/// `compare` assume sorted input and do not check it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TopologyTerm(Vec<TopologySegment>);

impl TopologyTerm {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    /// Build a sorted term from `(key, value)` pairs
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut term = Self(
            pairs
                .into_iter()
                .map(|(k, v)| TopologySegment::new(k, v))
                .collect(),
        );
        term.sort();
        term
    }

    pub fn push(&mut self, segment: TopologySegment) {
        self.0.push(segment);
    }

    pub fn segments(&self) -> &[TopologySegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sort(&mut self) {
        self.0.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.value.cmp(&b.value)));
    }

    /// Order terms by length first, then segment by segment
    pub fn compare(&self, other: &TopologyTerm) -> Ordering {
        self.len()
            .cmp(&other.len())
            .then_with(|| self.0.iter().cmp(other.0.iter()))
    }

    /// Whether every segment of `self` is present in `other`.
    ///
    /// The empty term is a subset of every term.
    pub fn subset(&self, other: &TopologyTerm) -> bool {
        if self.0.is_empty() {
            return true;
        }

        let mut j = 0;
        for k2 in &other.0 {
            let k1 = &self.0[j];
            if k1.key != k2.key {
                continue;
            }
            if k1.value != k2.value {
                return false;
            }
            j += 1;
            if j == self.0.len() {
                return true;
            }
        }
        false
    }
}

impl fmt::Display for TopologyTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", segment)?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<TopologySegment> for TopologyTerm {
    fn from_iter<I: IntoIterator<Item = TopologySegment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a TopologyTerm {
    type Item = &'a TopologySegment;
    type IntoIter = std::slice::Iter<'a, TopologySegment>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
