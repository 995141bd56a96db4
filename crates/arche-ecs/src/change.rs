//! Change detection for queries.
//!
//! Tables count writes per column and structural changes per table. A query
//! with change detection enabled keeps, for every table it matched, the
//! counters it observed at the end of its last complete iteration. Comparing
//! those watermarks with the live counters tells whether anything the query
//! reads has changed since.

use smallvec::SmallVec;

use crate::{HashMap, table::TableId};

/// Counters observed for one matched table: the structural counter followed
/// by one counter per tracked query field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Watermark(SmallVec<[u64; 8]>);

impl Watermark {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, counter: u64) {
        self.0.push(counter);
    }

    /// A watermark of the same shape that every live counter exceeds or
    /// equals, used for tables matched but never observed.
    #[must_use]
    pub fn unobserved(len: usize) -> Self {
        Self(SmallVec::from_elem(0, len))
    }

    /// Whether `current` moved past this watermark.
    #[must_use]
    pub fn is_exceeded_by(&self, current: &Self) -> bool {
        self.0.len() != current.0.len() || current.0.iter().zip(&self.0).any(|(now, seen)| now > seen)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }
}

/// Per-query record of observed table counters.
#[derive(Debug, Default)]
pub struct QueryMonitor {
    tables: HashMap<TableId, Watermark>,
    completed: bool,
}

impl QueryMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an iteration ever ran to completion.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    #[must_use]
    pub fn watermark(&self, table: TableId) -> Option<&Watermark> {
        self.tables.get(&table)
    }

    /// Whether `table` changed relative to its watermark. Tables never
    /// observed count as changed.
    #[must_use]
    pub fn is_table_changed(&self, table: TableId, current: &Watermark) -> bool {
        self.tables
            .get(&table)
            .is_none_or(|seen| seen.is_exceeded_by(current))
    }

    /// Whether the set of matched tables differs from the monitored one.
    #[must_use]
    pub fn is_match_set_changed(&self, matched: &[TableId]) -> bool {
        matched.len() != self.tables.len() || matched.iter().any(|t| !self.tables.contains_key(t))
    }

    /// Replace the monitored set after a complete iteration.
    ///
    /// `observed` holds fresh watermarks of visited tables. `skipped` tables
    /// keep their previous watermark, or an unobserved one of `width`
    /// counters if they had none.
    pub fn commit(&mut self, observed: Vec<(TableId, Watermark)>, skipped: &[TableId], width: usize) {
        let mut next: HashMap<TableId, Watermark> = observed.into_iter().collect();
        for table in skipped {
            let previous = self
                .tables
                .remove(table)
                .unwrap_or_else(|| Watermark::unobserved(width));
            next.insert(*table, previous);
        }
        self.tables = next;
        self.completed = true;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
