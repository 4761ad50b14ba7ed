//! Row-id addressed tables.

use serde::{Deserialize, Serialize};

/// Stable row identifier, unique within its table.
pub type Rid = u32;

/// A single table row: a record plus its row id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row<E> {
    /// Row id.
    pub rid: Rid,
    /// Record fields.
    #[serde(flatten)]
    pub record: E,
}

/// An ordered table of records.
///
/// Row order is meaningful for rules, where it is the chain order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Table<E> {
    rows: Vec<Row<E>>,
}

impl<E> Default for Table<E> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<E> Table<E> {
    /// Creates a table from existing rows.
    #[must_use]
    pub const fn from_rows(rows: Vec<Row<E>>) -> Self {
        Self { rows }
    }

    /// Returns the rows in table order.
    #[must_use]
    pub fn rows(&self) -> &[Row<E>] {
        &self.rows
    }

    /// Iterates over the records in table order.
    pub fn records(&self) -> impl Iterator<Item = &E> {
        self.rows.iter().map(|row| &row.record)
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Looks up a record by row id.
    #[must_use]
    pub fn get(&self, rid: Rid) -> Option<&E> {
        self.rows.iter().find(|row| row.rid == rid).map(|row| &row.record)
    }

    /// Returns the position of a row in table order.
    #[must_use]
    pub fn position(&self, rid: Rid) -> Option<usize> {
        self.rows.iter().position(|row| row.rid == rid)
    }

    /// The next unused row id.
    #[must_use]
    pub fn next_rid(&self) -> Rid {
        self.rows.iter().map(|row| row.rid).max().map_or(1, |max| max + 1)
    }

    /// Appends a record and returns its new row id.
    pub fn push(&mut self, record: E) -> Rid {
        let rid = self.next_rid();
        self.rows.push(Row { rid, record });
        rid
    }

    /// Replaces a record in place, keeping its position.
    ///
    /// Returns the previous record, or `None` if the rid is absent.
    pub fn replace(&mut self, rid: Rid, record: E) -> Option<E> {
        let row = self.rows.iter_mut().find(|row| row.rid == rid)?;
        Some(std::mem::replace(&mut row.record, record))
    }

    /// Removes a record by row id.
    pub fn remove(&mut self, rid: Rid) -> Option<E> {
        let idx = self.position(rid)?;
        Some(self.rows.remove(idx).record)
    }

    /// Swaps two rows by position.
    pub fn swap(&mut self, a: usize, b: usize) {
        self.rows.swap(a, b);
    }

    /// Mutable access to a record by row id.
    pub fn get_mut(&mut self, rid: Rid) -> Option<&mut E> {
        self.rows
            .iter_mut()
            .find(|row| row.rid == rid)
            .map(|row| &mut row.record)
    }
}
