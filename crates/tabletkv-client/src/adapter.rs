//! Table-level row mutations and their translation into wire requests.

use bytes::Bytes;

use crate::error::{ClientError, Result};
use crate::protocol::{MutateRowRequest, Mutation, SERVER_ASSIGNED_TIMESTAMP};

/// One cell written by a [`Put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutCell {
    /// Column family.
    pub family: String,
    /// Column qualifier.
    pub qualifier: Bytes,
    /// Explicit timestamp in microseconds; `None` lets the server assign one.
    pub timestamp_micros: Option<i64>,
    /// Cell value.
    pub value: Bytes,
}

/// Writes cells into one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Put {
    row: Bytes,
    cells: Vec<PutCell>,
}

impl Put {
    /// Creates an empty put for `row`.
    pub fn new(row: impl Into<Bytes>) -> Self {
        Self {
            row: row.into(),
            cells: Vec::new(),
        }
    }

    /// Adds a cell whose timestamp is assigned by the server.
    pub fn add_column(
        mut self,
        family: impl Into<String>,
        qualifier: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Self {
        self.cells.push(PutCell {
            family: family.into(),
            qualifier: qualifier.into(),
            timestamp_micros: None,
            value: value.into(),
        });
        self
    }

    /// Adds a cell with an explicit timestamp.
    pub fn add_column_at(
        mut self,
        family: impl Into<String>,
        qualifier: impl Into<Bytes>,
        timestamp_micros: i64,
        value: impl Into<Bytes>,
    ) -> Self {
        self.cells.push(PutCell {
            family: family.into(),
            qualifier: qualifier.into(),
            timestamp_micros: Some(timestamp_micros),
            value: value.into(),
        });
        self
    }

    /// Row key.
    pub fn row(&self) -> &Bytes {
        &self.row
    }

    /// Cells in insertion order.
    pub fn cells(&self) -> &[PutCell] {
        &self.cells
    }
}

/// What a [`Delete`] removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    /// Every cell of one family.
    Family(String),
    /// Cells of one column; with a timestamp, only that version.
    Column {
        /// Column family.
        family: String,
        /// Column qualifier.
        qualifier: Bytes,
        /// Version to delete; `None` deletes all versions.
        timestamp_micros: Option<i64>,
    },
}

/// Removes cells from one row. Without targets the whole row is deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    row: Bytes,
    targets: Vec<DeleteTarget>,
}

impl Delete {
    /// Deletes the whole of `row`.
    pub fn new(row: impl Into<Bytes>) -> Self {
        Self {
            row: row.into(),
            targets: Vec::new(),
        }
    }

    /// Restricts the delete to one family.
    pub fn add_family(mut self, family: impl Into<String>) -> Self {
        self.targets.push(DeleteTarget::Family(family.into()));
        self
    }

    /// Restricts the delete to all versions of one column.
    pub fn add_columns(mut self, family: impl Into<String>, qualifier: impl Into<Bytes>) -> Self {
        self.targets.push(DeleteTarget::Column {
            family: family.into(),
            qualifier: qualifier.into(),
            timestamp_micros: None,
        });
        self
    }

    /// Restricts the delete to a single version of one column.
    pub fn add_column_version(
        mut self,
        family: impl Into<String>,
        qualifier: impl Into<Bytes>,
        timestamp_micros: i64,
    ) -> Self {
        self.targets.push(DeleteTarget::Column {
            family: family.into(),
            qualifier: qualifier.into(),
            timestamp_micros: Some(timestamp_micros),
        });
        self
    }

    /// Row key.
    pub fn row(&self) -> &Bytes {
        &self.row
    }

    /// Targets in insertion order.
    pub fn targets(&self) -> &[DeleteTarget] {
        &self.targets
    }
}

/// A write accepted by the buffered mutator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowMutation {
    /// See [`Put`].
    Put(Put),
    /// See [`Delete`].
    Delete(Delete),
}

impl RowMutation {
    /// Row key the mutation applies to.
    pub fn row(&self) -> &Bytes {
        match self {
            RowMutation::Put(put) => put.row(),
            RowMutation::Delete(delete) => delete.row(),
        }
    }
}

impl From<Put> for RowMutation {
    fn from(put: Put) -> Self {
        RowMutation::Put(put)
    }
}

impl From<Delete> for RowMutation {
    fn from(delete: Delete) -> Self {
        RowMutation::Delete(delete)
    }
}

/// Translates table-level mutations into wire requests.
pub trait RequestAdapter: Send + Sync {
    /// Builds the request applying `mutation` to `table_name`.
    fn adapt(&self, table_name: &str, mutation: &RowMutation) -> Result<MutateRowRequest>;
}

/// Straightforward one-to-one translation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRequestAdapter;

impl DefaultRequestAdapter {
    fn adapt_put(put: &Put) -> Result<Vec<Mutation>> {
        if put.cells.is_empty() {
            return Err(ClientError::InvalidRequest {
                reason: "put must contain at least one cell".to_string(),
            });
        }
        Ok(put
            .cells
            .iter()
            .map(|cell| {
                Mutation::set_cell(
                    cell.family.clone(),
                    cell.qualifier.clone(),
                    cell.timestamp_micros.unwrap_or(SERVER_ASSIGNED_TIMESTAMP),
                    cell.value.clone(),
                )
            })
            .collect())
    }

    fn adapt_delete(delete: &Delete) -> Vec<Mutation> {
        if delete.targets.is_empty() {
            return vec![Mutation::DeleteFromRow];
        }
        delete
            .targets
            .iter()
            .map(|target| match target {
                DeleteTarget::Family(family) => Mutation::DeleteFromFamily {
                    family_name: family.clone(),
                },
                DeleteTarget::Column {
                    family,
                    qualifier,
                    timestamp_micros,
                } => Mutation::DeleteFromColumn {
                    family_name: family.clone(),
                    column_qualifier: qualifier.clone(),
                    time_range: timestamp_micros.map(|ts| (ts, ts.saturating_add(1))),
                },
            })
            .collect()
    }
}

impl RequestAdapter for DefaultRequestAdapter {
    fn adapt(&self, table_name: &str, mutation: &RowMutation) -> Result<MutateRowRequest> {
        if mutation.row().is_empty() {
            return Err(ClientError::InvalidRequest {
                reason: "row key must not be empty".to_string(),
            });
        }
        let mutations = match mutation {
            RowMutation::Put(put) => Self::adapt_put(put)?,
            RowMutation::Delete(delete) => Self::adapt_delete(delete),
        };
        Ok(MutateRowRequest {
            table_name: table_name.to_string(),
            row_key: mutation.row().clone(),
            mutations,
        })
    }
}
