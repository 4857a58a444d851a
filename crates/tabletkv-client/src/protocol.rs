//! Request and response types of the tablet data service.
//!
//! These are the in-memory shapes the client runtime works with. Encoding them
//! on the wire is the job of a [`Channel`](crate::transport::Channel)
//! implementation; nothing in this module knows about bytes on a socket.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Timestamp value asking the server to stamp a cell with its own clock.
///
/// A set-cell carrying this value is not idempotent: every retry would write a
/// new version with a different timestamp.
pub const SERVER_ASSIGNED_TIMESTAMP: i64 = -1;

/// Fixed per-request overhead used by the size estimates.
const REQUEST_OVERHEAD_BYTES: u64 = 32;
/// Fixed per-mutation overhead used by the size estimates.
const MUTATION_OVERHEAD_BYTES: u64 = 16;

/// RPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    /// Success.
    Ok,
    /// The call was cancelled by the caller.
    Cancelled,
    /// Unknown failure.
    Unknown,
    /// The request is malformed.
    InvalidArgument,
    /// The deadline expired before the call completed.
    DeadlineExceeded,
    /// The table or row does not exist.
    NotFound,
    /// The entity already exists.
    AlreadyExists,
    /// The caller lacks permission.
    PermissionDenied,
    /// A quota or server resource is exhausted.
    ResourceExhausted,
    /// The system is not in a state required for the operation.
    FailedPrecondition,
    /// The operation was aborted, typically due to a concurrency conflict.
    Aborted,
    /// Operation attempted past the valid range.
    OutOfRange,
    /// The method is not implemented by the server.
    Unimplemented,
    /// Internal server error.
    Internal,
    /// The service is currently unavailable.
    Unavailable,
    /// Unrecoverable data loss.
    DataLoss,
    /// The caller is not authenticated.
    Unauthenticated,
}

/// The kinds of RPC the data service exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcKind {
    /// Apply mutations to a single row.
    MutateRow,
    /// Conditionally apply one of two mutation lists to a single row.
    CheckAndMutateRow,
    /// Atomic append/increment on a single row.
    ReadModifyWriteRow,
    /// Read one row or a range of rows.
    ReadRows,
    /// Sample row keys to estimate tablet boundaries.
    SampleRowKeys,
}

/// Identity of a remote method. One shared static value exists per [`RpcKind`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Fully qualified method name.
    pub full_name: &'static str,
    /// Kind of the RPC.
    pub kind: RpcKind,
}

/// `MutateRow` method.
pub static METHOD_MUTATE_ROW: MethodDescriptor = MethodDescriptor {
    full_name: "tabletkv.v1.DataService/MutateRow",
    kind: RpcKind::MutateRow,
};

/// `CheckAndMutateRow` method.
pub static METHOD_CHECK_AND_MUTATE_ROW: MethodDescriptor = MethodDescriptor {
    full_name: "tabletkv.v1.DataService/CheckAndMutateRow",
    kind: RpcKind::CheckAndMutateRow,
};

/// `ReadModifyWriteRow` method.
pub static METHOD_READ_MODIFY_WRITE_ROW: MethodDescriptor = MethodDescriptor {
    full_name: "tabletkv.v1.DataService/ReadModifyWriteRow",
    kind: RpcKind::ReadModifyWriteRow,
};

/// `ReadRows` method.
pub static METHOD_READ_ROWS: MethodDescriptor = MethodDescriptor {
    full_name: "tabletkv.v1.DataService/ReadRows",
    kind: RpcKind::ReadRows,
};

/// `SampleRowKeys` method.
pub static METHOD_SAMPLE_ROW_KEYS: MethodDescriptor = MethodDescriptor {
    full_name: "tabletkv.v1.DataService/SampleRowKeys",
    kind: RpcKind::SampleRowKeys,
};

/// Writes a value into a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCell {
    /// Column family.
    pub family_name: String,
    /// Column qualifier.
    pub column_qualifier: Bytes,
    /// Cell timestamp in microseconds, or [`SERVER_ASSIGNED_TIMESTAMP`].
    pub timestamp_micros: i64,
    /// Cell value.
    pub value: Bytes,
}

/// A single cell-level change inside a row mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Write a cell.
    SetCell(SetCell),
    /// Delete cells of one column, optionally within `[start, end)` microseconds.
    DeleteFromColumn {
        /// Column family.
        family_name: String,
        /// Column qualifier.
        column_qualifier: Bytes,
        /// Optional timestamp range.
        time_range: Option<(i64, i64)>,
    },
    /// Delete every cell of a family.
    DeleteFromFamily {
        /// Column family.
        family_name: String,
    },
    /// Delete the whole row.
    DeleteFromRow,
}

impl Mutation {
    /// Creates a set-cell mutation.
    pub fn set_cell(
        family_name: impl Into<String>,
        column_qualifier: impl Into<Bytes>,
        timestamp_micros: i64,
        value: impl Into<Bytes>,
    ) -> Self {
        Mutation::SetCell(SetCell {
            family_name: family_name.into(),
            column_qualifier: column_qualifier.into(),
            timestamp_micros,
            value: value.into(),
        })
    }

    /// Returns true if this is a set-cell asking for a server-assigned timestamp.
    pub fn uses_server_timestamp(&self) -> bool {
        matches!(
            self,
            Mutation::SetCell(SetCell {
                timestamp_micros: SERVER_ASSIGNED_TIMESTAMP,
                ..
            })
        )
    }

    fn estimated_size(&self) -> u64 {
        let payload = match self {
            Mutation::SetCell(cell) => {
                cell.family_name.len() + cell.column_qualifier.len() + cell.value.len() + 8
            }
            Mutation::DeleteFromColumn {
                family_name,
                column_qualifier,
                ..
            } => family_name.len() + column_qualifier.len() + 16,
            Mutation::DeleteFromFamily { family_name } => family_name.len(),
            Mutation::DeleteFromRow => 0,
        };
        MUTATION_OVERHEAD_BYTES + payload as u64
    }
}

/// Estimated in-memory footprint of a request, used for admission control.
pub trait EstimateSize {
    /// Returns the estimated size in bytes.
    fn estimated_size(&self) -> u64;
}

fn mutations_size(mutations: &[Mutation]) -> u64 {
    mutations.iter().map(Mutation::estimated_size).sum()
}

/// Applies a list of mutations atomically to one row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutateRowRequest {
    /// Fully qualified table name.
    pub table_name: String,
    /// Row key.
    pub row_key: Bytes,
    /// Mutations, applied in order.
    pub mutations: Vec<Mutation>,
}

impl EstimateSize for MutateRowRequest {
    fn estimated_size(&self) -> u64 {
        REQUEST_OVERHEAD_BYTES
            + (self.table_name.len() + self.row_key.len()) as u64
            + mutations_size(&self.mutations)
    }
}

/// Empty acknowledgement of a [`MutateRowRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutateRowResponse;

/// Applies `true_mutations` if the predicate matches the row, `false_mutations` otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckAndMutateRowRequest {
    /// Fully qualified table name.
    pub table_name: String,
    /// Row key.
    pub row_key: Bytes,
    /// Encoded predicate filter; `None` matches any non-empty row.
    pub predicate_filter: Option<Bytes>,
    /// Mutations applied when the predicate matches.
    pub true_mutations: Vec<Mutation>,
    /// Mutations applied when the predicate does not match.
    pub false_mutations: Vec<Mutation>,
}

impl EstimateSize for CheckAndMutateRowRequest {
    fn estimated_size(&self) -> u64 {
        REQUEST_OVERHEAD_BYTES
            + (self.table_name.len() + self.row_key.len()) as u64
            + self.predicate_filter.as_ref().map_or(0, |f| f.len() as u64)
            + mutations_size(&self.true_mutations)
            + mutations_size(&self.false_mutations)
    }
}

/// Result of a [`CheckAndMutateRowRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckAndMutateRowResponse {
    /// Whether the predicate matched.
    pub predicate_matched: bool,
}

/// A read-modify-write rule applied to one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadModifyWriteRule {
    /// Append bytes to the latest value.
    AppendValue {
        /// Column family.
        family_name: String,
        /// Column qualifier.
        column_qualifier: Bytes,
        /// Bytes to append.
        value: Bytes,
    },
    /// Add to the latest value interpreted as a big-endian i64.
    IncrementAmount {
        /// Column family.
        family_name: String,
        /// Column qualifier.
        column_qualifier: Bytes,
        /// Amount to add.
        amount: i64,
    },
}

/// Atomic append/increment of one row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadModifyWriteRowRequest {
    /// Fully qualified table name.
    pub table_name: String,
    /// Row key.
    pub row_key: Bytes,
    /// Rules, applied in order.
    pub rules: Vec<ReadModifyWriteRule>,
}

impl EstimateSize for ReadModifyWriteRowRequest {
    fn estimated_size(&self) -> u64 {
        let rules: u64 = self
            .rules
            .iter()
            .map(|rule| match rule {
                ReadModifyWriteRule::AppendValue {
                    family_name,
                    column_qualifier,
                    value,
                } => (family_name.len() + column_qualifier.len() + value.len()) as u64,
                ReadModifyWriteRule::IncrementAmount {
                    family_name,
                    column_qualifier,
                    ..
                } => (family_name.len() + column_qualifier.len() + 8) as u64,
            })
            .sum();
        REQUEST_OVERHEAD_BYTES + (self.table_name.len() + self.row_key.len()) as u64 + rules
    }
}

/// A single cell version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    /// Column family.
    pub family_name: String,
    /// Column qualifier.
    pub column_qualifier: Bytes,
    /// Timestamp in microseconds.
    pub timestamp_micros: i64,
    /// Value.
    pub value: Bytes,
}

/// A row with its cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    /// Row key.
    pub key: Bytes,
    /// Cells, grouped by family and qualifier, newest version first.
    pub cells: Vec<Cell>,
}

/// New contents of the modified columns after a read-modify-write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadModifyWriteRowResponse {
    /// The modified row.
    pub row: Row,
}

/// Rows selected by a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSet {
    /// A single row.
    RowKey(Bytes),
    /// Rows in `[start_key, end_key)`; an empty end key means unbounded.
    RowRange {
        /// Inclusive start.
        start_key: Bytes,
        /// Exclusive end.
        end_key: Bytes,
    },
}

impl Default for RowSet {
    fn default() -> Self {
        RowSet::RowRange {
            start_key: Bytes::new(),
            end_key: Bytes::new(),
        }
    }
}

/// Reads one row or a range of rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadRowsRequest {
    /// Fully qualified table name.
    pub table_name: String,
    /// Rows to read.
    pub rows: RowSet,
    /// Maximum rows to return, 0 for no limit.
    pub rows_limit: u64,
}

/// Rows returned by a read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadRowsResponse {
    /// Rows in key order.
    pub rows: Vec<Row>,
}

/// Requests a sample of row keys of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleRowKeysRequest {
    /// Fully qualified table name.
    pub table_name: String,
}

/// A sampled row key and the approximate bytes stored before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowKeySample {
    /// Sampled key.
    pub row_key: Bytes,
    /// Approximate bytes before this key.
    pub offset_bytes: i64,
}

/// Row key samples.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleRowKeysResponse {
    /// Samples in key order.
    pub samples: Vec<RowKeySample>,
}

/// Type-erased request handed to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcRequest {
    /// See [`MutateRowRequest`].
    MutateRow(MutateRowRequest),
    /// See [`CheckAndMutateRowRequest`].
    CheckAndMutateRow(CheckAndMutateRowRequest),
    /// See [`ReadModifyWriteRowRequest`].
    ReadModifyWriteRow(ReadModifyWriteRowRequest),
    /// See [`ReadRowsRequest`].
    ReadRows(ReadRowsRequest),
    /// See [`SampleRowKeysRequest`].
    SampleRowKeys(SampleRowKeysRequest),
}

/// Type-erased response returned by a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcResponse {
    /// See [`MutateRowResponse`].
    MutateRow(MutateRowResponse),
    /// See [`CheckAndMutateRowResponse`].
    CheckAndMutateRow(CheckAndMutateRowResponse),
    /// See [`ReadModifyWriteRowResponse`].
    ReadModifyWriteRow(ReadModifyWriteRowResponse),
    /// See [`ReadRowsResponse`].
    ReadRows(ReadRowsResponse),
    /// See [`SampleRowKeysResponse`].
    SampleRowKeys(SampleRowKeysResponse),
}

/// Binds a typed request to its method descriptor and response type.
pub trait UnaryMethod: Clone + Send + Sync + 'static {
    /// Response type of the method.
    type Response: Send + 'static;

    /// The method this request is sent to.
    fn method() -> &'static MethodDescriptor;

    /// Erases the request type.
    fn into_rpc(self) -> RpcRequest;

    /// Recovers the typed response.
    fn from_rpc(response: RpcResponse) -> Result<Self::Response>;
}

macro_rules! unary_method {
    ($request:ty, $response:ty, $variant:ident, $method:ident) => {
        impl UnaryMethod for $request {
            type Response = $response;

            fn method() -> &'static MethodDescriptor {
                &$method
            }

            fn into_rpc(self) -> RpcRequest {
                RpcRequest::$variant(self)
            }

            fn from_rpc(response: RpcResponse) -> Result<Self::Response> {
                match response {
                    RpcResponse::$variant(inner) => Ok(inner),
                    _ => Err(ClientError::UnexpectedResponse {
                        method: $method.full_name,
                    }),
                }
            }
        }
    };
}

unary_method!(MutateRowRequest, MutateRowResponse, MutateRow, METHOD_MUTATE_ROW);
unary_method!(
    CheckAndMutateRowRequest,
    CheckAndMutateRowResponse,
    CheckAndMutateRow,
    METHOD_CHECK_AND_MUTATE_ROW
);
unary_method!(
    ReadModifyWriteRowRequest,
    ReadModifyWriteRowResponse,
    ReadModifyWriteRow,
    METHOD_READ_MODIFY_WRITE_ROW
);
unary_method!(ReadRowsRequest, ReadRowsResponse, ReadRows, METHOD_READ_ROWS);
unary_method!(
    SampleRowKeysRequest,
    SampleRowKeysResponse,
    SampleRowKeys,
    METHOD_SAMPLE_ROW_KEYS
);
