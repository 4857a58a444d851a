//! Retry predicates: which requests may be resent after a transient failure.
//!
//! Each predicate is a pure function of the request. `None` stands for an
//! absent request and is never retryable.

use crate::protocol::{
    CheckAndMutateRowRequest, MutateRowRequest, Mutation, ReadModifyWriteRowRequest,
    ReadRowsRequest, SampleRowKeysRequest,
};

/// A stateless retry decision for one request type.
pub type RetryPredicate<Req> = fn(Option<&Req>) -> bool;

/// Predicate used for `MutateRow`.
pub const IS_RETRYABLE_MUTATION: RetryPredicate<MutateRowRequest> = is_retryable_mutation;
/// Predicate used for `CheckAndMutateRow`.
pub const IS_RETRYABLE_CHECK_AND_MUTATE: RetryPredicate<CheckAndMutateRowRequest> =
    is_retryable_check_and_mutate;
/// Predicate used for `ReadModifyWriteRow`.
pub const IS_RETRYABLE_READ_MODIFY_WRITE: RetryPredicate<ReadModifyWriteRowRequest> =
    never_retryable;
/// Predicate used for `ReadRows`.
pub const IS_RETRYABLE_READ_ROWS: RetryPredicate<ReadRowsRequest> = is_idempotent_read;
/// Predicate used for `SampleRowKeys`.
pub const IS_RETRYABLE_SAMPLE_ROW_KEYS: RetryPredicate<SampleRowKeysRequest> = is_idempotent_read;

fn has_server_timestamp(mutations: &[Mutation]) -> bool {
    mutations.iter().any(Mutation::uses_server_timestamp)
}

/// A row mutation is retryable unless one of its set-cells asks the server for
/// the timestamp.
pub fn is_retryable_mutation(request: Option<&MutateRowRequest>) -> bool {
    match request {
        Some(request) => !has_server_timestamp(&request.mutations),
        None => false,
    }
}

/// A conditional mutation is retryable only if neither branch contains a
/// server-timestamped set-cell.
pub fn is_retryable_check_and_mutate(request: Option<&CheckAndMutateRowRequest>) -> bool {
    match request {
        Some(request) => {
            !has_server_timestamp(&request.true_mutations)
                && !has_server_timestamp(&request.false_mutations)
        }
        None => false,
    }
}

/// Reads have no side effects.
pub fn is_idempotent_read<Req>(request: Option<&Req>) -> bool {
    request.is_some()
}

/// Appends and increments change the result every time they are applied.
pub fn never_retryable<Req>(_request: Option<&Req>) -> bool {
    false
}
