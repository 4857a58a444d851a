//! Integration tests for session bootstrap and the retrying data client.

mod common;

use std::io::Write;

use bytes::Bytes;
use common::{init_tracing, FakeChannels};
use tabletkv_client::interceptor::{RESOURCE_PREFIX_HEADER, USER_AGENT_HEADER};
use tabletkv_client::protocol::{
    MutateRowRequest, Mutation, ReadModifyWriteRowRequest, ReadModifyWriteRule, RpcRequest,
    SampleRowKeysRequest, StatusCode, SERVER_ASSIGNED_TIMESTAMP,
};
use tabletkv_client::{ClientError, TabletOptions, TabletSession};
use tempfile::NamedTempFile;
use tokio::runtime::Handle;

fn options(channels: usize) -> TabletOptions {
    let mut options = TabletOptions::new("project", "zone", "cluster", "tests/1.0");
    options.channel_count = channels;
    options
}

fn session(fakes: &FakeChannels, options: TabletOptions) -> TabletSession {
    init_tracing();
    TabletSession::new(options, fakes.factory(), Handle::current()).unwrap()
}

fn mutate_request(session: &TabletSession, timestamp: i64) -> MutateRowRequest {
    MutateRowRequest {
        table_name: session.options().table_name("TABLE"),
        row_key: Bytes::from_static(b"row"),
        mutations: vec![Mutation::set_cell("cf", "q", timestamp, "v")],
    }
}

#[tokio::test]
async fn test_missing_identity_fields_are_reported_by_name() {
    let cases = [
        (["", "zone", "cluster", "ua"], "project_id must not be empty"),
        (["project", "", "cluster", "ua"], "zone_id must not be empty"),
        (["project", "zone", "", "ua"], "cluster_id must not be empty"),
        (["project", "zone", "cluster", ""], "user_agent must not be empty"),
    ];

    for ([project, zone, cluster, user_agent], message) in cases {
        let options = TabletOptions::new(project, zone, cluster, user_agent);
        let fakes = FakeChannels::new();
        let err = TabletSession::new(options, fakes.factory(), Handle::current()).unwrap_err();
        assert!(matches!(err, ClientError::MissingConfig { .. }));
        assert_eq!(err.to_string(), message);
        assert!(fakes.channels().is_empty());
    }
}

#[tokio::test]
async fn test_session_uses_first_channel_authority() {
    let fakes = FakeChannels::new().with_distinct_authorities();
    let session = session(&fakes, options(3));

    assert_eq!(fakes.channels().len(), 3);
    assert_eq!(session.pool().size(), 3);
    assert_eq!(session.pool().authority(), "tablet-0.local:8086");
}

#[tokio::test]
async fn test_channel_creation_failure_during_growth() {
    let fakes = FakeChannels::new().failing_after(2);
    let err = TabletSession::new(options(4), fakes.factory(), Handle::current()).unwrap_err();

    assert!(matches!(err, ClientError::Io(_)));
    assert_eq!(fakes.channels().len(), 2);
}

#[tokio::test]
async fn test_transient_failure_retried_on_next_channel() {
    let fakes = FakeChannels::new().with_distinct_authorities();
    fakes.push_status(StatusCode::Unavailable);
    let session = session(&fakes, options(2));

    let request = mutate_request(&session, 1_000);
    session.data_client().mutate_row(request.clone()).await.unwrap();

    for channel in fakes.channels() {
        assert_eq!(channel.call_count(), 1);
    }
    for call in fakes.all_calls() {
        assert_eq!(call.method, "tabletkv.v1.DataService/MutateRow");
        assert_eq!(call.request, RpcRequest::MutateRow(request.clone()));
        assert_eq!(call.headers.get(USER_AGENT_HEADER), Some("tests/1.0"));
        assert_eq!(
            call.headers.get(RESOURCE_PREFIX_HEADER),
            Some("projects/project/zones/zone/clusters/cluster")
        );
    }

    let snapshot = session.metrics().snapshot();
    assert_eq!(snapshot.rpcs_started, 2);
    assert_eq!(snapshot.retries_total, 1);
    assert_eq!(snapshot.rpcs_succeeded, 1);
    assert_eq!(snapshot.rpcs_failed, 0);
}

#[tokio::test]
async fn test_server_timestamp_mutation_is_not_retried() {
    let fakes = FakeChannels::new();
    fakes.push_status(StatusCode::Unavailable);
    let session = session(&fakes, options(2));

    let err = session
        .data_client()
        .mutate_row(mutate_request(&session, SERVER_ASSIGNED_TIMESTAMP))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), Some(StatusCode::Unavailable));
    assert_eq!(fakes.total_calls(), 1);
    assert_eq!(session.metrics().snapshot().retries_total, 0);
}

#[tokio::test]
async fn test_read_modify_write_is_never_retried() {
    let fakes = FakeChannels::new();
    fakes.push_status(StatusCode::Unavailable);
    let session = session(&fakes, options(1));

    let request = ReadModifyWriteRowRequest {
        table_name: session.options().table_name("TABLE"),
        row_key: Bytes::from_static(b"counter"),
        rules: vec![ReadModifyWriteRule::IncrementAmount {
            family_name: "cf".to_string(),
            column_qualifier: Bytes::from_static(b"hits"),
            amount: 1,
        }],
    };
    let err = session
        .data_client()
        .read_modify_write_row(request)
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), Some(StatusCode::Unavailable));
    assert_eq!(fakes.total_calls(), 1);
}

#[tokio::test]
async fn test_reads_retry_until_success() {
    let fakes = FakeChannels::new();
    fakes.push_status(StatusCode::Unavailable);
    fakes.push_status(StatusCode::Aborted);
    let session = session(&fakes, options(2));

    let response = session
        .data_client()
        .sample_row_keys(SampleRowKeysRequest {
            table_name: session.options().table_name("TABLE"),
        })
        .await
        .unwrap();

    assert!(response.samples.is_empty());
    assert_eq!(fakes.total_calls(), 3);
    assert_eq!(session.metrics().snapshot().retries_total, 2);
}

#[tokio::test]
async fn test_non_transient_status_fails_immediately() {
    let fakes = FakeChannels::new();
    fakes.push_status(StatusCode::PermissionDenied);
    let session = session(&fakes, options(2));

    let err = session
        .data_client()
        .mutate_row(mutate_request(&session, 1_000))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), Some(StatusCode::PermissionDenied));
    assert_eq!(fakes.total_calls(), 1);
    assert_eq!(session.metrics().snapshot().rpcs_failed, 1);
}

#[tokio::test]
async fn test_retry_attempts_are_bounded() {
    let fakes = FakeChannels::new();
    for _ in 0..3 {
        fakes.push_status(StatusCode::Unavailable);
    }
    let mut options = options(2);
    options.retry.max_attempts = 2;
    let session = session(&fakes, options);

    let err = session
        .data_client()
        .mutate_row(mutate_request(&session, 1_000))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), Some(StatusCode::Unavailable));
    assert_eq!(fakes.total_calls(), 2);
    let snapshot = session.metrics().snapshot();
    assert_eq!(snapshot.retries_total, 1);
    assert_eq!(snapshot.rpcs_failed, 1);
}

#[tokio::test]
async fn test_session_from_config_file() {
    let mut file = NamedTempFile::with_suffix(".toml").unwrap();
    writeln!(
        file,
        r#"
project_id = "p"
zone_id = "z"
cluster_id = "c"
user_agent = "loader/2.0"
channel_count = 2

[retry]
enable_retries = false
"#
    )
    .unwrap();
    let options = TabletOptions::from_file(file.path()).unwrap();

    let fakes = FakeChannels::new();
    fakes.push_status(StatusCode::Unavailable);
    let session = session(&fakes, options);
    assert_eq!(session.pool().size(), 2);

    let request = MutateRowRequest {
        table_name: session.options().table_name("t"),
        row_key: Bytes::from_static(b"r"),
        mutations: vec![Mutation::set_cell("cf", "q", 5, "v")],
    };
    let err = session.data_client().mutate_row(request).await.unwrap_err();
    assert_eq!(err.status_code(), Some(StatusCode::Unavailable));
    assert_eq!(fakes.total_calls(), 1);
    assert_eq!(
        fakes.all_calls()[0].headers.get(USER_AGENT_HEADER),
        Some("loader/2.0")
    );
}
