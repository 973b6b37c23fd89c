//! Identity registry: connection and event stream together.

mod common;

use std::sync::Arc;

use chatlink::client::{ClientError, IdentityRegistry};
use chatlink::core::{ConnectionState, ServerIdentity};
use chatlink::stream::{CursorStore, EventId, MemoryCursorStore, StreamConfig, StreamState};
use chatlink::transport::{ConnectionConfig, ConnectionRegistry, EndpointConfig, TransportError};
use chatlink::ChatlinkError;
use common::{
    eventually, init_tracing, wait_for, MemoryConnector, RecordingHandler, RecordingModel,
    ScriptedPush,
};
use serde_json::{json, Value};

fn stream_config(token: &str) -> StreamConfig {
    StreamConfig::builder("wss://chat.example/push", "device-1")
        .access_token(token)
        .build()
}

#[tokio::test]
async fn test_switch_identity_resets_everything_first() -> Result<(), ChatlinkError> {
    init_tracing();
    let work: ServerIdentity = "work".into();
    let home: ServerIdentity = "home".into();
    let (connector, mut accepted) = MemoryConnector::new();
    let (push, mut pushes) = ScriptedPush::new(0);
    let cursors = Arc::new(MemoryCursorStore::new());
    cursors.save(&work, &EventId::new("9")).await?;
    cursors.save(&home, &EventId::new("90")).await?;

    let registry = Arc::new(IdentityRegistry::new(
        ConnectionRegistry::new(connector.clone(), ConnectionConfig::default()),
        push.clone(),
        cursors.clone(),
        RecordingModel::with(None, &[]),
        Arc::new(RecordingHandler::default()),
    ));

    let opening = {
        let registry = registry.clone();
        tokio::spawn(async move {
            registry
                .open(
                    &EndpointConfig::new("work", "chat.example:7000"),
                    stream_config("token-1"),
                )
                .await
        })
    };
    let mut work_end = accepted.recv().await.unwrap();
    work_end.accept(5, None).await;
    let connection = opening.await.unwrap()?;
    assert_eq!(connection.state(), ConnectionState::Ready);

    let mut work_push = pushes.recv().await.unwrap();
    let auth = work_push.next_command().await;
    assert_eq!(auth["resume"]["last_event_id"], "9");
    work_push.push(json!({"type": "auth.ok"})).await;
    let mut states = registry.start_stream(&work, stream_config("ignored")).await;
    wait_for(&mut states, StreamState::Live).await;
    assert_eq!(push.opens().len(), 1);

    registry.update_credential(&work, "token-2").await?;
    assert_eq!(
        work_push.next_non_ping().await,
        json!({"type": "reauth", "access_token": "token-2"})
    );

    // a request left hanging on the old identity
    let pending = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.request("channel.list", Value::Null).await })
    };
    let _request = work_end.recv_envelope().await;

    let switching = {
        let registry = registry.clone();
        tokio::spawn(async move {
            registry
                .switch_identity(
                    &"work".into(),
                    &EndpointConfig::new("home", "home.example:7000"),
                    stream_config("token-home"),
                )
                .await
        })
    };
    let mut home_end = accepted.recv().await.unwrap();

    // everything for work is gone before home connects
    assert!(matches!(
        pending.await.unwrap(),
        Err(TransportError::RequestCancelled { .. })
    ));
    assert!(work_end.is_closed());
    assert!(work_push.is_closed());
    assert_eq!(*states.borrow(), StreamState::Closed);
    assert_eq!(cursors.load(&work).await?, None);
    assert_eq!(cursors.load(&home).await?, Some(EventId::new("90")));
    assert!(registry.connection(&work).await.is_none());
    assert_eq!(registry.stream_state(&work).await, None);

    home_end.accept(6, None).await;
    let home_connection = switching.await.unwrap()?;
    assert_eq!(home_connection.identity(), &home);

    let mut home_push = pushes.recv().await.unwrap();
    let auth = home_push.next_command().await;
    assert_eq!(auth["access_token"], "token-home");
    assert_eq!(auth["resume"]["last_event_id"], "90");

    let err = registry
        .update_credential(&work, "token-3")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NoStream(_)));

    registry.close_all().await;
    eventually(|| home_push.is_closed()).await;
    assert_eq!(home_connection.state(), ConnectionState::Closed);
    assert_eq!(cursors.load(&home).await?, Some(EventId::new("90")));
    Ok(())
}

#[tokio::test]
async fn test_open_failure_starts_no_stream() {
    init_tracing();
    let (connector, _accepted) = MemoryConnector::new();
    connector.refuse("work");
    let (push, _pushes) = ScriptedPush::new(0);
    let registry = IdentityRegistry::new(
        ConnectionRegistry::new(connector, ConnectionConfig::default()),
        push.clone(),
        Arc::new(MemoryCursorStore::new()),
        RecordingModel::with(None, &[]),
        Arc::new(RecordingHandler::default()),
    );

    let err = registry
        .open(
            &EndpointConfig::new("work", "chat.example:7000"),
            stream_config("token-1"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Transport(TransportError::Io(_))));
    assert_eq!(registry.stream_state(&"work".into()).await, None);
    assert!(push.opens().is_empty());

    let wrapped = ChatlinkError::from(err);
    assert!(wrapped.to_string().contains("refused"));
}
