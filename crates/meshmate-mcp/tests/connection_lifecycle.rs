//! Connection state machine against the in-memory stub server.

use std::sync::Arc;
use std::time::Duration;

use meshmate_core::ports::RecordingEmitter;
use meshmate_core::{
    ConnectionState, CoreError, CoreEvent, ErrorCategory, MemoryPreferenceStore, SecurityValidator,
    ServerConfig,
};
use meshmate_mcp::testing::StubServer;
use meshmate_mcp::{McpService, ServerRegistry};

fn service(stub: &StubServer, configs: Vec<ServerConfig>) -> (McpService, RecordingEmitter) {
    let registry = ServerRegistry::load(Arc::new(MemoryPreferenceStore::new())).unwrap();
    for config in configs {
        registry.upsert(config).unwrap();
    }
    let emitter = RecordingEmitter::new();
    let service = McpService::new(
        Arc::new(registry),
        Arc::new(stub.clone()),
        Arc::new(SecurityValidator::default()),
        Arc::new(emitter.clone()),
    );
    (service, emitter)
}

/// Poll `check` every few milliseconds for up to two seconds.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

fn states_for(emitter: &RecordingEmitter, server: &str) -> Vec<ConnectionState> {
    emitter
        .events()
        .into_iter()
        .filter_map(|event| match event {
            CoreEvent::ServerStateChanged { server: s, state, .. } if s == server => Some(state),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_echo_server_connects_and_lists_tools() {
    let stub = StubServer::new().with_echo_tool();
    let (service, emitter) = service(&stub, vec![ServerConfig::new("echo", "stub-echo")]);

    assert_eq!(service.manager().state("echo").await, ConnectionState::Disconnected);
    let state = service.connect("echo").await.unwrap();
    assert_eq!(state, ConnectionState::Connected);

    assert_eq!(
        states_for(&emitter, "echo"),
        [ConnectionState::Connecting, ConnectionState::Connected]
    );
    assert!(emitter.events().iter().any(|e| matches!(
        e,
        CoreEvent::CapabilitiesDiscovered { server, tool_count: 1, .. } if server == "echo"
    )));

    let tools: Vec<String> = service
        .list_tools()
        .await
        .iter()
        .map(|t| t.qualified_name())
        .collect();
    assert_eq!(tools, ["echo.echo"]);
    assert_eq!(stub.notifications_received("notifications/initialized"), 1);
}

#[tokio::test]
async fn test_disabled_server_is_never_launched() {
    let stub = StubServer::new().with_echo_tool();
    let (service, emitter) = service(
        &stub,
        vec![ServerConfig::new("off", "stub").with_enabled(false)],
    );

    let err = service.connect("off").await.unwrap_err();
    assert!(matches!(err, CoreError::Disabled(ref name) if name == "off"));
    assert_eq!(stub.launches(), 0);
    assert!(emitter.events().is_empty());
}

#[tokio::test]
async fn test_disconnect_unknown_name_is_noop() {
    let stub = StubServer::new();
    let (service, _) = service(&stub, vec![]);

    tokio_test::assert_ok!(service.disconnect("never-configured").await);
    tokio_test::assert_ok!(service.disconnect("never-configured").await);
}

#[tokio::test]
async fn test_concurrent_connects_launch_once() {
    let stub = StubServer::new()
        .with_echo_tool()
        .with_launch_delay(Duration::from_millis(100));
    let (service, _) = service(&stub, vec![ServerConfig::new("echo", "stub")]);

    let (first, second, third) = tokio::join!(
        service.connect("echo"),
        service.connect("echo"),
        service.connect("echo")
    );
    for result in [first, second, third] {
        assert!(result.unwrap().is_live());
    }
    assert_eq!(stub.launches_for("echo"), 1);
    assert_eq!(service.manager().state("echo").await, ConnectionState::Connected);
}

#[tokio::test]
async fn test_disconnect_releases_transport_and_cache() {
    let stub = StubServer::new().with_echo_tool();
    let (service, emitter) = service(&stub, vec![ServerConfig::new("echo", "stub")]);

    service.connect("echo").await.unwrap();
    service.disconnect("echo").await.unwrap();

    assert_eq!(service.manager().state("echo").await, ConnectionState::Disconnected);
    assert!(service.list_tools().await.is_empty());
    assert_eq!(stub.closes(), 1);
    assert_eq!(
        states_for(&emitter, "echo"),
        [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnecting,
            ConnectionState::Disconnected
        ]
    );

    // Reconnect after a clean disconnect.
    service.connect("echo").await.unwrap();
    assert_eq!(stub.launches_for("echo"), 2);
}

#[tokio::test]
async fn test_silent_server_times_out_handshake() {
    let stub = StubServer::new().with_echo_tool().silent();
    let (service, _) = service(&stub, vec![ServerConfig::new("mute", "stub").with_timeout(1)]);

    let err = service.connect("mute").await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Timeout);
    assert_eq!(service.manager().state("mute").await, ConnectionState::Failed);
    assert!(service.manager().last_error("mute").await.is_some());
    let stub = &stub;
    assert!(eventually(move || async move { stub.closes() == 1 }).await);
}

#[tokio::test]
async fn test_disconnect_cancels_handshake_in_flight() {
    let stub = StubServer::new().with_echo_tool().silent();
    let (service, emitter) = service(&stub, vec![ServerConfig::new("mute", "stub").with_timeout(30)]);

    let (connected, disconnected) = tokio::join!(service.connect("mute"), async {
        assert!(stub.wait_for_requests("initialize", 1, Duration::from_secs(2)).await);
        service.disconnect("mute").await
    });

    assert!(matches!(connected, Err(CoreError::NotConnected(ref name)) if name == "mute"));
    tokio_test::assert_ok!(disconnected);
    assert_eq!(service.manager().state("mute").await, ConnectionState::Disconnected);
    assert_eq!(states_for(&emitter, "mute").last(), Some(&ConnectionState::Disconnected));
    assert!(service.list_tools().await.is_empty());
    let stub = &stub;
    assert!(eventually(move || async move { stub.closes() == 1 }).await);
}

#[tokio::test]
async fn test_launch_failure_moves_to_failed() {
    let stub = StubServer::new().refusing("broken");
    let (service, emitter) = service(&stub, vec![ServerConfig::new("broken", "stub")]);

    let err = service.connect("broken").await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(
        states_for(&emitter, "broken"),
        [ConnectionState::Connecting, ConnectionState::Failed]
    );
}

#[tokio::test]
async fn test_crash_marks_failed_and_clears_cache() {
    let stub = StubServer::new().with_echo_tool();
    let (service, _) = service(&stub, vec![ServerConfig::new("echo", "stub")]);
    service.connect("echo").await.unwrap();

    stub.crash();

    let manager = service.manager().clone();
    assert!(eventually(|| {
        let manager = manager.clone();
        async move { manager.state("echo").await == ConnectionState::Failed }
    })
    .await);
    assert!(service.list_tools().await.is_empty());
    assert!(service.manager().last_error("echo").await.is_some());

    // Calls on a failed connection are refused without contact.
    let err = service
        .manager()
        .send("echo", "ping", None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotConnected(_)));
}

#[tokio::test]
async fn test_tools_list_changed_triggers_refresh() {
    let stub = StubServer::new().with_echo_tool();
    let (service, _) = service(&stub, vec![ServerConfig::new("echo", "stub")]);
    service.connect("echo").await.unwrap();

    stub.add_text_tool("late", "arrived");
    stub.notify_all("notifications/tools/list_changed");

    let service = &service;
    assert!(eventually(move || async move {
        service
            .list_tools()
            .await
            .iter()
            .any(|t| t.qualified_name() == "echo.late")
    })
    .await);
    assert_eq!(stub.requests_received("tools/list"), 2);
}

#[tokio::test]
async fn test_auto_connect_reports_each_server() {
    let stub = StubServer::new().with_echo_tool().refusing("bad");
    let (service, _) = service(
        &stub,
        vec![
            ServerConfig::new("good", "stub"),
            ServerConfig::new("bad", "stub"),
            ServerConfig::new("off", "stub").with_enabled(false),
        ],
    );

    let report = service.auto_connect().await;
    assert_eq!(report.connected, ["good"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "bad");
    assert!(!report.is_complete());
    assert_eq!(stub.launches_for("off"), 0);

    let states = service.states().await;
    let state_of = |name: &str| {
        states
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.state)
    };
    assert_eq!(state_of("good"), Some(ConnectionState::Connected));
    assert_eq!(state_of("bad"), Some(ConnectionState::Failed));
    assert_eq!(state_of("off"), Some(ConnectionState::Disconnected));
}

#[tokio::test]
async fn test_remove_server_disconnects_first() {
    let stub = StubServer::new().with_echo_tool();
    let (service, emitter) = service(&stub, vec![ServerConfig::new("echo", "stub")]);
    service.connect("echo").await.unwrap();

    let removed = service.remove_server("echo").await.unwrap();
    assert_eq!(removed.name, "echo");
    assert_eq!(stub.closes(), 1);
    assert!(service.get_server("echo").is_none());
    assert!(service.list_tools().await.is_empty());
    assert!(emitter
        .events()
        .iter()
        .any(|e| matches!(e, CoreEvent::ServersChanged { names } if names.is_empty())));

    assert!(matches!(
        service.remove_server("echo").await,
        Err(CoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_replacing_live_config_disconnects() {
    let stub = StubServer::new().with_echo_tool();
    let (service, _) = service(&stub, vec![ServerConfig::new("echo", "stub")]);
    service.connect("echo").await.unwrap();

    service
        .upsert_server(ServerConfig::new("echo", "stub").with_timeout(5))
        .await
        .unwrap();
    assert_eq!(service.manager().state("echo").await, ConnectionState::Disconnected);
    assert_eq!(service.get_server("echo").unwrap().timeout, 5);
}

#[tokio::test]
async fn test_export_import_round_trip() {
    let stub = StubServer::new();
    let (source, _) = service(
        &stub,
        vec![
            ServerConfig::new("blender", "uvx")
                .with_args(["blender-mcp"])
                .with_description("Scene tools"),
            ServerConfig::new("fs", "npx")
                .with_args(["-y", "@modelcontextprotocol/server-filesystem", "/tmp"])
                .with_enabled(false),
        ],
    );
    let document = source.export();

    let (target, emitter) = service(&stub, vec![]);
    let report = target.import(&document).await.unwrap();
    assert!(report.is_clean());

    for original in source.registry().list() {
        let imported = target.get_server(&original.name).unwrap();
        assert_eq!(imported.command, original.command);
        assert_eq!(imported.args, original.args);
        assert_eq!(imported.enabled, original.enabled);
    }
    assert!(emitter
        .events()
        .iter()
        .any(|e| matches!(e, CoreEvent::ServersChanged { names } if names.len() == 2)));
}
