use std::sync::Arc;

use fritz_core::{default_specs, CollectorConfig, DirectoryCell, GatewayCollector, UpnpClient};

use crate::server::{render, resolve_listen_address, AppState};

fn idle_state() -> AppState {
    let config = CollectorConfig::default();
    let client = Arc::new(UpnpClient::from_config(&config).expect("client"));
    let gateway = GatewayCollector::new(config.gateway.clone(), default_specs(), DirectoryCell::new(), client)
        .expect("collector");
    AppState {
        gateway: Arc::new(gateway),
        home: None,
    }
}

#[tokio::test]
async fn port_only_listen_address_binds_all_interfaces() {
    // Arrange
    let raw = ":9133";

    // Act
    let addr = resolve_listen_address(raw).await.expect("addr");

    // Assert
    assert_eq!(addr.to_string(), "0.0.0.0:9133");
}

#[tokio::test]
async fn explicit_listen_address_is_kept() {
    let addr = resolve_listen_address("127.0.0.1:9300").await.expect("addr");
    assert_eq!(addr.to_string(), "127.0.0.1:9300");
}

#[tokio::test]
async fn host_name_listen_address_is_resolved() {
    // Arrange
    let raw = "localhost:9133";

    // Act
    let addr = resolve_listen_address(raw).await.expect("addr");

    // Assert
    assert!(addr.ip().is_loopback(), "got {addr}");
    assert_eq!(addr.port(), 9133);
}

#[tokio::test]
async fn empty_or_portless_listen_address_is_rejected() {
    assert!(resolve_listen_address("").await.is_err());
    assert!(resolve_listen_address("   ").await.is_err());
    assert!(resolve_listen_address("fritz.box").await.is_err());
}

#[tokio::test]
async fn unloaded_gateway_renders_only_error_counter() {
    // Arrange
    let state = idle_state();

    // Act
    let body = render(&state).await.expect("render");

    // Assert
    assert!(body.contains("# HELP fritzbox_exporter_collect_errors Number of collection errors.\n"));
    assert!(body.contains("# TYPE fritzbox_exporter_collect_errors counter\n"));
    let series: Vec<&str> = body.lines().filter(|line| !line.starts_with('#')).collect();
    assert_eq!(series.len(), 1);
    assert!(series[0].starts_with("fritzbox_exporter_collect_errors 0"), "got {series:?}");
}
