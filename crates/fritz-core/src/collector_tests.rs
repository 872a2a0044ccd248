use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::collector::{GatewayCollector, COLLECT_ERRORS_METRIC};
use crate::loader::DirectoryCell;
use crate::sample::{MetricDesc, MetricKind, MetricSample};
use crate::spec::MetricSpec;
use crate::upnp::{Action, ActionInvoker, ActionResult, Service, ServiceDirectory, UpnpError, Value};

const WAN: &str = "urn:schemas-upnp-org:service:WANCommonInterfaceConfig:1";
const IP: &str = "urn:schemas-upnp-org:service:WANIPConnection:1";

#[derive(Default)]
struct RecordingInvoker {
    results: HashMap<(String, String), ActionResult>,
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingInvoker {
    fn with_result(mut self, service: &str, action: &str, fields: &[(&str, Value)]) -> Self {
        let result = fields
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        self.results
            .insert((service.to_string(), action.to_string()), result);
        self
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ActionInvoker for RecordingInvoker {
    async fn call(&self, service: &Service, action: &Action) -> Result<ActionResult, UpnpError> {
        let key = (service.service_type.clone(), action.name.clone());
        self.calls.lock().push(key.clone());
        self.results.get(&key).cloned().ok_or(UpnpError::Status {
            url: format!("http://fritz.box:49000{}", service.control_url),
            status: 500,
        })
    }
}

fn spec(service: &str, action: &str, result: &str, ok_value: Option<&str>, name: &str) -> MetricSpec {
    MetricSpec {
        service: service.to_string(),
        action: action.to_string(),
        result: result.to_string(),
        ok_value: ok_value.map(str::to_string),
        desc: Arc::new(MetricDesc::new(name, "test metric", &["gateway"])),
        kind: MetricKind::Gauge,
    }
}

fn directory() -> ServiceDirectory {
    [
        Service::new(WAN, "/igdupnp/control/WANCommonIFC1")
            .with_action(Action::new("GetAddonInfos"))
            .with_action(Action::new("GetCommonLinkProperties")),
        Service::new(IP, "/igdupnp/control/WANIPConn1").with_action(Action::new("GetStatusInfo")),
    ]
    .into_iter()
    .collect()
}

fn collector(invoker: RecordingInvoker, specs: Vec<MetricSpec>) -> (GatewayCollector<RecordingInvoker>, Arc<RecordingInvoker>) {
    let cell = DirectoryCell::new();
    cell.publish(directory());
    let invoker = Arc::new(invoker);
    let collector =
        GatewayCollector::new("fritz.box", specs, cell, Arc::clone(&invoker)).expect("collector");
    (collector, invoker)
}

fn values(samples: &[MetricSample]) -> Vec<(String, f64)> {
    samples
        .iter()
        .map(|s| (s.name().to_string(), s.value))
        .collect()
}

fn addon_invoker() -> RecordingInvoker {
    RecordingInvoker::default()
        .with_result(
            WAN,
            "GetAddonInfos",
            &[
                ("TotalBytesReceived", Value::UnsignedInteger(1_000)),
                ("TotalBytesSent", Value::UnsignedInteger(250)),
            ],
        )
        .with_result(
            IP,
            "GetStatusInfo",
            &[
                ("ConnectionStatus", Value::Text("Connected".to_string())),
                ("Uptime", Value::UnsignedInteger(86_400)),
            ],
        )
}

#[tokio::test]
async fn adjacent_specs_share_one_call() {
    // Arrange
    let specs = vec![
        spec(WAN, "GetAddonInfos", "TotalBytesReceived", None, "rx"),
        spec(WAN, "GetAddonInfos", "TotalBytesSent", None, "tx"),
    ];
    let (collector, invoker) = collector(addon_invoker(), specs);

    // Act
    let samples = collector.collect().await;

    // Assert
    assert_eq!(invoker.calls(), vec![(WAN.to_string(), "GetAddonInfos".to_string())]);
    assert_eq!(
        values(&samples),
        vec![
            (COLLECT_ERRORS_METRIC.to_string(), 0.0),
            ("rx".to_string(), 1_000.0),
            ("tx".to_string(), 250.0),
        ]
    );
}

#[tokio::test]
async fn different_pairs_are_called_in_table_order() {
    let specs = vec![
        spec(IP, "GetStatusInfo", "Uptime", None, "uptime"),
        spec(WAN, "GetAddonInfos", "TotalBytesReceived", None, "rx"),
    ];
    let (collector, invoker) = collector(addon_invoker(), specs);

    collector.collect().await;

    assert_eq!(
        invoker.calls(),
        vec![
            (IP.to_string(), "GetStatusInfo".to_string()),
            (WAN.to_string(), "GetAddonInfos".to_string()),
        ]
    );
}

#[tokio::test]
async fn non_adjacent_entries_are_not_regrouped() {
    let specs = vec![
        spec(WAN, "GetAddonInfos", "TotalBytesReceived", None, "rx"),
        spec(IP, "GetStatusInfo", "Uptime", None, "uptime"),
        spec(WAN, "GetAddonInfos", "TotalBytesSent", None, "tx"),
    ];
    let (collector, invoker) = collector(addon_invoker(), specs);

    collector.collect().await;

    assert_eq!(invoker.calls().len(), 3);
}

#[tokio::test]
async fn missing_field_counts_one_error_and_keeps_the_rest() {
    // Arrange
    let specs = vec![
        spec(WAN, "GetAddonInfos", "TotalBytesReceived", None, "rx"),
        spec(WAN, "GetAddonInfos", "TotalPacketsLost", None, "lost"),
        spec(IP, "GetStatusInfo", "ConnectionStatus", Some("Connected"), "connected"),
    ];
    let (collector, _invoker) = collector(addon_invoker(), specs);

    // Act
    let samples = collector.collect().await;

    // Assert
    assert_eq!(collector.error_count(), 1);
    assert_eq!(
        values(&samples),
        vec![
            (COLLECT_ERRORS_METRIC.to_string(), 1.0),
            ("rx".to_string(), 1_000.0),
            ("connected".to_string(), 1.0),
        ]
    );
}

#[tokio::test]
async fn failed_call_skips_every_entry_of_the_pair() {
    let specs = vec![
        spec(WAN, "GetCommonLinkProperties", "Layer1UpstreamMaxBitRate", None, "up"),
        spec(WAN, "GetCommonLinkProperties", "PhysicalLinkStatus", Some("Up"), "link"),
        spec(IP, "GetStatusInfo", "Uptime", None, "uptime"),
    ];
    let (collector, invoker) = collector(addon_invoker(), specs);

    let samples = collector.collect().await;

    assert_eq!(invoker.calls().len(), 2, "failed pair is called only once");
    assert_eq!(collector.error_count(), 1);
    assert_eq!(
        values(&samples),
        vec![
            (COLLECT_ERRORS_METRIC.to_string(), 1.0),
            ("uptime".to_string(), 86_400.0),
        ]
    );
}

#[tokio::test]
async fn unknown_service_or_action_is_skipped_without_counting() {
    let specs = vec![
        spec("urn:dslforum-org:service:WLANConfiguration:1", "GetInfo", "Status", None, "wlan"),
        spec(IP, "GetNatRSIPStatus", "NewNATEnabled", None, "nat"),
        spec(IP, "GetStatusInfo", "Uptime", None, "uptime"),
    ];
    let (collector, invoker) = collector(addon_invoker(), specs);

    let samples = collector.collect().await;

    assert_eq!(collector.error_count(), 0);
    assert_eq!(invoker.calls().len(), 1);
    assert_eq!(samples.len(), 2);
}

#[tokio::test]
async fn unsupported_value_counts_as_error() {
    let invoker = RecordingInvoker::default().with_result(
        IP,
        "GetStatusInfo",
        &[(
            "LastConnectionError",
            Value::Unsupported {
                data_type: "i4".to_string(),
                raw: "-1".to_string(),
            },
        )],
    );
    let specs = vec![spec(IP, "GetStatusInfo", "LastConnectionError", None, "last_error")];
    let (collector, _invoker) = collector(invoker, specs);

    let samples = collector.collect().await;

    assert_eq!(collector.error_count(), 1);
    assert_eq!(values(&samples), vec![(COLLECT_ERRORS_METRIC.to_string(), 1.0)]);
}

#[tokio::test]
async fn unloaded_directory_yields_only_the_error_counter() {
    let invoker = Arc::new(addon_invoker());
    let collector = GatewayCollector::new(
        "fritz.box",
        vec![spec(IP, "GetStatusInfo", "Uptime", None, "uptime")],
        DirectoryCell::new(),
        Arc::clone(&invoker),
    )
    .expect("collector");

    let samples = collector.collect().await;

    assert!(invoker.calls().is_empty());
    assert_eq!(collector.error_count(), 0);
    assert_eq!(values(&samples), vec![(COLLECT_ERRORS_METRIC.to_string(), 0.0)]);
}

#[tokio::test]
async fn total_outage_still_completes() {
    let specs = vec![
        spec(WAN, "GetCommonLinkProperties", "PhysicalLinkStatus", Some("Up"), "link"),
        spec(IP, "GetStatusInfo", "Uptime", None, "uptime"),
    ];
    let (collector, _invoker) = collector(RecordingInvoker::default(), specs);

    let samples = collector.collect().await;

    assert_eq!(values(&samples), vec![(COLLECT_ERRORS_METRIC.to_string(), 2.0)]);
}

#[tokio::test]
async fn repeated_passes_are_identical() {
    let specs = vec![
        spec(WAN, "GetAddonInfos", "TotalBytesReceived", None, "rx"),
        spec(IP, "GetStatusInfo", "ConnectionStatus", Some("Connected"), "connected"),
    ];
    let (collector, _invoker) = collector(addon_invoker(), specs);

    let first = collector.collect().await;
    let second = collector.collect().await;

    assert_eq!(first, second);
    assert!(first[1..]
        .iter()
        .all(|s| s.label_values == vec!["fritz.box".to_string()]));
}
