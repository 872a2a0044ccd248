// Table mapping action result fields to metrics. Entries sharing a
// (service, action) pair must be adjacent: the collector calls once per run.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::sample::{MetricDesc, MetricKind};

const WAN_COMMON: &str = "urn:schemas-upnp-org:service:WANCommonInterfaceConfig:1";
const WAN_IP: &str = "urn:schemas-upnp-org:service:WANIPConnection:1";
const GATEWAY_LABELS: &[&str] = &["gateway"];

#[derive(Debug, Clone, Deserialize)]
pub struct MetricSpec {
    pub service: String,
    pub action: String,
    pub result: String,
    /// For text results: the value that maps to 1, anything else maps to 0.
    #[serde(default)]
    pub ok_value: Option<String>,
    #[serde(rename = "metric")]
    pub desc: Arc<MetricDesc>,
    pub kind: MetricKind,
}

impl MetricSpec {
    fn new(
        service: &str,
        action: &str,
        result: &str,
        ok_value: Option<&str>,
        desc: MetricDesc,
        kind: MetricKind,
    ) -> Self {
        Self {
            service: service.to_string(),
            action: action.to_string(),
            result: result.to_string(),
            ok_value: ok_value.map(str::to_string),
            desc: Arc::new(desc),
            kind,
        }
    }

    pub fn pair(&self) -> (&str, &str) {
        (&self.service, &self.action)
    }
}

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("cannot read metric table {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid metric table {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("metric {metric} in {path} has labels {labels:?}, only [\"gateway\"] is filled in")]
    Labels {
        path: String,
        metric: String,
        labels: Vec<String>,
    },
}

pub fn default_specs() -> Vec<MetricSpec> {
    vec![
        MetricSpec::new(
            WAN_COMMON,
            "GetTotalPacketsReceived",
            "TotalPacketsReceived",
            None,
            MetricDesc::new(
                "gateway_wan_packets_received",
                "packets received on gateway WAN interface",
                GATEWAY_LABELS,
            ),
            MetricKind::Counter,
        ),
        MetricSpec::new(
            WAN_COMMON,
            "GetTotalPacketsSent",
            "TotalPacketsSent",
            None,
            MetricDesc::new(
                "gateway_wan_packets_sent",
                "packets sent on gateway WAN interface",
                GATEWAY_LABELS,
            ),
            MetricKind::Counter,
        ),
        MetricSpec::new(
            WAN_COMMON,
            "GetAddonInfos",
            "TotalBytesReceived",
            None,
            MetricDesc::new(
                "gateway_wan_bytes_received",
                "bytes received on gateway WAN interface",
                GATEWAY_LABELS,
            ),
            MetricKind::Counter,
        ),
        MetricSpec::new(
            WAN_COMMON,
            "GetAddonInfos",
            "TotalBytesSent",
            None,
            MetricDesc::new(
                "gateway_wan_bytes_sent",
                "bytes sent on gateway WAN interface",
                GATEWAY_LABELS,
            ),
            MetricKind::Counter,
        ),
        MetricSpec::new(
            WAN_COMMON,
            "GetCommonLinkProperties",
            "Layer1UpstreamMaxBitRate",
            None,
            MetricDesc::new(
                "gateway_wan_layer1_upstream_max_bitrate",
                "Layer1 upstream max bitrate",
                GATEWAY_LABELS,
            ),
            MetricKind::Gauge,
        ),
        MetricSpec::new(
            WAN_COMMON,
            "GetCommonLinkProperties",
            "Layer1DownstreamMaxBitRate",
            None,
            MetricDesc::new(
                "gateway_wan_layer1_downstream_max_bitrate",
                "Layer1 downstream max bitrate",
                GATEWAY_LABELS,
            ),
            MetricKind::Gauge,
        ),
        MetricSpec::new(
            WAN_COMMON,
            "GetCommonLinkProperties",
            "PhysicalLinkStatus",
            Some("Up"),
            MetricDesc::new(
                "gateway_wan_layer1_link_status",
                "Status of physical link (Up = 1)",
                GATEWAY_LABELS,
            ),
            MetricKind::Gauge,
        ),
        MetricSpec::new(
            WAN_IP,
            "GetStatusInfo",
            "ConnectionStatus",
            Some("Connected"),
            MetricDesc::new(
                "gateway_wan_connection_status",
                "WAN connection status (Connected = 1)",
                GATEWAY_LABELS,
            ),
            MetricKind::Gauge,
        ),
        MetricSpec::new(
            WAN_IP,
            "GetStatusInfo",
            "Uptime",
            None,
            MetricDesc::new(
                "gateway_wan_connection_uptime_seconds",
                "WAN connection uptime",
                GATEWAY_LABELS,
            ),
            MetricKind::Gauge,
        ),
    ]
}

pub fn load_specs(path: &Path) -> Result<Vec<MetricSpec>, SpecError> {
    let raw = fs::read_to_string(path).map_err(|source| SpecError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let specs: Vec<MetricSpec> = serde_json::from_str(&raw).map_err(|source| SpecError::Json {
        path: path.display().to_string(),
        source,
    })?;

    if let Some(spec) = specs.iter().find(|s| s.desc.label_names != GATEWAY_LABELS) {
        return Err(SpecError::Labels {
            path: path.display().to_string(),
            metric: spec.desc.name.clone(),
            labels: spec.desc.label_names.clone(),
        });
    }

    for (service, action) in scattered_pairs(&specs) {
        warn!(%service, %action, "entries for this action are not adjacent; it will be called once per run");
    }

    Ok(specs)
}

// pairs that appear in more than one contiguous run
pub fn scattered_pairs(specs: &[MetricSpec]) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut scattered = Vec::new();
    let mut previous: Option<(&str, &str)> = None;

    for spec in specs {
        let pair = spec.pair();
        if previous == Some(pair) {
            continue;
        }
        previous = Some(pair);
        if !seen.insert(pair) && reported.insert(pair) {
            scattered.push((pair.0.to_string(), pair.1.to_string()));
        }
    }

    scattered
}
