use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDesc {
    pub name: String,
    pub help: String,
    #[serde(default)]
    pub label_names: Vec<String>,
}

impl MetricDesc {
    pub fn new(name: &str, help: &str, label_names: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            label_names: label_names.iter().map(|l| (*l).to_string()).collect(),
        }
    }
}

/// One value handed to the metrics endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    pub desc: Arc<MetricDesc>,
    pub kind: MetricKind,
    pub label_values: Vec<String>,
    pub value: f64,
}

impl MetricSample {
    pub fn new(desc: &Arc<MetricDesc>, kind: MetricKind, label_values: Vec<String>, value: f64) -> Self {
        Self {
            desc: Arc::clone(desc),
            kind,
            label_values,
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn labels(&self) -> impl Iterator<Item = (&str, &str)> {
        self.desc
            .label_names
            .iter()
            .map(String::as_str)
            .zip(self.label_values.iter().map(String::as_str))
    }
}
