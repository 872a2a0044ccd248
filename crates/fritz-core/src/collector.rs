use std::sync::Arc;

use prometheus::IntCounter;
use thiserror::Error;
use tracing::{debug, warn};

use crate::loader::DirectoryCell;
use crate::sample::{MetricDesc, MetricKind, MetricSample};
use crate::spec::MetricSpec;
use crate::upnp::{ActionInvoker, ActionResult, ServiceDirectory, Value};

pub const COLLECT_ERRORS_METRIC: &str = "fritzbox_exporter_collect_errors";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollectError {
    #[error("{what} not found in the service directory")]
    LookupMiss { what: String },
    #[error("result field {field} not present")]
    MissingField { field: String },
    #[error("result field {field} has unsupported value {value:?}")]
    TypeMismatch { field: String, value: Value },
}

/// Maps one result value onto a metric value.
///
/// Text compares against `ok_value` (an absent `ok_value` compares as empty).
pub fn coerce(field: &str, value: &Value, ok_value: Option<&str>) -> Result<f64, CollectError> {
    match value {
        Value::UnsignedInteger(v) => Ok(*v as f64),
        Value::Boolean(v) => Ok(if *v { 1.0 } else { 0.0 }),
        Value::Text(text) => Ok(if text.as_str() == ok_value.unwrap_or_default() {
            1.0
        } else {
            0.0
        }),
        Value::Unsupported { .. } => Err(CollectError::TypeMismatch {
            field: field.to_string(),
            value: value.clone(),
        }),
    }
}

/// Translates the metric table into samples, one action call per contiguous
/// run of specs sharing a (service, action) pair.
pub struct GatewayCollector<I: ActionInvoker> {
    gateway: String,
    specs: Vec<MetricSpec>,
    directory: DirectoryCell,
    invoker: Arc<I>,
    errors: IntCounter,
    errors_desc: Arc<MetricDesc>,
}

impl<I: ActionInvoker> GatewayCollector<I> {
    pub fn new(
        gateway: impl Into<String>,
        specs: Vec<MetricSpec>,
        directory: DirectoryCell,
        invoker: Arc<I>,
    ) -> prometheus::Result<Self> {
        let errors_desc = Arc::new(MetricDesc::new(
            COLLECT_ERRORS_METRIC,
            "Number of collection errors.",
            &[],
        ));
        let errors = IntCounter::new(errors_desc.name.clone(), errors_desc.help.clone())?;

        Ok(Self {
            gateway: gateway.into(),
            specs,
            directory,
            invoker,
            errors,
            errors_desc,
        })
    }

    pub fn specs(&self) -> &[MetricSpec] {
        &self.specs
    }

    pub fn error_count(&self) -> u64 {
        self.errors.get()
    }

    /// Runs one collection pass. Never fails: problems with single specs or
    /// calls are logged, counted and leave the affected samples out.
    pub async fn collect(&self) -> Vec<MetricSample> {
        let Some(directory) = self.directory.snapshot() else {
            debug!(gateway = %self.gateway, "services not loaded yet");
            return vec![self.error_sample()];
        };

        let mut samples = Vec::with_capacity(self.specs.len() + 1);
        let mut current: Option<((&str, &str), Option<ActionResult>)> = None;

        for spec in &self.specs {
            let pair = spec.pair();
            if current.as_ref().map(|(p, _)| *p) != Some(pair) {
                let result = self.call_pair(&directory, spec).await;
                current = Some((pair, result));
            }

            let Some((_, Some(result))) = current.as_ref() else {
                continue;
            };

            match self.evaluate(spec, result) {
                Ok(value) => samples.push(MetricSample::new(
                    &spec.desc,
                    spec.kind,
                    vec![self.gateway.clone()],
                    value,
                )),
                Err(err) => {
                    warn!(metric = %spec.desc.name, error = %err, "skipping metric");
                    self.errors.inc();
                }
            }
        }

        samples.insert(0, self.error_sample());
        samples
    }

    async fn call_pair(&self, directory: &ServiceDirectory, spec: &MetricSpec) -> Option<ActionResult> {
        // Lookup misses point at a firmware mismatch, not a transient fault,
        // so they are not counted.
        let resolved = directory
            .service(&spec.service)
            .ok_or_else(|| CollectError::LookupMiss {
                what: format!("service {}", spec.service),
            })
            .and_then(|service| {
                service
                    .action(&spec.action)
                    .map(|action| (service, action))
                    .ok_or_else(|| CollectError::LookupMiss {
                        what: format!("action {}", spec.action),
                    })
            });
        let (service, action) = match resolved {
            Ok(found) => found,
            Err(err) => {
                warn!(service = %spec.service, action = %spec.action, error = %err, "skipping lookup");
                return None;
            }
        };

        match self.invoker.call(service, action).await {
            Ok(result) => Some(result),
            Err(err) => {
                warn!(
                    gateway = %self.gateway,
                    service = %spec.service,
                    action = %spec.action,
                    error = %err,
                    "action call failed"
                );
                self.errors.inc();
                None
            }
        }
    }

    fn evaluate(&self, spec: &MetricSpec, result: &ActionResult) -> Result<f64, CollectError> {
        let value = result
            .get(&spec.result)
            .ok_or_else(|| CollectError::MissingField {
                field: spec.result.clone(),
            })?;
        coerce(&spec.result, value, spec.ok_value.as_deref())
    }

    fn error_sample(&self) -> MetricSample {
        MetricSample::new(
            &self.errors_desc,
            MetricKind::Counter,
            Vec::new(),
            self.errors.get() as f64,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_integers_convert_directly() {
        let value = coerce("Uptime", &Value::UnsignedInteger(3600), None).expect("coerce");
        assert_eq!(value, 3600.0);
    }

    #[test]
    fn booleans_map_to_one_and_zero() {
        assert_eq!(coerce("f", &Value::Boolean(true), None), Ok(1.0));
        assert_eq!(coerce("f", &Value::Boolean(false), None), Ok(0.0));
    }

    #[test]
    fn text_compares_against_ok_value() {
        let up = Value::Text("Up".to_string());
        let down = Value::Text("Down".to_string());
        assert_eq!(coerce("PhysicalLinkStatus", &up, Some("Up")), Ok(1.0));
        assert_eq!(coerce("PhysicalLinkStatus", &down, Some("Up")), Ok(0.0));
        assert_eq!(coerce("Comment", &Value::Text(String::new()), None), Ok(1.0));
    }

    #[test]
    fn unsupported_values_are_type_mismatches() {
        let value = Value::Unsupported {
            data_type: "i4".to_string(),
            raw: "-3".to_string(),
        };
        assert!(matches!(
            coerce("Offset", &value, None),
            Err(CollectError::TypeMismatch { .. })
        ));
    }
}
