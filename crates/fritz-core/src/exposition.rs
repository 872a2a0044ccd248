use std::collections::HashMap;

use prometheus::core::Collector;
use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tracing::warn;

use crate::sample::{MetricKind, MetricSample};

pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

enum Family {
    Gauge(GaugeVec),
    Counter(CounterVec),
}

impl Family {
    fn new(sample: &MetricSample) -> prometheus::Result<Self> {
        let desc = &sample.desc;
        let help = if desc.help.is_empty() { &desc.name } else { &desc.help };
        let opts = Opts::new(desc.name.clone(), help.clone());
        let labels: Vec<&str> = desc.label_names.iter().map(String::as_str).collect();

        Ok(match sample.kind {
            MetricKind::Gauge => Family::Gauge(GaugeVec::new(opts, &labels)?),
            MetricKind::Counter => Family::Counter(CounterVec::new(opts, &labels)?),
        })
    }

    fn collector(&self) -> Box<dyn Collector> {
        match self {
            Family::Gauge(vec) => Box::new(vec.clone()),
            Family::Counter(vec) => Box::new(vec.clone()),
        }
    }

    fn record(&self, sample: &MetricSample) -> prometheus::Result<()> {
        let values: Vec<&str> = sample.label_values.iter().map(String::as_str).collect();
        match (self, sample.kind) {
            (Family::Gauge(vec), MetricKind::Gauge) => {
                vec.get_metric_with_label_values(&values)?.set(sample.value);
            }
            (Family::Counter(vec), MetricKind::Counter) => {
                if !(sample.value >= 0.0) {
                    return Err(prometheus::Error::Msg(format!(
                        "counter cannot hold {}",
                        sample.value
                    )));
                }
                vec.get_metric_with_label_values(&values)?.inc_by(sample.value);
            }
            (_, kind) => {
                return Err(prometheus::Error::Msg(format!(
                    "family already registered with another type than {}",
                    kind.as_str()
                )));
            }
        }
        Ok(())
    }
}

/// Renders samples through a fresh registry. A sample that does not fit
/// its family is logged and left out.
pub fn encode(samples: &[MetricSample]) -> prometheus::Result<String> {
    let registry = Registry::new();
    let mut families: HashMap<&str, Option<Family>> = HashMap::new();

    for sample in samples {
        let family = families.entry(sample.name()).or_insert_with(|| {
            let family = Family::new(sample).and_then(|family| {
                registry.register(family.collector())?;
                Ok(family)
            });
            family
                .map_err(|err| warn!(metric = sample.name(), error = %err, "cannot expose metric"))
                .ok()
        });

        if let Some(family) = family {
            if let Err(err) = family.record(sample) {
                warn!(metric = sample.name(), labels = ?sample.label_values, error = %err, "dropping sample");
            }
        }
    }

    let mut buf = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buf)?;
    String::from_utf8(buf).map_err(|err| prometheus::Error::Msg(err.to_string()))
}
