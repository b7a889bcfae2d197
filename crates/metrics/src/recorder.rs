//! Metrics recorder initialization and configuration.

use tracing::info;

use crate::error::{Error, Result};

/// Handle to the metrics system, providing access to exported metrics.
#[derive(Clone)]
pub struct MetricsHandle {
    #[cfg(feature = "prometheus")]
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl MetricsHandle {
    /// Render metrics in Prometheus text format.
    ///
    /// Empty when collection is disabled or the `prometheus` feature is off.
    #[must_use]
    pub fn render(&self) -> String {
        #[cfg(feature = "prometheus")]
        {
            self.prometheus_handle
                .as_ref()
                .map(metrics_exporter_prometheus::PrometheusHandle::render)
                .unwrap_or_default()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            String::new()
        }
    }
}

/// Configuration for the metrics system.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorderConfig {
    /// Whether metrics collection is enabled
    pub enabled: bool,
    /// Global labels to add to all metrics
    pub global_labels: Vec<(String, String)>,
}

/// Initialize the metrics system.
///
/// Call once at startup. Without the `prometheus` feature, or with collection
/// disabled, no recorder is installed and the facade macros are no-ops.
///
/// # Errors
///
/// Returns an error for an empty global label key, or when the Prometheus
/// recorder cannot be installed.
pub fn init_metrics(config: MetricsRecorderConfig) -> Result<MetricsHandle> {
    if let Some((_, value)) = config.global_labels.iter().find(|(k, _)| k.is_empty()) {
        return Err(Error::Config {
            message: format!("global label with value \"{value}\" has an empty key"),
        });
    }

    if !config.enabled {
        info!("metrics collection is disabled");
        return Ok(MetricsHandle {
            #[cfg(feature = "prometheus")]
            prometheus_handle: None,
        });
    }

    #[cfg(feature = "prometheus")]
    {
        let handle = init_prometheus(config)?;
        info!("Prometheus metrics recorder installed");
        Ok(MetricsHandle {
            prometheus_handle: Some(handle),
        })
    }

    #[cfg(not(feature = "prometheus"))]
    {
        info!("metrics feature not enabled at compile time");
        Ok(MetricsHandle {})
    }
}

#[cfg(feature = "prometheus")]
fn init_prometheus(
    config: MetricsRecorderConfig,
) -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    use {
        crate::{buckets, scheduler},
        metrics_exporter_prometheus::{Matcher, PrometheusBuilder},
    };

    let mut builder = PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full(scheduler::GENERATION_DURATION_SECONDS.to_string()),
        &buckets::GENERATION_DURATION,
    )?;

    for (key, value) in config.global_labels {
        builder = builder.add_global_label(key, value);
    }

    Ok(builder.install_recorder()?)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_disabled_renders_nothing() {
        let handle = init_metrics(MetricsRecorderConfig::default()).unwrap();
        assert!(handle.render().is_empty());
    }

    #[test]
    fn test_empty_label_key_rejected() {
        let config = MetricsRecorderConfig {
            enabled: false,
            global_labels: vec![(String::new(), "eu".into())],
        };
        assert!(matches!(init_metrics(config), Err(Error::Config { .. })));
    }
}
