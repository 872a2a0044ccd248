use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_UPNP_PORT: u16 = 49000;

/// Where home-automation data is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HomeSource {
    /// Structured device list, falling back to the overview page when the
    /// firmware does not offer it.
    Auto,
    Api,
    Scrape,
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub gateway: String,
    pub upnp_port: u16,
    pub request_timeout: Duration,
    pub service_retry_interval: Duration,
    pub session_validity: Duration,
    pub description_paths: Vec<String>,
    pub home_source: HomeSource,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            gateway: "fritz.box".to_string(),
            upnp_port: DEFAULT_UPNP_PORT,
            request_timeout: Duration::from_secs(5),
            service_retry_interval: Duration::from_secs(60),
            session_validity: Duration::from_secs(60 * 60),
            description_paths: vec!["/igddesc.xml".to_string(), "/tr64desc.xml".to_string()],
            home_source: HomeSource::Auto,
        }
    }
}

impl CollectorConfig {
    pub fn upnp_base_url(&self) -> String {
        format!("http://{}:{}", self.gateway, self.upnp_port)
    }

    pub fn web_base_url(&self) -> String {
        format!("http://{}", self.gateway)
    }

    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .user_agent(concat!("fritzbox-exporter/", env!("CARGO_PKG_VERSION")))
            .build()
    }
}
