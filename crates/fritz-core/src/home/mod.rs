// Home-automation metrics: thermostats and switchable sockets behind the
// gateway's session login.

mod auth;
mod devices;
mod scrape;


use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use prometheus::IntGauge;
use secrecy::SecretString;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::{CollectorConfig, HomeSource};
use crate::sample::{MetricDesc, MetricKind, MetricSample};

pub use auth::{compute_response, AuthError, Authenticator, Session, INVALID_SID};
pub use devices::{HomeData, SwitchRecord, ThermostatRecord};
pub use scrape::{parse_decimal, parse_thermostat_table, ParseError};

const DEVICE_LIST_PATH: &str = "/webservices/homeautoswitch.lua";
const OVERVIEW_PATH: &str = "/net/home_auto_hkr_overview.lua";

#[derive(Debug, Error)]
pub enum HomeError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("undecodable device list from {url}: {source}")]
    Malformed {
        url: String,
        #[source]
        source: quick_xml::DeError,
    },
    #[error("thermostat overview: {0}")]
    Scrape(#[from] ParseError),
    #[error("invalid gateway url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error(transparent)]
    Metrics(#[from] prometheus::Error),
}

struct HomeDescs {
    up: Arc<MetricDesc>,
    authenticated: Arc<MetricDesc>,
    current_temperature: Arc<MetricDesc>,
    target_temperature: Arc<MetricDesc>,
    switch_on: Arc<MetricDesc>,
    switch_power: Arc<MetricDesc>,
    switch_energy: Arc<MetricDesc>,
}

impl HomeDescs {
    fn new() -> Self {
        let module = &["host", "module"];
        Self {
            up: Arc::new(MetricDesc::new(
                "fritzbox_home_up",
                "Indicates if the last scrape to the FritzBox was successful.",
                &["host"],
            )),
            authenticated: Arc::new(MetricDesc::new(
                "fritzbox_home_authenticated",
                "Indicates if the authentication to the FritzBox is successful.",
                &["host"],
            )),
            current_temperature: Arc::new(MetricDesc::new(
                "fritzbox_home_current_temperature_celsius",
                "Current temperature measurement of home automation device in celsius.",
                module,
            )),
            target_temperature: Arc::new(MetricDesc::new(
                "fritzbox_home_target_temperature_celsius",
                "Target temperature setting of home automation device in celsius.",
                module,
            )),
            switch_on: Arc::new(MetricDesc::new(
                "fritzbox_home_switch_on",
                "Whether a switchable socket is turned on.",
                module,
            )),
            switch_power: Arc::new(MetricDesc::new(
                "fritzbox_home_switch_power_watts",
                "Current power draw of a switchable socket in watts.",
                module,
            )),
            switch_energy: Arc::new(MetricDesc::new(
                "fritzbox_home_switch_energy_watt_hours_total",
                "Energy consumed through a switchable socket in watt hours.",
                module,
            )),
        }
    }
}

pub struct HomeCollector {
    http: reqwest::Client,
    host: String,
    base_url: Url,
    source: HomeSource,
    auth: Authenticator,
    session: Mutex<Option<Session>>,
    // serializes logins between overlapping passes
    login_gate: tokio::sync::Mutex<()>,
    up: IntGauge,
    authenticated: IntGauge,
    descs: HomeDescs,
}

impl HomeCollector {
    pub fn new(
        http: reqwest::Client,
        config: &CollectorConfig,
        password: SecretString,
    ) -> Result<Self, HomeError> {
        let base_url = Url::parse(&config.web_base_url())?;
        Self::with_base_url(http, base_url, config, password)
    }

    pub fn with_base_url(
        http: reqwest::Client,
        base_url: Url,
        config: &CollectorConfig,
        password: SecretString,
    ) -> Result<Self, HomeError> {
        let auth = Authenticator::new(http.clone(), &base_url, password, config.session_validity)?;
        let descs = HomeDescs::new();
        let up = IntGauge::new(descs.up.name.clone(), descs.up.help.clone())?;
        let authenticated =
            IntGauge::new(descs.authenticated.name.clone(), descs.authenticated.help.clone())?;

        Ok(Self {
            http,
            host: config.gateway.clone(),
            base_url,
            source: config.home_source,
            auth,
            session: Mutex::new(None),
            login_gate: tokio::sync::Mutex::new(()),
            up,
            authenticated,
            descs,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub async fn session(&self) -> Result<Session, AuthError> {
        let _gate = self.login_gate.lock().await;
        let existing = self.session.lock().clone();

        match self.auth.ensure_session(existing.as_ref()).await {
            Ok(session) => {
                *self.session.lock() = Some(session.clone());
                Ok(session)
            }
            Err(err) => {
                self.session.lock().take();
                Err(err)
            }
        }
    }

    pub async fn fetch(&self) -> Result<HomeData, HomeError> {
        let session = self.session().await?;
        self.fetch_with(&session).await
    }

    /// Runs one pass. Authentication failure yields only the
    /// `authenticated` gauge; a failed data fetch adds `up` = 0.
    pub async fn collect(&self) -> Vec<MetricSample> {
        let host = vec![self.host.clone()];
        let mut samples = Vec::new();

        let session = match self.session().await {
            Ok(session) => session,
            Err(err) => {
                warn!(host = %self.host, error = %err, "home authentication failed");
                self.authenticated.set(0);
                samples.push(self.gauge(&self.descs.authenticated, host, &self.authenticated));
                return samples;
            }
        };
        self.authenticated.set(1);
        samples.push(self.gauge(&self.descs.authenticated, host.clone(), &self.authenticated));

        let data = match self.fetch_with(&session).await {
            Ok(data) => data,
            Err(err) => {
                warn!(host = %self.host, error = %err, "cannot read home data");
                self.up.set(0);
                samples.push(self.gauge(&self.descs.up, host, &self.up));
                return samples;
            }
        };
        self.up.set(1);
        samples.push(self.gauge(&self.descs.up, host, &self.up));
        samples.extend(self.record_samples(&data));
        samples
    }

    async fn fetch_with(&self, session: &Session) -> Result<HomeData, HomeError> {
        let result = match self.source {
            HomeSource::Api => self.fetch_device_list(session).await,
            HomeSource::Scrape => self.fetch_overview(session).await,
            HomeSource::Auto => match self.fetch_device_list(session).await {
                Err(HomeError::Status { status, .. }) => {
                    debug!(host = %self.host, status, "device list unavailable, scraping overview");
                    self.fetch_overview(session).await
                }
                other => other,
            },
        };

        if result.is_err() {
            // a rejected sid looks the same as any other failure here
            self.session.lock().take();
        }
        result
    }

    async fn fetch_device_list(&self, session: &Session) -> Result<HomeData, HomeError> {
        let mut url = self.base_url.join(DEVICE_LIST_PATH)?;
        url.query_pairs_mut()
            .append_pair("switchcmd", "getdevicelistinfos")
            .append_pair("sid", session.sid());

        let body = self.get(url).await?;
        devices::parse_device_list(&body).map_err(|source| HomeError::Malformed {
            url: DEVICE_LIST_PATH.to_string(),
            source,
        })
    }

    async fn fetch_overview(&self, session: &Session) -> Result<HomeData, HomeError> {
        let mut url = self.base_url.join(OVERVIEW_PATH)?;
        url.query_pairs_mut().append_pair("sid", session.sid());

        let body = self.get(url).await?;
        Ok(HomeData {
            thermostats: parse_thermostat_table(&body)?,
            switches: Vec::new(),
        })
    }

    // Errors carry only the path; the query holds the sid.
    async fn get(&self, url: Url) -> Result<String, HomeError> {
        let path = url.path().to_string();
        let transport = |source: reqwest::Error| HomeError::Transport {
            url: path.clone(),
            source: source.without_url(),
        };

        let resp = self.http.get(url).send().await.map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(HomeError::Status {
                url: path.clone(),
                status: status.as_u16(),
            });
        }
        resp.text().await.map_err(transport)
    }

    fn gauge(&self, desc: &Arc<MetricDesc>, labels: Vec<String>, gauge: &IntGauge) -> MetricSample {
        MetricSample::new(desc, MetricKind::Gauge, labels, gauge.get() as f64)
    }

    fn record_samples(&self, data: &HomeData) -> Vec<MetricSample> {
        let labels = |name: &str| vec![self.host.clone(), name.to_string()];
        let mut samples = Vec::new();
        // the module label is the device name, which the gateway does not keep unique
        let mut seen = HashSet::new();
        let mut first_use = |name: &str| {
            let fresh = seen.insert(name.to_string());
            if !fresh {
                warn!(host = %self.host, module = name, "duplicate device name, skipping");
            }
            fresh
        };

        for th in data.thermostats.iter().filter(|th| first_use(&th.name)) {
            let readings = [
                (&self.descs.current_temperature, th.current_temperature),
                (&self.descs.target_temperature, th.target_temperature),
            ];
            for (desc, value) in readings {
                if let Some(value) = value {
                    samples.push(MetricSample::new(desc, MetricKind::Gauge, labels(&th.name), value));
                }
            }
        }

        for sw in data.switches.iter().filter(|sw| first_use(&sw.name)) {
            let readings = [
                (&self.descs.switch_on, MetricKind::Gauge, sw.on.map(|on| if on { 1.0 } else { 0.0 })),
                (&self.descs.switch_power, MetricKind::Gauge, sw.power_watts),
                (&self.descs.switch_energy, MetricKind::Counter, sw.energy_watt_hours),
                (&self.descs.current_temperature, MetricKind::Gauge, sw.temperature),
            ];
            for (desc, kind, value) in readings {
                if let Some(value) = value {
                    samples.push(MetricSample::new(desc, kind, labels(&sw.name), value));
                }
            }
        }

        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> HomeCollector {
        let base = Url::parse("http://fritz.box").expect("base url");
        HomeCollector::with_base_url(
            reqwest::Client::new(),
            base,
            &CollectorConfig::default(),
            SecretString::from("secret".to_string()),
        )
        .expect("home collector")
    }

    fn thermostat(name: &str, current: Option<f64>) -> ThermostatRecord {
        ThermostatRecord {
            name: name.to_string(),
            current_temperature: current,
            target_temperature: Some(21.0),
        }
    }

    #[test]
    fn repeated_device_names_keep_only_the_first_device() {
        // Arrange
        let data = HomeData {
            thermostats: vec![thermostat("Bad", Some(20.5)), thermostat("Bad", Some(18.0))],
            switches: vec![SwitchRecord {
                name: "Bad".to_string(),
                on: Some(true),
                power_watts: Some(3.0),
                energy_watt_hours: Some(10.0),
                temperature: Some(19.0),
            }],
        };

        // Act
        let samples = collector().record_samples(&data);

        // Assert
        let keys: Vec<(&str, Vec<String>)> = samples
            .iter()
            .map(|s| (s.name(), s.label_values.clone()))
            .collect();
        let unique: HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len(), "duplicate series in {keys:?}");
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].name(), "fritzbox_home_current_temperature_celsius");
        assert_eq!(samples[0].value, 20.5);
    }

    #[test]
    fn missing_current_reading_still_reports_target() {
        let data = HomeData {
            thermostats: vec![thermostat("Gästezimmer", None)],
            switches: Vec::new(),
        };

        let samples = collector().record_samples(&data);

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].name(), "fritzbox_home_target_temperature_celsius");
        assert_eq!(samples[0].value, 21.0);
    }
}
