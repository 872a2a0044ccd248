// UPnP HTTP client
//
// Loads the gateway's device description documents, resolves every
// service's SCPD and invokes actions through SOAP. Description documents
// are decoded with serde; SOAP bodies are read event by event since the
// response element name depends on the action.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::soap;
use super::{
    Action, ActionInvoker, ActionResult, Argument, Direction, DirectoryLoader, Service,
    ServiceDirectory, UpnpError, Value,
};
use crate::config::CollectorConfig;

#[derive(Debug, Deserialize)]
struct RootDescription {
    device: DeviceDescription,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceDescription {
    #[serde(default)]
    friendly_name: String,
    #[serde(default)]
    service_list: Option<ServiceList>,
    #[serde(default)]
    device_list: Option<DeviceList>,
}

#[derive(Debug, Deserialize)]
struct ServiceList {
    #[serde(rename = "service", default)]
    services: Vec<ServiceDescription>,
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    #[serde(rename = "device", default)]
    devices: Vec<DeviceDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceDescription {
    service_type: String,
    #[serde(default)]
    service_id: String,
    #[serde(rename = "controlURL")]
    control_url: String,
    #[serde(rename = "SCPDURL")]
    scpd_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Scpd {
    #[serde(default)]
    action_list: Option<ActionList>,
    #[serde(default)]
    service_state_table: Option<StateTable>,
}

#[derive(Debug, Deserialize)]
struct ActionList {
    #[serde(rename = "action", default)]
    actions: Vec<ActionDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionDescription {
    name: String,
    #[serde(default)]
    argument_list: Option<ArgumentList>,
}

#[derive(Debug, Deserialize)]
struct ArgumentList {
    #[serde(rename = "argument", default)]
    arguments: Vec<ArgumentDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArgumentDescription {
    name: String,
    direction: String,
    related_state_variable: String,
}

#[derive(Debug, Deserialize)]
struct StateTable {
    #[serde(rename = "stateVariable", default)]
    variables: Vec<StateVariable>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateVariable {
    name: String,
    data_type: String,
}

pub struct UpnpClient {
    http: reqwest::Client,
    base_url: Url,
    description_paths: Vec<String>,
}

impl UpnpClient {
    pub fn new(http: reqwest::Client, base_url: Url, description_paths: Vec<String>) -> Self {
        Self {
            http,
            base_url,
            description_paths,
        }
    }

    pub fn from_config(config: &CollectorConfig) -> Result<Self, UpnpError> {
        let base_url = Url::parse(&config.upnp_base_url())?;
        let http = config.http_client().map_err(|source| UpnpError::Transport {
            url: base_url.to_string(),
            source,
        })?;
        Ok(Self::new(http, base_url, config.description_paths.clone()))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn fetch(&self, path: &str) -> Result<String, UpnpError> {
        let url = self.base_url.join(path)?;
        debug!(%url, "GET");

        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|source| UpnpError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(UpnpError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        resp.text().await.map_err(|source| UpnpError::Transport {
            url: url.to_string(),
            source,
        })
    }

    async fn fetch_xml<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, UpnpError> {
        let body = self.fetch(path).await?;
        quick_xml::de::from_str(&body).map_err(|err| UpnpError::Malformed {
            url: path.to_string(),
            message: err.to_string(),
        })
    }

    // A document loads whole or not at all; services already known are skipped.
    async fn load_description(
        &self,
        path: &str,
        known: &ServiceDirectory,
    ) -> Result<Vec<Service>, UpnpError> {
        let root: RootDescription = self.fetch_xml(path).await?;
        let mut loaded: Vec<Service> = Vec::new();

        let mut pending = vec![root.device];
        while let Some(device) = pending.pop() {
            if let Some(list) = device.device_list {
                pending.extend(list.devices);
            }

            let services = device.service_list.map(|l| l.services).unwrap_or_default();
            for desc in services {
                let seen = known.service(&desc.service_type).is_some()
                    || loaded.iter().any(|s| s.service_type == desc.service_type);
                if seen {
                    continue;
                }
                let scpd: Scpd = self.fetch_xml(&desc.scpd_url).await?;
                let service = build_service(&device.friendly_name, desc, scpd);
                debug!(
                    service = %service.service_type,
                    actions = service.actions.len(),
                    "loaded service"
                );
                loaded.push(service);
            }
        }

        Ok(loaded)
    }
}

fn build_service(device_name: &str, desc: ServiceDescription, scpd: Scpd) -> Service {
    let data_types: HashMap<String, String> = scpd
        .service_state_table
        .map(|table| table.variables)
        .unwrap_or_default()
        .into_iter()
        .map(|var| (var.name, var.data_type))
        .collect();

    let mut service = Service::new(desc.service_type, desc.control_url);
    service.service_id = desc.service_id;
    service.device_name = device_name.to_string();

    let actions = scpd.action_list.map(|l| l.actions).unwrap_or_default();
    for action_desc in actions {
        let arguments = action_desc
            .argument_list
            .map(|l| l.arguments)
            .unwrap_or_default()
            .into_iter()
            .map(|arg| {
                let data_type = data_types
                    .get(&arg.related_state_variable)
                    .cloned()
                    .unwrap_or_default();
                if data_type.is_empty() {
                    warn!(
                        action = %action_desc.name,
                        variable = %arg.related_state_variable,
                        "argument refers to unknown state variable"
                    );
                }
                Argument {
                    name: arg.name,
                    direction: if arg.direction.eq_ignore_ascii_case("in") {
                        Direction::In
                    } else {
                        Direction::Out
                    },
                    state_variable: arg.related_state_variable,
                    data_type,
                }
            })
            .collect();

        service = service.with_action(Action {
            name: action_desc.name,
            arguments,
        });
    }

    service
}

#[async_trait]
impl DirectoryLoader for UpnpClient {
    async fn load_directory(&self) -> Result<ServiceDirectory, UpnpError> {
        let mut directory = ServiceDirectory::new();
        let mut last_error = None;

        for path in &self.description_paths {
            match self.load_description(path, &directory).await {
                Ok(services) => {
                    for service in services {
                        directory.insert(service);
                    }
                }
                Err(err) => {
                    warn!(path = %path, error = %err, "skipping description");
                    last_error = Some(err);
                }
            }
        }

        if directory.is_empty() {
            return Err(last_error.unwrap_or_else(|| UpnpError::NoServices {
                paths: self.description_paths.join(", "),
            }));
        }
        Ok(directory)
    }
}

#[async_trait]
impl ActionInvoker for UpnpClient {
    async fn call(&self, service: &Service, action: &Action) -> Result<ActionResult, UpnpError> {
        let url = self.base_url.join(&service.control_url)?;
        debug!(%url, service = %service.service_type, action = %action.name, "SOAP call");

        let resp = self
            .http
            .post(url.clone())
            .header(CONTENT_TYPE, r#"text/xml; charset="utf-8""#)
            .header(
                "SOAPAction",
                soap::soap_action_header(&service.service_type, &action.name),
            )
            .body(soap::envelope(&service.service_type, &action.name))
            .send()
            .await
            .map_err(|source| UpnpError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|source| UpnpError::Transport {
            url: url.to_string(),
            source,
        })?;

        if !status.is_success() {
            if let Some((code, description)) = soap::parse_fault(&body) {
                return Err(UpnpError::Fault {
                    service: service.service_type.clone(),
                    action: action.name.clone(),
                    code,
                    description,
                });
            }
            return Err(UpnpError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let raw = soap::parse_response(&body).map_err(|message| UpnpError::Malformed {
            url: url.to_string(),
            message,
        })?;

        let mut result = ActionResult::new();
        for arg in action.out_arguments() {
            if let Some(text) = raw.get(&arg.name) {
                result.insert(
                    arg.state_variable.clone(),
                    Value::from_soap(&arg.data_type, text),
                );
            }
        }

        Ok(result)
    }
}
