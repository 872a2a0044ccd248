// Service directory of a gateway, built once by a DirectoryLoader and never
// mutated after publishing. UpnpClient loads it and invokes actions over SOAP.

mod client;
mod soap;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use client::UpnpClient;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    UnsignedInteger(u64),
    Boolean(bool),
    Text(String),
    /// Data types the exporter does not interpret (`i4`, `dateTime`, `uuid`, ...).
    Unsupported { data_type: String, raw: String },
}

impl Value {
    /// Converts the raw text of an out argument according to the data type
    /// of its related state variable.
    pub fn from_soap(data_type: &str, raw: &str) -> Self {
        let unsupported = || Value::Unsupported {
            data_type: data_type.to_string(),
            raw: raw.to_string(),
        };

        match data_type {
            "ui1" | "ui2" | "ui4" | "ui8" => raw
                .trim()
                .parse::<u64>()
                .map(Value::UnsignedInteger)
                .unwrap_or_else(|_| unsupported()),
            "boolean" => match raw.trim() {
                "1" | "true" | "yes" => Value::Boolean(true),
                "0" | "false" | "no" => Value::Boolean(false),
                _ => unsupported(),
            },
            "string" => Value::Text(raw.to_string()),
            _ => unsupported(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::UnsignedInteger(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
            Value::Unsupported { data_type, raw } => write!(f, "{raw} ({data_type})"),
        }
    }
}

// keyed by related state variable name
pub type ActionResult = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone)]
pub struct Argument {
    pub name: String,
    pub direction: Direction,
    pub state_variable: String,
    pub data_type: String,
}

#[derive(Debug, Clone)]
pub struct Action {
    pub name: String,
    pub arguments: Vec<Argument>,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
        }
    }

    pub fn with_out(mut self, name: &str, state_variable: &str, data_type: &str) -> Self {
        self.arguments.push(Argument {
            name: name.to_string(),
            direction: Direction::Out,
            state_variable: state_variable.to_string(),
            data_type: data_type.to_string(),
        });
        self
    }

    pub fn is_get_only(&self) -> bool {
        self.arguments.iter().all(|arg| arg.direction == Direction::Out)
    }

    pub fn out_arguments(&self) -> impl Iterator<Item = &Argument> {
        self.arguments
            .iter()
            .filter(|arg| arg.direction == Direction::Out)
    }
}

#[derive(Debug, Clone)]
pub struct Service {
    pub service_type: String,
    pub service_id: String,
    pub device_name: String,
    pub control_url: String,
    pub actions: BTreeMap<String, Action>,
}

impl Service {
    pub fn new(service_type: impl Into<String>, control_url: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            service_id: String::new(),
            device_name: String::new(),
            control_url: control_url.into(),
            actions: BTreeMap::new(),
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.insert(action.name.clone(), action);
        self
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceDirectory {
    services: BTreeMap<String, Service>,
}

impl ServiceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service unless one with the same type is already present.
    /// The first description document to advertise a type wins.
    pub fn insert(&mut self, service: Service) -> bool {
        if self.services.contains_key(&service.service_type) {
            return false;
        }
        self.services.insert(service.service_type.clone(), service);
        true
    }

    pub fn service(&self, service_type: &str) -> Option<&Service> {
        self.services.get(service_type)
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl FromIterator<Service> for ServiceDirectory {
    fn from_iter<T: IntoIterator<Item = Service>>(iter: T) -> Self {
        let mut directory = Self::new();
        for service in iter {
            directory.insert(service);
        }
        directory
    }
}

#[derive(Debug, Error)]
pub enum UpnpError {
    #[error("invalid url {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("malformed document from {url}: {message}")]
    Malformed { url: String, message: String },
    #[error("no services described by {paths}")]
    NoServices { paths: String },
    #[error("{service}#{action} failed with fault {code}: {description}")]
    Fault {
        service: String,
        action: String,
        code: String,
        description: String,
    },
}

#[async_trait]
pub trait DirectoryLoader: Send + Sync {
    async fn load_directory(&self) -> Result<ServiceDirectory, UpnpError>;
}

#[async_trait]
pub trait ActionInvoker: Send + Sync {
    async fn call(&self, service: &Service, action: &Action) -> Result<ActionResult, UpnpError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soap_values_follow_state_variable_type() {
        assert_eq!(Value::from_soap("ui4", "1234"), Value::UnsignedInteger(1234));
        assert_eq!(Value::from_soap("boolean", "1"), Value::Boolean(true));
        assert_eq!(Value::from_soap("boolean", "0"), Value::Boolean(false));
        assert_eq!(Value::from_soap("string", "Up"), Value::Text("Up".to_string()));
    }

    #[test]
    fn unparseable_or_unknown_types_are_unsupported() {
        assert!(matches!(
            Value::from_soap("ui4", "-1"),
            Value::Unsupported { .. }
        ));
        assert!(matches!(
            Value::from_soap("i4", "42"),
            Value::Unsupported { ref data_type, .. } if data_type == "i4"
        ));
    }

    #[test]
    fn first_service_type_wins() {
        let mut directory = ServiceDirectory::new();
        assert!(directory.insert(Service::new("urn:a", "/first")));
        assert!(!directory.insert(Service::new("urn:a", "/second")));

        let service = directory.service("urn:a").expect("service");
        assert_eq!(service.control_url, "/first");
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn get_only_actions_have_no_inputs() {
        let mut action = Action::new("GetInfo").with_out("NewUptime", "Uptime", "ui4");
        assert!(action.is_get_only());

        action.arguments.push(Argument {
            name: "NewIndex".to_string(),
            direction: Direction::In,
            state_variable: "Index".to_string(),
            data_type: "ui2".to_string(),
        });
        assert!(!action.is_get_only());
        assert_eq!(action.out_arguments().count(), 1);
    }
}
