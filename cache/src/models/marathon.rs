use super::{Decode, http_url};
use crate::upstream::FetchError;
use serde::Deserialize;
use std::collections::HashMap;

const SERVICE_NAME_LABEL: &str = "DCOS_SERVICE_NAME";
const SERVICE_SCHEME_LABEL: &str = "DCOS_SERVICE_SCHEME";
const SERVICE_PORT_INDEX_LABEL: &str = "DCOS_SERVICE_PORT_INDEX";
const TASK_RUNNING: &str = "TASK_RUNNING";

/// Reasons an app is left out of the service table. The messages end up in
/// the log verbatim.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum AppError {
    #[error("Labels not found in app '{0}'")]
    NoLabels(String),
    #[error("Cannot find DCOS_SERVICE_SCHEME for app '{0}'")]
    NoScheme(String),
    #[error("Cannot find DCOS_SERVICE_PORT_INDEX for app '{0}'")]
    NoPortIndex(String),
    #[error("Cannot convert port to number for app '{0}'")]
    PortIndexNotNumber(String),
    #[error("No task in state TASK_RUNNING for app '{0}'")]
    NoRunningTask(String),
    #[error("Cannot find host or ip for app '{0}'")]
    NoHost(String),
    #[error(
        "Cannot find port in container portMappings at Marathon port index '{index}' for app '{app}'"
    )]
    NoPortMapping { index: usize, app: String },
    #[error("Cannot find port in task ports at Marathon port index '{index}' for app '{app}'")]
    NoTaskPort { index: usize, app: String },
    #[error("Cannot decode app: {0}")]
    Malformed(String),
}

#[derive(Deserialize)]
struct AppsResponse {
    #[serde(default)]
    apps: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct App {
    #[serde(default)]
    id: String,
    labels: Option<HashMap<String, String>>,
    #[serde(default)]
    networks: Vec<Network>,
    container: Option<Container>,
    #[serde(default)]
    tasks: Vec<Task>,
}

#[derive(Deserialize)]
struct Network {
    #[serde(default)]
    mode: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Container {
    #[serde(default)]
    port_mappings: Option<Vec<PortMapping>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortMapping {
    container_port: Option<Port>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Task {
    #[serde(default)]
    state: String,
    host: Option<String>,
    #[serde(default)]
    ip_addresses: Vec<IpAddress>,
    #[serde(default)]
    ports: Vec<Port>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpAddress {
    ip_address: Option<String>,
}

/// Marathon reports ports either as numbers or as numeric strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Port {
    Number(u64),
    Text(String),
}

impl Port {
    fn value(&self) -> Option<u16> {
        match self {
            Port::Number(n) => u16::try_from(*n).ok(),
            Port::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl App {
    /// `Ok(None)` for apps that do not expose a DC/OS service.
    fn service_endpoint(&self) -> Result<Option<(String, String)>, AppError> {
        let labels = self
            .labels
            .as_ref()
            .ok_or_else(|| AppError::NoLabels(self.id.clone()))?;

        let Some(name) = labels.get(SERVICE_NAME_LABEL) else {
            return Ok(None);
        };

        let scheme = labels
            .get(SERVICE_SCHEME_LABEL)
            .ok_or_else(|| AppError::NoScheme(self.id.clone()))?;

        let index: usize = labels
            .get(SERVICE_PORT_INDEX_LABEL)
            .ok_or_else(|| AppError::NoPortIndex(self.id.clone()))?
            .trim()
            .parse()
            .map_err(|_| AppError::PortIndexNotNumber(self.id.clone()))?;

        let task = self
            .tasks
            .iter()
            .find(|t| t.state == TASK_RUNNING)
            .ok_or_else(|| AppError::NoRunningTask(self.id.clone()))?;

        let container_mode = self
            .networks
            .first()
            .is_some_and(|network| network.mode == "container");

        let host = if container_mode {
            task.ip_addresses
                .first()
                .and_then(|address| address.ip_address.as_deref())
        } else {
            task.host.as_deref()
        }
        .filter(|host| !host.is_empty())
        .ok_or_else(|| AppError::NoHost(self.id.clone()))?;

        let port = if container_mode {
            self.container_port(task, index)?
        } else {
            self.task_port(task, index)?
        };

        Ok(Some((name.clone(), format!("{scheme}://{host}:{port}"))))
    }

    fn container_port(&self, task: &Task, index: usize) -> Result<u16, AppError> {
        let mapping = self
            .container
            .as_ref()
            .and_then(|c| c.port_mappings.as_ref())
            .and_then(|mappings| mappings.get(index))
            .ok_or_else(|| AppError::NoPortMapping {
                index,
                app: self.id.clone(),
            })?;

        // Port 0 means Marathon picked the port, which is then in the task ports.
        match mapping.container_port.as_ref().and_then(Port::value) {
            Some(port) if port != 0 => Ok(port),
            _ => self.task_port(task, index),
        }
    }

    fn task_port(&self, task: &Task, index: usize) -> Result<u16, AppError> {
        task.ports
            .get(index)
            .and_then(Port::value)
            .ok_or_else(|| AppError::NoTaskPort {
                index,
                app: self.id.clone(),
            })
    }
}

/// Service name to upstream URL table built from the Marathon apps that
/// carry the `DCOS_SERVICE_*` labels.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceApps {
    services: HashMap<String, String>,
}

impl ServiceApps {
    pub fn get(&self, service_name: &str) -> Option<&str> {
        self.services.get(service_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl Decode for ServiceApps {
    fn decode(body: &[u8]) -> Result<Self, FetchError> {
        let response: AppsResponse = serde_json::from_slice(body)
            .map_err(|e| FetchError::Decode(format!("Cannot decode Marathon apps JSON: {e}")))?;

        let mut services = HashMap::new();
        for value in response.apps {
            let endpoint = serde_json::from_value::<App>(value)
                .map_err(|e| AppError::Malformed(e.to_string()))
                .and_then(|app| app.service_endpoint());

            match endpoint {
                Ok(Some((name, url))) => {
                    if let Some(previous) = services.get(&name) {
                        tracing::debug!(service = %name, %previous, "Duplicate service name, keeping first");
                    } else {
                        services.insert(name, url);
                    }
                }
                Ok(None) => {}
                Err(err) => tracing::warn!("{err}"),
            }
        }

        Ok(ServiceApps { services })
    }
}

/// Reply of Marathon `/v2/leader`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MarathonLeader {
    pub leader: String,
}

impl MarathonLeader {
    pub fn upstream_url(&self) -> String {
        format!("http://{}", self.leader)
    }
}

impl Decode for MarathonLeader {
    fn decode(body: &[u8]) -> Result<Self, FetchError> {
        let leader: MarathonLeader = serde_json::from_slice(body)
            .map_err(|e| FetchError::Decode(format!("Cannot decode marathon leader JSON: {e}")))?;

        match leader.leader.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(leader),
            _ => Err(FetchError::Decode(format!(
                "Cannot decode marathon leader JSON: invalid leader address {:?}",
                leader.leader
            ))),
        }
    }
}

/// Build a host-mode app the way Marathon reports it.
#[cfg(test)]
pub(crate) fn app_json(id: &str, service_name: &str, host: &str, port: u16) -> serde_json::Value {
    serde_json::json!({
        "id": format!("/{id}"),
        "labels": {
            "DCOS_SERVICE_NAME": service_name,
            "DCOS_SERVICE_SCHEME": "http",
            "DCOS_SERVICE_PORT_INDEX": "0",
            "DCOS_PACKAGE_NAME": "nginx"
        },
        "container": {
            "type": "DOCKER",
            "portMappings": [
                {"containerPort": 80, "hostPort": 0},
                {"containerPort": 443, "hostPort": 0}
            ]
        },
        "ports": [port],
        "tasks": [{
            "id": format!("{id}.333d80f4"),
            "state": "TASK_RUNNING",
            "host": host,
            "ipAddresses": [{"ipAddress": host, "protocol": "IPv4"}],
            "ports": [port]
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_one(app: serde_json::Value) -> ServiceApps {
        let body = json!({ "apps": [app] }).to_string();
        ServiceApps::decode(body.as_bytes()).unwrap()
    }

    fn endpoint(app: serde_json::Value) -> Result<Option<(String, String)>, AppError> {
        serde_json::from_value::<App>(app).unwrap().service_endpoint()
    }

    fn app() -> serde_json::Value {
        app_json("scheduler-alwaysthere", "scheduler-alwaysthere", "127.0.0.1", 16000)
    }

    #[test]
    fn test_host_networking() {
        let apps = decode_one(app());
        assert_eq!(apps.len(), 1);
        assert_eq!(
            apps.get("scheduler-alwaysthere"),
            Some("http://127.0.0.1:16000")
        );
    }

    #[test]
    fn test_bridge_networking_uses_task_port() {
        let mut app = app();
        app["networks"] = json!([{"mode": "container/bridge"}]);
        app["container"]["portMappings"] = json!([{"containerPort": "80", "hostPort": 16000}]);

        assert_eq!(
            decode_one(app).get("scheduler-alwaysthere"),
            Some("http://127.0.0.1:16000")
        );
    }

    #[test]
    fn test_container_networking() {
        let mut app = app();
        app["networks"] = json!([{"mode": "container", "name": "samplenet"}]);
        app["container"]["portMappings"] = json!([{"containerPort": 80}]);
        app["tasks"][0]["ipAddresses"][0]["ipAddress"] = json!("127.0.0.2");

        assert_eq!(
            decode_one(app.clone()).get("scheduler-alwaysthere"),
            Some("http://127.0.0.2:80")
        );

        // Random container port falls back to the task port, given as a string.
        app["container"]["portMappings"] = json!([{"containerPort": 0}]);
        app["tasks"][0]["ports"] = json!(["16000"]);
        assert_eq!(
            decode_one(app).get("scheduler-alwaysthere"),
            Some("http://127.0.0.2:16000")
        );
    }

    #[test]
    fn test_https_scheme() {
        let mut app = app();
        app["labels"]["DCOS_SERVICE_SCHEME"] = json!("https");
        assert_eq!(
            decode_one(app).get("scheduler-alwaysthere"),
            Some("https://127.0.0.1:16000")
        );
    }

    #[test]
    fn test_invalid_apps() {
        let id = "/scheduler-alwaysthere".to_string();

        let mut no_labels = app();
        no_labels.as_object_mut().unwrap().remove("labels");
        assert_eq!(endpoint(no_labels), Err(AppError::NoLabels(id.clone())));

        let mut no_name = app();
        no_name["labels"]
            .as_object_mut()
            .unwrap()
            .remove("DCOS_SERVICE_NAME");
        assert_eq!(endpoint(no_name), Ok(None));

        let mut no_scheme = app();
        no_scheme["labels"]
            .as_object_mut()
            .unwrap()
            .remove("DCOS_SERVICE_SCHEME");
        assert_eq!(endpoint(no_scheme), Err(AppError::NoScheme(id.clone())));

        let mut no_index = app();
        no_index["labels"]
            .as_object_mut()
            .unwrap()
            .remove("DCOS_SERVICE_PORT_INDEX");
        assert_eq!(endpoint(no_index), Err(AppError::NoPortIndex(id.clone())));

        let mut nan_index = app();
        nan_index["labels"]["DCOS_SERVICE_PORT_INDEX"] = json!("not a number");
        assert_eq!(
            endpoint(nan_index),
            Err(AppError::PortIndexNotNumber(id.clone()))
        );

        let mut no_tasks = app();
        no_tasks["tasks"] = json!([]);
        assert_eq!(endpoint(no_tasks), Err(AppError::NoRunningTask(id.clone())));

        let mut failed_task = app();
        failed_task["tasks"] = json!([{"state": "TASK_FAILED"}]);
        assert_eq!(
            endpoint(failed_task),
            Err(AppError::NoRunningTask(id.clone()))
        );

        let mut no_host = app();
        no_host["tasks"][0].as_object_mut().unwrap().remove("host");
        assert_eq!(endpoint(no_host), Err(AppError::NoHost(id.clone())));
    }

    #[test]
    fn test_invalid_port_indexes() {
        let id = "/scheduler-alwaysthere".to_string();

        let mut host_mode = app();
        host_mode["labels"]["DCOS_SERVICE_PORT_INDEX"] = json!("1");
        let err = endpoint(host_mode).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot find port in task ports at Marathon port index '1' for app '/scheduler-alwaysthere'"
        );

        let mut missing_mapping = app();
        missing_mapping["labels"]["DCOS_SERVICE_PORT_INDEX"] = json!("1");
        missing_mapping["networks"] = json!([{"mode": "container", "name": "samplenet"}]);
        missing_mapping["container"]["portMappings"] =
            json!([{"containerPort": 16000, "hostPort": 16000}]);
        assert_eq!(
            endpoint(missing_mapping),
            Err(AppError::NoPortMapping {
                index: 1,
                app: id.clone()
            })
        );

        let mut missing_task_port = app();
        missing_task_port["labels"]["DCOS_SERVICE_PORT_INDEX"] = json!("1");
        missing_task_port["networks"] = json!([{"mode": "container", "name": "samplenet"}]);
        missing_task_port["container"]["portMappings"] =
            json!([{"containerPort": 7777, "hostPort": 16000}, {"containerPort": 0}]);
        assert_eq!(
            endpoint(missing_task_port),
            Err(AppError::NoTaskPort { index: 1, app: id })
        );
    }

    #[test]
    fn test_bad_app_does_not_drop_others() {
        let mut broken = app_json("broken", "broken", "127.0.0.1", 16001);
        broken["tasks"] = json!([]);
        let body = json!({ "apps": [broken, app()] }).to_string();

        let apps = ServiceApps::decode(body.as_bytes()).unwrap();
        assert_eq!(apps.len(), 1);
        assert!(apps.get("broken").is_none());
    }

    #[test]
    fn test_apps_decode_error() {
        let err = ServiceApps::decode(b"wrong response").unwrap_err();
        assert!(
            err.to_string()
                .starts_with("Cannot decode Marathon apps JSON: ")
        );
    }

    #[test]
    fn test_leader() {
        let leader = MarathonLeader::decode(br#"{"leader": "127.0.0.2:80"}"#).unwrap();
        assert_eq!(leader.upstream_url(), "http://127.0.0.2:80");

        let err = MarathonLeader::decode(b"blah blah buh buh").unwrap_err();
        assert!(
            err.to_string()
                .starts_with("Cannot decode marathon leader JSON")
        );

        assert!(MarathonLeader::decode(br#"{"leader": "nope"}"#).is_err());
    }
}
