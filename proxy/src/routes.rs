/// Locations served by the proxy. Each variant carries the part of the path
/// that is forwarded to the upstream.
#[derive(Debug, PartialEq, Eq)]
pub enum Route<'a> {
    /// `/service/<name>/<rest>`. The service name may span several segments,
    /// so the whole remainder is resolved.
    Service { path: &'a str },
    /// `/agent/<id>/<rest>`, also reachable as `/slave/<id>/<rest>`
    Agent { agent_id: &'a str, path: &'a str },
    /// `/system/v1/leader/marathon/<rest>`
    MarathonLeader { path: &'a str },
}

const SERVICE_PREFIX: &str = "/service/";
const AGENT_PREFIXES: &[&str] = &["/agent/", "/slave/"];
const MARATHON_LEADER_PREFIX: &str = "/system/v1/leader/marathon";

impl<'a> Route<'a> {
    pub fn from_path(path: &'a str) -> Option<Self> {
        if let Some(rest) = path.strip_prefix(SERVICE_PREFIX) {
            return Some(Route::Service { path: rest });
        }

        for prefix in AGENT_PREFIXES {
            if let Some(rest) = path.strip_prefix(prefix) {
                let (agent_id, path) = match rest.find('/') {
                    Some(idx) => rest.split_at(idx),
                    None => (rest, ""),
                };
                if agent_id.is_empty() {
                    return None;
                }
                return Some(Route::Agent { agent_id, path });
            }
        }

        if let Some(rest) = path.strip_prefix(MARATHON_LEADER_PREFIX)
            && (rest.is_empty() || rest.starts_with('/'))
        {
            return Some(Route::MarathonLeader { path: rest });
        }

        None
    }

    /// Tag used in request metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Service { .. } => "service",
            Route::Agent { .. } => "agent",
            Route::MarathonLeader { .. } => "marathon_leader",
        }
    }
}
