//! Outbound network path used by an account

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Network profile: direct connection or a specific HTTP proxy
///
/// Accepted proxy formats are `host:port` and `host:port:user:pass`.
/// Wallet queues are partitioned by profile so one wallet used through two
/// proxies gets two chain connections, but the same profile is never
/// connected twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NetworkProfile {
    #[default]
    Direct,
    Proxy {
        host: String,
        port: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(skip)]
        password: Option<String>,
    },
}

impl NetworkProfile {
    /// Build the profile from an optional proxy string
    pub fn from_proxy(proxy: Option<&str>) -> Result<Self, String> {
        match proxy.map(str::trim) {
            None | Some("") => Ok(NetworkProfile::Direct),
            Some(value) => value.parse(),
        }
    }

    /// Proxy URL for HTTP clients, `None` for direct connections
    pub fn proxy_url(&self) -> Option<String> {
        match self {
            NetworkProfile::Direct => None,
            NetworkProfile::Proxy {
                host,
                port,
                username: Some(user),
                password: Some(pass),
            } => Some(format!("http://{}:{}@{}:{}", user, pass, host, port)),
            NetworkProfile::Proxy { host, port, .. } => Some(format!("http://{}:{}", host, port)),
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, NetworkProfile::Direct)
    }
}

impl FromStr for NetworkProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let (host, port, username, password) = match parts.as_slice() {
            [host, port] => (*host, *port, None, None),
            [host, port, user, pass] => (*host, *port, Some(*user), Some(*pass)),
            _ => {
                return Err(format!(
                    "invalid proxy '{}': expected host:port or host:port:user:pass",
                    s
                ))
            }
        };

        if host.is_empty() {
            return Err(format!("invalid proxy '{}': empty host", s));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| format!("invalid proxy '{}': bad port '{}'", s, port))?;
        if port == 0 {
            return Err(format!("invalid proxy '{}': port must be non-zero", s));
        }
        if matches!(username, Some("")) || matches!(password, Some("")) {
            return Err(format!("invalid proxy '{}': empty credentials", s));
        }

        Ok(NetworkProfile::Proxy {
            host: host.to_string(),
            port,
            username: username.map(str::to_string),
            password: password.map(str::to_string),
        })
    }
}

impl fmt::Display for NetworkProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkProfile::Direct => write!(f, "direct"),
            NetworkProfile::Proxy { host, port, .. } => write!(f, "proxy {}:{}", host, port),
        }
    }
}
