//! Connection-manager directory.
//!
//! Holds the candidate server endpoints. Until [`Directory::initialize`]
//! succeeds (or the server pushes a list), selection draws from the
//! compiled-in [`FALLBACK_SERVERS`]; afterwards it draws from the dynamic
//! list only. The fallback is never removed, only shadowed.

use rand::seq::IndexedRandom;
use serde::Deserialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::config::DirectoryConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::proto::CMsgClientCmList;
use crate::utils::metrics::Timer;

/// Static servers grouped by region, used until a dynamic list is available.
pub const FALLBACK_SERVERS: &[(&str, &[&str])] = &[
    (
        "Qwest, Seattle",
        &[
            "72.165.61.174:27017",
            "72.165.61.174:27018",
            "72.165.61.175:27017",
            "72.165.61.175:27018",
            "72.165.61.185:27017",
            "72.165.61.185:27018",
            "72.165.61.187:27017",
            "72.165.61.187:27018",
            "72.165.61.188:27017",
            "72.165.61.188:27018",
        ],
    ),
    (
        "Inteliquent, Luxembourg",
        &[
            "146.66.152.12:27017",
            "146.66.152.12:27018",
            "146.66.152.12:27019",
            "146.66.152.13:27017",
            "146.66.152.13:27018",
            "146.66.152.13:27019",
            "146.66.152.14:27017",
            "146.66.152.14:27018",
            "146.66.152.14:27019",
            "146.66.152.15:27017",
            "146.66.152.15:27018",
            "146.66.152.15:27019",
        ],
    ),
    (
        "Level3, Netherlands",
        &[
            "81.171.115.5:27017",
            "81.171.115.5:27018",
            "81.171.115.5:27019",
            "81.171.115.6:27017",
            "81.171.115.6:27018",
            "81.171.115.6:27019",
            "81.171.115.7:27017",
            "81.171.115.7:27018",
            "81.171.115.7:27019",
            "81.171.115.8:27017",
            "81.171.115.8:27018",
            "81.171.115.8:27019",
        ],
    ),
    (
        "Highwinds, Kaysville",
        &[
            "209.197.29.196:27017",
            "209.197.29.197:27017",
        ],
    ),
    (
        "Starhub, Singapore",
        &[
            "103.28.54.10:27017",
            "103.28.54.11:27017",
        ],
    ),
];

/// A server address as `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Build from an IPv4 address packed big-endian into a `u32`.
    pub fn from_packed_ipv4(addr: u32, port: u16) -> Self {
        Self::new(Ipv4Addr::from(addr).to_string(), port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| ProtocolError::InvalidEndpoint(s.to_string()))?;
        if host.is_empty() {
            return Err(ProtocolError::InvalidEndpoint(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ProtocolError::InvalidEndpoint(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

/// Endpoints carried by a server-pushed CM list, in order.
///
/// Address and port lists are paired positionally; extra entries on either
/// side are ignored.
pub fn endpoints_from_cm_list(list: &CMsgClientCmList) -> Vec<Endpoint> {
    list.cm_addresses
        .iter()
        .zip(list.cm_ports.iter())
        .filter_map(|(&addr, &port)| {
            u16::try_from(port)
                .ok()
                .map(|port| Endpoint::from_packed_ipv4(addr, port))
        })
        .collect()
}

/// Every fallback endpoint, flattened in region order.
pub fn fallback_endpoints() -> Vec<Endpoint> {
    FALLBACK_SERVERS
        .iter()
        .flat_map(|(_, servers)| servers.iter())
        .filter_map(|s| s.parse().ok())
        .collect()
}

#[derive(Debug, Deserialize)]
struct DirectoryResponse {
    response: DirectoryBody,
}

#[derive(Debug, Deserialize)]
struct DirectoryBody {
    #[serde(default)]
    result: u32,
    #[serde(default)]
    message: String,
    #[serde(default, rename = "serverList", alias = "serverlist")]
    server_list: Vec<String>,
}

/// Candidate server list with a static fallback.
pub struct Directory {
    config: DirectoryConfig,
    http: reqwest::Client,
    servers: RwLock<Vec<Endpoint>>,
    initialized: AtomicBool,
    fallback: Vec<Endpoint>,
}

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("url", &self.config.url)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl Directory {
    pub fn new(config: DirectoryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProtocolError::DirectoryFetch(format!("HTTP client setup failed: {e}")))?;
        Ok(Self {
            config,
            http,
            servers: RwLock::new(Vec::new()),
            initialized: AtomicBool::new(false),
            fallback: fallback_endpoints(),
        })
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Fetch the dynamic server list, replacing any previous one.
    ///
    /// The write lock is held for the whole fetch, so concurrent selections
    /// wait rather than see a half-updated list. Not retried internally.
    ///
    /// # Errors
    /// `DirectoryFetch` on network failure, a non-success result code, or an
    /// empty list. The directory is left as it was.
    #[instrument(skip(self), fields(url = %self.config.url, cell_id = self.config.cell_id))]
    pub async fn initialize(&self) -> Result<()> {
        let _timer = Timer::start("directory_fetch");
        let mut servers = self.servers.write().await;
        let fetched = self.fetch().await?;
        info!(count = fetched.len(), "Directory initialized");
        *servers = fetched;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn fetch(&self) -> Result<Vec<Endpoint>> {
        let response = self
            .http
            .get(&self.config.url)
            .query(&[("cellId", self.config.cell_id)])
            .send()
            .await
            .map_err(|e| ProtocolError::DirectoryFetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProtocolError::DirectoryFetch(e.to_string()))?;

        let raw = response
            .bytes()
            .await
            .map_err(|e| ProtocolError::DirectoryFetch(e.to_string()))?;
        let body = serde_json::from_slice::<DirectoryResponse>(&raw)
            .map_err(|e| ProtocolError::DirectoryFetch(format!("bad directory body: {e}")))?
            .response;

        if body.result != 1 {
            return Err(ProtocolError::DirectoryFetch(format!(
                "result {}: {}",
                body.result, body.message
            )));
        }

        let endpoints: Vec<Endpoint> = body
            .server_list
            .iter()
            .filter_map(|entry| match entry.parse() {
                Ok(endpoint) => Some(endpoint),
                Err(_) => {
                    warn!(entry = %entry, "Skipping malformed directory entry");
                    None
                }
            })
            .collect();

        if endpoints.is_empty() {
            return Err(ProtocolError::DirectoryFetch(
                constants::ERR_DIRECTORY_EMPTY.into(),
            ));
        }
        Ok(endpoints)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Replace the dynamic list with servers pushed by a connection manager.
    /// An empty list is ignored.
    pub async fn replace(&self, endpoints: Vec<Endpoint>) {
        if endpoints.is_empty() {
            return;
        }
        let mut servers = self.servers.write().await;
        debug!(count = endpoints.len(), "Directory updated from server push");
        *servers = endpoints;
        self.initialized.store(true, Ordering::Release);
    }

    /// Pick a server uniformly at random.
    ///
    /// # Errors
    /// `DirectoryFetch` only if no candidates exist at all, which the
    /// non-empty fallback list rules out.
    pub async fn get_random(&self) -> Result<Endpoint> {
        let servers = self.servers.read().await;
        let pool = if self.is_initialized() && !servers.is_empty() {
            servers.as_slice()
        } else {
            self.fallback.as_slice()
        };
        let pick = pool.choose(&mut rand::rng()).cloned();
        pick.ok_or_else(|| ProtocolError::DirectoryFetch(constants::ERR_DIRECTORY_EMPTY.into()))
    }

    /// Snapshot of the dynamic list (empty if never initialized).
    pub async fn servers(&self) -> Vec<Endpoint> {
        self.servers.read().await.clone()
    }

    pub fn fallback(&self) -> &[Endpoint] {
        &self.fallback
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parsing() {
        let ep: Endpoint = "72.165.61.174:27017".parse().unwrap();
        assert_eq!(ep, Endpoint::new("72.165.61.174", 27017));
        assert_eq!(ep.to_string(), "72.165.61.174:27017");

        assert!("no-port".parse::<Endpoint>().is_err());
        assert!(":27017".parse::<Endpoint>().is_err());
        assert!("host:99999".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_fallback_is_complete() {
        let total: usize = FALLBACK_SERVERS.iter().map(|(_, s)| s.len()).sum();
        assert_eq!(fallback_endpoints().len(), total);
        assert!(total > 0);
    }

    #[test]
    fn test_cm_list_conversion() {
        let list = CMsgClientCmList {
            cm_addresses: vec![0x7F00_0001, 0xC0A8_0102, 0x0A00_0001],
            cm_ports: vec![27017, 27018],
            cm_websocket_addresses: vec![],
        };
        let endpoints = endpoints_from_cm_list(&list);
        assert_eq!(
            endpoints,
            vec![
                Endpoint::new("127.0.0.1", 27017),
                Endpoint::new("192.168.1.2", 27018)
            ]
        );
    }

    #[tokio::test]
    async fn test_selection_before_and_after_replace() {
        let directory = Directory::new(DirectoryConfig::default()).unwrap();
        assert!(!directory.is_initialized());
        for _ in 0..20 {
            let ep = directory.get_random().await.unwrap();
            assert!(directory.fallback().contains(&ep));
        }

        directory.replace(Vec::new()).await;
        assert!(!directory.is_initialized());

        let dynamic = vec![Endpoint::new("10.0.0.1", 1), Endpoint::new("10.0.0.2", 2)];
        directory.replace(dynamic.clone()).await;
        assert!(directory.is_initialized());
        for _ in 0..20 {
            assert!(dynamic.contains(&directory.get_random().await.unwrap()));
        }
        assert_eq!(directory.fallback().len(), fallback_endpoints().len());
    }
}
