//! Candidate discovery and direct server probes
//!
//! Both are consumed as capabilities: [`Directory`] lists servers, [`Probe`]
//! asks one server for its live state. The HTTP adapters talk to the Steam Web
//! API server list and to a probe sidecar that speaks the query protocol.

use crate::error::{Error, Result};
use log::debug;
use serde::Deserialize;
use shared::{ProbeInfo, RawCandidate};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_QUERY_LIMIT: u32 = 20_000;
/// Dedicated secure servers, excluding gametypes quickplay never offers
pub const DEFAULT_QUERY_FILTER: &str = r"\appid\440\gamedir\tf\secure\1\dedicated\1\ngametype\hidden,friendlyfire,highlander,noquickplay,trade,dmgspread,mvm,pve,gravity\steamblocking\1\nor\1\white\1";

/// Source of candidate servers
pub trait Directory {
    fn fetch(&self) -> impl Future<Output = Result<Vec<RawCandidate>>> + Send;
}

/// Direct query of a single server
pub trait Probe {
    fn probe(&self, addr: SocketAddr) -> impl Future<Output = Result<ProbeInfo>> + Send;
}

#[derive(Deserialize)]
struct ServerListResponse {
    response: ServerList,
}

#[derive(Deserialize)]
struct ServerList {
    #[serde(default)]
    servers: Vec<RawCandidate>,
}

/// Parses a server list body; invalid UTF-8 in names is replaced, not fatal
pub fn parse_server_list(body: &[u8]) -> Result<Vec<RawCandidate>> {
    let text = String::from_utf8_lossy(body);
    let list: ServerListResponse = serde_json::from_str(&text)?;
    Ok(list.response.servers)
}

/// `IGameServersService/GetServerList`
pub struct SteamDirectory {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    filter: String,
    limit: u32,
}

impl SteamDirectory {
    pub fn new(client: reqwest::Client, api_url: &str, api_key: &str, filter: &str, limit: u32) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            filter: filter.to_string(),
            limit,
        }
    }
}

impl Directory for SteamDirectory {
    async fn fetch(&self) -> Result<Vec<RawCandidate>> {
        let url = format!("{}/IGameServersService/GetServerList/v1/", self.api_url);
        let limit = self.limit.to_string();
        let body = self
            .client
            .get(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("format", "json"),
                ("limit", limit.as_str()),
                ("filter", self.filter.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let servers = parse_server_list(&body)?;
        debug!("Directory returned {} servers", servers.len());
        Ok(servers)
    }
}

/// Probe sidecar client (`GET <base>/info?addr=ip:port`)
pub struct HttpProbe {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Probe for HttpProbe {
    async fn probe(&self, addr: SocketAddr) -> Result<ProbeInfo> {
        let addr = addr.to_string();
        let info = self
            .client
            .get(format!("{}/info", self.base_url))
            .query(&[("addr", addr.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(info)
    }
}

/// Probes with an upper bound on the wait
pub async fn probe_with_timeout<P: Probe>(probe: &P, addr: SocketAddr, limit: Duration) -> Result<ProbeInfo> {
    match tokio::time::timeout(limit, probe.probe(addr)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Probe(format!("{} did not answer within {:?}", addr, limit))),
    }
}
