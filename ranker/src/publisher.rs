//! Ranking, snapshot artifact and downstream notification

use crate::classifier::Rejection;
use crate::error::{Error, Result};
use log::{debug, error, info};
use serde::Serialize;
use shared::{PublishedServer, QuickplayUpdate, SchemaTables, SchemaUpdate, ScoredServer};
use std::future::Future;
use std::path::PathBuf;

/// Downstream consumer of rankings and schema tables
pub trait Notifier {
    fn publish_servers(&self, update: &QuickplayUpdate) -> impl Future<Output = Result<()>> + Send;

    fn publish_schema(&self, update: &SchemaUpdate) -> impl Future<Output = Result<()>> + Send;
}

/// Quickplay API client
pub struct ComfigApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ComfigApi {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<()> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::Api(format!("{} returned {}: {}", path, status, text)));
        }
        debug!("{} -> {}", path, text);
        Ok(())
    }
}

impl Notifier for ComfigApi {
    async fn publish_servers(&self, update: &QuickplayUpdate) -> Result<()> {
        self.post("/api/quickplay/update", update).await
    }

    async fn publish_schema(&self, update: &SchemaUpdate) -> Result<()> {
        self.post("/api/schema/update", update).await
    }
}

/// Artifact written every tick
#[derive(Debug, Serialize)]
struct Snapshot<'a> {
    servers: &'a [PublishedServer],
    until: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    rejected: Option<&'a [Rejection]>,
}

/// Highest score first; equal scores keep their input order
pub fn rank(mut servers: Vec<ScoredServer>) -> Vec<ScoredServer> {
    servers.sort_by(|a, b| b.score.total_cmp(&a.score));
    servers
}

/// Sorts, persists and announces each tick's ranking
pub struct RankPublisher<N> {
    notifier: N,
    snapshot_path: PathBuf,
    /// Diagnostic mode: keep rejections in the artifact, post nothing
    debug: bool,
}

impl<N: Notifier> RankPublisher<N> {
    pub fn new(notifier: N, snapshot_path: PathBuf, debug: bool) -> Self {
        Self {
            notifier,
            snapshot_path,
            debug,
        }
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Ranks the servers, writes the artifact and posts the update.
    ///
    /// A failed post is logged and dropped; the next tick supersedes it.
    pub async fn publish(
        &self,
        servers: Vec<ScoredServer>,
        rejected: &[Rejection],
        until: f64,
    ) -> Result<Vec<PublishedServer>> {
        let published: Vec<PublishedServer> =
            rank(servers).iter().map(ScoredServer::to_published).collect();

        let snapshot = Snapshot {
            servers: &published,
            until,
            rejected: self.debug.then_some(rejected),
        };
        let text = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(&self.snapshot_path, text).await?;

        if self.debug {
            info!(
                "Diagnostic mode: {} servers ranked, {} rejected, nothing posted",
                published.len(),
                rejected.len()
            );
            return Ok(published);
        }

        let update = QuickplayUpdate {
            servers: published,
            until,
        };
        match self.notifier.publish_servers(&update).await {
            Ok(()) => info!("Published {} servers", update.servers.len()),
            Err(e) => error!("Failed to publish servers: {}", e),
        }
        Ok(update.servers)
    }

    /// Announces rebuilt schema tables; skipped in diagnostic mode
    pub async fn publish_schema(&self, tables: SchemaTables) {
        if self.debug {
            debug!("Diagnostic mode: schema update not posted");
            return;
        }
        let maps = tables.map_gamemodes.len();
        let update = SchemaUpdate { schema: tables };
        match self.notifier.publish_schema(&update).await {
            Ok(()) => info!("Published schema with {} maps", maps),
            Err(e) => error!("Failed to publish schema: {}", e),
        }
    }
}
