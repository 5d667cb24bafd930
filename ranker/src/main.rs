use clap::Parser;
use log::{info, warn};
use ranker::config::Config;
use ranker::directory::{HttpProbe, SteamDirectory};
use ranker::geo::{discover_origin, HttpGeoLocator};
use ranker::publisher::{ComfigApi, RankPublisher};
use ranker::runner::{Runner, RunnerSettings};
use ranker::schema::{MapCatalog, SchemaSync, SteamSchemaSource};
use ranker::store::JsonFileStore;
use std::sync::Arc;

/// Main-method of the ranker.
/// Parses configuration, wires the HTTP capabilities together and polls until Ctrl+C.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    config.validate()?;

    let client = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .user_agent(concat!("quickplay-ranker/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let catalog = match &config.catalog_path {
        Some(path) => MapCatalog::load(path)?,
        None => MapCatalog::embedded()?,
    };
    info!("Map catalog holds {} maps", catalog.maps.len());

    let locator = HttpGeoLocator::new(client.clone(), &config.geo_url);
    let origin = match config.origin() {
        Some(origin) => origin,
        None => discover_origin(&client, &locator).await?,
    };

    let directory = SteamDirectory::new(
        client.clone(),
        &config.steam_api_url,
        &config.steam_api_key,
        &config.query_filter,
        config.query_limit,
    );
    let probe = HttpProbe::new(client.clone(), &config.probe_url);
    let schema = SchemaSync::new(
        SteamSchemaSource::new(client.clone(), &config.steam_api_url, &config.steam_api_key),
        Arc::new(catalog),
        config.schema_check_interval(),
    );
    let publisher = RankPublisher::new(
        ComfigApi::new(client, &config.comfig_api_url, &config.comfig_api_key),
        config.snapshot_path.clone(),
        config.debug,
    );
    let store = JsonFileStore::open(&config.db_path)?;
    info!("Operator tables at {}", store.path().display());

    if config.debug {
        warn!("Diagnostic mode: rankings are written to {} only", config.snapshot_path.display());
    }

    let mut runner = Runner::new(
        directory,
        probe,
        locator,
        schema,
        publisher,
        store,
        RunnerSettings {
            origin,
            probe_timeout: config.probe_timeout(),
            query_interval: config.query_interval,
            query_interval_variance: config.query_interval_variance,
        },
    );
    runner.run().await;

    Ok(())
}
