//! Command line and environment configuration

use crate::directory::{DEFAULT_QUERY_FILTER, DEFAULT_QUERY_LIMIT};
use crate::error::{Error, Result};
use clap::Parser;
use shared::GeoPoint;
use std::path::PathBuf;
use std::time::Duration;

/// Ranks community servers for quickplay and publishes the ranking
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
pub struct Config {
    /// Steam Web API key
    #[clap(long, env = "STEAM_API_KEY", hide_env_values = true)]
    pub steam_api_key: String,

    /// Steam Web API base URL
    #[clap(long, default_value = "https://api.steampowered.com")]
    pub steam_api_url: String,

    /// Quickplay API base URL
    #[clap(long, env = "COMFIG_API_URL", default_value = "https://comfig.app")]
    pub comfig_api_url: String,

    /// Quickplay API bearer token
    #[clap(long, env = "COMFIG_API_KEY", hide_env_values = true, default_value = "")]
    pub comfig_api_key: String,

    /// Server probe service base URL
    #[clap(long, default_value = "http://127.0.0.1:8600")]
    pub probe_url: String,

    /// Geolocation service base URL
    #[clap(long, default_value = "http://127.0.0.1:8601")]
    pub geo_url: String,

    /// Operator tables (bans, reputation, geo overrides, ...)
    #[clap(long, default_value = "db.json")]
    pub db_path: PathBuf,

    /// Where the ranked snapshot is written each tick
    #[clap(long, default_value = "servers.json")]
    pub snapshot_path: PathBuf,

    /// Replacement for the built-in map catalog
    #[clap(long)]
    pub catalog_path: Option<PathBuf>,

    /// Seconds between directory polls
    #[clap(long, default_value = "10")]
    pub query_interval: f64,

    /// Upper bound of the random seconds added to each poll interval
    #[clap(long, default_value = "5")]
    pub query_interval_variance: f64,

    /// Seconds between schema overview checks
    #[clap(long, default_value = "300")]
    pub schema_check_interval: f64,

    /// Seconds to wait for a single server probe
    #[clap(long, default_value = "2")]
    pub probe_timeout: f64,

    /// Seconds before any HTTP request is abandoned
    #[clap(long, default_value = "30")]
    pub http_timeout: f64,

    /// Directory filter expression
    #[clap(long, default_value = DEFAULT_QUERY_FILTER)]
    pub query_filter: String,

    /// Maximum servers requested from the directory
    #[clap(long, default_value_t = DEFAULT_QUERY_LIMIT)]
    pub query_limit: u32,

    /// Operator latitude; looked up from the public address when absent
    #[clap(long, requires = "origin_lon", allow_hyphen_values = true)]
    pub origin_lat: Option<f64>,

    /// Operator longitude
    #[clap(long, requires = "origin_lat", allow_hyphen_values = true)]
    pub origin_lon: Option<f64>,

    /// Diagnostic mode: keep rejections in the snapshot and post nothing
    #[clap(long)]
    pub debug: bool,
}

impl Config {
    /// Rejects values the runner can't work with
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("query-interval", self.query_interval),
            ("schema-check-interval", self.schema_check_interval),
            ("probe-timeout", self.probe_timeout),
            ("http-timeout", self.http_timeout),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Config(format!("--{} must be positive, got {}", name, value)));
            }
        }
        if !(self.query_interval_variance.is_finite() && self.query_interval_variance >= 0.0) {
            return Err(Error::Config(format!(
                "--query-interval-variance must not be negative, got {}",
                self.query_interval_variance
            )));
        }
        if self.steam_api_key.is_empty() {
            return Err(Error::Config("a Steam API key is required".to_string()));
        }
        if !self.debug && self.comfig_api_key.is_empty() {
            return Err(Error::Config(
                "COMFIG_API_KEY is required outside diagnostic mode".to_string(),
            ));
        }
        if let Some(origin) = self.origin() {
            if !(-90.0..=90.0).contains(&origin.lat) || !(-180.0..=180.0).contains(&origin.lon) {
                return Err(Error::Config(format!(
                    "origin ({}, {}) is not a coordinate",
                    origin.lat, origin.lon
                )));
            }
        }
        Ok(())
    }

    pub fn origin(&self) -> Option<GeoPoint> {
        match (self.origin_lat, self.origin_lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => None,
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.probe_timeout)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.http_timeout)
    }

    pub fn schema_check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.schema_check_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["ranker", "--steam-api-key", "k", "--comfig-api-key", "c"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.query_interval, 10.0);
        assert_eq!(config.query_interval_variance, 5.0);
        assert_eq!(config.query_limit, 20_000);
        assert_eq!(config.db_path, PathBuf::from("db.json"));
        assert_eq!(config.probe_timeout(), Duration::from_secs(2));
        assert!(config.origin().is_none());
        assert!(!config.debug);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_query_filter() {
        let config = parse(&[]);
        let filter = config.query_filter.as_str();
        assert!(filter.starts_with(r"\appid\440\gamedir\tf\secure\1\dedicated\1"));
        for gametype in ["noquickplay", "dmgspread", "gravity", "highlander", "mvm"] {
            assert!(filter.contains(gametype), "filter lacks {}", gametype);
        }
        assert!(filter.contains(r"\steamblocking\1"));
        assert!(!filter.contains(r"\full\1"));
        assert!(!filter.contains("steamblocked"));

        let config = parse(&["--query-filter", r"\appid\440"]);
        assert_eq!(config.query_filter, r"\appid\440");
    }

    #[test]
    fn test_origin_pair() {
        let config = parse(&["--origin-lat", "-33.86", "--origin-lon", "151.2"]);
        let origin = config.origin().unwrap();
        assert_eq!(origin.lat, -33.86);
        assert_eq!(origin.lon, 151.2);

        let mut argv = vec!["ranker", "--steam-api-key", "k", "--origin-lat", "1.0"];
        argv.push("--debug");
        assert!(Config::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = parse(&["--query-interval", "0"]);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config = parse(&["--origin-lat", "95", "--origin-lon", "0"]);
        assert!(config.validate().is_err());

        config = parse(&[]);
        config.comfig_api_key.clear();
        assert!(config.validate().is_err());
        config.debug = true;
        assert!(config.validate().is_ok());
    }
}
