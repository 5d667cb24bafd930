use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, SocketAddr};

pub const APP_ID: u32 = 440;
pub const APP_NAME: &str = "tf";
pub const APP_FULL_NAME: &str = "Team Fortress";

pub const MIN_PLAYER_CAP: u32 = 18;
pub const MAX_PLAYER_CAP: u32 = 101;
pub const FULL_PLAYERS: u32 = 24;
pub const SERVER_HEADROOM: u32 = 1;

/// Servers above this capacity must advertise `increased_maxplayers`.
pub const INCREASED_MAXPLAYERS_ABOVE: u32 = 25;
/// Servers at or below this capacity must not advertise it.
pub const DEFAULT_MAXPLAYERS: u32 = 24;
pub const INCREASED_MAXPLAYERS_TAG: &str = "increased_maxplayers";

/// A server as delivered by the directory listing, before any filtering.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawCandidate {
    pub addr: String,
    #[serde(default)]
    pub steamid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub players: u32,
    #[serde(default)]
    pub bots: u32,
    #[serde(default)]
    pub max_players: u32,
    #[serde(default)]
    pub map: String,
    #[serde(default)]
    pub gametype: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub version: String,
    #[serde(default)]
    pub appid: u32,
    #[serde(default)]
    pub gamedir: String,
    #[serde(default)]
    pub product: String,
}

impl RawCandidate {
    /// Splits `addr` into ip and port
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.addr.parse().ok()
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.socket_addr().map(|addr| addr.ip())
    }

    /// Returns a copy of this candidate with the live fields of a direct probe
    /// layered over the (stale) directory fields.
    pub fn with_probe(&self, probe: &ProbeInfo) -> RawCandidate {
        RawCandidate {
            addr: self.addr.clone(),
            steamid: self.steamid.clone(),
            name: self.name.clone(),
            players: probe.players,
            bots: self.bots,
            max_players: self.max_players,
            map: probe.map.clone(),
            gametype: probe.keywords.clone(),
            version: probe.version.clone(),
            appid: probe.app_id,
            gamedir: probe.folder.clone(),
            product: probe.folder.clone(),
        }
    }
}

/// Live server fields returned by a direct probe.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProbeInfo {
    pub app_id: u32,
    #[serde(default)]
    pub game_id: u64,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub game: String,
    #[serde(default)]
    pub players: u32,
    #[serde(default)]
    pub bots: u32,
    #[serde(default)]
    pub max_players: u32,
    #[serde(default)]
    pub map: String,
    #[serde(default)]
    pub keywords: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub version: String,
    #[serde(default)]
    pub password_protected: bool,
    /// Measured round-trip latency in milliseconds
    #[serde(default)]
    pub latency_ms: f64,
}

/// A candidate that passed every filter predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedServer {
    pub candidate: RawCandidate,
    pub ip: IpAddr,
    pub port: u16,
    /// Canonicalised advertised tags plus inferred ones
    pub tags: BTreeSet<String>,
    /// Schema gamemode the map resolved to
    pub gamemode: String,
    /// Tag the server is required to carry for its map, if any
    pub expected_tag: Option<String>,
    /// Admitted through the custom-map allow-list rather than the schema
    pub custom_map: bool,
    pub probe: Option<ProbeInfo>,
}

impl ClassifiedServer {
    pub fn with_probe(self, probe: ProbeInfo) -> ClassifiedServer {
        ClassifiedServer {
            probe: Some(probe),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Terminal pipeline stage: a classified server with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredServer {
    pub server: ClassifiedServer,
    pub score: f64,
    pub point: GeoPoint,
    pub ping_overhead: f64,
    /// Display name with control characters and markers removed
    pub name: String,
}

impl ScoredServer {
    pub fn identity(&self) -> &str {
        &self.server.candidate.steamid
    }

    pub fn to_published(&self) -> PublishedServer {
        let candidate = &self.server.candidate;
        PublishedServer {
            address: candidate.addr.clone(),
            identity: candidate.steamid.clone(),
            name: self.name.clone(),
            human_count: candidate.players,
            bot_count: candidate.bots,
            capacity: candidate.max_players,
            map: candidate.map.clone(),
            tags: self.server.tags.iter().cloned().collect(),
            score: self.score,
            geo_point: [self.point.lon, self.point.lat],
            ping_overhead: self.ping_overhead,
        }
    }
}

/// One entry of the published quickplay snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedServer {
    #[serde(rename = "addr")]
    pub address: String,
    #[serde(rename = "steamid")]
    pub identity: String,
    pub name: String,
    #[serde(rename = "players")]
    pub human_count: u32,
    #[serde(rename = "bots")]
    pub bot_count: u32,
    #[serde(rename = "max_players")]
    pub capacity: u32,
    pub map: String,
    #[serde(rename = "gametype")]
    pub tags: Vec<String>,
    pub score: f64,
    /// `[lon, lat]`
    #[serde(rename = "point")]
    pub geo_point: [f64; 2],
    #[serde(rename = "ping")]
    pub ping_overhead: f64,
}

/// Body of the downstream quickplay update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickplayUpdate {
    pub servers: Vec<PublishedServer>,
    /// Unix timestamp (seconds) after which the list should be considered stale
    pub until: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchemaTables {
    pub map_gamemodes: BTreeMap<String, String>,
    pub gamemodes: BTreeMap<String, Vec<String>>,
}

/// Body of the downstream schema update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaUpdate {
    pub schema: SchemaTables,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn sample_candidate() -> RawCandidate {
        RawCandidate {
            addr: "203.0.113.7:27015".to_string(),
            steamid: "85568392920040090".to_string(),
            name: "Sample Server".to_string(),
            players: 12,
            bots: 0,
            max_players: 24,
            map: "pl_upward".to_string(),
            gametype: "payload,nocrits".to_string(),
            version: "8835751".to_string(),
            appid: APP_ID,
            gamedir: APP_NAME.to_string(),
            product: APP_NAME.to_string(),
        }
    }

    fn sample_probe() -> ProbeInfo {
        ProbeInfo {
            app_id: APP_ID,
            game_id: APP_ID as u64,
            folder: APP_NAME.to_string(),
            game: APP_FULL_NAME.to_string(),
            players: 15,
            bots: 2,
            max_players: 24,
            map: "pl_badwater".to_string(),
            keywords: "payload".to_string(),
            version: "8835752".to_string(),
            password_protected: false,
            latency_ms: 42.5,
        }
    }

    #[test]
    fn test_candidate_from_directory_json() {
        let body = r#"{
            "addr": "203.0.113.7:27015",
            "gameport": 27015,
            "steamid": "85568392920040090",
            "name": "Sample Server",
            "appid": 440,
            "gamedir": "tf",
            "version": "8835751",
            "product": "tf",
            "region": 255,
            "players": 12,
            "max_players": 24,
            "bots": 0,
            "map": "pl_upward",
            "secure": true,
            "dedicated": true,
            "os": "l",
            "gametype": "payload,nocrits"
        }"#;

        let candidate: RawCandidate = serde_json::from_str(body).unwrap();
        assert_eq!(candidate, sample_candidate());
    }

    #[test]
    fn test_candidate_numeric_version_and_missing_fields() {
        let body = r#"{"addr": "203.0.113.7:27015", "version": 8835751}"#;
        let candidate: RawCandidate = serde_json::from_str(body).unwrap();

        assert_eq!(candidate.version, "8835751");
        assert_eq!(candidate.players, 0);
        assert!(candidate.map.is_empty());
    }

    #[test]
    fn test_socket_addr_parsing() {
        let candidate = sample_candidate();
        let addr = candidate.socket_addr().unwrap();
        assert_eq!(addr.port(), 27015);
        assert_eq!(candidate.ip(), Some("203.0.113.7".parse().unwrap()));

        let broken = RawCandidate {
            addr: "not-an-address".to_string(),
            ..sample_candidate()
        };
        assert!(broken.socket_addr().is_none());
    }

    #[test]
    fn test_with_probe_overlays_live_fields() {
        let candidate = sample_candidate();
        let merged = candidate.with_probe(&sample_probe());

        assert_eq!(merged.players, 15);
        assert_eq!(merged.map, "pl_badwater");
        assert_eq!(merged.gametype, "payload");
        assert_eq!(merged.version, "8835752");
        // identity and directory capacity are untouched
        assert_eq!(merged.steamid, candidate.steamid);
        assert_eq!(merged.max_players, 24);
        // the source candidate is not mutated
        assert_eq!(candidate.players, 12);
    }

    #[test]
    fn test_published_server_wire_keys() {
        let classified = ClassifiedServer {
            candidate: sample_candidate(),
            ip: "203.0.113.7".parse().unwrap(),
            port: 27015,
            tags: ["payload", "nocrits"].iter().map(|t| t.to_string()).collect(),
            gamemode: "payload".to_string(),
            expected_tag: Some("payload".to_string()),
            custom_map: false,
            probe: None,
        };
        let scored = ScoredServer {
            server: classified,
            score: 7.25,
            point: GeoPoint::new(52.5, 13.4),
            ping_overhead: 3.0,
            name: "Sample Server".to_string(),
        };

        let json = serde_json::to_value(scored.to_published()).unwrap();
        assert_eq!(json["addr"], "203.0.113.7:27015");
        assert_eq!(json["steamid"], "85568392920040090");
        assert_eq!(json["players"], 12);
        assert_eq!(json["max_players"], 24);
        assert_eq!(json["gametype"][0], "nocrits");
        assert_approx_eq!(json["point"][0].as_f64().unwrap(), 13.4, 1e-9);
        assert_approx_eq!(json["point"][1].as_f64().unwrap(), 52.5, 1e-9);
        assert_approx_eq!(json["ping"].as_f64().unwrap(), 3.0, 1e-9);
    }
}
