//! Eligibility filter chain
//!
//! A candidate passes through the predicates below in order and the first
//! failure decides its [`RejectReason`]:
//!
//! 1. relay and malformed addresses
//! 2. SteamID64 shape
//! 3. live probe of stale directory data (see [`crate::pipeline`])
//! 4. app id, game directory and product
//! 5. capacity bounds
//! 6. reported humans below capacity
//! 7. minimum build version
//! 8. map resolution
//! 9. identity and address bans
//! 10. tag parsing and enrichment
//! 11. capacity tag consistency
//! 12. known gamemode vocabulary
//! 13. expected gamemode tag
//! 14. tags of other gamemodes
//! 15. beta flag
//! 16. banned tags
//! 17. banned name fragments

use crate::schema::SchemaSnapshot;
use crate::store::TickTables;
use crate::tags;
use serde::{Deserialize, Serialize};
use shared::{
    ClassifiedServer, ProbeInfo, RawCandidate, APP_ID, APP_NAME, DEFAULT_MAXPLAYERS,
    INCREASED_MAXPLAYERS_ABOVE, INCREASED_MAXPLAYERS_TAG, MAX_PLAYER_CAP, MIN_PLAYER_CAP,
};
use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Why a candidate was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    #[serde(rename = "sdr")]
    Sdr,
    #[serde(rename = "badaddr")]
    BadAddress,
    #[serde(rename = "badsteamid")]
    BadSteamId,
    #[serde(rename = "timeout")]
    Timeout,
    #[serde(rename = "noappid")]
    NoAppId,
    #[serde(rename = "nogamedir")]
    NoGameDir,
    #[serde(rename = "noprod")]
    NoProduct,
    #[serde(rename = "<18")]
    TooFewSlots,
    #[serde(rename = ">101")]
    TooManySlots,
    #[serde(rename = "playercaplie")]
    PlayerCapLie,
    #[serde(rename = "outofdate")]
    OutOfDate,
    #[serde(rename = "nomap")]
    NoMap,
    #[serde(rename = "holidaymap")]
    HolidayMap,
    #[serde(rename = "versionmapdiff")]
    VersionMapDiff,
    #[serde(rename = "custommap")]
    CustomMap,
    #[serde(rename = "badmap")]
    BadMap,
    #[serde(rename = "steamban")]
    SteamBan,
    #[serde(rename = "ipban")]
    IpBan,
    #[serde(rename = "nogametype")]
    NoGametype,
    #[serde(rename = "-maxplayers")]
    MissingMaxPlayersTag,
    #[serde(rename = "+maxplayers")]
    UnexpectedMaxPlayersTag,
    #[serde(rename = "unexpectedtag")]
    UnexpectedTag,
    #[serde(rename = "doubledip")]
    DoubleDip,
    #[serde(rename = "nobeta")]
    NoBeta,
    #[serde(rename = "hasbeta")]
    HasBeta,
    #[serde(rename = "badgametype")]
    BadGametype,
    #[serde(rename = "badname")]
    BadName,
    #[serde(rename = "pass")]
    Password,
    #[serde(rename = "probemismatch")]
    ProbeMismatch,
    #[serde(rename = "nogeo")]
    NoGeo,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::Sdr => "sdr",
            RejectReason::BadAddress => "badaddr",
            RejectReason::BadSteamId => "badsteamid",
            RejectReason::Timeout => "timeout",
            RejectReason::NoAppId => "noappid",
            RejectReason::NoGameDir => "nogamedir",
            RejectReason::NoProduct => "noprod",
            RejectReason::TooFewSlots => "<18",
            RejectReason::TooManySlots => ">101",
            RejectReason::PlayerCapLie => "playercaplie",
            RejectReason::OutOfDate => "outofdate",
            RejectReason::NoMap => "nomap",
            RejectReason::HolidayMap => "holidaymap",
            RejectReason::VersionMapDiff => "versionmapdiff",
            RejectReason::CustomMap => "custommap",
            RejectReason::BadMap => "badmap",
            RejectReason::SteamBan => "steamban",
            RejectReason::IpBan => "ipban",
            RejectReason::NoGametype => "nogametype",
            RejectReason::MissingMaxPlayersTag => "-maxplayers",
            RejectReason::UnexpectedMaxPlayersTag => "+maxplayers",
            RejectReason::UnexpectedTag => "unexpectedtag",
            RejectReason::DoubleDip => "doubledip",
            RejectReason::NoBeta => "nobeta",
            RejectReason::HasBeta => "hasbeta",
            RejectReason::BadGametype => "badgametype",
            RejectReason::BadName => "badname",
            RejectReason::Password => "pass",
            RejectReason::ProbeMismatch => "probemismatch",
            RejectReason::NoGeo => "nogeo",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A dropped candidate as written to the diagnostic artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    #[serde(rename = "removal")]
    pub reason: RejectReason,
    pub addr: String,
    pub steamid: String,
    pub name: String,
    pub players: u32,
    pub max_players: u32,
    pub bots: u32,
    pub map: String,
    pub gametype: Vec<String>,
}

impl Rejection {
    /// `tags` are the parsed tags when the chain got that far; otherwise the
    /// raw tag string is split as-is
    pub fn new(reason: RejectReason, candidate: &RawCandidate, tags: Option<&BTreeSet<String>>) -> Self {
        let gametype = match tags {
            Some(tags) => tags.iter().cloned().collect(),
            None => candidate
                .gametype
                .to_lowercase()
                .split(',')
                .map(str::to_string)
                .collect(),
        };
        Self {
            reason,
            addr: candidate.addr.clone(),
            steamid: candidate.steamid.clone(),
            name: candidate.name.clone(),
            players: candidate.players,
            max_players: candidate.max_players,
            bots: candidate.bots,
            map: candidate.map.clone(),
            gametype,
        }
    }
}

/// Outcome of the filter chain for one candidate
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Accepted(ClassifiedServer),
    Rejected(Rejection),
}

impl Classification {
    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Classification::Accepted(_) => None,
            Classification::Rejected(rejection) => Some(rejection.reason),
        }
    }
}

/// Where a candidate's map landed in the taxonomy
#[derive(Debug, Clone, PartialEq)]
struct MapResolution {
    gamemode: String,
    expected_tag: Option<String>,
    custom: bool,
}

/// Filter chain bound to one tick's schema, tables and minimum version
pub struct Classifier<'a> {
    schema: &'a SchemaSnapshot,
    tables: &'a TickTables,
    min_version: u64,
}

impl<'a> Classifier<'a> {
    pub fn new(schema: &'a SchemaSnapshot, tables: &'a TickTables, min_version: u64) -> Self {
        Self {
            schema,
            tables,
            min_version,
        }
    }

    /// Full chain for candidates with fresh directory data
    pub fn classify(&self, candidate: RawCandidate) -> Classification {
        match self.screen(&candidate) {
            Ok(addr) => self.classify_screened(candidate, addr, None),
            Err(rejection) => Classification::Rejected(rejection),
        }
    }

    /// Predicates 1 and 2: address and identity shape
    pub fn screen(&self, candidate: &RawCandidate) -> Result<SocketAddr, Rejection> {
        let reject = |reason| Rejection::new(reason, candidate, None);

        let addr = candidate
            .socket_addr()
            .ok_or_else(|| reject(RejectReason::BadAddress))?;
        if is_relay(addr.ip()) {
            return Err(reject(RejectReason::Sdr));
        }

        let steamid = &candidate.steamid;
        if steamid.len() != 17 || !steamid.bytes().all(|b| b.is_ascii_digit()) {
            return Err(reject(RejectReason::BadSteamId));
        }
        Ok(addr)
    }

    /// Predicates 4 to 17, for a candidate that already passed [`screen`]
    /// and, if its data was stale, had its probe merged in.
    ///
    /// [`screen`]: Classifier::screen
    pub fn classify_screened(
        &self,
        candidate: RawCandidate,
        addr: SocketAddr,
        probe: Option<ProbeInfo>,
    ) -> Classification {
        match self.run_chain(&candidate) {
            Ok((tags, resolution)) => Classification::Accepted(ClassifiedServer {
                ip: addr.ip(),
                port: addr.port(),
                tags,
                gamemode: resolution.gamemode,
                expected_tag: resolution.expected_tag,
                custom_map: resolution.custom,
                probe,
                candidate,
            }),
            Err(rejection) => Classification::Rejected(rejection),
        }
    }

    fn run_chain(&self, candidate: &RawCandidate) -> Result<(BTreeSet<String>, MapResolution), Rejection> {
        let reject = |reason| Rejection::new(reason, candidate, None);

        if candidate.appid != APP_ID {
            return Err(reject(RejectReason::NoAppId));
        }
        if candidate.gamedir != APP_NAME {
            return Err(reject(RejectReason::NoGameDir));
        }
        if candidate.product != APP_NAME {
            return Err(reject(RejectReason::NoProduct));
        }

        let max_players = candidate.max_players;
        if max_players < MIN_PLAYER_CAP {
            return Err(reject(RejectReason::TooFewSlots));
        }
        if max_players > MAX_PLAYER_CAP {
            return Err(reject(RejectReason::TooManySlots));
        }
        if candidate.players >= max_players {
            return Err(reject(RejectReason::PlayerCapLie));
        }

        if self.min_version > 0 {
            let current = candidate.version.trim().parse::<u64>().unwrap_or(0);
            if current < self.min_version {
                return Err(reject(RejectReason::OutOfDate));
            }
        }

        let resolution = self.resolve_map(&candidate.map).map_err(reject)?;

        if self.tables.banned_ids.contains(&candidate.steamid) {
            return Err(reject(RejectReason::SteamBan));
        }
        if candidate.ip().map_or(false, |ip| self.tables.banned_ips.contains(&ip)) {
            return Err(reject(RejectReason::IpBan));
        }

        if candidate.gametype.trim().is_empty() {
            return Err(reject(RejectReason::NoGametype));
        }
        let mut tags = tags::parse_tags(&candidate.gametype);
        tags::enrich(&mut tags, &candidate.name);
        let reject = |reason| Rejection::new(reason, candidate, Some(&tags));

        let increased = tags.contains(INCREASED_MAXPLAYERS_TAG);
        if max_players > INCREASED_MAXPLAYERS_ABOVE && !increased {
            return Err(reject(RejectReason::MissingMaxPlayersTag));
        }
        if max_players <= DEFAULT_MAXPLAYERS && increased {
            return Err(reject(RejectReason::UnexpectedMaxPlayersTag));
        }

        if !resolution.custom && !tags.iter().any(|tag| tags::is_valid(tag)) {
            return Err(reject(RejectReason::NoGametype));
        }

        let forced = tags.contains(tags::FORCED_MODE_TAG);
        if let Some(expected) = &resolution.expected_tag {
            if !tags.contains(expected) && !forced {
                return Err(reject(RejectReason::UnexpectedTag));
            }
        }

        let canonical = tags::canonicalize(&tags);
        if let Some(expected) = &resolution.expected_tag {
            let declared = if canonical.contains(expected) {
                expected.as_str()
            } else {
                tags::FORCED_MODE_TAG
            };
            if !tags::foreign_gamemodes(&canonical, declared).is_empty() {
                return Err(reject(RejectReason::DoubleDip));
            }
        }

        let beta_expected = self.schema.catalog.is_beta(&candidate.map);
        let has_beta = tags.contains(tags::BETA_TAG);
        if beta_expected && !has_beta {
            return Err(reject(RejectReason::NoBeta));
        }
        if !beta_expected && has_beta {
            return Err(reject(RejectReason::HasBeta));
        }

        if tags.iter().any(|tag| self.tables.banned_tags.contains(tag)) {
            return Err(reject(RejectReason::BadGametype));
        }
        if self.tables.has_banned_name(&candidate.name) {
            return Err(reject(RejectReason::BadName));
        }

        Ok((canonical, resolution))
    }

    fn resolve_map(&self, map: &str) -> Result<MapResolution, RejectReason> {
        if map.is_empty() {
            return Err(RejectReason::NoMap);
        }

        let catalog = &self.schema.catalog;
        let known = self.schema.gamemode(map).or_else(|| {
            catalog
                .maps
                .get(map)
                .filter(|_| catalog.is_beta(map))
                .map(String::as_str)
        });
        if let Some(gamemode) = known {
            return Ok(MapResolution {
                gamemode: gamemode.to_string(),
                expected_tag: catalog.expected_tag(gamemode).map(str::to_string),
                custom: false,
            });
        }

        if self.schema.holiday_month(map).is_some() {
            return Err(RejectReason::HolidayMap);
        }

        if self.tables.is_custom_map(map) {
            return Ok(MapResolution {
                gamemode: tags::map_prefix(map).to_string(),
                expected_tag: tags::prefix_tag(map).map(str::to_string),
                custom: true,
            });
        }

        if !tags::is_default_prefix(map) {
            return Err(RejectReason::BadMap);
        }
        if self.schema.is_version_variant(map) {
            return Err(RejectReason::VersionMapDiff);
        }
        Err(RejectReason::CustomMap)
    }
}

/// Steam Datagram Relay servers advertise IPv4 link-local addresses
fn is_relay(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(_) => false,
    }
}
