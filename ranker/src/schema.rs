//! Map to gamemode taxonomy, rebuilt from the game's item schema document
//!
//! The schema overview endpoint names the current `items_game` document by URL.
//! [`SchemaSync`] polls that overview on a slow cadence, downloads and parses the
//! document only when its URL changes, and rebuilds the [`SchemaSnapshot`] when
//! either the document or the UTC month changes (holiday maps flip in and out).

use crate::error::{Error, Result};
use crate::utils::chaos;
use crate::vdf::{self, KeyValues};
use log::{debug, info, warn};
use serde::Deserialize;
use shared::{SchemaTables, APP_ID};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Match group a category must be enabled for
pub const CASUAL_MATCH_GROUP: &str = "MatchGroup_Casual_12v12";
/// Gamemode included regardless of matchmaking categories
pub const FORCED_GAMEMODE: &str = "arena";
/// Upper bound of the random delay added to each overview check
pub const OVERVIEW_CHAOS_SECS: f64 = 300.0;

const FOLDED_MM_TYPES: [&str; 2] = ["special_events", "alternative"];
const UNFOLDED_GAMEMODE: &str = "payload_race";

const EMBEDDED_CATALOG: &str = include_str!("../data/map_catalog.json");

/// Pre-seeded map tables shipped alongside the binary
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MapCatalog {
    /// Holiday restriction name to month number
    pub holidays: BTreeMap<String, u32>,
    pub beta_maps: BTreeSet<String>,
    /// Schema gamemode to the tag servers on such maps must advertise
    pub gamemode_tags: BTreeMap<String, String>,
    /// Gamemodes clients already know about; not republished
    pub default_gamemodes: BTreeSet<String>,
    /// Base-game and community maps that win over schema entries
    pub maps: BTreeMap<String, String>,
}

impl MapCatalog {
    pub fn embedded() -> Result<Self> {
        Ok(serde_json::from_str(EMBEDDED_CATALOG)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Tag expected for a gamemode; `None` for gamemodes without one
    pub fn expected_tag(&self, gamemode: &str) -> Option<&str> {
        self.gamemode_tags
            .get(gamemode)
            .map(String::as_str)
            .filter(|tag| !tag.is_empty())
    }

    pub fn is_beta(&self, map: &str) -> bool {
        self.beta_maps.contains(map)
    }
}

/// Immutable view of the taxonomy for one or more ticks
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaSnapshot {
    pub catalog: Arc<MapCatalog>,
    /// Map name to schema gamemode
    pub map_gamemodes: BTreeMap<String, String>,
    /// Gamemode to its enabled maps
    pub gamemodes: BTreeMap<String, BTreeSet<String>>,
    /// Month to the maps restricted to it (only months other than `month`)
    pub holiday_maps: BTreeMap<u32, BTreeMap<String, String>>,
    /// Known maps with their trailing version segment removed
    pub unversioned: HashSet<String>,
    pub month: u32,
}

impl SchemaSnapshot {
    /// Builds a snapshot from the `items_game` block of the schema document.
    ///
    /// Catalog maps are inserted first and are never replaced. Schema maps
    /// restricted to a holiday other than `month` land in `holiday_maps`
    /// instead of the main table.
    pub fn build(items_game: &KeyValues, month: u32, catalog: Arc<MapCatalog>) -> Result<Self> {
        let categories = items_game
            .get("matchmaking_categories")
            .ok_or_else(|| Error::Schema("missing matchmaking_categories".to_string()))?;
        let maps = items_game
            .get("maps")
            .ok_or_else(|| Error::Schema("missing maps".to_string()))?;

        let valid_types: HashSet<&str> = categories
            .entries()
            .iter()
            .filter(|(_, details)| {
                details
                    .get("valid_match_groups")
                    .map(|groups| {
                        groups
                            .entries()
                            .iter()
                            .any(|(group, value)| {
                                group == CASUAL_MATCH_GROUP && value.as_str() == Some("1")
                            })
                    })
                    .unwrap_or(false)
            })
            .map(|(category, _)| category.as_str())
            .collect();

        let mut map_gamemodes = catalog.maps.clone();
        let mut gamemodes: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut holiday_maps: BTreeMap<u32, BTreeMap<String, String>> = BTreeMap::new();

        for (gamemode, details) in maps.entries() {
            let mm_type = details.get_str("mm_type").unwrap_or_default();
            if !valid_types.contains(mm_type) && gamemode != FORCED_GAMEMODE {
                continue;
            }

            let holiday_month = details.get("restrictions").and_then(|restrictions| {
                restrictions
                    .entries()
                    .iter()
                    .filter(|(kind, _)| kind == "holiday")
                    .filter_map(|(_, name)| name.as_str())
                    .filter_map(|name| catalog.holidays.get(name).copied())
                    .last()
            });
            let in_season = holiday_month.map_or(true, |holiday| holiday == month);

            let folded = FOLDED_MM_TYPES.contains(&mm_type) && gamemode != UNFOLDED_GAMEMODE;
            let key = if folded { mm_type } else { gamemode.as_str() };

            let mut enabled_maps = BTreeSet::new();
            let maplist = details.get("maplist").map(KeyValues::entries).unwrap_or(&[]);
            for (_, info) in maplist {
                let Some(name) = info.get_str("name") else {
                    continue;
                };
                let enabled = info.get_str("enabled") == Some("1") || key == FORCED_GAMEMODE;
                if !enabled {
                    continue;
                }
                enabled_maps.insert(name.to_string());
                match holiday_month {
                    Some(holiday) if !in_season => {
                        holiday_maps
                            .entry(holiday)
                            .or_default()
                            .insert(name.to_string(), key.to_string());
                    }
                    _ => {
                        map_gamemodes
                            .entry(name.to_string())
                            .or_insert_with(|| key.to_string());
                    }
                }
            }

            if folded {
                if in_season {
                    gamemodes.entry(key.to_string()).or_default().extend(enabled_maps);
                }
            } else {
                gamemodes.insert(key.to_string(), enabled_maps);
            }
        }

        let unversioned = map_gamemodes
            .keys()
            .filter_map(|name| unversioned_name(name))
            .collect();

        Ok(Self {
            catalog,
            map_gamemodes,
            gamemodes,
            holiday_maps,
            unversioned,
            month,
        })
    }

    pub fn gamemode(&self, map: &str) -> Option<&str> {
        self.map_gamemodes.get(map).map(String::as_str)
    }

    /// Month an out-of-season holiday map is restricted to
    pub fn holiday_month(&self, map: &str) -> Option<u32> {
        self.holiday_maps
            .iter()
            .find(|(_, maps)| maps.contains_key(map))
            .map(|(month, _)| *month)
    }

    /// True when `map` only differs from a known map by its last `_` segment
    pub fn is_version_variant(&self, map: &str) -> bool {
        unversioned_name(map)
            .map(|name| self.unversioned.contains(&name))
            .unwrap_or(false)
    }

    /// Tables for downstream publication; default gamemodes are left out
    pub fn to_tables(&self) -> SchemaTables {
        SchemaTables {
            map_gamemodes: self.map_gamemodes.clone(),
            gamemodes: self
                .gamemodes
                .iter()
                .filter(|(gamemode, _)| !self.catalog.default_gamemodes.contains(*gamemode))
                .map(|(gamemode, maps)| (gamemode.clone(), maps.iter().cloned().collect()))
                .collect(),
        }
    }
}

/// `pl_vigil_rc10` -> `pl_vigil`; names with fewer than three segments have none
pub fn unversioned_name(map: &str) -> Option<String> {
    let segments: Vec<&str> = map.split('_').collect();
    if segments.len() > 2 {
        Some(segments[..segments.len() - 1].join("_"))
    } else {
        None
    }
}

/// Where the schema document and the minimum server version come from
pub trait SchemaSource {
    /// URL identifying the current schema document
    fn document_url(&self) -> impl Future<Output = Result<Option<String>>> + Send;

    fn fetch_document(&self, url: &str) -> impl Future<Output = Result<String>> + Send;

    /// Oldest server build still allowed to host matches
    fn min_allowed_version(&self) -> impl Future<Output = Result<Option<u64>>> + Send;
}

#[derive(Deserialize)]
struct OverviewResponse {
    result: OverviewResult,
}

#[derive(Deserialize)]
struct OverviewResult {
    items_game_url: Option<String>,
}

#[derive(Deserialize)]
struct VersionResponse {
    result: VersionResult,
}

#[derive(Deserialize)]
struct VersionResult {
    min_allowed_version: Option<u64>,
}

/// Steam Web API schema source
pub struct SteamSchemaSource {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl SteamSchemaSource {
    pub fn new(client: reqwest::Client, api_url: &str, api_key: &str) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

impl SchemaSource for SteamSchemaSource {
    async fn document_url(&self) -> Result<Option<String>> {
        let url = format!("{}/IEconItems_{}/GetSchemaOverview/v1/", self.api_url, APP_ID);
        let body: OverviewResponse = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.result.items_game_url.filter(|url| !url.is_empty()))
    }

    async fn fetch_document(&self, url: &str) -> Result<String> {
        let text = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(text)
    }

    async fn min_allowed_version(&self) -> Result<Option<u64>> {
        let url = format!("{}/IGCVersion_{}/GetServerVersion/v1/", self.api_url, APP_ID);
        let body: VersionResponse = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.result.min_allowed_version)
    }
}

/// Keeps the schema snapshot and minimum server version current
pub struct SchemaSync<S> {
    source: S,
    catalog: Arc<MapCatalog>,
    check_interval: Duration,
    check_chaos: f64,
    next_check: Option<Instant>,
    document_url: Option<String>,
    items_game: Option<KeyValues>,
    snapshot: Option<Arc<SchemaSnapshot>>,
    month: Option<u32>,
    min_version: u64,
}

impl<S: SchemaSource> SchemaSync<S> {
    pub fn new(source: S, catalog: Arc<MapCatalog>, check_interval: Duration) -> Self {
        Self {
            source,
            catalog,
            check_interval,
            check_chaos: OVERVIEW_CHAOS_SECS,
            next_check: None,
            document_url: None,
            items_game: None,
            snapshot: None,
            month: None,
            min_version: 0,
        }
    }

    /// Overrides the random delay bound added to each overview check
    pub fn with_check_chaos(mut self, secs: f64) -> Self {
        self.check_chaos = secs;
        self
    }

    /// Minimum allowed server build; 0 until the first successful check
    pub fn min_version(&self) -> u64 {
        self.min_version
    }

    pub fn snapshot(&self) -> Option<Arc<SchemaSnapshot>> {
        self.snapshot.clone()
    }

    /// Returns the current snapshot and whether it was rebuilt by this call.
    ///
    /// Errors are logged and the previous snapshot is kept.
    pub async fn poll(&mut self, month: u32) -> (Option<Arc<SchemaSnapshot>>, bool) {
        let mut document_changed = false;
        if self.check_due() {
            match self.check().await {
                Ok(changed) => document_changed = changed,
                Err(e) => warn!("Schema check failed: {}", e),
            }
        }

        let month_changed = self.month != Some(month);
        if !(document_changed || month_changed || self.snapshot.is_none()) {
            return (self.snapshot.clone(), false);
        }
        let Some(items_game) = &self.items_game else {
            return (None, false);
        };

        match SchemaSnapshot::build(items_game, month, Arc::clone(&self.catalog)) {
            Ok(snapshot) => {
                info!(
                    "Schema rebuilt for month {}: {} maps, {} gamemodes",
                    month,
                    snapshot.map_gamemodes.len(),
                    snapshot.gamemodes.len()
                );
                self.snapshot = Some(Arc::new(snapshot));
                self.month = Some(month);
                (self.snapshot.clone(), true)
            }
            Err(e) => {
                warn!("Failed to build schema snapshot: {}", e);
                (self.snapshot.clone(), false)
            }
        }
    }

    fn check_due(&self) -> bool {
        self.items_game.is_none() || self.next_check.map_or(true, |at| Instant::now() >= at)
    }

    /// Overview check; downloads the document when its URL moved
    async fn check(&mut self) -> Result<bool> {
        let mut changed = false;
        if let Some(url) = self.source.document_url().await? {
            let delay = self.check_interval.as_secs_f64() + chaos(self.check_chaos);
            self.next_check = Some(Instant::now() + Duration::from_secs_f64(delay));

            if self.document_url.as_deref() != Some(url.as_str()) {
                debug!("Schema document moved to {}", url);
                let text = self.source.fetch_document(&url).await?;
                let document = vdf::parse(&text)?;
                let items_game = document
                    .get("items_game")
                    .cloned()
                    .ok_or_else(|| Error::Schema("missing items_game root".to_string()))?;
                self.items_game = Some(items_game);
                self.document_url = Some(url);
                changed = true;
            }
        }

        match self.source.min_allowed_version().await {
            Ok(Some(version)) if version > 0 => self.min_version = version,
            Ok(_) => {}
            Err(e) => warn!("Server version check failed: {}", e),
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TEST_DOCUMENT: &str = r#"
"items_game"
{
    "matchmaking_categories"
    {
        "core"
        {
            "valid_match_groups"
            {
                "MatchGroup_Casual_12v12"   "1"
            }
        }
        "alternative"
        {
            "valid_match_groups"
            {
                "MatchGroup_Casual_12v12"   "1"
            }
        }
        "special_events"
        {
            "valid_match_groups"
            {
                "MatchGroup_Casual_12v12"   "1"
            }
        }
        "competitive"
        {
            "valid_match_groups"
            {
                "MatchGroup_Ladder_6v6"     "1"
            }
        }
    }
    "maps"
    {
        "payload"
        {
            "mm_type"   "core"
            "maplist"
            {
                "0" { "name" "pl_upward"    "enabled" "1" }
                "1" { "name" "pl_badwater"  "enabled" "1" }
                "2" { "name" "pl_retired"   "enabled" "0" }
                "3" { "name" "pl_vigil_rc10" "enabled" "1" }
            }
        }
        "koth"
        {
            "mm_type"   "core"
            "maplist"
            {
                "0" { "name" "koth_harvest_final" "enabled" "1" }
            }
        }
        "payload_race"
        {
            "mm_type"   "alternative"
            "maplist"
            {
                "0" { "name" "plr_hightower" "enabled" "1" }
            }
        }
        "powerup"
        {
            "mm_type"   "alternative"
            "maplist"
            {
                "0" { "name" "ctf_foundry" "enabled" "1" }
            }
        }
        "halloween"
        {
            "mm_type"   "special_events"
            "restrictions"
            {
                "holiday"   "halloween"
            }
            "maplist"
            {
                "0" { "name" "koth_harvest_event" "enabled" "1" }
            }
        }
        "arena"
        {
            "mm_type"   "arena"
            "maplist"
            {
                "0" { "name" "arena_lumberyard" "enabled" "0" }
            }
        }
        "competitive_maps"
        {
            "mm_type"   "competitive"
            "maplist"
            {
                "0" { "name" "cp_process_final" "enabled" "1" }
            }
        }
    }
}
"#;

    fn test_catalog() -> Arc<MapCatalog> {
        Arc::new(MapCatalog::embedded().unwrap())
    }

    fn items_game() -> KeyValues {
        vdf::parse(TEST_DOCUMENT)
            .unwrap()
            .get("items_game")
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_embedded_catalog_loads() {
        let catalog = MapCatalog::embedded().unwrap();
        assert_eq!(catalog.holidays.get("christmas"), Some(&12));
        assert!(catalog.is_beta("pl_cactuscanyon"));
        assert_eq!(catalog.maps.get("cp_stoneyridge_rc2").map(String::as_str), Some("capture_point"));
        assert_eq!(catalog.expected_tag("koth"), Some("cp"));
        assert_eq!(catalog.expected_tag("alternative"), None);
        assert_eq!(catalog.expected_tag("unheard_of"), None);
    }

    #[test]
    fn test_build_out_of_season() {
        let catalog = test_catalog();
        let snapshot = SchemaSnapshot::build(&items_game(), 3, Arc::clone(&catalog)).unwrap();

        // pl_vigil_rc10 is also a catalog map
        let schema_maps = [
            "pl_upward",
            "pl_badwater",
            "pl_vigil_rc10",
            "koth_harvest_final",
            "plr_hightower",
            "ctf_foundry",
            "arena_lumberyard",
        ];
        for map in schema_maps {
            assert!(snapshot.gamemode(map).is_some(), "{} missing", map);
        }
        let fresh: Vec<_> = snapshot
            .map_gamemodes
            .keys()
            .filter(|map| !catalog.maps.contains_key(*map))
            .collect();
        assert_eq!(fresh.len(), schema_maps.len() - 1);
        assert_eq!(snapshot.map_gamemodes.len(), catalog.maps.len() + fresh.len());

        assert_eq!(snapshot.gamemode("pl_retired"), None);
        assert_eq!(snapshot.gamemode("cp_process_final"), None);
        assert_eq!(snapshot.gamemode("koth_harvest_event"), None);
        assert_eq!(snapshot.holiday_month("koth_harvest_event"), Some(10));

        assert_eq!(snapshot.gamemode("plr_hightower"), Some("payload_race"));
        assert_eq!(snapshot.gamemode("ctf_foundry"), Some("alternative"));
        assert_eq!(snapshot.gamemode("arena_lumberyard"), Some("arena"));
        assert!(!snapshot.gamemodes.contains_key("special_events"));
    }

    #[test]
    fn test_build_in_season() {
        let snapshot = SchemaSnapshot::build(&items_game(), 10, test_catalog()).unwrap();

        assert_eq!(snapshot.gamemode("koth_harvest_event"), Some("special_events"));
        assert_eq!(snapshot.holiday_month("koth_harvest_event"), None);
        assert!(snapshot.gamemodes["special_events"].contains("koth_harvest_event"));
    }

    #[test]
    fn test_catalog_entries_win() {
        let document = r#"
"items_game"
{
    "matchmaking_categories"
    {
        "core" { "valid_match_groups" { "MatchGroup_Casual_12v12" "1" } }
    }
    "maps"
    {
        "ctf"
        {
            "mm_type" "core"
            "maplist" { "0" { "name" "pl_cactuscanyon" "enabled" "1" } }
        }
    }
}
"#;
        let items_game = vdf::parse(document).unwrap().get("items_game").cloned().unwrap();
        let snapshot = SchemaSnapshot::build(&items_game, 1, test_catalog()).unwrap();
        assert_eq!(snapshot.gamemode("pl_cactuscanyon"), Some("payload"));
    }

    #[test]
    fn test_version_variants() {
        let snapshot = SchemaSnapshot::build(&items_game(), 3, test_catalog()).unwrap();

        assert!(snapshot.is_version_variant("pl_vigil_rc11"));
        assert!(snapshot.is_version_variant("koth_harvest_b2"));
        assert!(!snapshot.is_version_variant("pl_upward"));
        assert!(!snapshot.is_version_variant("cp_unknownmap"));
        assert_eq!(unversioned_name("pl_vigil_rc10"), Some("pl_vigil".to_string()));
        assert_eq!(unversioned_name("pl_upward"), None);
    }

    #[test]
    fn test_tables_skip_default_gamemodes() {
        let snapshot = SchemaSnapshot::build(&items_game(), 10, test_catalog()).unwrap();
        let tables = snapshot.to_tables();

        assert!(tables.gamemodes.contains_key("special_events"));
        assert!(!tables.gamemodes.contains_key("payload"));
        assert!(!tables.gamemodes.contains_key("alternative"));
        assert_eq!(tables.map_gamemodes.get("pl_upward").map(String::as_str), Some("payload"));
    }

    #[test]
    fn test_missing_sections() {
        let document = vdf::parse(r#""items_game" { "maps" { } }"#).unwrap();
        let items_game = document.get("items_game").unwrap();
        assert!(matches!(
            SchemaSnapshot::build(items_game, 1, test_catalog()),
            Err(Error::Schema(_))
        ));
    }

    struct FakeSource {
        url: std::sync::Mutex<Option<String>>,
        document: String,
        fetches: AtomicUsize,
        fail: bool,
    }

    impl FakeSource {
        fn new(document: &str) -> Self {
            Self {
                url: std::sync::Mutex::new(Some("http://cdn/items_game_1.txt".to_string())),
                document: document.to_string(),
                fetches: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    impl SchemaSource for &FakeSource {
        async fn document_url(&self) -> Result<Option<String>> {
            if self.fail {
                return Err(Error::Api("overview unavailable".to_string()));
            }
            Ok(self.url.lock().unwrap().clone())
        }

        async fn fetch_document(&self, _url: &str) -> Result<String> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.document.clone())
        }

        async fn min_allowed_version(&self) -> Result<Option<u64>> {
            Ok(Some(8_835_751))
        }
    }

    #[tokio::test]
    async fn test_poll_fetches_once_and_rebuilds_on_month_change() {
        let source = FakeSource::new(TEST_DOCUMENT);
        let mut sync = SchemaSync::new(&source, test_catalog(), Duration::ZERO).with_check_chaos(0.0);

        let (snapshot, changed) = sync.poll(3).await;
        assert!(snapshot.is_some());
        assert!(changed);
        assert_eq!(sync.min_version(), 8_835_751);

        // same URL, same month
        let (_, changed) = sync.poll(3).await;
        assert!(!changed);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        // month rollover reparses the cached document
        let (snapshot, changed) = sync.poll(10).await;
        assert!(changed);
        assert_eq!(snapshot.unwrap().month, 10);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        // new document URL
        *source.url.lock().unwrap() = Some("http://cdn/items_game_2.txt".to_string());
        let (_, changed) = sync.poll(10).await;
        assert!(changed);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_poll_without_document_yields_nothing() {
        let mut failing = FakeSource::new(TEST_DOCUMENT);
        failing.fail = true;
        let mut sync = SchemaSync::new(&failing, test_catalog(), Duration::ZERO);
        let (snapshot, changed) = sync.poll(3).await;
        assert!(snapshot.is_none());
        assert!(!changed);

        let broken = FakeSource::new("\"items_game\" {");
        let mut sync = SchemaSync::new(&broken, test_catalog(), Duration::ZERO);
        let (snapshot, changed) = sync.poll(3).await;
        assert!(snapshot.is_none());
        assert!(!changed);
    }
}
