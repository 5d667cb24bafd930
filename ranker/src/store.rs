//! Operator-owned key-value tables: bans, reputation, geo overrides, anycast
//! blocks and the custom map allow-list.
//!
//! The tables live in a JSON document (`db.json`) edited out of band. The
//! ranker re-reads it once per tick and works from a [`TickTables`] view.

use crate::error::{Error, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const REP_TABLE: &str = "rep";
pub const BAN_TABLE: &str = "bans";
pub const GEO_TABLE: &str = "geo";
pub const ANYCAST_TABLE: &str = "anycast";
pub const MAP_TABLE: &str = "maps";

/// Table-scoped get/set/delete
pub trait KeyValueStore {
    fn get(&self, table: &str, key: &str) -> Result<Option<Value>>;

    fn set(&mut self, table: &str, key: &str, value: Value) -> Result<()>;

    /// Returns true if the key existed
    fn delete(&mut self, table: &str, key: &str) -> Result<bool>;

    fn entries(&self, table: &str) -> Result<Vec<(String, Value)>>;

    /// Picks up changes made by other writers
    fn reload(&mut self) -> Result<()> {
        Ok(())
    }
}

type Tables = BTreeMap<String, BTreeMap<String, Value>>;

/// Store backed by a single pretty-printed JSON file
pub struct JsonFileStore {
    path: PathBuf,
    tables: Tables,
}

impl JsonFileStore {
    /// Opens the file, treating a missing file as an empty store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut store = Self {
            path: path.as_ref().to_path_buf(),
            tables: Tables::new(),
        };
        store.reload()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.tables)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, table: &str, key: &str) -> Result<Option<Value>> {
        Ok(self.tables.get(table).and_then(|t| t.get(key)).cloned())
    }

    fn set(&mut self, table: &str, key: &str, value: Value) -> Result<()> {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.flush()
    }

    fn delete(&mut self, table: &str, key: &str) -> Result<bool> {
        let removed = self
            .tables
            .get_mut(table)
            .and_then(|t| t.remove(key))
            .is_some();
        if removed {
            self.flush()?;
        }
        Ok(removed)
    }

    fn entries(&self, table: &str) -> Result<Vec<(String, Value)>> {
        Ok(self
            .tables
            .get(table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn reload(&mut self) -> Result<()> {
        self.tables = match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Tables::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                Error::Store(format!("{} is not a table document: {}", self.path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(())
    }
}

/// Operator supplied location for an address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoOverride {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub continent: Option<String>,
    pub lon: f64,
    pub lat: f64,
}

/// CIDR network block, e.g. `198.51.100.0/24`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpBlock {
    network: IpAddr,
    prefix: u8,
}

impl IpBlock {
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - self.prefix as u32).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - self.prefix as u32).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for IpBlock {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let network: IpAddr = addr
            .trim()
            .parse()
            .map_err(|_| Error::Store(format!("bad network address '{}'", s)))?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= max)
                .ok_or_else(|| Error::Store(format!("bad prefix length in '{}'", s)))?,
            None => max,
        };
        Ok(Self { network, prefix })
    }
}

/// Everything the classifier and scorer read from the store in one tick
#[derive(Debug, Clone, Default)]
pub struct TickTables {
    pub reputation: HashMap<String, f64>,
    pub banned_ids: HashSet<String>,
    pub banned_ips: HashSet<IpAddr>,
    /// Lowercase substrings of banned display names
    pub banned_names: Vec<String>,
    pub banned_tags: HashSet<String>,
    pub anycast: Vec<IpBlock>,
    /// Map-name prefixes admitted without a schema entry
    pub custom_maps: Vec<String>,
    pub geo_overrides: HashMap<String, GeoOverride>,
}

impl TickTables {
    /// Reads every table once. Missing list keys are created empty.
    pub fn load<K: KeyValueStore>(store: &mut K) -> Result<Self> {
        let reputation = store
            .entries(REP_TABLE)?
            .into_iter()
            .filter_map(|(id, value)| value.as_f64().map(|rep| (id, rep)))
            .collect();

        let banned_ids = string_list(store, BAN_TABLE, "ids")?.into_iter().collect();
        let banned_ips = string_list(store, BAN_TABLE, "ips")?
            .iter()
            .filter_map(|ip| ip.parse().ok())
            .collect();
        let banned_names = string_list(store, BAN_TABLE, "names")?
            .into_iter()
            .map(|name| name.to_lowercase())
            .collect();
        let banned_tags = string_list(store, BAN_TABLE, "tags")?
            .into_iter()
            .map(|tag| tag.to_lowercase())
            .collect();

        let mut anycast = Vec::new();
        for block in string_list(store, ANYCAST_TABLE, "ips")? {
            match block.parse::<IpBlock>() {
                Ok(block) => anycast.push(block),
                Err(e) => debug!("Skipping anycast entry: {}", e),
            }
        }

        let custom_maps = string_list(store, MAP_TABLE, "custom")?;

        let geo_overrides = store
            .entries(GEO_TABLE)?
            .into_iter()
            .filter_map(|(ip, value)| {
                serde_json::from_value::<GeoOverride>(value)
                    .ok()
                    .map(|geo| (ip, geo))
            })
            .collect();

        Ok(Self {
            reputation,
            banned_ids,
            banned_ips,
            banned_names,
            banned_tags,
            anycast,
            custom_maps,
            geo_overrides,
        })
    }

    pub fn reputation(&self, identity: &str) -> f64 {
        self.reputation.get(identity).copied().unwrap_or(0.0)
    }

    pub fn is_anycast(&self, ip: IpAddr) -> bool {
        self.anycast.iter().any(|block| block.contains(ip))
    }

    pub fn is_custom_map(&self, map: &str) -> bool {
        self.custom_maps.iter().any(|prefix| map.starts_with(prefix.as_str()))
    }

    pub fn has_banned_name(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.banned_names.iter().any(|banned| lower.contains(banned.as_str()))
    }
}

/// List of strings under `table.key`, written back empty when absent
fn string_list<K: KeyValueStore>(store: &mut K, table: &str, key: &str) -> Result<Vec<String>> {
    match store.get(table, key)? {
        Some(Value::Array(items)) => Ok(items
            .into_iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect()),
        Some(other) => Err(Error::Store(format!(
            "{}.{} should be a list, found {}",
            table, key, other
        ))),
        None => {
            store.set(table, key, Value::Array(Vec::new()))?;
            Ok(Vec::new())
        }
    }
}
