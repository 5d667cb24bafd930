//! Server tag vocabulary
//!
//! Servers advertise a free-form comma separated tag string. This module
//! parses it, infers a few extra capability tags from the tag string and the
//! display name, and folds community aliases onto the official gamemode tags.

use std::collections::BTreeSet;

/// Gamemode tags recognised by matchmaking
pub const VALID_TAGS: [&str; 11] = [
    "cp", "ctf", "sd", "payload", "rd", "pd", "tc", "powerup", "passtime", "misc", "arena",
];

/// Mode a server may declare instead of its map's expected tag
pub const FORCED_MODE_TAG: &str = "arena";

/// Gamemode tags that may be carried alongside any other
pub const EXEMPT_TAGS: [&str; 2] = ["misc", "tc"];

pub const BETA_TAG: &str = "beta";

/// Map-name prefixes of the stock gamemodes
pub const DEFAULT_MAP_PREFIXES: [&str; 8] = ["koth", "ctf", "cp", "tc", "pl", "plr", "sd", "pd"];

/// Map-name prefixes that never count as a custom version of a stock gamemode
pub const JUNK_MAP_PREFIXES: [&str; 1] = ["cp_orange"];

const ALIASES: [(&str, &str); 14] = [
    ("koth", "cp"),
    ("5cp", "cp"),
    ("ad", "cp"),
    ("attack_defense", "cp"),
    ("capture_point", "cp"),
    ("pl", "payload"),
    ("plr", "payload"),
    ("payload_race", "payload"),
    ("mannpower", "powerup"),
    ("pass", "passtime"),
    ("robotdestruction", "rd"),
    ("playerdestruction", "pd"),
    ("specialdelivery", "sd"),
    ("capturetheflag", "ctf"),
];

const PREFIX_TAGS: [(&str, &str); 11] = [
    ("koth", "cp"),
    ("cp", "cp"),
    ("ctf", "ctf"),
    ("tc", "tc"),
    ("pl", "payload"),
    ("plr", "payload"),
    ("sd", "sd"),
    ("pd", "pd"),
    ("rd", "rd"),
    ("arena", "arena"),
    ("pass", "passtime"),
];

/// An inferred tag and the hints that produce it
struct Inference {
    tag: &'static str,
    /// Matched against individual advertised tags
    tag_hints: &'static [&'static str],
    /// Matched as substrings of the lowercase display name
    name_phrases: &'static [&'static str],
    /// Matched as whole words of the lowercase display name
    name_words: &'static [&'static str],
}

const INFERENCES: [Inference; 5] = [
    Inference {
        tag: "noobjective",
        tag_hints: &["nocap", "nocaps", "no_objective", "noobj", "noobjectives"],
        name_phrases: &["no cap", "no objective", "no-cap"],
        name_words: &["nocap", "nocaps", "noobj"],
    },
    Inference {
        tag: "classlimits",
        tag_hints: &["classlimit", "class_limits", "classrestrict", "classrestrictions"],
        name_phrases: &["class limit", "class restrict"],
        name_words: &["classlimit", "classlimits"],
    },
    Inference {
        tag: "rtd",
        tag_hints: &["rollthedice", "roll_the_dice"],
        name_phrases: &["roll the dice"],
        name_words: &["rtd"],
    },
    Inference {
        tag: "randomizer",
        tag_hints: &["randomiser", "tf2randomizer"],
        name_phrases: &["randomizer", "randomiser"],
        name_words: &[],
    },
    Inference {
        tag: "norespawntime",
        tag_hints: &["instantrespawn", "instant_respawn", "norespawn", "no_respawn_time"],
        name_phrases: &["instant respawn", "instant spawn", "no respawn time"],
        name_words: &["norespawn", "instaspawn"],
    },
];

/// Lowercase, comma separated, trimmed; empty entries dropped
pub fn parse_tags(raw: &str) -> BTreeSet<String> {
    raw.to_lowercase()
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Adds tags inferred from advertised tags and the display name.
///
/// Never removes anything.
pub fn enrich(tags: &mut BTreeSet<String>, name: &str) {
    let lower_name = name.to_lowercase();
    let words: Vec<&str> = lower_name
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect();

    for inference in &INFERENCES {
        if tags.contains(inference.tag) {
            continue;
        }
        let from_tags = tags
            .iter()
            .any(|tag| inference.tag_hints.contains(&tag.as_str()));
        let from_name = inference
            .name_phrases
            .iter()
            .any(|phrase| lower_name.contains(phrase))
            || words.iter().any(|word| inference.name_words.contains(word));
        if from_tags || from_name {
            tags.insert(inference.tag.to_string());
        }
    }
}

/// Official tag for a community alias; other tags map to themselves
pub fn canonical(tag: &str) -> &str {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == tag)
        .map(|(_, official)| *official)
        .unwrap_or(tag)
}

pub fn canonicalize(tags: &BTreeSet<String>) -> BTreeSet<String> {
    tags.iter().map(|tag| canonical(tag).to_string()).collect()
}

pub fn is_valid(tag: &str) -> bool {
    VALID_TAGS.contains(&tag)
}

pub fn is_exempt(tag: &str) -> bool {
    EXEMPT_TAGS.contains(&tag)
}

/// Gamemode tag implied by a map name's prefix, e.g. `koth_` -> `cp`
pub fn prefix_tag(map: &str) -> Option<&'static str> {
    let prefix = map_prefix(map);
    PREFIX_TAGS
        .iter()
        .find(|(candidate, _)| *candidate == prefix)
        .map(|(_, tag)| *tag)
}

pub fn map_prefix(map: &str) -> &str {
    map.split('_').next().unwrap_or(map)
}

pub fn is_default_prefix(map: &str) -> bool {
    DEFAULT_MAP_PREFIXES.contains(&map_prefix(map))
        && !JUNK_MAP_PREFIXES.iter().any(|junk| map.starts_with(junk))
}

/// Canonical gamemode tags other than `expected` and the exempt ones
pub fn foreign_gamemodes<'a>(canonical_tags: &'a BTreeSet<String>, expected: &'a str) -> Vec<&'a str> {
    canonical_tags
        .iter()
        .map(String::as_str)
        .filter(|tag| is_valid(tag) && *tag != expected && !is_exempt(tag))
        .collect()
}
