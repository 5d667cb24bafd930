//! Server desirability score
//!
//! The score is a base bonus plus operator reputation plus a piecewise linear
//! population curve, nudged by a handful of small penalties, a recovery bonus
//! for servers climbing back from a recent low, and a cached random offset for
//! empty servers so their order isn't frozen.

use crate::cache::{CacheUpdate, JitterCache, TrendCache};
use crate::store::TickTables;
use crate::utils::{gaussian, lerp, nearest_even};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{
    ClassifiedServer, GeoPoint, ProbeInfo, ScoredServer, APP_FULL_NAME, FULL_PLAYERS,
    SERVER_HEADROOM,
};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Instant;

pub const SCORE_FULL: f64 = -100.0;
pub const SCORE_EMPTY: f64 = -0.3;
pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_LOW: f64 = 0.1;
pub const SCORE_IDEAL: f64 = 1.6;
pub const SCORE_FULLER: f64 = 0.2;
pub const SCORE_OVERFULL: f64 = -0.3;

pub const QUICKPLAY_BONUS: f64 = 6.0;
/// Deducted for anonymous server accounts, off-title probes, anycast
/// networks and names with a leading attention marker
pub const SMALL_PENALTY: f64 = 0.1;

/// Human count at which the recovery bonus stops applying
pub const TREND_CROWDED: u32 = 12;
pub const TREND_BONUS_MIN: f64 = 0.1;
pub const TREND_BONUS_MAX: f64 = 0.5;

pub const JITTER_PCT: f64 = 0.0005;

const ATTENTION_MARKER: char = '\u{1}';

/// Population term for `humans` current players on a server with
/// `max_players` slots, counting the player about to join.
pub fn population_score(humans: u32, max_players: u32) -> f64 {
    let joined = humans + 1;
    if joined + SERVER_HEADROOM > max_players {
        return SCORE_FULL;
    }
    if humans == 0 {
        return SCORE_EMPTY;
    }

    let h = joined as f64;
    let real_max = max_players as f64;
    let max = max_players.min(FULL_PLAYERS) as f64;
    let low = nearest_even(max / 3.0);
    let ideal = nearest_even(max * 0.72);

    if h <= low {
        lerp(0.0, low, SCORE_MIN, SCORE_LOW, h)
    } else if h <= ideal {
        lerp(low, ideal, SCORE_LOW, SCORE_IDEAL, h)
    } else if h <= max {
        lerp(ideal, max, SCORE_IDEAL, SCORE_FULLER, h)
    } else {
        lerp(max, real_max, SCORE_FULLER, SCORE_OVERFULL, h)
    }
}

/// Strips control characters; reports whether the attention marker led the name
pub fn sanitize_name(name: &str) -> (String, bool) {
    let marked = name.starts_with(ATTENTION_MARKER);
    let cleaned: String = name.chars().filter(|c| !c.is_control()).collect();
    (cleaned.trim().to_string(), marked)
}

/// Anonymous game server accounts have SteamIDs starting with 9
pub fn is_anonymous(identity: &str) -> bool {
    identity.starts_with('9')
}

/// Scored server plus the cache changes its evaluation implies
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    pub server: ScoredServer,
    pub updates: Vec<CacheUpdate>,
}

/// Scoring context for one tick
pub struct Scorer<'a> {
    tables: &'a TickTables,
    trend: &'a TrendCache,
    jitter: &'a JitterCache,
    tick_seed: u64,
    now: Instant,
}

impl<'a> Scorer<'a> {
    pub fn new(
        tables: &'a TickTables,
        trend: &'a TrendCache,
        jitter: &'a JitterCache,
        tick_seed: u64,
        now: Instant,
    ) -> Self {
        Self {
            tables,
            trend,
            jitter,
            tick_seed,
            now,
        }
    }

    pub fn score(
        &self,
        server: ClassifiedServer,
        probe: &ProbeInfo,
        point: GeoPoint,
        ping_overhead: f64,
    ) -> ScoreOutcome {
        let mut updates = Vec::new();
        let candidate = &server.candidate;
        let identity = candidate.steamid.as_str();
        let humans = candidate.players;

        let mut score = QUICKPLAY_BONUS + self.tables.reputation(identity);
        score += population_score(humans, candidate.max_players);

        if is_anonymous(identity) {
            score -= SMALL_PENALTY;
        }
        if probe.game != APP_FULL_NAME {
            score -= SMALL_PENALTY;
        }

        score += self.trend_bonus(identity, humans);
        updates.extend(self.trend.observe(identity, humans, self.now));

        if humans == 0 {
            let draw = match self.jitter.draw_at(identity, self.now) {
                Some(draw) => draw,
                None => {
                    let draw = self.fresh_draw(identity);
                    updates.push(CacheUpdate::Jitter {
                        identity: identity.to_string(),
                        draw,
                    });
                    draw
                }
            };
            score += draw * (score.abs() * JITTER_PCT).sqrt();
        } else if self.jitter.draw_at(identity, self.now).is_some() {
            updates.push(CacheUpdate::ClearJitter {
                identity: identity.to_string(),
            });
        }

        if self.tables.is_anycast(server.ip) {
            score -= SMALL_PENALTY;
        }

        let (name, marked) = sanitize_name(&candidate.name);
        if marked {
            score -= SMALL_PENALTY;
        }

        ScoreOutcome {
            server: ScoredServer {
                server,
                score,
                point,
                ping_overhead,
                name,
            },
            updates,
        }
    }

    /// Bonus for a server above its trailing-hour low but not yet crowded
    pub fn trend_bonus(&self, identity: &str, humans: u32) -> f64 {
        match self.trend.trough_at(identity, self.now) {
            Some(trough) if trough < humans && humans < TREND_CROWDED => lerp(
                trough as f64,
                TREND_CROWDED as f64,
                TREND_BONUS_MIN,
                TREND_BONUS_MAX,
                humans as f64,
            ),
            _ => 0.0,
        }
    }

    /// Draw for an identity with no cached one; fixed for the tick
    fn fresh_draw(&self, identity: &str) -> f64 {
        let mut hasher = DefaultHasher::new();
        identity.hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(self.tick_seed ^ hasher.finish());
        gaussian(&mut rng)
    }
}
