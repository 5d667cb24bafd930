//! Per-candidate evaluation: classification, live probe verification, scoring
//!
//! Every future built here only borrows tick state immutably, so a whole
//! directory listing can be evaluated concurrently with `join_all` and the
//! resulting cache updates applied afterwards.

use crate::cache::CacheUpdate;
use crate::classifier::{Classification, Classifier, RejectReason, Rejection};
use crate::directory::{probe_with_timeout, Probe};
use crate::geo::{GeoEstimator, GeoLocator};
use crate::scoring::Scorer;
use log::debug;
use shared::{ProbeInfo, RawCandidate, ScoredServer, APP_ID, APP_NAME};
use std::time::Duration;

/// Result of evaluating one candidate
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Scored {
        server: ScoredServer,
        updates: Vec<CacheUpdate>,
    },
    Rejected(Rejection),
}

impl Evaluation {
    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Evaluation::Scored { .. } => None,
            Evaluation::Rejected(rejection) => Some(rejection.reason),
        }
    }
}

/// Everything a candidate evaluation reads during one tick
pub struct Pipeline<'a, P, G> {
    pub classifier: Classifier<'a>,
    pub scorer: Scorer<'a>,
    pub geo: GeoEstimator<'a, G>,
    pub probe: &'a P,
    pub probe_timeout: Duration,
    /// Directory data is from an earlier tick and must be refreshed by probe
    pub stale: bool,
}

impl<'a, P: Probe, G: GeoLocator> Pipeline<'a, P, G> {
    pub async fn evaluate(&self, candidate: RawCandidate) -> Evaluation {
        let addr = match self.classifier.screen(&candidate) {
            Ok(addr) => addr,
            Err(rejection) => return Evaluation::Rejected(rejection),
        };

        let (candidate, early_probe) = if self.stale {
            match probe_with_timeout(self.probe, addr, self.probe_timeout).await {
                Ok(info) => (candidate.with_probe(&info), Some(info)),
                Err(e) => {
                    debug!("Refresh probe of {} failed: {}", addr, e);
                    return reject(RejectReason::Timeout, &candidate);
                }
            }
        } else {
            (candidate, None)
        };

        let server = match self.classifier.classify_screened(candidate, addr, early_probe) {
            Classification::Accepted(server) => server,
            Classification::Rejected(rejection) => return Evaluation::Rejected(rejection),
        };

        let info = match &server.probe {
            Some(info) => info.clone(),
            None => match probe_with_timeout(self.probe, addr, self.probe_timeout).await {
                Ok(info) => info,
                Err(e) => {
                    debug!("Probe of {} failed: {}", addr, e);
                    return reject(RejectReason::Timeout, &server.candidate);
                }
            },
        };
        if let Some(reason) = verify_probe(&info) {
            return reject(reason, &server.candidate);
        }

        let Some((point, overhead)) = self.geo.estimate(server.ip, info.latency_ms).await else {
            return reject(RejectReason::NoGeo, &server.candidate);
        };

        let server = server.with_probe(info.clone());
        let outcome = self.scorer.score(server, &info, point, overhead);
        Evaluation::Scored {
            server: outcome.server,
            updates: outcome.updates,
        }
    }
}

/// Live probe checks applied to every accepted server
pub fn verify_probe(info: &ProbeInfo) -> Option<RejectReason> {
    if info.password_protected {
        return Some(RejectReason::Password);
    }
    if info.app_id != APP_ID || info.game_id != APP_ID as u64 || info.folder != APP_NAME {
        return Some(RejectReason::ProbeMismatch);
    }
    None
}

fn reject(reason: RejectReason, candidate: &RawCandidate) -> Evaluation {
    Evaluation::Rejected(Rejection::new(reason, candidate, None))
}
