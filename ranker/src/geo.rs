//! Server geolocation and ping overhead estimation

use crate::error::{Error, Result};
use crate::store::GeoOverride;
use log::{debug, info};
use serde::Deserialize;
use shared::GeoPoint;
use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;

/// Mean earth radius in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.0088;
/// Kilometres of distance per millisecond of expected latency
pub const KM_PER_MS: f64 = 65.5;
pub const MIN_OVERHEAD: f64 = 1.0;

const PUBLIC_IP_URL: &str = "https://api.ipify.org/?format=json";

/// Location of an address
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeoLocation {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub continent: Option<String>,
    pub lon: f64,
    pub lat: f64,
}

impl GeoLocation {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

impl From<&GeoOverride> for GeoLocation {
    fn from(geo: &GeoOverride) -> Self {
        Self {
            country: geo.country.clone(),
            continent: geo.continent.clone(),
            lon: geo.lon,
            lat: geo.lat,
        }
    }
}

/// Address to location lookup
pub trait GeoLocator {
    fn locate(&self, ip: IpAddr) -> impl Future<Output = Result<GeoLocation>> + Send;
}

/// Lookup against a geolocation HTTP service (`GET <base>/<ip>`)
pub struct HttpGeoLocator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGeoLocator {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl GeoLocator for HttpGeoLocator {
    async fn locate(&self, ip: IpAddr) -> Result<GeoLocation> {
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, ip))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::Geo(format!("no location for {}", ip)));
        }
        Ok(response.error_for_status()?.json().await?)
    }
}

/// Great-circle distance in kilometres
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat_a, lat_b) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Latency beyond what the distance alone explains, floored at 1 ms
pub fn ping_overhead(latency_ms: f64, distance_km: f64) -> f64 {
    (latency_ms - distance_km / KM_PER_MS - 1.0).max(MIN_OVERHEAD)
}

/// Resolves server locations for one tick
pub struct GeoEstimator<'a, G> {
    locator: &'a G,
    origin: GeoPoint,
    overrides: &'a HashMap<String, GeoOverride>,
}

impl<'a, G: GeoLocator> GeoEstimator<'a, G> {
    pub fn new(locator: &'a G, origin: GeoPoint, overrides: &'a HashMap<String, GeoOverride>) -> Self {
        Self {
            locator,
            origin,
            overrides,
        }
    }

    /// Override table first, then the locator
    pub async fn resolve(&self, ip: IpAddr) -> Option<GeoLocation> {
        if let Some(geo) = self.overrides.get(&ip.to_string()) {
            return Some(geo.into());
        }
        match self.locator.locate(ip).await {
            Ok(location) => Some(location),
            Err(e) => {
                debug!("Geolocation failed for {}: {}", ip, e);
                None
            }
        }
    }

    /// Location and ping overhead, or `None` when the address can't be placed
    pub async fn estimate(&self, ip: IpAddr, latency_ms: f64) -> Option<(GeoPoint, f64)> {
        let point = self.resolve(ip).await?.point();
        let distance = haversine_km(self.origin, point);
        Some((point, ping_overhead(latency_ms, distance)))
    }
}

#[derive(Deserialize)]
struct PublicIp {
    ip: IpAddr,
}

/// Locates the machine running the ranker through its public address
pub async fn discover_origin<G: GeoLocator>(client: &reqwest::Client, locator: &G) -> Result<GeoPoint> {
    let public: PublicIp = client
        .get(PUBLIC_IP_URL)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let location = locator.locate(public.ip).await?;
    info!(
        "Origin {} located at ({:.3}, {:.3})",
        public.ip, location.lat, location.lon
    );
    Ok(location.point())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    struct FixedLocator;

    impl GeoLocator for FixedLocator {
        async fn locate(&self, ip: IpAddr) -> Result<GeoLocation> {
            match ip.to_string().as_str() {
                "203.0.113.7" => Ok(GeoLocation {
                    country: Some("FR".to_string()),
                    continent: Some("EU".to_string()),
                    lon: 2.3522,
                    lat: 48.8566,
                }),
                _ => Err(Error::Geo(format!("no location for {}", ip))),
            }
        }
    }

    fn berlin() -> GeoPoint {
        GeoPoint::new(52.52, 13.405)
    }

    #[test]
    fn test_haversine_known_distance() {
        let paris = GeoPoint::new(48.8566, 2.3522);
        // Berlin to Paris is roughly 878 km
        assert_approx_eq!(haversine_km(berlin(), paris), 878.0, 5.0);
        assert_approx_eq!(haversine_km(paris, paris), 0.0, 1e-9);
        assert_approx_eq!(haversine_km(berlin(), paris), haversine_km(paris, berlin()), 1e-9);
    }

    #[test]
    fn test_ping_overhead_floor() {
        assert_approx_eq!(ping_overhead(50.0, 655.0), 39.0, 1e-9);
        assert_approx_eq!(ping_overhead(5.0, 655.0), MIN_OVERHEAD, 1e-9);
        assert_approx_eq!(ping_overhead(0.0, 0.0), MIN_OVERHEAD, 1e-9);
    }

    #[tokio::test]
    async fn test_estimate_uses_locator() {
        let overrides = HashMap::new();
        let estimator = GeoEstimator::new(&FixedLocator, berlin(), &overrides);

        let (point, overhead) = estimator
            .estimate("203.0.113.7".parse().unwrap(), 30.0)
            .await
            .unwrap();
        assert_approx_eq!(point.lat, 48.8566, 1e-9);
        let expected = 30.0 - haversine_km(berlin(), point) / KM_PER_MS - 1.0;
        assert_approx_eq!(overhead, expected, 1e-9);
    }

    #[tokio::test]
    async fn test_override_wins_and_miss_is_none() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "198.51.100.4".to_string(),
            GeoOverride {
                country: None,
                continent: None,
                lon: 13.405,
                lat: 52.52,
            },
        );
        let estimator = GeoEstimator::new(&FixedLocator, berlin(), &overrides);

        let (point, overhead) = estimator
            .estimate("198.51.100.4".parse().unwrap(), 12.0)
            .await
            .unwrap();
        assert_approx_eq!(point.lon, 13.405, 1e-9);
        assert_approx_eq!(overhead, 11.0, 1e-6);

        assert!(estimator
            .estimate("192.0.2.1".parse().unwrap(), 12.0)
            .await
            .is_none());
    }

    #[test]
    fn test_resolve_keeps_locator_fields() {
        let overrides = HashMap::new();
        let estimator = GeoEstimator::new(&FixedLocator, berlin(), &overrides);

        let location = tokio_test::block_on(estimator.resolve("203.0.113.7".parse().unwrap())).unwrap();
        assert_eq!(location.country.as_deref(), Some("FR"));
        assert_eq!(location.continent.as_deref(), Some("EU"));
    }
}
