use rand::Rng;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current unix timestamp in seconds (fractional)
pub fn get_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs_f64()
}

/// Uniform random offset in `[0, max)`, used to keep polls from aligning
/// with upstream refresh cadences.
pub fn chaos(max: f64) -> f64 {
    if max <= 0.0 {
        return 0.0;
    }
    rand::thread_rng().gen_range(0.0..max)
}

/// Linear interpolation of `x` from `[in_a, in_b]` onto `[out_a, out_b]`
pub fn lerp(in_a: f64, in_b: f64, out_a: f64, out_b: f64, x: f64) -> f64 {
    if in_b == in_a {
        return out_b;
    }
    out_a + ((out_b - out_a) * (x - in_a)) / (in_b - in_a)
}

/// Rounds to the nearest even integer (ties go to the larger even number)
pub fn nearest_even(x: f64) -> f64 {
    (x / 2.0).round() * 2.0
}

/// Standard normal draw (Box-Muller)
pub fn gaussian<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // gen::<f64>() is in [0, 1); shift away from zero for ln()
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
