//! # Geodesic Engine
//!
//! Vincenty's inverse formula on the WGS84 ellipsoid.
//!
//! Given two latitude/longitude pairs the solver iterates on the auxiliary
//! longitude difference `lambda` until two successive values differ by less
//! than [`CONVERGENCE_THRESHOLD`]. Near-antipodal pairs may not converge within
//! [`MAX_ITERATIONS`]; those fail with [`TrackerError::NonConvergent`] and must
//! be treated as "distance unknown", never as zero.

use crate::error::{Result, TrackerError};

/// WGS84 semi-major axis in meters
pub const WGS84_A: f64 = 6_378_137.0;

/// WGS84 flattening
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// WGS84 semi-minor axis in meters, b = (1 - f) * a
pub const WGS84_B: f64 = 6_356_752.314_245;

/// Iteration cap for the lambda refinement
pub const MAX_ITERATIONS: usize = 200;

/// Convergence threshold on successive lambda values (radians)
pub const CONVERGENCE_THRESHOLD: f64 = 1e-12;

/// Miles per kilometer
pub const MILES_PER_KILOMETER: f64 = 0.621371;

/// A WGS84 point in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// Unit of the returned distance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceUnit {
    #[default]
    Meters,
    Miles,
}

/// Distance solver used by the position normalizer
pub trait Geodesic: Send + Sync {
    /// Distance in meters between two points
    fn distance(&self, from: GeoPoint, to: GeoPoint) -> Result<f64>;
}

/// Vincenty inverse solver with the WGS84 constants
#[derive(Debug, Clone, Copy, Default)]
pub struct Vincenty;

impl Geodesic for Vincenty {
    fn distance(&self, from: GeoPoint, to: GeoPoint) -> Result<f64> {
        vincenty_inverse(from, to, DistanceUnit::Meters)
    }
}

/// Distance in meters between two points
///
/// Shorthand for [`vincenty_inverse`] with [`DistanceUnit::Meters`].
pub fn distance(from: GeoPoint, to: GeoPoint) -> Result<f64> {
    vincenty_inverse(from, to, DistanceUnit::Meters)
}

/// Vincenty's inverse method
///
/// # Arguments
///
/// * `from` - First point
/// * `to` - Second point
/// * `unit` - Unit of the result
///
/// # Returns
///
/// * `Result<f64>` - Distance rounded to 6 decimals in the requested unit
///
/// # Errors
///
/// Returns [`TrackerError::NonConvergent`] if lambda has not converged after
/// [`MAX_ITERATIONS`] iterations.
///
/// # Examples
///
/// ```
/// use fleet_track::geodesy::{vincenty_inverse, DistanceUnit, GeoPoint};
///
/// let d = vincenty_inverse(GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0), DistanceUnit::Meters)?;
/// assert!((d - 111_319.491).abs() < 1e-3);
/// # Ok::<(), fleet_track::error::TrackerError>(())
/// ```
pub fn vincenty_inverse(from: GeoPoint, to: GeoPoint, unit: DistanceUnit) -> Result<f64> {
    if from.latitude == to.latitude && from.longitude == to.longitude {
        return Ok(0.0);
    }

    let u1 = ((1.0 - WGS84_F) * from.latitude.to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * to.latitude.to_radians().tan()).atan();
    let l = (to.longitude - from.longitude).to_radians();

    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    let mut converged = false;

    let mut sin_sigma = 0.0;
    let mut cos_sigma = 0.0;
    let mut sigma = 0.0;
    let mut cos_sq_alpha = 0.0;
    let mut cos_2sigma_m = 0.0;

    for _ in 0..MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();

        sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();

        if sin_sigma == 0.0 {
            return Ok(0.0);
        }

        cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        sigma = sin_sigma.atan2(cos_sigma);

        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        cos_sq_alpha = 1.0 - sin_alpha.powi(2);

        // equatorial line
        cos_2sigma_m = if cos_sq_alpha == 0.0 {
            0.0
        } else {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        };

        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
        let lambda_prev = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));

        if (lambda - lambda_prev).abs() < CONVERGENCE_THRESHOLD {
            converged = true;
            break;
        }
    }

    if !converged {
        return Err(TrackerError::NonConvergent(MAX_ITERATIONS));
    }

    let b_sq = WGS84_B.powi(2);
    let u_sq = cos_sq_alpha * (WGS84_A.powi(2) - b_sq) / b_sq;
    let a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));

    let delta_sigma = b
        * sin_sigma
        * (cos_2sigma_m
            + b / 4.0
                * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                    - b / 6.0
                        * cos_2sigma_m
                        * (-3.0 + 4.0 * sin_sigma.powi(2))
                        * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));

    let meters = WGS84_B * a * (sigma - delta_sigma);

    let value = match unit {
        DistanceUnit::Meters => meters,
        DistanceUnit::Miles => meters / 1000.0 * MILES_PER_KILOMETER,
    };

    Ok(round_to(value, 6))
}

/// Round to a fixed number of decimals
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
