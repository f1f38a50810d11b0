//! Coordinate transformation for location geometry.
//!
//! The DDL publishes locations in ETRS89 / UTM zone 31N (EPSG:25831); records
//! are stored in WGS84 longitude/latitude (EPSG:4326). Transverse Mercator
//! is implemented directly with the Snyder series, accurate to well below a
//! metre inside a zone. ETRS89 and WGS84 are treated as the same datum.

use std::f64::consts::PI;

use thiserror::Error;

/// UTM scale factor on the central meridian.
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeoError {
    #[error("unsupported coordinate system EPSG:{0}")]
    UnsupportedCrs(u32),
    #[error("coordinates ({0}, {1}) are outside the valid range")]
    OutOfRange(f64, f64),
}

/// Reference ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    /// Semi-major axis (meters).
    pub a: f64,
    /// Flattening.
    pub f: f64,
}

impl Ellipsoid {
    pub const GRS80: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        f: 1.0 / 298.257_222_101,
    };
    pub const WGS84: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        f: 1.0 / 298.257_223_563,
    };

    fn e2(&self) -> f64 {
        self.f * (2.0 - self.f)
    }
}

/// The coordinate systems the service can read or write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Crs {
    /// EPSG:4326, x = longitude, y = latitude, degrees.
    Geographic,
    /// Northern-hemisphere UTM zone, x = easting, y = northing, meters.
    Utm { zone: u8, ellipsoid: Ellipsoid },
}

impl Crs {
    /// Recognizes EPSG:4326, ETRS89 UTM zones 28N–38N (258NN) and WGS84 UTM
    /// north zones (326NN).
    pub fn from_epsg(code: u32) -> Option<Crs> {
        match code {
            4326 => Some(Crs::Geographic),
            25828..=25838 => Some(Crs::Utm {
                zone: (code - 25800) as u8,
                ellipsoid: Ellipsoid::GRS80,
            }),
            32601..=32660 => Some(Crs::Utm {
                zone: (code - 32600) as u8,
                ellipsoid: Ellipsoid::WGS84,
            }),
            _ => None,
        }
    }
}

fn central_meridian(zone: u8) -> f64 {
    (f64::from(zone) * 6.0 - 183.0).to_radians()
}

/// Meridian arc length from the equator to latitude `phi` (radians).
fn meridian_arc(phi: f64, ell: Ellipsoid) -> f64 {
    let e2 = ell.e2();
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    ell.a
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

/// Geographic (degrees) → UTM easting/northing.
fn utm_forward(lon: f64, lat: f64, zone: u8, ell: Ellipsoid) -> (f64, f64) {
    let e2 = ell.e2();
    let ep2 = e2 / (1.0 - e2);
    let phi = lat.to_radians();
    let (sin_phi, cos_phi) = phi.sin_cos();
    let tan_phi = phi.tan();

    let n = ell.a / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let c = ep2 * cos_phi * cos_phi;
    let a = cos_phi * (lon.to_radians() - central_meridian(zone));
    let m = meridian_arc(phi, ell);

    let x = K0
        * n
        * (a + (1.0 - t + c) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
        + FALSE_EASTING;
    let y = K0
        * (m + n
            * tan_phi
            * (a * a / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));
    (x, y)
}

/// UTM easting/northing → geographic (degrees).
fn utm_inverse(x: f64, y: f64, zone: u8, ell: Ellipsoid) -> (f64, f64) {
    let e2 = ell.e2();
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let ep2 = e2 / (1.0 - e2);
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());

    let m = y / K0;
    let mu = m / (ell.a * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

    // Footpoint latitude.
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let (sin1, cos1) = phi1.sin_cos();
    let tan1 = phi1.tan();
    let c1 = ep2 * cos1 * cos1;
    let t1 = tan1 * tan1;
    let w = 1.0 - e2 * sin1 * sin1;
    let n1 = ell.a / w.sqrt();
    let r1 = ell.a * (1.0 - e2) / w.powf(1.5);
    let d = (x - FALSE_EASTING) / (n1 * K0);

    let phi = phi1
        - (n1 * tan1 / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);
    let lambda = central_meridian(zone)
        + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1)
                * d.powi(5)
                / 120.0)
            / cos1;

    (lambda * 180.0 / PI, phi * 180.0 / PI)
}

/// Transforms a point between two EPSG coordinate systems.
///
/// Geographic coordinates are (longitude, latitude) in degrees, the GeoJSON
/// axis order.
pub fn transform_point(x: f64, y: f64, source_epsg: u32, target_epsg: u32) -> Result<(f64, f64), GeoError> {
    let source = Crs::from_epsg(source_epsg).ok_or(GeoError::UnsupportedCrs(source_epsg))?;
    let target = Crs::from_epsg(target_epsg).ok_or(GeoError::UnsupportedCrs(target_epsg))?;

    if !x.is_finite() || !y.is_finite() {
        return Err(GeoError::OutOfRange(x, y));
    }
    if source == target {
        return Ok((x, y));
    }

    let (lon, lat) = match source {
        Crs::Geographic => (x, y),
        Crs::Utm { zone, ellipsoid } => utm_inverse(x, y, zone, ellipsoid),
    };
    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        return Err(GeoError::OutOfRange(x, y));
    }

    Ok(match target {
        Crs::Geographic => (lon, lat),
        Crs::Utm { zone, ellipsoid } => utm_forward(lon, lat, zone, ellipsoid),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn test_central_meridian_on_equator_is_false_easting() {
        let (x, y) = transform_point(3.0, 0.0, 4326, 25831).unwrap();
        assert!(close(x, 500_000.0, 1e-6), "x = {}", x);
        assert!(close(y, 0.0, 1e-6), "y = {}", y);
    }

    #[test]
    fn test_known_point_on_central_meridian() {
        // 52°N on the zone 31 central meridian: northing 5 761 038.2 m.
        let (x, y) = transform_point(3.0, 52.0, 4326, 25831).unwrap();
        assert!(close(x, 500_000.0, 1e-6));
        assert!(close(y, 5_761_038.21, 0.05), "y = {}", y);
    }

    #[test]
    fn test_ddl_location_lands_in_the_netherlands() {
        // Roughly Amsterdam in EPSG:25831.
        let (lon, lat) = transform_point(629_638.04, 5_803_631.23, 25831, 4326).unwrap();
        assert!(close(lon, 4.9041, 1e-5), "lon = {}", lon);
        assert!(close(lat, 52.3676, 1e-5), "lat = {}", lat);
    }

    #[test]
    fn test_inverse_recovers_forward_input() {
        for &(lon, lat) in &[(1.2, 50.5), (4.47917, 51.9225), (6.9, 53.4), (0.1, 55.0)] {
            let (x, y) = transform_point(lon, lat, 4326, 25831).unwrap();
            let (lon2, lat2) = transform_point(x, y, 25831, 4326).unwrap();
            assert!(close(lon, lon2, 1e-6) && close(lat, lat2, 1e-6), "({}, {}) → ({}, {})", lon, lat, lon2, lat2);
        }
    }

    #[test]
    fn test_same_system_is_identity() {
        assert_eq!(transform_point(12.5, 99.0, 25831, 25831).unwrap(), (12.5, 99.0));
    }

    #[test]
    fn test_unsupported_codes_are_rejected() {
        assert_eq!(transform_point(0.0, 0.0, 28992, 4326), Err(GeoError::UnsupportedCrs(28992)));
        assert_eq!(transform_point(0.0, 0.0, 4326, 3857), Err(GeoError::UnsupportedCrs(3857)));
    }

    #[test]
    fn test_epsg_lookup() {
        assert_eq!(Crs::from_epsg(4326), Some(Crs::Geographic));
        assert!(matches!(Crs::from_epsg(25831), Some(Crs::Utm { zone: 31, .. })));
        assert!(matches!(Crs::from_epsg(32632), Some(Crs::Utm { zone: 32, .. })));
        assert_eq!(Crs::from_epsg(25840), None);
    }

    #[test]
    fn test_non_finite_input_is_out_of_range() {
        assert!(matches!(
            transform_point(f64::NAN, 0.0, 25831, 4326),
            Err(GeoError::OutOfRange(..))
        ));
    }
}
