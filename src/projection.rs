use geo::{coord, Coord, MapCoords, MultiPolygon, Rect};
use serde::Deserialize;
use std::f64::consts::PI;

const EARTH_RADIUS: f64 = 6_378_137.0;
// Web Mercator cut-off latitude.
const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

/// Map projection applied to every layer before drawing.
///
/// Plate carrée keeps longitude/latitude degrees; the others produce metres on
/// a spherical earth.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Projection {
    #[default]
    PlateCarree,
    Mercator,
    AlbersEqualArea {
        #[serde(default = "default_central_longitude")]
        central_longitude: f64,
        #[serde(default = "default_latitude_of_origin")]
        latitude_of_origin: f64,
        #[serde(default = "default_standard_parallels")]
        standard_parallels: [f64; 2],
    },
}

// Conterminous-US Albers parameters.
fn default_central_longitude() -> f64 {
    -96.0
}
fn default_latitude_of_origin() -> f64 {
    37.5
}
fn default_standard_parallels() -> [f64; 2] {
    [29.5, 45.5]
}

impl Projection {
    pub fn validate(&self) -> Result<(), String> {
        if let Projection::AlbersEqualArea {
            standard_parallels: [p1, p2],
            ..
        } = self
        {
            if (p1 + p2).abs() < 1e-9 {
                return Err("albers standard parallels must not be symmetric about the equator".into());
            }
            if p1.abs() > 90.0 || p2.abs() > 90.0 {
                return Err("albers standard parallels must be within -90..90".into());
            }
        }
        Ok(())
    }

    /// Projects a longitude/latitude pair in degrees.
    pub fn project(&self, lon: f64, lat: f64) -> Coord<f64> {
        match self {
            Projection::PlateCarree => coord! { x: lon, y: lat },
            Projection::Mercator => {
                let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
                coord! {
                    x: EARTH_RADIUS * lon.to_radians(),
                    y: EARTH_RADIUS * (PI / 4.0 + lat / 2.0).tan().ln(),
                }
            }
            Projection::AlbersEqualArea {
                central_longitude,
                latitude_of_origin,
                standard_parallels: [p1, p2],
            } => {
                let (phi1, phi2) = (p1.to_radians(), p2.to_radians());
                let n = (phi1.sin() + phi2.sin()) / 2.0;
                let c = phi1.cos().powi(2) + 2.0 * n * phi1.sin();
                let rho = |phi: f64| (c - 2.0 * n * phi.sin()).max(0.0).sqrt() / n;
                let rho0 = rho(latitude_of_origin.to_radians());
                let r = rho(lat.to_radians());
                let theta = n * wrap_longitude(lon - central_longitude).to_radians();
                coord! {
                    x: EARTH_RADIUS * r * theta.sin(),
                    y: EARTH_RADIUS * (rho0 - r * theta.cos()),
                }
            }
        }
    }

    pub fn project_geometry(&self, geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        if *self == Projection::PlateCarree {
            return geometry.clone();
        }
        geometry.map_coords(|c| self.project(c.x, c.y))
    }

    /// Bounds of the projected lon/lat box. Edges are densified because
    /// straight lines in degrees curve under most projections.
    pub fn project_extent(&self, xlim: [f64; 2], ylim: [f64; 2]) -> Rect<f64> {
        const STEPS: usize = 32;
        let mut min = coord! { x: f64::INFINITY, y: f64::INFINITY };
        let mut max = coord! { x: f64::NEG_INFINITY, y: f64::NEG_INFINITY };
        for i in 0..=STEPS {
            let t = i as f64 / STEPS as f64;
            let lon = xlim[0] + (xlim[1] - xlim[0]) * t;
            let lat = ylim[0] + (ylim[1] - ylim[0]) * t;
            for p in [
                self.project(lon, ylim[0]),
                self.project(lon, ylim[1]),
                self.project(xlim[0], lat),
                self.project(xlim[1], lat),
            ] {
                min.x = min.x.min(p.x);
                min.y = min.y.min(p.y);
                max.x = max.x.max(p.x);
                max.y = max.y.max(p.y);
            }
        }
        Rect::new(min, max)
    }
}

fn wrap_longitude(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn albers_us() -> Projection {
        Projection::AlbersEqualArea {
            central_longitude: -96.0,
            latitude_of_origin: 37.5,
            standard_parallels: [29.5, 45.5],
        }
    }

    #[test]
    fn plate_carree_is_identity() {
        let p = Projection::PlateCarree.project(-120.5, 38.25);
        assert_eq!((p.x, p.y), (-120.5, 38.25));
    }

    #[test]
    fn mercator_origin_and_clamping() {
        let origin = Projection::Mercator.project(0.0, 0.0);
        assert!(origin.x.abs() < 1e-6 && origin.y.abs() < 1e-6);
        let pole = Projection::Mercator.project(0.0, 90.0);
        assert!(pole.y.is_finite());
    }

    #[test]
    fn albers_origin_maps_to_zero_and_preserves_orientation() {
        let proj = albers_us();
        let origin = proj.project(-96.0, 37.5);
        assert!(origin.x.abs() < 1e-6 && origin.y.abs() < 1e-6);

        let east = proj.project(-80.0, 37.5);
        let north = proj.project(-96.0, 45.0);
        assert!(east.x > 0.0);
        assert!(north.y > 0.0);
    }

    #[test]
    fn extent_covers_projected_corners() {
        let proj = albers_us();
        let rect = proj.project_extent([-125.0, -66.0], [24.0, 50.0]);
        for (lon, lat) in [(-125.0, 24.0), (-66.0, 50.0), (-96.0, 50.0)] {
            let p = proj.project(lon, lat);
            assert!(p.x >= rect.min().x - 1e-6 && p.x <= rect.max().x + 1e-6);
            assert!(p.y >= rect.min().y - 1e-6 && p.y <= rect.max().y + 1e-6);
        }
    }

    #[test]
    fn deserializes_tagged_projection() {
        let proj: Projection =
            serde_yaml::from_str("name: albers_equal_area\ncentral_longitude: -100").unwrap();
        assert_eq!(
            proj,
            Projection::AlbersEqualArea {
                central_longitude: -100.0,
                latitude_of_origin: 37.5,
                standard_parallels: [29.5, 45.5],
            }
        );
        let merc: Projection = serde_yaml::from_str("name: mercator").unwrap();
        assert_eq!(merc, Projection::Mercator);
        assert!(albers_us().validate().is_ok());
    }
}
