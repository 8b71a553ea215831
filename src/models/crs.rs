//! Coordinate reference systems understood by the projector.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CrsError;

/// A supported CRS, identified by its EPSG code.
///
/// Geographic systems store coordinates as (lon, lat) degrees and are only
/// valid for storage. Projected systems use metres and are the only ones in
/// which area, length or centroid arithmetic is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    /// WGS84 lon/lat (EPSG:4326)
    Wgs84,
    /// NAD83 lon/lat (EPSG:4269)
    Nad83,
    /// WGS84 / UTM (EPSG:326zz north, 327zz south)
    Utm { zone: u8, south: bool },
    /// NAD83 / UTM, northern hemisphere only (EPSG:269zz)
    Nad83Utm { zone: u8 },
}

impl Crs {
    /// Build a CRS from an EPSG code.
    pub fn from_epsg(code: u32) -> Result<Self, CrsError> {
        let crs = match code {
            4326 => Crs::Wgs84,
            4269 => Crs::Nad83,
            32601..=32660 => Crs::Utm {
                zone: (code - 32600) as u8,
                south: false,
            },
            32701..=32760 => Crs::Utm {
                zone: (code - 32700) as u8,
                south: true,
            },
            26901..=26923 => Crs::Nad83Utm {
                zone: (code - 26900) as u8,
            },
            _ => return Err(CrsError::Unsupported(format!("EPSG:{code}"))),
        };
        Ok(crs)
    }

    /// The EPSG code of this CRS
    pub fn epsg(&self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::Nad83 => 4269,
            Crs::Utm { zone, south: false } => 32600 + *zone as u32,
            Crs::Utm { zone, south: true } => 32700 + *zone as u32,
            Crs::Nad83Utm { zone } => 26900 + *zone as u32,
        }
    }

    /// True for degree-based systems
    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Wgs84 | Crs::Nad83)
    }

    /// WGS84 UTM zone containing a lon/lat position.
    pub fn utm_for(lon: f64, lat: f64) -> Self {
        let zone = (((lon + 180.0) / 6.0).floor() as i32 + 1).clamp(1, 60) as u8;
        Crs::Utm {
            zone,
            south: lat < 0.0,
        }
    }

    /// PROJ.4 definition used to build the transformation.
    pub fn proj4(&self) -> String {
        match self {
            Crs::Wgs84 => "+proj=longlat +datum=WGS84 +no_defs +type=crs".to_string(),
            Crs::Nad83 => "+proj=longlat +datum=NAD83 +no_defs +type=crs".to_string(),
            Crs::Utm { zone, south } => {
                let south = if *south { " +south" } else { "" };
                format!("+proj=utm +zone={zone}{south} +datum=WGS84 +units=m +no_defs +type=crs")
            }
            Crs::Nad83Utm { zone } => {
                format!("+proj=utm +zone={zone} +datum=NAD83 +units=m +no_defs +type=crs")
            }
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for Crs {
    type Err = CrsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let code = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
            .unwrap_or(trimmed);
        let code: u32 = code
            .parse()
            .map_err(|_| CrsError::Unsupported(s.to_string()))?;
        Crs::from_epsg(code)
    }
}

impl TryFrom<String> for Crs {
    type Error = CrsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epsg_round_trip() {
        for code in [4326, 4269, 32720, 32633, 26910] {
            let crs = Crs::from_epsg(code).unwrap();
            assert_eq!(crs.epsg(), code);
            assert_eq!(crs.to_string().parse::<Crs>().unwrap(), crs);
        }
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!("epsg:4326".parse::<Crs>().unwrap(), Crs::Wgs84);
        assert_eq!("32720".parse::<Crs>().unwrap(), Crs::Utm { zone: 20, south: true });
        assert!("EPSG:3857".parse::<Crs>().is_err());
        assert!("wgs84".parse::<Crs>().is_err());
    }

    #[test]
    fn test_utm_for_cordoba() {
        // Córdoba, Argentina
        let crs = Crs::utm_for(-64.18, -31.42);
        assert_eq!(crs, Crs::Utm { zone: 20, south: true });
        assert_eq!(crs.epsg(), 32720);
        assert!(!crs.is_geographic());
        assert!(Crs::Wgs84.is_geographic());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Crs::Utm { zone: 33, south: false }).unwrap();
        assert_eq!(json, "\"EPSG:32633\"");
        let crs: Crs = serde_json::from_str("\"EPSG:4269\"").unwrap();
        assert_eq!(crs, Crs::Nad83);
    }
}
