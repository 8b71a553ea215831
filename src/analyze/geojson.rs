//! Minimal GeoJSON reading and writing over `serde_json::Value`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use geo::{Coord, Geometry, LineString, MultiPolygon, Point, Polygon};
use serde_json::{json, Map, Value};

use cityscope::models::Crs;

/// A GeoJSON feature: its geometry (if any) and flattened properties.
#[derive(Debug, Clone)]
pub struct RawFeature {
    pub geometry: Option<Geometry<f64>>,
    pub properties: BTreeMap<String, String>,
}

impl RawFeature {
    /// Polygonal geometry as a MultiPolygon; None for other kinds.
    pub fn multi_polygon(&self) -> Option<MultiPolygon<f64>> {
        match self.geometry.as_ref()? {
            Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p.clone()])),
            Geometry::MultiPolygon(mp) => Some(mp.clone()),
            _ => None,
        }
    }

    pub fn point(&self) -> Option<Point<f64>> {
        match self.geometry.as_ref()? {
            Geometry::Point(p) => Some(*p),
            _ => None,
        }
    }

    pub fn property(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .find_map(|key| self.properties.get(*key))
            .map(String::as_str)
    }
}

/// A parsed GeoJSON file.
#[derive(Debug, Clone)]
pub struct FeatureFile {
    pub features: Vec<RawFeature>,
    /// CRS declared by a legacy `crs` member, if any
    pub crs: Option<Crs>,
}

pub fn read_features(path: &Path) -> Result<FeatureFile> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse GeoJSON {}", path.display()))?;
    parse_document(&value).with_context(|| format!("Invalid GeoJSON in {}", path.display()))
}

fn parse_document(value: &Value) -> Result<FeatureFile> {
    let crs = declared_crs(value)?;
    let features = match value["type"].as_str() {
        Some("FeatureCollection") => value["features"]
            .as_array()
            .ok_or_else(|| anyhow!("FeatureCollection without a features array"))?
            .iter()
            .map(parse_feature)
            .collect::<Result<Vec<_>>>()?,
        Some("Feature") => vec![parse_feature(value)?],
        Some(_) => vec![RawFeature {
            geometry: parse_geometry(value)?,
            properties: BTreeMap::new(),
        }],
        None => bail!("missing \"type\" member"),
    };
    Ok(FeatureFile { features, crs })
}

/// Read the pre-RFC 7946 `crs` member, e.g. `urn:ogc:def:crs:EPSG::32720`.
fn declared_crs(value: &Value) -> Result<Option<Crs>> {
    let Some(name) = value["crs"]["properties"]["name"].as_str() else {
        return Ok(None);
    };
    if name.ends_with("CRS84") {
        return Ok(Some(Crs::Wgs84));
    }
    let code = name
        .rsplit(':')
        .next()
        .and_then(|code| code.parse::<u32>().ok())
        .ok_or_else(|| anyhow!("unrecognised crs name {name}"))?;
    Ok(Some(Crs::from_epsg(code)?))
}

fn parse_feature(value: &Value) -> Result<RawFeature> {
    let geometry = match value.get("geometry") {
        Some(geometry) if !geometry.is_null() => parse_geometry(geometry)?,
        _ => None,
    };
    let mut properties = BTreeMap::new();
    if let Some(props) = value["properties"].as_object() {
        for (key, value) in props {
            let text = match value {
                Value::Null => continue,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            properties.insert(key.clone(), text);
        }
    }
    Ok(RawFeature {
        geometry,
        properties,
    })
}

/// Parse a geometry object. Kinds other than points and polygons are
/// returned as None.
fn parse_geometry(value: &Value) -> Result<Option<Geometry<f64>>> {
    let coords = &value["coordinates"];
    let geometry = match value["type"].as_str() {
        Some("Point") => Some(Geometry::Point(Point::from(parse_coord(coords)?))),
        Some("Polygon") => Some(Geometry::Polygon(parse_polygon(coords)?)),
        Some("MultiPolygon") => {
            let polygons = as_array(coords, "MultiPolygon coordinates")?
                .iter()
                .map(parse_polygon)
                .collect::<Result<Vec<_>>>()?;
            Some(Geometry::MultiPolygon(MultiPolygon::new(polygons)))
        }
        Some(_) => None,
        None => bail!("geometry without a type"),
    };
    Ok(geometry)
}

fn parse_polygon(value: &Value) -> Result<Polygon<f64>> {
    let rings = as_array(value, "polygon rings")?;
    let Some((exterior, interiors)) = rings.split_first() else {
        bail!("polygon without an exterior ring");
    };
    let interiors = interiors
        .iter()
        .map(parse_ring)
        .collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(parse_ring(exterior)?, interiors))
}

fn parse_ring(value: &Value) -> Result<LineString<f64>> {
    let mut points = as_array(value, "ring")?
        .iter()
        .map(parse_coord)
        .collect::<Result<Vec<_>>>()?;
    if let (Some(first), Some(last)) = (points.first().copied(), points.last()) {
        if first != *last {
            points.push(first);
        }
    }
    Ok(LineString::new(points))
}

fn parse_coord(value: &Value) -> Result<Coord<f64>> {
    let pair = as_array(value, "position")?;
    match (
        pair.first().and_then(Value::as_f64),
        pair.get(1).and_then(Value::as_f64),
    ) {
        (Some(x), Some(y)) => Ok(Coord { x, y }),
        _ => bail!("position must hold two numbers, got {value}"),
    }
}

fn as_array<'a>(value: &'a Value, what: &str) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| anyhow!("{what} must be an array"))
}

fn multi_polygon_json(mp: &MultiPolygon<f64>) -> Value {
    let ring = |ls: &LineString<f64>| -> Vec<[f64; 2]> { ls.coords().map(|c| [c.x, c.y]).collect() };
    let polygons: Vec<Value> = mp
        .0
        .iter()
        .map(|polygon| {
            let mut rings = vec![ring(polygon.exterior())];
            rings.extend(polygon.interiors().iter().map(ring));
            json!(rings)
        })
        .collect();
    json!({ "type": "MultiPolygon", "coordinates": polygons })
}

/// Write polygons with their properties as a FeatureCollection.
pub fn write_features(
    path: &Path,
    features: &[(MultiPolygon<f64>, Map<String, Value>)],
    crs: Crs,
) -> Result<()> {
    let features: Vec<Value> = features
        .iter()
        .map(|(geometry, properties)| {
            json!({
                "type": "Feature",
                "geometry": multi_polygon_json(geometry),
                "properties": properties,
            })
        })
        .collect();

    let mut collection = json!({
        "type": "FeatureCollection",
        "features": features,
    });
    if crs != Crs::Wgs84 {
        collection["crs"] = json!({
            "type": "name",
            "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", crs.epsg()) },
        });
    }

    let bytes = serde_json::to_vec(&collection).context("Failed to serialize GeoJSON")?;
    fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_feature_collection() {
        let doc = json!({
            "type": "FeatureCollection",
            "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::32720" } },
            "features": [
                {
                    "type": "Feature",
                    "properties": { "landuse": "residential", "levels": 3, "note": null },
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[0, 0], [10, 0], [10, 10], [0, 10]]]
                    }
                },
                {
                    "type": "Feature",
                    "properties": { "amenity": "school" },
                    "geometry": { "type": "Point", "coordinates": [5.5, 6.5] }
                },
                { "type": "Feature", "properties": {}, "geometry": null }
            ]
        });
        let file = parse_document(&doc).unwrap();

        assert_eq!(file.crs, Some(Crs::Utm { zone: 20, south: true }));
        assert_eq!(file.features.len(), 3);

        let polygon = file.features[0].multi_polygon().unwrap();
        // Ring closed on read
        assert_eq!(polygon.0[0].exterior().0.len(), 5);
        assert_eq!(file.features[0].properties["levels"], "3");
        assert!(!file.features[0].properties.contains_key("note"));

        assert_eq!(file.features[1].point(), Some(Point::new(5.5, 6.5)));
        assert_eq!(file.features[1].property(&["name", "amenity"]), Some("school"));
        assert!(file.features[2].geometry.is_none());
    }

    #[test]
    fn test_bad_position_rejected() {
        let doc = json!({ "type": "Point", "coordinates": ["a", 1] });
        assert!(parse_document(&doc).is_err());
    }

    #[test]
    fn test_write_features() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cells.geojson");
        let square = MultiPolygon::new(vec![Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
            vec![],
        )]);
        let mut props = Map::new();
        props.insert("cell_id".to_string(), json!("r0_c0"));
        write_features(&path, &[(square, props)], Crs::Wgs84).unwrap();

        let back = read_features(&path).unwrap();
        assert_eq!(back.crs, None);
        assert_eq!(back.features.len(), 1);
        assert_eq!(back.features[0].properties["cell_id"], "r0_c0");
        assert!(back.features[0].multi_polygon().is_some());
    }
}
