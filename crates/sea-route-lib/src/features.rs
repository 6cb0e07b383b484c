//! GeoJSON feature collections and detail-table merging.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A GeoJSON `FeatureCollection`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default = "feature_collection_tag")]
    pub kind: String,
    #[serde(default)]
    pub features: Vec<Feature>,
}

fn feature_collection_tag() -> String {
    "FeatureCollection".to_string()
}

fn feature_tag() -> String {
    "Feature".to_string()
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: feature_collection_tag(),
            features,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default = "feature_tag")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub geometry: Option<Geometry>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn new(geometry: Geometry, properties: Map<String, Value>) -> Self {
        Self {
            kind: feature_tag(),
            id: None,
            geometry: Some(geometry),
            properties,
        }
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Positions are `[longitude, latitude]`, as in GeoJSON. Any altitude or
/// further members in the source document are dropped on load.
pub type Position = [f64; 2];

/// A position read from two or more numbers.
struct Lenient(Position);

impl<'de> Deserialize<'de> for Lenient {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let values = Vec::<f64>::deserialize(deserializer)?;
        match values.as_slice() {
            [lng, lat, ..] => Ok(Lenient([*lng, *lat])),
            _ => Err(serde::de::Error::invalid_length(
                values.len(),
                &"a position of at least two numbers",
            )),
        }
    }
}

fn position<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Position, D::Error> {
    Ok(Lenient::deserialize(d)?.0)
}

fn positions<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Vec<Position>, D::Error> {
    Ok(Vec::<Lenient>::deserialize(d)?.into_iter().map(|p| p.0).collect())
}

fn rings<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Vec<Vec<Position>>, D::Error> {
    Ok(Vec::<Vec<Lenient>>::deserialize(d)?
        .into_iter()
        .map(|ring| ring.into_iter().map(|p| p.0).collect())
        .collect())
}

fn polygons<'de, D: serde::Deserializer<'de>>(
    d: D,
) -> Result<Vec<Vec<Vec<Position>>>, D::Error> {
    Ok(Vec::<Vec<Vec<Lenient>>>::deserialize(d)?
        .into_iter()
        .map(|poly| {
            poly.into_iter()
                .map(|ring| ring.into_iter().map(|p| p.0).collect())
                .collect()
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point {
        #[serde(deserialize_with = "position")]
        coordinates: Position,
    },
    MultiPoint {
        #[serde(deserialize_with = "positions")]
        coordinates: Vec<Position>,
    },
    LineString {
        #[serde(deserialize_with = "positions")]
        coordinates: Vec<Position>,
    },
    MultiLineString {
        #[serde(deserialize_with = "rings")]
        coordinates: Vec<Vec<Position>>,
    },
    Polygon {
        #[serde(deserialize_with = "rings")]
        coordinates: Vec<Vec<Position>>,
    },
    MultiPolygon {
        #[serde(deserialize_with = "polygons")]
        coordinates: Vec<Vec<Vec<Position>>>,
    },
}

impl Geometry {
    /// Every line part of the geometry (polygon rings included).
    pub fn lines(&self) -> Vec<&[Position]> {
        match self {
            Geometry::Point { .. } | Geometry::MultiPoint { .. } => Vec::new(),
            Geometry::LineString { coordinates } => vec![coordinates.as_slice()],
            Geometry::MultiLineString { coordinates } | Geometry::Polygon { coordinates } => {
                coordinates.iter().map(Vec::as_slice).collect()
            }
            Geometry::MultiPolygon { coordinates } => coordinates
                .iter()
                .flat_map(|poly| poly.iter().map(Vec::as_slice))
                .collect(),
        }
    }

    pub fn points(&self) -> Vec<Position> {
        match self {
            Geometry::Point { coordinates } => vec![*coordinates],
            Geometry::MultiPoint { coordinates } => coordinates.clone(),
            _ => Vec::new(),
        }
    }
}

/// Merge per-record details into each feature's properties.
///
/// For every feature, the record found in `details` under the feature's
/// `join_property` value is copied over its properties; detail keys win on
/// conflict. Features without a matching record are left untouched.
pub fn merge_details(
    mut collection: FeatureCollection,
    details: &Map<String, Value>,
    join_property: &str,
) -> FeatureCollection {
    let mut merged = 0usize;
    for feature in &mut collection.features {
        let Some(key) = feature.properties.get(join_property).map(join_key) else {
            continue;
        };
        if let Some(Value::Object(record)) = details.get(&key) {
            for (k, v) in record {
                feature.properties.insert(k.clone(), v.clone());
            }
            merged += 1;
        }
    }
    tracing::debug!(
        features = collection.features.len(),
        merged,
        join_property,
        "merged feature details"
    );
    collection
}

fn join_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collection() -> FeatureCollection {
        serde_json::from_value(json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "geometry": {"type": "LineString", "coordinates": [[135.0, 34.0], [136.0, 35.0]]},
                    "properties": {"routeId": "R1", "color": "#111111"}
                },
                {
                    "type": "Feature",
                    "geometry": {"type": "LineString", "coordinates": [[130.0, 33.0], [131.0, 33.5]]},
                    "properties": {"routeId": 7}
                },
                {
                    "type": "Feature",
                    "geometry": {"type": "Point", "coordinates": [139.7, 35.6]},
                    "properties": null
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_merge_details_overrides_and_skips() {
        let details = json!({
            "R1": {"businessName": "Setouchi Ferry", "color": "#ff0000"},
            "7": {"businessName": "Numbered Line"}
        });
        let merged = merge_details(collection(), details.as_object().unwrap(), "routeId");

        let first = &merged.features[0];
        assert_eq!(first.property_str("businessName"), Some("Setouchi Ferry"));
        assert_eq!(first.property_str("color"), Some("#ff0000"));
        assert_eq!(merged.features[1].property_str("businessName"), Some("Numbered Line"));
        assert!(merged.features[2].properties.is_empty());
    }

    #[test]
    fn test_geometry_parts() {
        let fc = collection();
        let line = fc.features[0].geometry.as_ref().unwrap();
        assert_eq!(line.lines().len(), 1);
        assert!(line.points().is_empty());
        let point = fc.features[2].geometry.as_ref().unwrap();
        assert_eq!(point.points(), vec![[139.7, 35.6]]);
    }

    #[test]
    fn test_positions_with_altitude_keep_lng_lat() {
        let fc: FeatureCollection = serde_json::from_value(json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "geometry": {"type": "LineString", "coordinates": [[135, 34, 0], [136, 35, 12.5]]},
                    "properties": {}
                },
                {
                    "type": "Feature",
                    "geometry": {"type": "Point", "coordinates": [139.7, 35.6, 3.0]},
                    "properties": {}
                },
                {
                    "type": "Feature",
                    "geometry": {"type": "Polygon", "coordinates": [[[1, 2, 3], [4, 5, 6], [1, 2, 3]]]},
                    "properties": {}
                }
            ]
        }))
        .unwrap();

        let line = fc.features[0].geometry.as_ref().unwrap();
        assert_eq!(line.lines(), vec![&[[135.0, 34.0], [136.0, 35.0]][..]]);
        let point = fc.features[1].geometry.as_ref().unwrap();
        assert_eq!(point.points(), vec![[139.7, 35.6]]);
        let polygon = fc.features[2].geometry.as_ref().unwrap();
        assert_eq!(polygon.lines()[0].len(), 3);
    }

    #[test]
    fn test_position_needs_two_numbers() {
        let result = serde_json::from_value::<Geometry>(json!({
            "type": "Point",
            "coordinates": [139.7]
        }));
        assert!(result.is_err());
    }
}
