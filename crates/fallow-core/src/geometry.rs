//! Labelled vector geometries in map coordinates.
//!
//! The serde shape follows GeoJSON (`{"type": "Polygon", "coordinates": ...}`)
//! so sample files exported from GIS tools load directly.

use serde::{Deserialize, Serialize};

use crate::raster::BBox;
use crate::{Error, Result};

/// A closed ring of `[x, y]` vertices. The closing vertex may be repeated.
pub type Ring = Vec<[f64; 2]>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: [f64; 2] },
    /// Exterior ring followed by holes.
    Polygon { coordinates: Vec<Ring> },
    MultiPolygon { coordinates: Vec<Vec<Ring>> },
}

impl Geometry {
    pub fn point(x: f64, y: f64) -> Self {
        Geometry::Point { coordinates: [x, y] }
    }

    pub fn polygon(exterior: Ring) -> Self {
        Geometry::Polygon { coordinates: vec![exterior] }
    }

    /// Bounding box of all vertices; `None` for geometries with no vertices.
    pub fn bbox(&self) -> Option<BBox> {
        let mut vertices: Box<dyn Iterator<Item = &[f64; 2]> + '_> = match self {
            Geometry::Point { coordinates } => Box::new(std::iter::once(coordinates)),
            Geometry::Polygon { coordinates } => Box::new(coordinates.iter().flatten()),
            Geometry::MultiPolygon { coordinates } => {
                Box::new(coordinates.iter().flatten().flatten())
            }
        };
        let first = vertices.next()?;
        let mut bb = BBox::new(first[0], first[1], first[0], first[1]);
        for [x, y] in vertices {
            bb.min_x = bb.min_x.min(*x);
            bb.min_y = bb.min_y.min(*y);
            bb.max_x = bb.max_x.max(*x);
            bb.max_y = bb.max_y.max(*y);
        }
        Some(bb)
    }

    /// Even-odd containment test. Points contain nothing.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        match self {
            Geometry::Point { .. } => false,
            Geometry::Polygon { coordinates } => rings_contain(coordinates, x, y),
            Geometry::MultiPolygon { coordinates } => {
                coordinates.iter().any(|rings| rings_contain(rings, x, y))
            }
        }
    }
}

/// Ray casting across every ring, so holes toggle containment off.
fn rings_contain(rings: &[Ring], x: f64, y: f64) -> bool {
    let mut inside = false;
    for ring in rings {
        let n = ring.len();
        if n < 3 {
            continue;
        }
        let mut j = n - 1;
        for i in 0..n {
            let [xi, yi] = ring[i];
            let [xj, yj] = ring[j];
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
    }
    inside
}

/// A geometry with its integer class attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledGeometry {
    pub geometry: Geometry,
    pub label: i64,
}

impl LabeledGeometry {
    pub fn new(geometry: Geometry, label: i64) -> Self {
        Self { geometry, label }
    }
}

#[derive(Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Deserialize)]
struct Feature {
    geometry: Geometry,
    #[serde(default)]
    properties: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Parse a GeoJSON FeatureCollection, reading each feature's class from
/// `properties[class_property]`, which must be an integer.
pub fn parse_feature_collection(json: &str, class_property: &str) -> Result<Vec<LabeledGeometry>> {
    let fc: FeatureCollection = serde_json::from_str(json)?;
    fc.features
        .into_iter()
        .enumerate()
        .map(|(i, f)| {
            let label = f
                .properties
                .as_ref()
                .and_then(|p| p.get(class_property))
                .and_then(serde_json::Value::as_i64)
                .ok_or_else(|| {
                    Error::invalid(
                        "class_property",
                        class_property,
                        format!("feature {i} has no integer value for it"),
                    )
                })?;
            Ok(LabeledGeometry::new(f.geometry, label))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, size: f64) -> Ring {
        vec![[x0, y0], [x0 + size, y0], [x0 + size, y0 + size], [x0, y0 + size], [x0, y0]]
    }

    #[test]
    fn polygon_with_hole_excludes_hole() {
        let g = Geometry::Polygon { coordinates: vec![square(0.0, 0.0, 10.0), square(4.0, 4.0, 2.0)] };
        assert!(g.contains(1.0, 1.0));
        assert!(!g.contains(5.0, 5.0));
        assert!(!g.contains(11.0, 5.0));
    }

    #[test]
    fn multipolygon_contains_either_part() {
        let g = Geometry::MultiPolygon {
            coordinates: vec![vec![square(0.0, 0.0, 1.0)], vec![square(5.0, 5.0, 1.0)]],
        };
        assert!(g.contains(0.5, 0.5));
        assert!(g.contains(5.5, 5.5));
        assert!(!g.contains(3.0, 3.0));
    }

    #[test]
    fn bbox_spans_vertices() {
        let g = Geometry::polygon(vec![[1.0, 2.0], [4.0, -1.0], [3.0, 6.0]]);
        assert_eq!(g.bbox(), Some(BBox::new(1.0, -1.0, 4.0, 6.0)));
    }

    #[test]
    fn feature_collection_reads_class_property() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1.0, 2.0]},
                 "properties": {"landcover": 1}},
                {"type": "Feature", "geometry": {"type": "Polygon",
                 "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]},
                 "properties": {"landcover": 0, "name": "field"}}
            ]
        }"#;
        let geoms = parse_feature_collection(json, "landcover").unwrap();
        assert_eq!(geoms.len(), 2);
        assert_eq!(geoms[0], LabeledGeometry::new(Geometry::point(1.0, 2.0), 1));
        assert_eq!(geoms[1].label, 0);
    }

    #[test]
    fn missing_class_property_is_rejected() {
        let json = r#"{"features": [{"geometry": {"type": "Point", "coordinates": [0, 0]},
                        "properties": {"class": 1}}]}"#;
        assert!(matches!(
            parse_feature_collection(json, "landcover"),
            Err(Error::InvalidParameter { name: "class_property", .. })
        ));
    }
}
