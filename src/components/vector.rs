use std::collections::BTreeMap;

use geo::{
    Area, BoundingRect, Coord, CoordsIter, Geometry, Intersects, LineString, MapCoords, MultiPolygon,
    Point, Polygon, Rect, Validation,
};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    components::bounds::GeoBounds,
    crs_geo::{CoordTransformer, Crs, Reprojector},
    errors::{GeoprocessError, Result},
};

/// Value of a single feature attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

pub type Attributes = BTreeMap<String, AttributeValue>;

/// Geometry of a feature.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Point(Point),
    LineString(LineString),
    Polygon(Polygon),
    MultiPolygon(MultiPolygon),
}

impl Shape {
    pub fn kind(&self) -> &'static str {
        match self {
            Shape::Point(_) => "Point",
            Shape::LineString(_) => "LineString",
            Shape::Polygon(_) => "Polygon",
            Shape::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// Whether the shape can enclose pixel centres.
    pub fn is_areal(&self) -> bool {
        matches!(self, Shape::Polygon(_) | Shape::MultiPolygon(_))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Shape::Point(_) => false,
            Shape::LineString(line) => line.0.is_empty(),
            Shape::Polygon(polygon) => polygon.exterior().0.is_empty(),
            Shape::MultiPolygon(polygons) => polygons.0.is_empty(),
        }
    }

    pub fn is_degenerate(&self) -> bool {
        if self.coords().any(|coord| !(coord.x.is_finite() && coord.y.is_finite())) {
            return true;
        }
        match self {
            Shape::Point(_) => false,
            Shape::LineString(line) => line.lines().all(|segment| segment.start == segment.end),
            Shape::Polygon(polygon) => polygon_is_degenerate(polygon),
            Shape::MultiPolygon(polygons) => {
                polygons.0.is_empty() || polygons.iter().any(polygon_is_degenerate)
            }
        }
    }

    /// OGC validity, self intersecting or overlapping rings are invalid.
    pub fn is_valid(&self) -> bool {
        match self {
            Shape::Point(point) => point.is_valid(),
            Shape::LineString(line) => line.is_valid(),
            Shape::Polygon(polygon) => polygon.is_valid(),
            Shape::MultiPolygon(polygons) => polygons.is_valid(),
        }
    }

    fn coords(&self) -> Box<dyn Iterator<Item = Coord> + '_> {
        match self {
            Shape::Point(point) => Box::new(point.coords_iter()),
            Shape::LineString(line) => Box::new(line.coords_iter()),
            Shape::Polygon(polygon) => Box::new(polygon.coords_iter()),
            Shape::MultiPolygon(polygons) => Box::new(polygons.coords_iter()),
        }
    }

    pub fn bounding_rect(&self) -> Option<Rect> {
        match self {
            Shape::Point(point) => Some(point.bounding_rect()),
            Shape::LineString(line) => line.bounding_rect(),
            Shape::Polygon(polygon) => polygon.bounding_rect(),
            Shape::MultiPolygon(polygons) => polygons.bounding_rect(),
        }
    }

    /// Planar area in CRS units, zero for points and lines.
    pub fn area(&self) -> f64 {
        match self {
            Shape::Polygon(polygon) => polygon.unsigned_area(),
            Shape::MultiPolygon(polygons) => polygons.unsigned_area(),
            _ => 0.,
        }
    }

    /// Boundary inclusive point test, always false for non areal shapes.
    pub fn intersects_point(&self, point: &Point) -> bool {
        match self {
            Shape::Polygon(polygon) => polygon.intersects(point),
            Shape::MultiPolygon(polygons) => polygons.intersects(point),
            _ => false,
        }
    }

    pub fn try_map<C: CoordTransformer>(&self, transformer: &C) -> Result<Self> {
        let transform = |coord: Coord| transformer.transform(coord);
        Ok(match self {
            Shape::Point(point) => Shape::Point(point.try_map_coords(transform)?),
            Shape::LineString(line) => Shape::LineString(line.try_map_coords(transform)?),
            Shape::Polygon(polygon) => Shape::Polygon(polygon.try_map_coords(transform)?),
            Shape::MultiPolygon(polygons) => {
                Shape::MultiPolygon(polygons.try_map_coords(transform)?)
            }
        })
    }

    pub fn to_geometry(&self) -> Geometry {
        match self.clone() {
            Shape::Point(point) => point.into(),
            Shape::LineString(line) => line.into(),
            Shape::Polygon(polygon) => polygon.into(),
            Shape::MultiPolygon(polygons) => polygons.into(),
        }
    }
}

fn polygon_is_degenerate(polygon: &Polygon) -> bool {
    Polygon::new(polygon.exterior().clone(), vec![]).unsigned_area() == 0.
}

impl TryFrom<Geometry> for Shape {
    type Error = GeoprocessError;

    fn try_from(value: Geometry) -> Result<Self> {
        match value {
            Geometry::Point(point) => Ok(Shape::Point(point)),
            Geometry::Line(line) => Ok(Shape::LineString(line.into())),
            Geometry::LineString(line) => Ok(Shape::LineString(line)),
            Geometry::Polygon(polygon) => Ok(Shape::Polygon(polygon)),
            Geometry::MultiPolygon(polygons) => Ok(Shape::MultiPolygon(polygons)),
            Geometry::Rect(rect) => Ok(Shape::Polygon(rect.to_polygon())),
            Geometry::Triangle(triangle) => Ok(Shape::Polygon(triangle.to_polygon())),
            Geometry::MultiPoint(_) => Err(GeoprocessError::UnsupportedGeometry("MultiPoint")),
            Geometry::MultiLineString(_) => {
                Err(GeoprocessError::UnsupportedGeometry("MultiLineString"))
            }
            Geometry::GeometryCollection(_) => {
                Err(GeoprocessError::UnsupportedGeometry("GeometryCollection"))
            }
        }
    }
}

impl From<Point> for Shape {
    fn from(value: Point) -> Self {
        Self::Point(value)
    }
}

impl From<LineString> for Shape {
    fn from(value: LineString) -> Self {
        Self::LineString(value)
    }
}

impl From<Polygon> for Shape {
    fn from(value: Polygon) -> Self {
        Self::Polygon(value)
    }
}

impl From<MultiPolygon> for Shape {
    fn from(value: MultiPolygon) -> Self {
        Self::MultiPolygon(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub shape: Shape,
    pub attributes: Attributes,
}

impl Feature {
    pub fn new(shape: impl Into<Shape>, attributes: Attributes) -> Self {
        Self {
            shape: shape.into(),
            attributes,
        }
    }
}

/// Ordered features sharing one CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorDataset {
    features: Vec<Feature>,
    crs: Option<Crs>,
}

impl VectorDataset {
    pub fn new(features: Vec<Feature>, crs: Option<Crs>) -> Result<Self> {
        if let Some(index) = features
            .iter()
            .position(|feature| feature.shape.is_empty() || feature.shape.is_degenerate())
        {
            return Err(GeoprocessError::DegenerateGeometry { index });
        }
        Ok(Self::from_parts(features, crs))
    }

    /// Features without attributes.
    pub fn from_shapes(
        shapes: impl IntoIterator<Item = impl Into<Shape>>,
        crs: Option<Crs>,
    ) -> Result<Self> {
        let features = shapes
            .into_iter()
            .map(|shape| Feature::new(shape, Attributes::new()))
            .collect();
        Self::new(features, crs)
    }

    /// Skips geometry validation, engine outputs may hold empty shapes.
    pub(crate) fn from_parts(features: Vec<Feature>, crs: Option<Crs>) -> Self {
        Self { features, crs }
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn shapes(&self) -> impl Iterator<Item = &Shape> {
        self.features.iter().map(|feature| &feature.shape)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn crs(&self) -> Option<&Crs> {
        self.crs.as_ref()
    }

    /// Union of the feature bounding rectangles, `None` when no feature has extent.
    pub fn bounds(&self) -> Option<GeoBounds> {
        self.shapes()
            .filter_map(Shape::bounding_rect)
            .map(GeoBounds::from)
            .reduce(|acc, bounds| acc.union(&bounds))
    }

    pub fn reproject<R: Reprojector>(&self, target: &Crs, reprojector: &R) -> Result<Self> {
        let crs = self
            .crs
            .as_ref()
            .ok_or_else(|| GeoprocessError::CrsMismatch("vector has no CRS".into()))?;
        if crs == target {
            return Ok(self.clone());
        }
        let transformer = reprojector.transformer(crs, target)?;
        let features = self
            .features
            .iter()
            .map(|feature| {
                Ok(Feature {
                    shape: feature.shape.try_map(&transformer)?,
                    attributes: feature.attributes.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!("reprojected {} features from {crs} into {target}", features.len());
        Ok(Self::from_parts(features, Some(target.clone())))
    }
}
