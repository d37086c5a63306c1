use std::f64::consts::{FRAC_PI_2, PI};

use geo::{Area, BooleanOps, Coord, Line, LineString, MultiPolygon, Polygon};
use itertools::Itertools;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::{
    components::vector::{Feature, Shape, VectorDataset},
    errors::{GeoprocessError, Result},
};

/// Unit of a buffer distance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceUnit {
    /// Units of the vector CRS, whatever they are.
    #[default]
    SameAsCrs,
    /// Metres, only accepted for CRSs with metre units.
    Metres,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferParams {
    /// Positive dilates, negative erodes.
    pub distance: f64,
    pub unit: DistanceUnit,
    /// Segments used to approximate a quarter circle.
    pub quadrant_segments: usize,
    /// Fail instead of returning empty geometries when a shape collapses.
    pub strict: bool,
}

impl Default for BufferParams {
    fn default() -> Self {
        Self {
            distance: 0.,
            unit: DistanceUnit::SameAsCrs,
            quadrant_segments: 8,
            strict: false,
        }
    }
}

impl BufferParams {
    pub fn new(distance: f64) -> Self {
        Self {
            distance,
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.distance.is_finite() {
            return Err(GeoprocessError::InvalidParameter {
                name: "distance",
                reason: format!("{} is not finite", self.distance),
            });
        }
        if self.quadrant_segments == 0 {
            return Err(GeoprocessError::InvalidParameter {
                name: "quadrant_segments",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Buffer every feature of `vector` by `distance` CRS units.
pub fn buffer(vector: &VectorDataset, distance: f64) -> Result<VectorDataset> {
    buffer_with(vector, &BufferParams::new(distance))
}

/// Buffer every feature of `vector`, attributes and CRS are kept.
///
/// Results are multipolygons, a shape eroded away becomes an empty one
/// unless `params.strict` is set.
pub fn buffer_with(vector: &VectorDataset, params: &BufferParams) -> Result<VectorDataset> {
    params.validate()?;
    match (params.unit, vector.crs()) {
        (DistanceUnit::Metres, Some(crs)) if crs.has_metre_units() => {}
        (DistanceUnit::Metres, crs) => {
            return Err(GeoprocessError::UnitMismatch {
                unit: params.unit,
                crs: crs.map_or_else(|| "no CRS".to_string(), ToString::to_string),
            });
        }
        (DistanceUnit::SameAsCrs, Some(crs)) if crs.is_geographic() => {
            warn!("buffering in geographic {crs}, distance {} is in degrees", params.distance);
        }
        (DistanceUnit::SameAsCrs, _) => {}
    }

    if params.distance == 0. {
        return Ok(vector.clone());
    }

    let features = vector
        .features()
        .iter()
        .enumerate()
        .map(|(index, feature)| {
            let shape = buffer_shape(&feature.shape, params);
            trace!(
                "{} {index} buffered into {} polygons",
                feature.shape.kind(),
                shape.0.len()
            );
            if params.strict && shape.0.is_empty() {
                return Err(GeoprocessError::DegenerateGeometry { index });
            }
            Ok(Feature {
                shape: Shape::MultiPolygon(shape),
                attributes: feature.attributes.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    debug!(
        "buffered {} features by {}",
        features.len(),
        params.distance
    );
    Ok(VectorDataset::from_parts(features, vector.crs().cloned()))
}

fn buffer_shape(shape: &Shape, params: &BufferParams) -> MultiPolygon {
    let radius = params.distance.abs();
    let segments = params.quadrant_segments;
    let dilate = params.distance > 0.;
    let result = match shape {
        Shape::Point(point) if dilate => MultiPolygon::from(circle(point.0, radius, segments)),
        Shape::LineString(line) if dilate => union_all(
            line.lines()
                .map(|segment| capsule(segment, radius, segments)),
        ),
        Shape::Polygon(polygon) => offset_polygons(&[polygon], radius, segments, dilate),
        Shape::MultiPolygon(polygons) => {
            offset_polygons(&polygons.iter().collect_vec(), radius, segments, dilate)
        }
        _ => MultiPolygon::new(vec![]),
    };
    MultiPolygon::new(
        result
            .into_iter()
            .filter(|polygon| polygon.unsigned_area() > 0.)
            .collect(),
    )
}

fn offset_polygons(
    polygons: &[&Polygon],
    radius: f64,
    segments: usize,
    dilate: bool,
) -> MultiPolygon {
    let base = MultiPolygon::new(polygons.iter().map(|polygon| (*polygon).clone()).collect());
    let edges = union_all(
        polygons
            .iter()
            .flat_map(|polygon| polygon.interiors().iter().chain([polygon.exterior()]))
            .flat_map(LineString::lines)
            .map(|segment| capsule(segment, radius, segments)),
    );
    if dilate {
        base.union(&edges)
    } else {
        base.difference(&edges)
    }
}

fn union_all(polygons: impl Iterator<Item = Polygon>) -> MultiPolygon {
    polygons
        .map(MultiPolygon::from)
        .tree_reduce(|acc, polygon| acc.union(&polygon))
        .unwrap_or_else(|| MultiPolygon::new(vec![]))
}

/// Arc of `2 * segments` steps from `start` around `center`.
fn half_circle(center: Coord, radius: f64, start: f64, segments: usize) -> impl Iterator<Item = Coord> {
    let steps = 2 * segments;
    (0..=steps).map(move |step| {
        let angle = start + PI * step as f64 / steps as f64;
        Coord {
            x: center.x + radius * angle.cos(),
            y: center.y + radius * angle.sin(),
        }
    })
}

fn circle(center: Coord, radius: f64, segments: usize) -> Polygon {
    let steps = 4 * segments;
    let ring: LineString = (0..steps)
        .map(|step| {
            let angle = 2. * PI * step as f64 / steps as f64;
            Coord {
                x: center.x + radius * angle.cos(),
                y: center.y + radius * angle.sin(),
            }
        })
        .collect();
    Polygon::new(ring, vec![])
}

/// Points within `radius` of `segment`.
fn capsule(segment: Line, radius: f64, segments: usize) -> Polygon {
    let delta = segment.delta();
    if delta.x == 0. && delta.y == 0. {
        return circle(segment.start, radius, segments);
    }
    let heading = delta.y.atan2(delta.x);
    let ring: LineString = half_circle(segment.start, radius, heading + FRAC_PI_2, segments)
        .chain(half_circle(segment.end, radius, heading - FRAC_PI_2, segments))
        .collect();
    Polygon::new(ring, vec![])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{components::vector::{AttributeValue, Attributes}, crs_geo::Crs};
    use geo::{line_string, point, Rect};
    use rstest::rstest;

    fn square(size: f64) -> Polygon {
        Rect::new((0., 0.), (size, size)).to_polygon()
    }

    fn dataset(shapes: Vec<Shape>) -> VectorDataset {
        VectorDataset::from_shapes(shapes, Some(Crs::from_epsg(32633))).unwrap()
    }

    fn area(vector: &VectorDataset, index: usize) -> f64 {
        vector.features()[index].shape.area()
    }

    #[test]
    fn zero_distance_copies_input() {
        let input = dataset(vec![square(4.).into(), point!(x: 1., y: 1.).into()]);
        assert_eq!(buffer(&input, 0.).unwrap(), input);
    }

    #[test_log::test]
    fn point_becomes_circle() {
        let input = dataset(vec![point!(x: 10., y: 10.).into()]);
        let output = buffer(&input, 5.).unwrap();
        let expected = PI * 25.;
        assert!((area(&output, 0) - expected).abs() / expected < 0.02);
        assert_eq!(output.features()[0].shape.kind(), "MultiPolygon");
    }

    #[test]
    fn line_becomes_capsule() {
        let input = dataset(vec![line_string![(x: 0., y: 0.), (x: 10., y: 0.)].into()]);
        let output = buffer(&input, 1.).unwrap();
        let expected = 20. + PI;
        assert!((area(&output, 0) - expected).abs() / expected < 0.01);
    }

    #[test]
    fn convex_polygon_round_trips() {
        let input = dataset(vec![square(10.).into()]);
        let grown = buffer(&input, 1.).unwrap();
        assert!((area(&grown, 0) - (140. + PI)).abs() < 0.5);
        let restored = buffer(&grown, -1.).unwrap();
        assert!((area(&restored, 0) - 100.).abs() / 100. < 0.01);
    }

    #[rstest]
    #[case(Shape::from(square(2.)), -1.5)]
    #[case(Shape::from(point!(x: 0., y: 0.)), -1.)]
    #[case(Shape::from(line_string![(x: 0., y: 0.), (x: 1., y: 1.)]), -1.)]
    fn erosion_collapses_to_empty(#[case] shape: Shape, #[case] distance: f64) {
        let input = dataset(vec![shape]);
        let output = buffer(&input, distance).unwrap();
        assert_eq!(output.len(), 1);
        assert!(output.features()[0].shape.is_empty());

        let strict = BufferParams {
            strict: true,
            ..BufferParams::new(distance)
        };
        assert!(matches!(
            buffer_with(&input, &strict),
            Err(GeoprocessError::DegenerateGeometry { index: 0 })
        ));
    }

    #[test]
    fn attributes_follow_their_feature() {
        let features = (0..3)
            .map(|id| {
                let attributes = Attributes::from([("id".to_string(), AttributeValue::Int(id))]);
                Feature::new(point!(x: id as f64 * 10., y: 0.), attributes)
            })
            .collect();
        let input = VectorDataset::new(features, Some(Crs::from_epsg(3857))).unwrap();
        let output = buffer(&input, 2.).unwrap();
        assert_eq!(output.crs(), input.crs());
        for (before, after) in input.features().iter().zip(output.features()) {
            assert_eq!(before.attributes, after.attributes);
        }
    }

    #[rstest]
    #[case(Some(Crs::wgs84()))]
    #[case(None)]
    fn metres_need_metric_crs(#[case] crs: Option<Crs>) {
        let input = VectorDataset::from_shapes([square(1.)], crs).unwrap();
        let params = BufferParams {
            unit: DistanceUnit::Metres,
            ..BufferParams::new(1.)
        };
        assert!(matches!(
            buffer_with(&input, &params),
            Err(GeoprocessError::UnitMismatch {
                unit: DistanceUnit::Metres,
                ..
            })
        ));
    }

    #[test]
    fn metres_on_projected_crs() {
        let input = dataset(vec![square(1.).into()]);
        let params = BufferParams {
            unit: DistanceUnit::Metres,
            ..BufferParams::new(1.)
        };
        assert!(buffer_with(&input, &params).is_ok());
    }

    #[rstest]
    #[case(BufferParams::new(f64::NAN))]
    #[case(BufferParams { quadrant_segments: 0, ..BufferParams::new(1.) })]
    fn rejects_invalid_parameters(#[case] params: BufferParams) {
        let input = dataset(vec![square(1.).into()]);
        assert!(matches!(
            buffer_with(&input, &params),
            Err(GeoprocessError::InvalidParameter { .. })
        ));
    }
}
