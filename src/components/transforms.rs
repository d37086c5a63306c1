use geo::{AffineTransform, Coord};
use serde::{Deserialize, Serialize};
use shrinkwraprs::Shrinkwrap;

use crate::errors::{GeoprocessError, Result};

/// Affine map from pixel space `(col, row)` to world space `(x, y)`.
///
/// Pixel space has its origin at the top left corner of the top left
/// pixel, so the centre of pixel `(col, row)` sits at `(col + 0.5, row + 0.5)`.
/// Serializes as the six GDAL coefficients.
#[derive(Shrinkwrap, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 6]", into = "[f64; 6]")]
pub struct GeoTransform(AffineTransform);

impl GeoTransform {
    /// North-up transform without rotation terms.
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self(AffineTransform::new(
            pixel_width,
            0.,
            origin_x,
            0.,
            pixel_height,
            origin_y,
        ))
    }

    /// From GDAL coefficient order `[xoff, a, b, yoff, d, e]`.
    pub fn from_gdal(gdal_transform: [f64; 6]) -> Self {
        Self(AffineTransform::new(
            gdal_transform[1],
            gdal_transform[2],
            gdal_transform[0],
            gdal_transform[4],
            gdal_transform[5],
            gdal_transform[3],
        ))
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.xoff(),
            self.a(),
            self.b(),
            self.yoff(),
            self.d(),
            self.e(),
        ]
    }

    /// (width, height) of a pixel, height is negative for north-up grids.
    pub fn pixel_size(&self) -> (f64, f64) {
        (self.a(), self.e())
    }

    pub fn pixel_to_world(&self, col: f64, row: f64) -> Coord {
        self.0.apply(Coord { x: col, y: row })
    }

    pub fn pixel_center(&self, col: usize, row: usize) -> Coord {
        self.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5)
    }

    pub fn inverse(&self) -> Result<AffineTransform> {
        self.0
            .inverse()
            .ok_or(GeoprocessError::NonInvertibleTransform)
    }

    /// Fractional pixel coordinates of a world coordinate.
    pub fn world_to_pixel(&self, coord: Coord) -> Result<Coord> {
        Ok(self.inverse()?.apply(coord))
    }

    /// Same pixel size, origin moved to the corner of pixel `(col, row)`.
    pub fn shifted(&self, col: usize, row: usize) -> Self {
        let origin = self.pixel_to_world(col as f64, row as f64);
        Self(AffineTransform::new(
            self.a(),
            self.b(),
            origin.x,
            self.d(),
            self.e(),
            origin.y,
        ))
    }
}

impl From<[f64; 6]> for GeoTransform {
    fn from(value: [f64; 6]) -> Self {
        Self::from_gdal(value)
    }
}

impl From<GeoTransform> for [f64; 6] {
    fn from(value: GeoTransform) -> Self {
        value.to_gdal()
    }
}
