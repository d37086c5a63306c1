use crate::{buffer::DistanceUnit, crs_geo::ReprojectionError};

pub type Result<T> = std::result::Result<T, GeoprocessError>;

#[derive(thiserror::Error, Debug)]
pub enum GeoprocessError {
    #[error("CRS mismatch: {0}")]
    CrsMismatch(String),
    #[error("Band index {index} is out of range for raster with {count} bands")]
    BandIndex { index: usize, count: usize },
    #[error("Band {band} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        band: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("Raster has no bands")]
    NoBands,
    #[error("Raster has no geotransform")]
    MissingTransform,
    #[error("Geotransform is not invertible")]
    NonInvertibleTransform,
    #[error("There is no intersection between geometries and raster")]
    EmptyIntersection,
    #[error("Geometry {index} is empty or degenerate")]
    DegenerateGeometry { index: usize },
    #[error("Geometry type {0} is not supported")]
    UnsupportedGeometry(&'static str),
    #[error("No band assigned to role {0}")]
    MissingBandRole(&'static str),
    #[error("Invalid {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("Distance unit {unit:?} does not match units of {crs}")]
    UnitMismatch { unit: DistanceUnit, crs: String },
    #[error(transparent)]
    Reprojection(#[from] ReprojectionError),
    #[error(transparent)]
    NdarrayError(#[from] ndarray::ShapeError),
    #[cfg(feature = "gdal")]
    #[error(transparent)]
    GdalError(#[from] gdal::errors::GdalError),
}
