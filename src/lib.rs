pub mod batch;
pub mod buffer;
pub mod clip;
pub mod components;
pub mod crs_geo;
pub mod errors;
pub mod indexes;
mod intersection;

pub use buffer::{buffer, buffer_with, BufferParams, DistanceUnit};
pub use clip::{clip, clip_with, rasterize_mask, ClipParams};
pub use components::{
    AttributeValue, Attributes, DataType, Feature, GeoBounds, GeoTransform, Metadata,
    PixelWindow, RasterDataset, Shape, VectorDataset,
};
pub use crs_geo::{reconcile, BuiltinReprojector, Crs, ReconciliationPlan, Reprojector};
pub use errors::{GeoprocessError, Result};
pub use indexes::{
    compute_index, compute_spectral_index, BandRoles, Formula, SpectralIndex, NODATA_SENTINEL,
};
