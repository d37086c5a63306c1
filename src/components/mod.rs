pub mod bounds;
pub mod engines;
pub mod metadata;
pub mod raster;
pub mod transforms;
pub mod vector;

pub use bounds::{GeoBounds, PixelWindow};
pub use metadata::Metadata;
pub use raster::{DataType, RasterDataset};
pub use transforms::GeoTransform;
pub use vector::{AttributeValue, Attributes, Feature, Shape, VectorDataset};
