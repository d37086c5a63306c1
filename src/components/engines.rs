/// Implementations for gdal
#[cfg(feature = "gdal")]
pub mod gdal_engine {
    use std::{ffi::OsStr, path::Path};

    use gdal::{
        raster::{Buffer, GdalType},
        spatial_ref::SpatialRef,
        vector::{FieldValue, LayerAccess, LayerOptions, OGRFieldType, ToGdal},
        Dataset as GdalDataset, DriverManager, Metadata as GdalMetadata,
        MetadataEntry as GdalMetadataEntry,
    };
    use itertools::Itertools;
    use log::{debug, warn};
    use ndarray::Array2;
    use num_traits::NumCast;

    use crate::{
        components::{
            metadata::Metadata,
            raster::{DataType, RasterDataset},
            transforms::GeoTransform,
            vector::{AttributeValue, Attributes, Feature, Shape, VectorDataset},
        },
        crs_geo::Crs,
        errors::{GeoprocessError, Result},
    };

    fn filter_metadata_gdal(metadata: &impl GdalMetadata) -> Metadata {
        GdalMetadata::metadata(metadata)
            .filter_map(|GdalMetadataEntry { domain, key, value }| {
                if domain.eq("") {
                    Some((key, value))
                } else {
                    None
                }
            })
            .collect()
    }

    fn crs_from_projection(projection: &str) -> Option<Crs> {
        if projection.is_empty() {
            return None;
        }
        Crs::parse(projection)
            .inspect_err(|err| warn!("ignoring projection: {err}"))
            .ok()
    }

    fn spatial_ref(crs: &Crs) -> Result<SpatialRef> {
        Ok(SpatialRef::from_definition(crs.definition())?)
    }

    /// Read every band of the raster at `path` as `T`.
    pub fn read_raster<T: DataType + GdalType, P: AsRef<Path>>(path: P) -> Result<RasterDataset<T>> {
        let dataset = GdalDataset::open(path.as_ref())?;
        let (cols, rows) = dataset.raster_size();
        let bands = (1..=dataset.raster_count())
            .map(|index| {
                let band = dataset.rasterband(index)?;
                let (_, data) = band
                    .read_as::<T>((0, 0), (cols, rows), (cols, rows), None)?
                    .into_shape_and_vec();
                Ok(Array2::from_shape_vec((rows, cols), data)?)
            })
            .collect::<Result<Vec<_>>>()?;
        let nodata = dataset
            .rasterband(1)?
            .no_data_value()
            .and_then(<T as NumCast>::from);
        let transform = dataset.geo_transform().ok().map(GeoTransform::from_gdal);
        let crs = crs_from_projection(&dataset.projection());
        debug!(
            "read {} bands of {rows}x{cols} from {}",
            bands.len(),
            path.as_ref().display()
        );
        Ok(RasterDataset::new(bands, transform, crs, nodata)?
            .with_metadata(filter_metadata_gdal(&dataset)))
    }

    /// Write `raster` as a GeoTIFF.
    pub fn write_raster<T: DataType + GdalType, P: AsRef<Path>>(
        raster: &RasterDataset<T>,
        path: P,
    ) -> Result<()> {
        let (rows, cols) = raster.shape();
        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut dataset = driver.create_with_band_type::<T, _>(
            path.as_ref(),
            cols,
            rows,
            raster.band_count(),
        )?;
        if let Some(transform) = raster.transform() {
            dataset.set_geo_transform(&transform.to_gdal())?;
        }
        if let Some(crs) = raster.crs() {
            dataset.set_spatial_ref(&spatial_ref(crs)?)?;
        }
        for (key, value) in raster.metadata().iter() {
            dataset.set_metadata_item(key, value, "")?;
        }
        let nodata = raster.nodata().and_then(|nodata| nodata.to_f64());
        for (index, band) in raster.bands().iter().enumerate() {
            let mut rasterband = dataset.rasterband(index + 1)?;
            let mut buffer = Buffer::new((cols, rows), band.iter().copied().collect());
            rasterband.write((0, 0), (cols, rows), &mut buffer)?;
            rasterband.set_no_data_value(nodata)?;
        }
        debug!("wrote {raster:?} to {}", path.as_ref().display());
        Ok(())
    }

    fn attribute_from_field(value: Option<FieldValue>) -> AttributeValue {
        match value {
            None => AttributeValue::Null,
            Some(FieldValue::IntegerValue(value)) => AttributeValue::Int(value.into()),
            Some(FieldValue::Integer64Value(value)) => AttributeValue::Int(value),
            Some(FieldValue::RealValue(value)) => AttributeValue::Float(value),
            Some(FieldValue::StringValue(value)) => AttributeValue::String(value),
            Some(other) => other
                .into_string()
                .map_or(AttributeValue::Null, AttributeValue::String),
        }
    }

    /// Read the first layer of the vector file at `path`.
    pub fn read_vector<P: AsRef<Path>>(path: P) -> Result<VectorDataset> {
        let dataset = GdalDataset::open(path.as_ref())?;
        let mut layer = dataset.layer(0)?;
        let crs = layer.spatial_ref().and_then(|srs| {
            match (srs.auth_name(), srs.auth_code()) {
                (Ok(name), Ok(code)) if name.eq_ignore_ascii_case("EPSG") => {
                    u32::try_from(code).ok().map(Crs::from_epsg)
                }
                _ => srs.to_wkt().ok().and_then(|wkt| crs_from_projection(&wkt)),
            }
        });
        let features = layer
            .features()
            .map(|feature| {
                let geometry = feature
                    .geometry()
                    .ok_or(GeoprocessError::UnsupportedGeometry("None"))?;
                let shape = Shape::try_from(geometry.to_geo()?)?;
                let attributes: Attributes = feature
                    .fields()
                    .map(|(name, value)| (name, attribute_from_field(value)))
                    .collect();
                Ok(Feature::new(shape, attributes))
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "read {} features from {}",
            features.len(),
            path.as_ref().display()
        );
        VectorDataset::new(features, crs)
    }

    /// OGR type of an attribute column, wide enough for every value in it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    enum FieldKind {
        Integer,
        Real,
        String,
    }

    impl FieldKind {
        fn of(value: &AttributeValue) -> Option<Self> {
            match value {
                AttributeValue::Null => None,
                AttributeValue::Bool(_) | AttributeValue::Int(_) => Some(Self::Integer),
                AttributeValue::Float(_) => Some(Self::Real),
                AttributeValue::String(_) => Some(Self::String),
            }
        }

        fn ogr(self) -> OGRFieldType::Type {
            match self {
                Self::Integer => OGRFieldType::OFTInteger64,
                Self::Real => OGRFieldType::OFTReal,
                Self::String => OGRFieldType::OFTString,
            }
        }

        fn field_value(self, value: &AttributeValue) -> Option<FieldValue> {
            let value = match (self, value) {
                (_, AttributeValue::Null) => return None,
                (Self::Integer, AttributeValue::Bool(value)) => {
                    FieldValue::Integer64Value(i64::from(*value))
                }
                (Self::Integer, AttributeValue::Int(value)) => FieldValue::Integer64Value(*value),
                (Self::Real, AttributeValue::Bool(value)) => {
                    FieldValue::RealValue(f64::from(u8::from(*value)))
                }
                (Self::Real, AttributeValue::Int(value)) => FieldValue::RealValue(*value as f64),
                (Self::Real, AttributeValue::Float(value)) => FieldValue::RealValue(*value),
                (Self::String, AttributeValue::String(value)) => {
                    FieldValue::StringValue(value.clone())
                }
                (Self::String, AttributeValue::Bool(value)) => {
                    FieldValue::StringValue(value.to_string())
                }
                (Self::String, AttributeValue::Int(value)) => {
                    FieldValue::StringValue(value.to_string())
                }
                (Self::String, AttributeValue::Float(value)) => {
                    FieldValue::StringValue(value.to_string())
                }
                (kind, value) => {
                    warn!("dropping {value:?} from {kind:?} field");
                    return None;
                }
            };
            Some(value)
        }
    }

    fn vector_driver(path: &Path) -> Result<&'static str> {
        let extension = path
            .extension()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("shp") => Ok("ESRI Shapefile"),
            Some("geojson" | "json") => Ok("GeoJSON"),
            Some("gpkg") => Ok("GPKG"),
            _ => Err(GeoprocessError::InvalidParameter {
                name: "path",
                reason: format!("no vector driver for {}", path.display()),
            }),
        }
    }

    /// Write `vector` as a single layer, the driver follows the file extension
    /// (`shp`, `geojson` or `gpkg`).
    pub fn write_vector<P: AsRef<Path>>(vector: &VectorDataset, path: P) -> Result<()> {
        let path = path.as_ref();
        let driver = DriverManager::get_driver_by_name(vector_driver(path)?)?;
        let mut dataset = driver.create_vector_only(path)?;
        let srs = vector.crs().map(spatial_ref).transpose()?;
        let name = path
            .file_stem()
            .and_then(OsStr::to_str)
            .unwrap_or("features");
        let mut layer = dataset.create_layer(LayerOptions {
            name,
            srs: srs.as_ref(),
            ..Default::default()
        })?;

        let fields = vector
            .features()
            .iter()
            .flat_map(|feature| feature.attributes.iter())
            .into_grouping_map_by(|(name, _)| name.as_str())
            .fold(None, |kind, _, (_, value)| kind.max(FieldKind::of(value)));
        let definitions = fields
            .iter()
            .sorted_by_key(|(name, _)| **name)
            .map(|(name, kind)| (*name, kind.unwrap_or(FieldKind::String).ogr()))
            .collect_vec();
        layer.create_defn_fields(&definitions)?;

        for feature in vector.features() {
            let (names, values): (Vec<&str>, Vec<FieldValue>) = feature
                .attributes
                .iter()
                .filter_map(|(name, value)| {
                    let kind = fields.get(name.as_str()).copied().flatten()?;
                    Some((name.as_str(), kind.field_value(value)?))
                })
                .unzip();
            let geometry = feature.shape.to_geometry().to_gdal()?;
            layer.create_feature_fields(geometry, &names, &values)?;
        }
        debug!(
            "wrote {} features with {} fields to {}",
            vector.len(),
            definitions.len(),
            path.display()
        );
        Ok(())
    }

}
