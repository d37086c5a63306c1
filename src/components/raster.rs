use itertools::Itertools;
use log::debug;
use ndarray::Array2;
use num_traits::{Bounded, NumCast, ToPrimitive};
use std::fmt::{Debug, Display};

use crate::{
    components::{
        bounds::{GeoBounds, PixelWindow},
        metadata::{self, Metadata},
        transforms::GeoTransform,
    },
    crs_geo::{CoordTransformer, Crs, Reprojector},
    errors::{GeoprocessError, Result},
    indexes::NODATA_SENTINEL,
    intersection::Intersection,
};

/// Number of samples taken along each grid edge when reprojecting bounds.
const OUTLINE_SAMPLES: usize = 16;

/// Numeric pixel type of a raster band.
pub trait DataType:
    Copy + PartialEq + Debug + Display + Send + Sync + NumCast + Bounded + 'static
{
    /// Whether `self` is the `nodata` sentinel. A NaN sentinel matches every NaN.
    fn is_nodata(self, nodata: Option<Self>) -> bool {
        nodata.is_some_and(|nodata| self == nodata || (is_nan(self) && is_nan(nodata)))
    }

    /// Sentinel used when a raster carries none: the index sentinel when
    /// representable, otherwise the type maximum.
    fn fallback_nodata() -> Self {
        <Self as NumCast>::from(NODATA_SENTINEL).unwrap_or_else(<Self as Bounded>::max_value)
    }
}

impl<T> DataType for T where
    T: Copy + PartialEq + Debug + Display + Send + Sync + NumCast + Bounded + 'static
{
}

fn is_nan<T: ToPrimitive>(value: T) -> bool {
    value.to_f64().is_some_and(f64::is_nan)
}

/// In-memory multi-band raster.
///
/// All bands share one `(rows, cols)` shape. Once built the dataset is only
/// read; engines return new datasets.
#[derive(Clone, PartialEq)]
pub struct RasterDataset<T: DataType = f64> {
    bands: Vec<Array2<T>>,
    transform: Option<GeoTransform>,
    crs: Option<Crs>,
    nodata: Option<T>,
    metadata: Metadata,
}

impl<T: DataType> Debug for RasterDataset<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterDataset")
            .field("shape", &self.shape())
            .field("bands", &self.bands.len())
            .field("transform", &self.transform.map(|transform| transform.to_gdal()))
            .field("crs", &self.crs.as_ref().map(Crs::to_string))
            .field("nodata", &self.nodata)
            .finish()
    }
}

impl<T: DataType> RasterDataset<T> {
    pub fn new(
        bands: Vec<Array2<T>>,
        transform: Option<GeoTransform>,
        crs: Option<Crs>,
        nodata: Option<T>,
    ) -> Result<Self> {
        let expected = bands.first().ok_or(GeoprocessError::NoBands)?.dim();
        if let Some((band, found)) = bands
            .iter()
            .map(Array2::dim)
            .find_position(|dim| *dim != expected)
        {
            return Err(GeoprocessError::ShapeMismatch {
                band,
                expected,
                found,
            });
        }
        let raster = Self {
            bands,
            transform,
            crs,
            nodata,
            metadata: Metadata::new(),
        };
        debug!("new {raster:?}");
        Ok(raster)
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn bands(&self) -> &[Array2<T>] {
        &self.bands
    }

    pub fn band(&self, index: usize) -> Result<&Array2<T>> {
        self.bands.get(index).ok_or(GeoprocessError::BandIndex {
            index,
            count: self.bands.len(),
        })
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.bands[0].dim()
    }

    pub fn transform(&self) -> Option<&GeoTransform> {
        self.transform.as_ref()
    }

    pub fn crs(&self) -> Option<&Crs> {
        self.crs.as_ref()
    }

    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    /// Own nodata if set, [DataType::fallback_nodata] otherwise.
    pub fn effective_nodata(&self) -> T {
        self.nodata.unwrap_or_else(T::fallback_nodata)
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Transform and CRS, both required by the engines.
    pub fn georeference(&self) -> Result<(&GeoTransform, &Crs)> {
        let crs = self
            .crs
            .as_ref()
            .ok_or_else(|| GeoprocessError::CrsMismatch("raster has no CRS".into()))?;
        let transform = self
            .transform
            .as_ref()
            .ok_or(GeoprocessError::MissingTransform)?;
        Ok((transform, crs))
    }

    pub fn bounds(&self) -> Result<GeoBounds> {
        let transform = self.transform.ok_or(GeoprocessError::MissingTransform)?;
        let (rows, cols) = self.shape();
        Ok(GeoBounds::of_grid(&transform, rows, cols))
    }

    /// Copy of the pixels inside `window`, with the transform shifted to its
    /// top left corner.
    pub fn window(&self, window: &PixelWindow) -> Result<Self> {
        let (rows, cols) = self.shape();
        let window = window.intersection(&PixelWindow::full(rows, cols))?;
        let bands = self
            .bands
            .iter()
            .map(|band| window.slice(band).to_owned())
            .collect();
        Ok(Self {
            bands,
            transform: self
                .transform
                .map(|transform| transform.shifted(window.col_off(), window.row_off())),
            crs: self.crs.clone(),
            nodata: self.nodata,
            metadata: self.metadata.clone(),
        })
    }

    /// Resample into `target` with nearest neighbour.
    ///
    /// The output keeps the same shape on a north-up grid spanning the
    /// reprojected extent. Pixels without a source pixel are nodata.
    pub fn reproject<R: Reprojector>(&self, target: &Crs, reprojector: &R) -> Result<Self> {
        let (transform, crs) = self.georeference()?;
        if crs == target {
            return Ok(self.clone());
        }
        let forward = reprojector.transformer(crs, target)?;
        let backward = reprojector.transformer(target, crs)?;
        let (rows, cols) = self.shape();

        let outline = (0..=OUTLINE_SAMPLES).flat_map(|step| {
            let t = step as f64 / OUTLINE_SAMPLES as f64;
            let (col, row) = (t * cols as f64, t * rows as f64);
            [
                (col, 0.),
                (col, rows as f64),
                (0., row),
                (cols as f64, row),
            ]
        });
        let projected = outline
            .filter_map(|(col, row)| forward.transform(transform.pixel_to_world(col, row)).ok());
        let extent = GeoBounds::enclosing(projected).ok_or_else(|| {
            GeoprocessError::CrsMismatch(format!("raster extent is outside the domain of {target}"))
        })?;
        if extent.width() <= 0. || extent.height() <= 0. {
            return Err(GeoprocessError::NonInvertibleTransform);
        }

        let target_transform = GeoTransform::new(
            extent.min().x,
            extent.max().y,
            extent.width() / cols as f64,
            -extent.height() / rows as f64,
        );
        let source_inverse = transform.inverse()?;
        let lookup = Array2::from_shape_fn((rows, cols), |(row, col)| {
            let world = backward
                .transform(target_transform.pixel_center(col, row))
                .ok()?;
            let pixel = source_inverse.apply(world);
            let (source_col, source_row) = (pixel.x.floor(), pixel.y.floor());
            let inside = source_col >= 0.
                && source_row >= 0.
                && source_col < cols as f64
                && source_row < rows as f64;
            inside.then_some((source_row as usize, source_col as usize))
        });

        let nodata = self.effective_nodata();
        let bands = self
            .bands
            .iter()
            .map(|band| lookup.map(|&source| source.map_or(nodata, |index| band[index])))
            .collect();
        debug!("reprojected {crs} raster into {target} over {extent:?}");
        Ok(Self {
            bands,
            transform: Some(target_transform),
            crs: Some(target.clone()),
            nodata: Some(nodata),
            metadata: self.metadata.clone().with(metadata::NODATA, nodata),
        })
    }
}
