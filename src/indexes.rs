use std::{fmt, str::FromStr};

use log::debug;
use ndarray::Zip;
use serde::{Deserialize, Serialize};

use crate::{
    components::{
        metadata::{self, Metadata},
        raster::{DataType, RasterDataset},
    },
    errors::{GeoprocessError, Result},
};

/// Output value of pixels where an index is undefined.
pub const NODATA_SENTINEL: f64 = -9999.0;

/// Two band index formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Formula {
    /// `(a - b) / (a + b)`
    #[default]
    NormalizedDifference,
}

impl Formula {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Formula::NormalizedDifference => {
                let sum = a + b;
                if sum == 0. {
                    return NODATA_SENTINEL;
                }
                (a - b) / sum
            }
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Formula::NormalizedDifference => f.write_str("normalized_difference"),
        }
    }
}

impl FromStr for Formula {
    type Err = GeoprocessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normalized_difference" => Ok(Formula::NormalizedDifference),
            other => Err(GeoprocessError::InvalidParameter {
                name: "formula",
                reason: format!("unknown formula {other:?}"),
            }),
        }
    }
}

/// Named normalized difference indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpectralIndex {
    /// `(NIR - Red) / (NIR + Red)`
    Ndvi,
    /// `(Green - NIR) / (Green + NIR)`
    Ndwi,
    /// `(SWIR - NIR) / (SWIR + NIR)`
    Ndbi,
}

impl fmt::Display for SpectralIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpectralIndex::Ndvi => "NDVI",
            SpectralIndex::Ndwi => "NDWI",
            SpectralIndex::Ndbi => "NDBI",
        };
        f.write_str(name)
    }
}

/// Zero based band index of each spectral role present in a raster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandRoles {
    pub red: Option<usize>,
    pub green: Option<usize>,
    pub nir: Option<usize>,
    pub swir: Option<usize>,
}

impl BandRoles {
    fn role(band: Option<usize>, name: &'static str) -> Result<usize> {
        band.ok_or(GeoprocessError::MissingBandRole(name))
    }

    /// `(a, b)` band pair of `index`.
    pub fn bands_for(&self, index: SpectralIndex) -> Result<(usize, usize)> {
        Ok(match index {
            SpectralIndex::Ndvi => (Self::role(self.nir, "nir")?, Self::role(self.red, "red")?),
            SpectralIndex::Ndwi => (
                Self::role(self.green, "green")?,
                Self::role(self.nir, "nir")?,
            ),
            SpectralIndex::Ndbi => (Self::role(self.swir, "swir")?, Self::role(self.nir, "nir")?),
        })
    }
}

/// Per pixel `formula` over bands `band_a` and `band_b`.
///
/// Pixels where either input is nodata or not finite, or where the formula
/// is undefined, hold [NODATA_SENTINEL].
pub fn compute_index<T: DataType>(
    raster: &RasterDataset<T>,
    band_a: usize,
    band_b: usize,
    formula: Formula,
) -> Result<RasterDataset<f64>> {
    let a = raster.band(band_a)?;
    let b = raster.band(band_b)?;
    let (transform, crs) = raster.georeference()?;
    let nodata = raster.nodata();

    let to_value = |value: T| {
        if value.is_nodata(nodata) {
            return None;
        }
        value.to_f64().filter(|value| value.is_finite())
    };
    let index = Zip::from(a).and(b).map_collect(|&a, &b| {
        let value = match (to_value(a), to_value(b)) {
            (Some(a), Some(b)) => formula.apply(a, b),
            _ => NODATA_SENTINEL,
        };
        if value.is_finite() {
            value
        } else {
            NODATA_SENTINEL
        }
    });

    debug!("computed {formula} of bands {band_a},{band_b} over {:?}", index.dim());
    let metadata = Metadata::new()
        .with(metadata::NODATA, NODATA_SENTINEL)
        .with(metadata::INDEX_FORMULA, formula)
        .with(metadata::INDEX_BANDS, format!("{band_a},{band_b}"));
    Ok(RasterDataset::new(
        vec![index],
        Some(*transform),
        Some(crs.clone()),
        Some(NODATA_SENTINEL),
    )?
    .with_metadata(metadata))
}

/// Named index using the bands assigned in `roles`.
pub fn compute_spectral_index<T: DataType>(
    raster: &RasterDataset<T>,
    index: SpectralIndex,
    roles: &BandRoles,
) -> Result<RasterDataset<f64>> {
    let (band_a, band_b) = roles.bands_for(index)?;
    let output = compute_index(raster, band_a, band_b, Formula::NormalizedDifference)?;
    let metadata = output.metadata().clone().with(metadata::INDEX_NAME, index);
    Ok(output.with_metadata(metadata))
}
