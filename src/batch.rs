//! Independent engine calls over one raster, spread on the rayon pool.
//!
//! Every call allocates its own output. Results keep the order of the
//! requests and the error of the earliest failing request is returned.

use log::debug;
use rayon::prelude::*;

use crate::{
    clip::{clip_with, ClipParams},
    components::{raster::{DataType, RasterDataset}, vector::VectorDataset},
    crs_geo::BuiltinReprojector,
    errors::Result,
    indexes::{compute_index, compute_spectral_index, BandRoles, Formula, SpectralIndex},
};

fn in_order<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    results.into_iter().collect()
}

/// One index per `(band_a, band_b)` pair.
pub fn compute_indices<T: DataType>(
    raster: &RasterDataset<T>,
    pairs: &[(usize, usize)],
    formula: Formula,
) -> Result<Vec<RasterDataset<f64>>> {
    debug!("computing {} indices", pairs.len());
    in_order(
        pairs
            .par_iter()
            .map(|&(band_a, band_b)| compute_index(raster, band_a, band_b, formula))
            .collect(),
    )
}

pub fn compute_spectral_indices<T: DataType>(
    raster: &RasterDataset<T>,
    indices: &[SpectralIndex],
    roles: &BandRoles,
) -> Result<Vec<RasterDataset<f64>>> {
    debug!("computing {} spectral indices", indices.len());
    in_order(
        indices
            .par_iter()
            .map(|&index| compute_spectral_index(raster, index, roles))
            .collect(),
    )
}

/// One clip of `raster` per vector.
pub fn clip_many<T: DataType>(
    raster: &RasterDataset<T>,
    vectors: &[VectorDataset],
    params: &ClipParams,
) -> Result<Vec<RasterDataset<T>>> {
    debug!("clipping raster with {} vectors", vectors.len());
    in_order(
        vectors
            .par_iter()
            .map(|vector| clip_with(raster, vector, params, &BuiltinReprojector))
            .collect(),
    )
}
