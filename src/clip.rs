use std::borrow::Cow;

use log::{debug, trace, warn};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::{
    components::{
        bounds::{GeoBounds, PixelWindow},
        metadata,
        raster::{DataType, RasterDataset},
        transforms::GeoTransform,
        vector::{Shape, VectorDataset},
    },
    crs_geo::{reconcile, BuiltinReprojector, ReconciliationPlan, Reprojector},
    errors::{GeoprocessError, Result},
};

/// A pixel is inside when its centre intersects a geometry, boundary included.
pub const CENTROID_CONVENTION: &str = "centroid_in_polygon";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipParams {
    /// Crop to the window of the geometries, otherwise only mask.
    pub crop: bool,
}

impl Default for ClipParams {
    fn default() -> Self {
        Self { crop: true }
    }
}

/// Crop and mask `raster` to the polygons of `vector`.
pub fn clip<T: DataType>(
    raster: &RasterDataset<T>,
    vector: &VectorDataset,
) -> Result<RasterDataset<T>> {
    clip_with(raster, vector, &ClipParams::default(), &BuiltinReprojector)
}

/// Valid polygons of `vector` in the CRS of `raster`.
fn areal_shapes<'a, T: DataType, R: Reprojector>(
    raster: &RasterDataset<T>,
    vector: &'a VectorDataset,
    reprojector: &R,
) -> Result<Vec<Cow<'a, Shape>>> {
    let (_, crs) = raster.georeference()?;
    let shapes: Vec<Cow<Shape>> = match reconcile(Some(crs), vector.crs())? {
        ReconciliationPlan::Identity => vector.shapes().map(Cow::Borrowed).collect(),
        ReconciliationPlan::Reproject { to, .. } => vector
            .reproject(&to, reprojector)?
            .features()
            .iter()
            .map(|feature| Cow::Owned(feature.shape.clone()))
            .collect(),
    };
    let shapes: Vec<_> = shapes
        .into_iter()
        .filter(|shape| shape.is_areal() && !shape.is_empty())
        .filter(|shape| {
            let valid = shape.is_valid();
            if !valid {
                warn!("skipping invalid {}", shape.kind());
            }
            valid
        })
        .collect();
    if shapes.is_empty() {
        debug!("no polygons among {} features", vector.len());
        return Err(GeoprocessError::EmptyIntersection);
    }
    Ok(shapes)
}

fn rasterize(shapes: &[Cow<Shape>], transform: &GeoTransform, rows: usize, cols: usize) -> Array2<bool> {
    let mut mask = Array2::from_elem((rows, cols), false);
    for shape in shapes {
        let Some(rect) = shape.bounding_rect() else {
            continue;
        };
        let Ok(window) = PixelWindow::covering(&GeoBounds::from(rect), transform, rows, cols)
        else {
            continue;
        };
        trace!("rasterizing {} over {window:?}", shape.kind());
        for row in window.row_off()..window.row_off() + window.rows() {
            for col in window.col_off()..window.col_off() + window.cols() {
                if !mask[[row, col]] {
                    let centre = transform.pixel_center(col, row);
                    mask[[row, col]] = shape.intersects_point(&centre.into());
                }
            }
        }
    }
    mask
}

/// Full grid mask of the pixels whose centre lies in a polygon of `vector`.
pub fn rasterize_mask<T: DataType, R: Reprojector>(
    raster: &RasterDataset<T>,
    vector: &VectorDataset,
    reprojector: &R,
) -> Result<Array2<bool>> {
    let shapes = areal_shapes(raster, vector, reprojector)?;
    let (transform, _) = raster.georeference()?;
    let (rows, cols) = raster.shape();
    Ok(rasterize(&shapes, transform, rows, cols))
}

/// Crop `raster` to the pixel window of the polygons of `vector`, then set
/// the pixels whose centre lies outside every polygon to nodata.
///
/// The vector is brought into the raster CRS, the raster grid is never
/// resampled. Fails with [GeoprocessError::EmptyIntersection] when no pixel
/// centre falls within a polygon.
pub fn clip_with<T: DataType, R: Reprojector>(
    raster: &RasterDataset<T>,
    vector: &VectorDataset,
    params: &ClipParams,
    reprojector: &R,
) -> Result<RasterDataset<T>> {
    let shapes = areal_shapes(raster, vector, reprojector)?;
    let (transform, crs) = raster.georeference()?;
    let (rows, cols) = raster.shape();

    let bounds = shapes
        .iter()
        .filter_map(|shape| shape.bounding_rect())
        .map(GeoBounds::from)
        .reduce(|acc, bounds| acc.union(&bounds))
        .ok_or(GeoprocessError::EmptyIntersection)?;
    let window = PixelWindow::covering(&bounds, transform, rows, cols)?;
    let mask = rasterize(&shapes, transform, rows, cols);
    if !window.slice(&mask).iter().any(|inside| *inside) {
        debug!("no pixel centre of {window:?} inside the polygons");
        return Err(GeoprocessError::EmptyIntersection);
    }

    let (source, window) = if params.crop {
        (Cow::Owned(raster.window(&window)?), window)
    } else {
        (Cow::Borrowed(raster), PixelWindow::full(rows, cols))
    };
    let mask = window.slice(&mask);
    let nodata = raster.effective_nodata();
    let bands = source
        .bands()
        .iter()
        .map(|band| {
            Zip::from(band)
                .and(&mask)
                .map_collect(|&value, &inside| if inside { value } else { nodata })
        })
        .collect();

    debug!(
        "clipped {raster:?} to {window:?}, {} of {} pixels inside",
        mask.iter().filter(|inside| **inside).count(),
        window.size()
    );
    let metadata = source
        .metadata()
        .clone()
        .with(metadata::NODATA, nodata)
        .with(metadata::CLIP_CONVENTION, CENTROID_CONVENTION);
    Ok(RasterDataset::new(
        bands,
        source.transform().copied(),
        Some(crs.clone()),
        Some(nodata),
    )?
    .with_metadata(metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs_geo::Crs;
    use geo::{point, polygon, Polygon, Rect};
    use rstest::rstest;

    fn ones(crs: Crs) -> RasterDataset<f64> {
        RasterDataset::new(
            vec![Array2::ones((4, 4)), Array2::from_elem((4, 4), 2.)],
            Some(GeoTransform::new(0., 4., 1., -1.)),
            Some(crs),
            None,
        )
        .unwrap()
    }

    fn vector(polygons: Vec<Polygon>, crs: Crs) -> VectorDataset {
        VectorDataset::from_shapes(polygons, Some(crs)).unwrap()
    }

    fn rect(min: (f64, f64), max: (f64, f64)) -> Polygon {
        Rect::new(min, max).to_polygon()
    }

    #[rstest]
    #[case(rect((1., 1.), (2., 2.)), (1, 1), GeoTransform::new(1., 2., 1., -1.))]
    #[case(rect((1., 1.), (3., 3.)), (2, 2), GeoTransform::new(1., 3., 1., -1.))]
    #[case(rect((0.5, 0.5), (1.5, 1.5)), (2, 2), GeoTransform::new(0., 2., 1., -1.))]
    fn crops_to_covered_pixels(
        #[case] polygon: Polygon,
        #[case] shape: (usize, usize),
        #[case] transform: GeoTransform,
    ) {
        let raster = ones(Crs::from_epsg(32633));
        let clipped = clip(&raster, &vector(vec![polygon], Crs::from_epsg(32633))).unwrap();
        assert_eq!(clipped.shape(), shape);
        assert_eq!(clipped.transform(), Some(&transform));
        assert!(clipped.bands()[0].iter().all(|value| *value == 1.));
        assert!(clipped.bands()[1].iter().all(|value| *value == 2.));
        assert_eq!(
            clipped.metadata().get(metadata::CLIP_CONVENTION),
            Some(CENTROID_CONVENTION)
        );
    }

    #[test_log::test]
    fn disjoint_geometry_is_an_error() {
        let raster = RasterDataset::new(
            vec![Array2::<u8>::ones((10, 10))],
            Some(GeoTransform::new(0., 10., 1., -1.)),
            Some(Crs::from_epsg(3857)),
            None,
        )
        .unwrap();
        let vector = vector(vec![rect((100., 100.), (110., 110.))], Crs::from_epsg(3857));
        assert!(matches!(
            clip(&raster, &vector),
            Err(GeoprocessError::EmptyIntersection)
        ));
    }

    #[rstest]
    #[case(polygon!(
        exterior: [(x: -10., y: -10.), (x: 14., y: -10.), (x: 14., y: 14.), (x: -10., y: 14.)],
        interiors: [[(x: -1., y: -1.), (x: 5., y: -1.), (x: 5., y: 5.), (x: -1., y: 5.)]],
    ))]
    #[case(polygon![(x: 3., y: 8.), (x: 8., y: 3.), (x: 8., y: 8.)])]
    fn overlapping_bounds_without_covered_pixel_is_an_error(#[case] polygon: Polygon) {
        let raster = ones(Crs::from_epsg(32633));
        let vector = vector(vec![polygon], Crs::from_epsg(32633));
        assert!(matches!(
            clip(&raster, &vector),
            Err(GeoprocessError::EmptyIntersection)
        ));
        let params = ClipParams { crop: false };
        assert!(matches!(
            clip_with(&raster, &vector, &params, &BuiltinReprojector),
            Err(GeoprocessError::EmptyIntersection)
        ));
    }

    #[test]
    fn invalid_polygons_are_skipped() {
        let raster = ones(Crs::from_epsg(32633));
        let bowtie = polygon![(x: 0., y: 0.), (x: 4., y: 4.), (x: 4., y: 1.), (x: 0., y: 4.)];
        let clipped = clip(
            &raster,
            &vector(vec![bowtie.clone(), rect((0., 0.), (1., 1.))], Crs::from_epsg(32633)),
        )
        .unwrap();
        assert_eq!(clipped.shape(), (1, 1));
        assert_eq!(clipped.transform(), Some(&GeoTransform::new(0., 1., 1., -1.)));

        assert!(matches!(
            clip(&raster, &vector(vec![bowtie], Crs::from_epsg(32633))),
            Err(GeoprocessError::EmptyIntersection)
        ));
    }

    #[test]
    fn masks_pixels_outside_polygon() {
        let raster = ones(Crs::from_epsg(32633));
        let triangle = polygon![(x: 0., y: 0.), (x: 4., y: 0.), (x: 0., y: 4.)];
        let clipped = clip(&raster, &vector(vec![triangle], Crs::from_epsg(32633))).unwrap();
        assert_eq!(clipped.shape(), (4, 4));
        let nodata = f64::fallback_nodata();
        assert_eq!(clipped.nodata(), Some(nodata));
        // centres on the hypotenuse are inside
        let inside = clipped.bands()[0].iter().filter(|value| **value == 1.).count();
        assert_eq!(inside, 10);
        assert_eq!(clipped.bands()[0][[0, 3]], nodata);
        assert_eq!(clipped.bands()[0][[3, 0]], 1.);
    }

    #[test]
    fn unsigned_rasters_fall_back_to_type_max() {
        let raster = RasterDataset::new(
            vec![Array2::<u16>::from_elem((4, 4), 7)],
            Some(GeoTransform::new(0., 4., 1., -1.)),
            Some(Crs::from_epsg(32633)),
            None,
        )
        .unwrap();
        let triangle = polygon![(x: 0., y: 0.), (x: 4., y: 0.), (x: 0., y: 4.)];
        let clipped = clip(&raster, &vector(vec![triangle], Crs::from_epsg(32633))).unwrap();
        assert_eq!(clipped.nodata(), Some(u16::MAX));
        assert_eq!(clipped.bands()[0][[0, 3]], u16::MAX);
        assert_eq!(clipped.metadata().get(metadata::NODATA), Some("65535"));
    }

    #[rstest]
    #[case(rect((1.2, 0.7), (2.9, 3.6)))]
    #[case(rect((-3., -3.), (1.5, 2.)))]
    #[case(rect((0.6, 0.6), (3.4, 3.4)))]
    fn output_extent_is_contained(#[case] polygon: Polygon) {
        let raster = ones(Crs::from_epsg(32633));
        let vector = vector(vec![polygon], Crs::from_epsg(32633));
        let clipped = clip(&raster, &vector).unwrap();
        let extent = clipped.bounds().unwrap();
        assert!(raster.bounds().unwrap().contains_bounds(&extent));
        // pixel centres lie in the polygon bounds, so edges are within half a pixel
        assert!(vector.bounds().unwrap().grow(0.5).contains_bounds(&extent));
    }

    #[test]
    fn without_crop_keeps_full_extent() {
        let raster = ones(Crs::from_epsg(32633));
        let vector = vector(vec![rect((1., 1.), (3., 3.))], Crs::from_epsg(32633));
        let params = ClipParams { crop: false };
        let clipped = clip_with(&raster, &vector, &params, &BuiltinReprojector).unwrap();
        assert_eq!(clipped.shape(), (4, 4));
        assert_eq!(clipped.transform(), raster.transform());
        assert_eq!(clipped.bands()[0].iter().filter(|value| **value == 1.).count(), 4);
    }

    #[test]
    fn vector_is_reprojected_into_raster_crs() {
        let raster = RasterDataset::new(
            vec![Array2::from_elem((4, 4), 3i32)],
            Some(GeoTransform::new(0., 4000., 1000., -1000.)),
            Some(Crs::web_mercator()),
            Some(-1),
        )
        .unwrap();
        let geographic = vector(vec![rect((1000., 1000.), (2000., 2000.))], Crs::web_mercator())
            .reproject(&Crs::wgs84(), &BuiltinReprojector)
            .unwrap();
        let clipped = clip(&raster, &geographic).unwrap();
        assert_eq!(clipped.shape(), (1, 1));
        assert_eq!(clipped.bands()[0][[0, 0]], 3);
        assert_eq!(
            clipped.transform(),
            Some(&GeoTransform::new(1000., 2000., 1000., -1000.))
        );
    }

    #[test]
    fn missing_vector_crs_is_a_mismatch() {
        let raster = ones(Crs::from_epsg(32633));
        let vector = VectorDataset::from_shapes([rect((1., 1.), (3., 3.))], None).unwrap();
        assert!(matches!(
            clip(&raster, &vector),
            Err(GeoprocessError::CrsMismatch(_))
        ));
    }

    #[test]
    fn points_alone_do_not_clip() {
        let raster = ones(Crs::from_epsg(32633));
        let vector =
            VectorDataset::from_shapes([point!(x: 1.5, y: 1.5)], Some(Crs::from_epsg(32633)))
                .unwrap();
        assert!(matches!(
            clip(&raster, &vector),
            Err(GeoprocessError::EmptyIntersection)
        ));
    }

    #[test]
    fn mask_covers_full_grid() {
        let raster = ones(Crs::from_epsg(32633));
        let vector = vector(
            vec![rect((0., 0.), (1., 1.)), rect((3., 3.), (4., 4.))],
            Crs::from_epsg(32633),
        );
        let mask = rasterize_mask(&raster, &vector, &BuiltinReprojector).unwrap();
        assert_eq!(mask.dim(), (4, 4));
        assert!(mask[[3, 0]] && mask[[0, 3]]);
        assert_eq!(mask.iter().filter(|inside| **inside).count(), 2);
    }
}
