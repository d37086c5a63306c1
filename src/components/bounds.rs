use geo::{Coord, Rect};
use itertools::Itertools;
use ndarray::{s, Array2, ArrayView2};
use shrinkwraprs::Shrinkwrap;

use crate::{
    components::transforms::GeoTransform,
    errors::{GeoprocessError, Result},
    intersection::Intersection,
};

/// Tolerance, in pixels, for pixel centres lying on a bounds edge.
const CENTER_EPSILON: f64 = 1e-9;

/// Axis aligned bounds in world space.
#[derive(Shrinkwrap, Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds(Rect);

impl From<Rect> for GeoBounds {
    fn from(value: Rect) -> Self {
        Self(value)
    }
}

impl Intersection for GeoBounds {
    type Output = GeoBounds;
    fn intersection(&self, rhs: &Self) -> Result<Self::Output> {
        Ok(GeoBounds(self.0.intersection(&rhs.0)?))
    }
}

impl GeoBounds {
    /// Envelope of the given coordinates.
    pub fn enclosing(coords: impl IntoIterator<Item = Coord>) -> Option<Self> {
        let coords: Vec<Coord> = coords.into_iter().collect();
        let (min_x, max_x) = coords.iter().map(|coord| coord.x).minmax().into_option()?;
        let (min_y, max_y) = coords.iter().map(|coord| coord.y).minmax().into_option()?;
        Some(Self(Rect::new((min_x, min_y), (max_x, max_y))))
    }

    /// World extent of a `rows` x `cols` grid.
    pub fn of_grid(transform: &GeoTransform, rows: usize, cols: usize) -> Self {
        let (rows, cols) = (rows as f64, cols as f64);
        let corners = [(0., 0.), (cols, 0.), (0., rows), (cols, rows)]
            .map(|(col, row)| transform.pixel_to_world(col, row));
        // four corners are never empty
        Self::enclosing(corners).unwrap_or(Self(Rect::new(corners[0], corners[0])))
    }

    pub fn union(&self, other: &Self) -> Self {
        Self::enclosing([self.min(), self.max(), other.min(), other.max()]).unwrap_or(*self)
    }

    pub fn grow(&self, by: f64) -> Self {
        let by = Coord { x: by, y: by };
        Self(Rect::new(self.min() - by, self.max() + by))
    }

    pub fn contains_bounds(&self, other: &Self) -> bool {
        self.min().x <= other.min().x
            && self.min().y <= other.min().y
            && self.max().x >= other.max().x
            && self.max().y >= other.max().y
    }
}

/// Pixel window of a raster grid.
///
/// Defined by:
///     - `offset`: `(col, row)` of the top left pixel of the window,
///         with origin at the top left pixel of the raster.
///     - `shape`: `(cols, rows)`.
///
/// In the underlying rect `offset` is given by `.min` and the window
/// extends to `.max` exclusive.
#[derive(Shrinkwrap, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow(Rect<usize>);

impl Intersection for PixelWindow {
    type Output = PixelWindow;
    fn intersection(&self, rhs: &Self) -> Result<Self::Output> {
        let window = PixelWindow(self.0.intersection(&rhs.0)?);
        if window.is_empty() {
            return Err(GeoprocessError::EmptyIntersection);
        }
        Ok(window)
    }
}

impl PixelWindow {
    pub fn new(offset: (usize, usize), shape: (usize, usize)) -> Self {
        let offset = Coord::from(offset);
        let max = offset + Coord::from(shape);
        Self(Rect::new(offset, max))
    }

    /// Window spanning a whole `rows` x `cols` grid.
    pub fn full(rows: usize, cols: usize) -> Self {
        Self::new((0, 0), (cols, rows))
    }

    /// Pixels of a `rows` x `cols` grid whose centres fall within `bounds`.
    ///
    /// Centres lying on the bounds edge are included. Fails with
    /// [GeoprocessError::EmptyIntersection] when no centre qualifies.
    pub fn covering(
        bounds: &GeoBounds,
        transform: &GeoTransform,
        rows: usize,
        cols: usize,
    ) -> Result<Self> {
        let inverse = transform.inverse()?;
        let corners = [
            bounds.min(),
            bounds.max(),
            Coord {
                x: bounds.min().x,
                y: bounds.max().y,
            },
            Coord {
                x: bounds.max().x,
                y: bounds.min().y,
            },
        ]
        .map(|corner| inverse.apply(corner));
        let pixel_bounds =
            GeoBounds::enclosing(corners).ok_or(GeoprocessError::EmptyIntersection)?;

        let first_col = (pixel_bounds.min().x - 0.5 - CENTER_EPSILON).ceil().max(0.);
        let last_col = (pixel_bounds.max().x - 0.5 + CENTER_EPSILON)
            .floor()
            .min(cols as f64 - 1.);
        let first_row = (pixel_bounds.min().y - 0.5 - CENTER_EPSILON).ceil().max(0.);
        let last_row = (pixel_bounds.max().y - 0.5 + CENTER_EPSILON)
            .floor()
            .min(rows as f64 - 1.);

        let finite = [first_col, last_col, first_row, last_row]
            .iter()
            .all(|value| value.is_finite());
        if !finite || first_col > last_col || first_row > last_row {
            return Err(GeoprocessError::EmptyIntersection);
        }

        let offset = (first_col as usize, first_row as usize);
        let shape = (
            (last_col - first_col) as usize + 1,
            (last_row - first_row) as usize + 1,
        );
        Ok(Self::new(offset, shape))
    }

    pub fn col_off(&self) -> usize {
        self.0.min().x
    }

    pub fn row_off(&self) -> usize {
        self.0.min().y
    }

    pub fn cols(&self) -> usize {
        self.0.width()
    }

    pub fn rows(&self) -> usize {
        self.0.height()
    }

    /// Array shape (rows, cols).
    pub fn shape(&self) -> (usize, usize) {
        (self.rows(), self.cols())
    }

    /// Pixel area of the window.
    pub fn size(&self) -> usize {
        self.rows() * self.cols()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        let (min, max) = (self.0.min(), self.0.max());
        (min.y..max.y).contains(&row) && (min.x..max.x).contains(&col)
    }

    pub fn slice<'a, T>(&self, band: &'a Array2<T>) -> ArrayView2<'a, T> {
        let (min, max) = (self.0.min(), self.0.max());
        band.slice(s![min.y..max.y, min.x..max.x])
    }
}
