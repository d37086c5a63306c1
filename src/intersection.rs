use geo::{Coord, CoordNum, Rect};

use crate::errors::{GeoprocessError, Result};

pub trait Intersection {
    type Output;
    fn intersection(&self, rhs: &Self) -> Result<Self::Output>;
}

/// Rectangles that only share an edge still intersect, as a rectangle of
/// zero width or height.
impl<T: CoordNum> Intersection for Rect<T> {
    type Output = Rect<T>;
    fn intersection(&self, rhs: &Self) -> Result<Rect<T>> {
        let lhs_max = self.max();
        let rhs_min = rhs.min();
        if (lhs_max.x < rhs_min.x) | (lhs_max.y < rhs_min.y) {
            return Err(GeoprocessError::EmptyIntersection);
        }

        let lhs_min = self.min();
        let rhs_max = rhs.max();
        if (lhs_min.x > rhs_max.x) | (lhs_min.y > rhs_max.y) {
            return Err(GeoprocessError::EmptyIntersection);
        }

        let min = Coord {
            x: if lhs_min.x > rhs_min.x { lhs_min.x } else { rhs_min.x },
            y: if lhs_min.y > rhs_min.y { lhs_min.y } else { rhs_min.y },
        };
        let max = Coord {
            x: if lhs_max.x < rhs_max.x { lhs_max.x } else { rhs_max.x },
            y: if lhs_max.y < rhs_max.y { lhs_max.y } else { rhs_max.y },
        };

        Ok(Rect::new(min, max))
    }
}
