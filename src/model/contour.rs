//! Iso-contour extraction over a scalar field (marching squares).
//!
//! DESIGN
//! ======
//! Each 2x2 cell contributes zero, one, or two line segments whose endpoints
//! are linearly interpolated level crossings on the cell edges. Segments are
//! then chained into polylines by matching endpoints; shared edges between
//! neighboring cells interpolate to bit-identical coordinates, so exact
//! float equality is a sound join key.
//!
//! Coordinates are `(row, col)` in grid index space; callers apply any
//! pixel-center offset themselves.

use std::collections::HashMap;

use ndarray::Array2;

type Point = (f64, f64);
type Segment = (Point, Point);

/// Find all iso-contours of `field` at `level`, as open or closed polylines.
///
/// Closed contours repeat their first point at the end.
#[must_use]
pub fn find_contours(field: &Array2<f64>, level: f64) -> Vec<Vec<Point>> {
    let (rows, cols) = field.dim();
    if rows < 2 || cols < 2 {
        return Vec::new();
    }

    let mut segments: Vec<Segment> = Vec::new();
    for r in 0..rows - 1 {
        for c in 0..cols - 1 {
            cell_segments(field, level, r, c, &mut segments);
        }
    }
    chain(segments)
}

// =============================================================================
// CELL TABLE
// =============================================================================

/// Emit the segments crossing one cell with upper-left corner `(r, c)`.
fn cell_segments(field: &Array2<f64>, level: f64, r: usize, c: usize, out: &mut Vec<Segment>) {
    let ul = field[(r, c)];
    let ur = field[(r, c + 1)];
    let ll = field[(r + 1, c)];
    let lr = field[(r + 1, c + 1)];

    let index = usize::from(ul >= level) << 3
        | usize::from(ur >= level) << 2
        | usize::from(lr >= level) << 1
        | usize::from(ll >= level);

    #[allow(clippy::cast_precision_loss)]
    let (r0, c0) = (r as f64, c as f64);
    let frac = |a: f64, b: f64| (level - a) / (b - a);
    let top = || (r0, c0 + frac(ul, ur));
    let bottom = || (r0 + 1.0, c0 + frac(ll, lr));
    let left = || (r0 + frac(ul, ll), c0);
    let right = || (r0 + frac(ur, lr), c0 + 1.0);

    match index {
        0b0000 | 0b1111 => {}
        0b1000 | 0b0111 => out.push((top(), left())),
        0b0100 | 0b1011 => out.push((top(), right())),
        0b0010 | 0b1101 => out.push((right(), bottom())),
        0b0001 | 0b1110 => out.push((left(), bottom())),
        0b1100 | 0b0011 => out.push((left(), right())),
        0b1001 | 0b0110 => out.push((top(), bottom())),
        0b1010 => {
            out.push((top(), left()));
            out.push((right(), bottom()));
        }
        0b0101 => {
            out.push((top(), right()));
            out.push((left(), bottom()));
        }
        _ => unreachable!("4-bit cell index"),
    }
}

// =============================================================================
// CHAINING
// =============================================================================

fn key(p: Point) -> (u64, u64) {
    (p.0.to_bits(), p.1.to_bits())
}

/// Chain loose segments into polylines by matching endpoints.
fn chain(segments: Vec<Segment>) -> Vec<Vec<Point>> {
    let mut adjacency: HashMap<(u64, u64), Vec<usize>> = HashMap::new();
    for (i, (a, b)) in segments.iter().enumerate() {
        adjacency.entry(key(*a)).or_default().push(i);
        adjacency.entry(key(*b)).or_default().push(i);
    }

    let mut used = vec![false; segments.len()];
    let mut paths = Vec::new();

    for start in 0..segments.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let (a, b) = segments[start];
        let mut path = std::collections::VecDeque::from([a, b]);

        // Grow at the back, then at the front, until no unused segment joins.
        loop {
            let tail = *path.back().unwrap_or(&a);
            match take_joining(&adjacency, &segments, &mut used, tail) {
                Some(next) => path.push_back(next),
                None => break,
            }
        }
        loop {
            let head = *path.front().unwrap_or(&a);
            match take_joining(&adjacency, &segments, &mut used, head) {
                Some(next) => path.push_front(next),
                None => break,
            }
        }
        paths.push(path.into_iter().collect());
    }
    paths
}

/// Consume one unused segment touching `point`, returning its far endpoint.
fn take_joining(
    adjacency: &HashMap<(u64, u64), Vec<usize>>,
    segments: &[Segment],
    used: &mut [bool],
    point: Point,
) -> Option<Point> {
    let candidates = adjacency.get(&key(point))?;
    for &i in candidates {
        if used[i] {
            continue;
        }
        used[i] = true;
        let (a, b) = segments[i];
        return Some(if key(a) == key(point) { b } else { a });
    }
    None
}

#[cfg(test)]
#[path = "contour_test.rs"]
mod tests;
