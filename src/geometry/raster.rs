use super::primitives::Polyline;
use geo::{Coord, LineString, MultiPolygon};

/// Integer pixel coordinate; pixel centers sit on integer positions.
pub type Pixel = (i64, i64);

/// Pixels whose centers fall inside the polygon (even-odd over every ring,
/// so holes are excluded). Row-major order, top to bottom.
pub fn polygon_pixels(poly: &MultiPolygon<f64>) -> Vec<Pixel> {
    let rings: Vec<&LineString<f64>> = poly
        .0
        .iter()
        .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors().iter()))
        .collect();

    let Some((min_y, max_y)) = y_extent(&rings) else {
        return Vec::new();
    };

    let mut pixels = Vec::new();
    let mut crossings: Vec<f64> = Vec::new();

    for y in (min_y.ceil() as i64)..=(max_y.floor() as i64) {
        let yf = y as f64;
        crossings.clear();

        for ring in &rings {
            for line in ring.lines() {
                let (a, b) = (line.start, line.end);
                // Half-open on y so a vertex shared by two edges counts once.
                if (a.y <= yf && yf < b.y) || (b.y <= yf && yf < a.y) {
                    let t = (yf - a.y) / (b.y - a.y);
                    crossings.push(a.x + t * (b.x - a.x));
                }
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));

        for span in crossings.chunks_exact(2) {
            let start = span[0].ceil() as i64;
            let end = span[1].floor() as i64;
            pixels.extend((start..=end).map(|x| (x, y)));
        }
    }

    pixels.dedup();
    pixels
}

/// Pixels along a polyline, one Bresenham run per segment. A single-point
/// line covers its rounded pixel.
pub fn line_pixels(line: &Polyline) -> Vec<Pixel> {
    let points: Vec<Pixel> = line
        .points()
        .iter()
        .map(|p| (p.x.round() as i64, p.y.round() as i64))
        .collect();

    let mut pixels = Vec::new();
    match points.as_slice() {
        [] => {}
        [only] => pixels.push(*only),
        _ => {
            for pair in points.windows(2) {
                for px in bresenham(pair[0], pair[1]) {
                    if pixels.last() != Some(&px) {
                        pixels.push(px);
                    }
                }
            }
        }
    }
    pixels
}

fn bresenham((x0, y0): Pixel, (x1, y1): Pixel) -> Vec<Pixel> {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };

    let (mut x, mut y) = (x0, y0);
    let mut err = dx + dy;
    let mut out = Vec::with_capacity((dx.max(-dy) + 1) as usize);

    loop {
        out.push((x, y));
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
    out
}

fn y_extent(rings: &[&LineString<f64>]) -> Option<(f64, f64)> {
    rings
        .iter()
        .flat_map(|ring| ring.coords())
        .fold(None, |acc: Option<(f64, f64)>, Coord { y, .. }| match acc {
            None => Some((*y, *y)),
            Some((lo, hi)) => Some((lo.min(*y), hi.max(*y))),
        })
}
