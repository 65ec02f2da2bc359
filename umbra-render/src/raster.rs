//! CPU polygon rasterizer.
//!
//! Even-odd scanline fill sampled on integer rows, followed by the
//! polygon outline, so boundary pixels (and degenerate slivers) are
//! always painted. Works on any `image::GenericImage`.

use image::GenericImage;

/// Fill `points` (pixel coordinates, implicitly closed) with `pixel`.
pub fn fill_polygon<I: GenericImage>(image: &mut I, points: &[(i64, i64)], pixel: I::Pixel) {
    let (width, height) = image.dimensions();
    if points.len() < 3 || width == 0 || height == 0 {
        return;
    }

    let y_min = points.iter().map(|p| p.1).min().unwrap_or(0).max(0);
    let y_max = points
        .iter()
        .map(|p| p.1)
        .max()
        .unwrap_or(0)
        .min(height as i64 - 1);

    let n = points.len();
    let mut crossings: Vec<f64> = Vec::with_capacity(n);

    for y in y_min..=y_max {
        crossings.clear();
        for i in 0..n {
            let (x0, y0) = points[i];
            let (x1, y1) = points[(i + 1) % n];
            if y0 == y1 {
                continue;
            }
            // Half-open on the upper end so shared vertices count once.
            let (lo, hi) = if y0 < y1 { (y0, y1) } else { (y1, y0) };
            if y < lo || y >= hi {
                continue;
            }
            let t = (y - y0) as f64 / (y1 - y0) as f64;
            crossings.push(x0 as f64 + t * (x1 - x0) as f64);
        }
        crossings.sort_by(|a, b| a.total_cmp(b));

        for pair in crossings.chunks_exact(2) {
            hline(image, y, pair[0].ceil() as i64, pair[1].floor() as i64, pixel);
        }
    }

    for i in 0..n {
        line(image, points[i], points[(i + 1) % n], pixel);
    }
}

fn hline<I: GenericImage>(image: &mut I, y: i64, x_start: i64, x_end: i64, pixel: I::Pixel) {
    let (width, _) = image.dimensions();
    let x_start = x_start.max(0);
    let x_end = x_end.min(width as i64 - 1);
    for x in x_start..=x_end {
        image.put_pixel(x as u32, y as u32, pixel);
    }
}

fn put_checked<I: GenericImage>(image: &mut I, x: i64, y: i64, pixel: I::Pixel) {
    let (width, height) = image.dimensions();
    if x >= 0 && y >= 0 && x < width as i64 && y < height as i64 {
        image.put_pixel(x as u32, y as u32, pixel);
    }
}

/// Bresenham line, endpoints inclusive.
fn line<I: GenericImage>(image: &mut I, from: (i64, i64), to: (i64, i64), pixel: I::Pixel) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        put_checked(image, x, y, pixel);
        if x == to.0 && y == to.1 {
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
    const RED: Rgb<u8> = Rgb([255, 0, 0]);
    const BLUE: Rgb<u8> = Rgb([0, 0, 255]);

    #[test]
    fn test_full_square_covers_everything() {
        let mut img = RgbImage::from_pixel(10, 10, WHITE);
        fill_polygon(&mut img, &[(0, 0), (9, 0), (9, 9), (0, 9)], RED);
        assert!(img.pixels().all(|p| *p == RED));
    }

    #[test]
    fn test_triangle_interior_and_exterior() {
        let mut img = RgbImage::from_pixel(10, 10, WHITE);
        fill_polygon(&mut img, &[(0, 0), (5, 0), (0, 5)], RED);
        assert_eq!(*img.get_pixel(1, 1), RED);
        assert_eq!(*img.get_pixel(0, 5), RED);
        assert_eq!(*img.get_pixel(5, 0), RED);
        assert_eq!(*img.get_pixel(4, 4), WHITE);
        assert_eq!(*img.get_pixel(8, 8), WHITE);
    }

    #[test]
    fn test_later_polygon_paints_over_earlier() {
        let mut img = RgbImage::from_pixel(10, 10, WHITE);
        fill_polygon(&mut img, &[(0, 0), (6, 0), (6, 6), (0, 6)], RED);
        fill_polygon(&mut img, &[(3, 3), (9, 3), (9, 9), (3, 9)], BLUE);
        assert_eq!(*img.get_pixel(1, 1), RED);
        assert_eq!(*img.get_pixel(4, 4), BLUE);
        assert_eq!(*img.get_pixel(8, 8), BLUE);
    }

    #[test]
    fn test_concave_polygon_even_odd() {
        // U shape: the notch at the top middle stays unpainted.
        let mut img = RgbImage::from_pixel(9, 9, WHITE);
        let u = [(0, 0), (2, 0), (2, 6), (6, 6), (6, 0), (8, 0), (8, 8), (0, 8)];
        fill_polygon(&mut img, &u, RED);
        assert_eq!(*img.get_pixel(4, 2), WHITE);
        assert_eq!(*img.get_pixel(1, 2), RED);
        assert_eq!(*img.get_pixel(7, 2), RED);
        assert_eq!(*img.get_pixel(4, 7), RED);
    }

    #[test]
    fn test_degenerate_polygon_draws_outline_only() {
        let mut img = RgbImage::from_pixel(10, 10, WHITE);
        fill_polygon(&mut img, &[(0, 0), (9, 9), (0, 0)], RED);
        assert_eq!(*img.get_pixel(5, 5), RED);
        assert_eq!(*img.get_pixel(5, 4), WHITE);
    }

    #[test]
    fn test_too_few_points_is_noop() {
        let mut img = RgbImage::from_pixel(4, 4, WHITE);
        fill_polygon(&mut img, &[(0, 0), (3, 3)], RED);
        assert!(img.pixels().all(|p| *p == WHITE));
    }
}
