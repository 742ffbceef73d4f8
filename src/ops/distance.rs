// ============================================================================
// DISTANCE FIELD - exact squared EDT, halo fill, enclosed-area fill
// ============================================================================

use std::collections::VecDeque;

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::canvas::Color;

/// Neighbourhood used when flooding background regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Connectivity {
    #[default]
    Four,
    Eight,
}

/// Foreground mask: `true` where alpha ≥ `alpha_threshold`.
pub fn alpha_mask(image: &RgbaImage, alpha_threshold: u8) -> Vec<bool> {
    image.pixels().map(|p| p[3] >= alpha_threshold).collect()
}

/// Exact squared Euclidean distance from every pixel to the nearest `true`
/// mask pixel (Felzenszwalb–Huttenlocher, one 1-D pass per column then per
/// row). Pixels are `f64::INFINITY` when the mask has no foreground at all.
pub fn squared_euclidean_distance_transform(mask: &[bool], width: u32, height: u32) -> Vec<f64> {
    let w = width as usize;
    let h = height as usize;
    if w == 0 || h == 0 {
        return Vec::new();
    }
    debug_assert_eq!(mask.len(), w * h);

    // Column pass on a column-major copy so every column is a contiguous slice
    let mut columns = vec![f64::INFINITY; w * h];
    for y in 0..h {
        for x in 0..w {
            if mask.get(y * w + x).copied().unwrap_or(false) {
                columns[x * h + y] = 0.0;
            }
        }
    }
    columns
        .par_chunks_mut(h)
        .for_each_init(Envelope::default, |env, col| env.transform(col));

    // Row pass
    let mut grid = vec![0.0; w * h];
    for x in 0..w {
        for y in 0..h {
            grid[y * w + x] = columns[x * h + y];
        }
    }
    grid.par_chunks_mut(w)
        .for_each_init(Envelope::default, |env, row| env.transform(row));
    grid
}

/// Scratch space for the 1-D lower envelope of parabolas.
#[derive(Default)]
struct Envelope {
    /// Parabola vertices (indices into the signal), strictly increasing.
    vertices: Vec<usize>,
    /// `bounds[i]` is where parabola `i` starts to be the minimum.
    bounds: Vec<f64>,
    out: Vec<f64>,
}

impl Envelope {
    /// Replace `f` in place with `d[q] = min_v (q − v)² + f[v]`.
    /// Infinite samples never become vertices.
    fn transform(&mut self, f: &mut [f64]) {
        let n = f.len();
        self.vertices.clear();
        self.bounds.clear();

        for q in 0..n {
            if !f[q].is_finite() {
                continue;
            }
            let fq = f[q] + (q * q) as f64;
            let mut start = f64::NEG_INFINITY;
            while let (Some(&v), Some(&z)) = (self.vertices.last(), self.bounds.last()) {
                let sill = (fq - (f[v] + (v * v) as f64)) / (2.0 * (q - v) as f64);
                if sill <= z {
                    self.vertices.pop();
                    self.bounds.pop();
                    start = f64::NEG_INFINITY;
                } else {
                    start = sill;
                    break;
                }
            }
            self.vertices.push(q);
            self.bounds.push(start);
        }

        if self.vertices.is_empty() {
            f.fill(f64::INFINITY);
            return;
        }

        self.out.clear();
        self.out.resize(n, 0.0);
        let mut k = 0;
        for q in 0..n {
            while k + 1 < self.vertices.len() && self.bounds[k + 1] < q as f64 {
                k += 1;
            }
            let v = self.vertices[k];
            let dq = q as f64 - v as f64;
            self.out[q] = dq * dq + f[v];
        }
        f.copy_from_slice(&self.out);
    }
}

/// `fill` wherever the distance to a foreground pixel (alpha ≥ threshold)
/// is at most `radius`, fully transparent elsewhere.
pub fn sdf_halo_fill(src: &RgbaImage, radius: f32, fill: Color, alpha_threshold: u8) -> RgbaImage {
    let (w, h) = src.dimensions();
    let mask = alpha_mask(src, alpha_threshold);
    let dist = squared_euclidean_distance_transform(&mask, w, h);
    let r = radius.max(0.0) as f64;
    let r2 = r * r;
    let fill_px = fill.to_pixel();
    let clear = Rgba([0, 0, 0, 0]);

    let mut out = RgbaImage::new(w, h);
    for (i, px) in out.pixels_mut().enumerate() {
        *px = if dist.get(i).is_some_and(|d| *d <= r2) { fill_px } else { clear };
    }
    out
}

/// Overwrite background pixels (alpha < threshold) that cannot be reached
/// from the image border without crossing foreground with `fill`.
pub fn fill_enclosed_areas(
    src: &RgbaImage,
    fill: Color,
    alpha_threshold: u8,
    connectivity: Connectivity,
) -> RgbaImage {
    let (w, h) = src.dimensions();
    let mut out = src.clone();
    if w == 0 || h == 0 {
        return out;
    }
    let background: Vec<bool> = src.pixels().map(|p| p[3] < alpha_threshold).collect();
    let outside = outside_connected(&background, w, h, connectivity);

    let fill_px = fill.to_pixel();
    for (i, px) in out.pixels_mut().enumerate() {
        if background[i] && !outside[i] {
            *px = fill_px;
        }
    }
    out
}

/// BFS from every border background pixel. Returns the reached set.
fn outside_connected(background: &[bool], w: u32, h: u32, connectivity: Connectivity) -> Vec<bool> {
    let wu = w as usize;
    let mut reached = vec![false; background.len()];
    let mut queue: VecDeque<(u32, u32)> = VecDeque::with_capacity(1024);

    let seed = |x: u32, y: u32, reached: &mut Vec<bool>, queue: &mut VecDeque<(u32, u32)>| {
        let idx = y as usize * wu + x as usize;
        if background[idx] && !reached[idx] {
            reached[idx] = true;
            queue.push_back((x, y));
        }
    };
    for x in 0..w {
        seed(x, 0, &mut reached, &mut queue);
        seed(x, h - 1, &mut reached, &mut queue);
    }
    for y in 0..h {
        seed(0, y, &mut reached, &mut queue);
        seed(w - 1, y, &mut reached, &mut queue);
    }

    const FOUR: [(i32, i32); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
    const EIGHT: [(i32, i32); 8] = [(-1, 0), (1, 0), (0, -1), (0, 1), (-1, -1), (1, -1), (-1, 1), (1, 1)];
    let offsets: &[(i32, i32)] = match connectivity {
        Connectivity::Four => &FOUR,
        Connectivity::Eight => &EIGHT,
    };

    while let Some((px, py)) = queue.pop_front() {
        for &(ox, oy) in offsets {
            let nx = px as i64 + ox as i64;
            let ny = py as i64 + oy as i64;
            if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                continue;
            }
            let idx = ny as usize * wu + nx as usize;
            if background[idx] && !reached[idx] {
                reached[idx] = true;
                queue.push_back((nx as u32, ny as u32));
            }
        }
    }
    reached
}

#[cfg(test)]
mod tests {
    use super::*;

    /// O(n²) reference used to check the separable transform.
    fn brute_force(mask: &[bool], w: usize, h: usize) -> Vec<f64> {
        let fg: Vec<(usize, usize)> = (0..w * h).filter(|i| mask[*i]).map(|i| (i % w, i / w)).collect();
        (0..w * h)
            .map(|i| {
                let (x, y) = (i % w, i / w);
                fg.iter()
                    .map(|&(fx, fy)| {
                        let dx = x as f64 - fx as f64;
                        let dy = y as f64 - fy as f64;
                        dx * dx + dy * dy
                    })
                    .fold(f64::INFINITY, f64::min)
            })
            .collect()
    }

    fn ring_image() -> RgbaImage {
        let mut img = RgbaImage::new(5, 5);
        for y in 1..=3 {
            for x in 1..=3 {
                if (x, y) != (2, 2) {
                    img.put_pixel(x, y, Rgba([0, 0, 0, 255]));
                }
            }
        }
        img
    }

    #[test]
    fn edt_matches_brute_force() {
        let (w, h) = (13usize, 9usize);
        let mask: Vec<bool> = (0..w * h).map(|i| (i * 7919) % 23 == 0 || i == 50).collect();
        let fast = squared_euclidean_distance_transform(&mask, w as u32, h as u32);
        assert_eq!(fast, brute_force(&mask, w, h));
    }

    #[test]
    fn edt_single_point() {
        let mut mask = vec![false; 25];
        mask[12] = true;
        let d = squared_euclidean_distance_transform(&mask, 5, 5);
        assert_eq!(d[12], 0.0);
        assert_eq!(d[0], 8.0);
        assert_eq!(d[14], 4.0);
    }

    #[test]
    fn edt_without_foreground_is_infinite() {
        let d = squared_euclidean_distance_transform(&[false; 6], 3, 2);
        assert!(d.iter().all(|v| v.is_infinite()));
        assert!(squared_euclidean_distance_transform(&[], 0, 4).is_empty());
    }

    #[test]
    fn halo_radius_zero_reproduces_mask() {
        let src = ring_image();
        let fill = Color::from_rgba8([200, 100, 50, 255]);
        let out = sdf_halo_fill(&src, 0.0, fill, 1);
        for (s, o) in src.pixels().zip(out.pixels()) {
            if s[3] > 0 {
                assert_eq!(o.0, [200, 100, 50, 255]);
            } else {
                assert_eq!(o.0, [0, 0, 0, 0]);
            }
        }
    }

    #[test]
    fn halo_grows_by_radius() {
        let mut src = RgbaImage::new(9, 9);
        src.put_pixel(4, 4, Rgba([255, 255, 255, 255]));
        let out = sdf_halo_fill(&src, 2.0, Color::BLACK, 1);
        assert_eq!(out.get_pixel(4, 2)[3], 255);
        assert_eq!(out.get_pixel(5, 5)[3], 255);
        assert_eq!(out.get_pixel(6, 6)[3], 0);
        assert_eq!(out.get_pixel(4, 1)[3], 0);
    }

    #[test]
    fn enclosed_pixel_filled_for_both_connectivities() {
        let src = ring_image();
        let fill = Color::from_rgba8([0, 255, 0, 255]);
        for connectivity in [Connectivity::Four, Connectivity::Eight] {
            let out = fill_enclosed_areas(&src, fill, 1, connectivity);
            for y in 0..5 {
                for x in 0..5 {
                    let expected = if (x, y) == (2, 2) { [0, 255, 0, 255] } else { src.get_pixel(x, y).0 };
                    assert_eq!(out.get_pixel(x, y).0, expected, "{:?} at {},{}", connectivity, x, y);
                }
            }
        }
    }

    #[test]
    fn diagonal_gap_leaks_only_with_eight_connectivity() {
        // Diamond ring: the interior touches the outside only diagonally
        let mut src = RgbaImage::new(5, 5);
        for (x, y) in [(2, 1), (1, 2), (3, 2), (2, 3)] {
            src.put_pixel(x, y, Rgba([0, 0, 0, 255]));
        }
        let fill = Color::WHITE;
        let four = fill_enclosed_areas(&src, fill, 1, Connectivity::Four);
        let eight = fill_enclosed_areas(&src, fill, 1, Connectivity::Eight);
        assert_eq!(four.get_pixel(2, 2)[3], 255);
        assert_eq!(eight.get_pixel(2, 2)[3], 0);
    }
}
