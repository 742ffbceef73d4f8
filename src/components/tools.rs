use serde::{Deserialize, Serialize};

use crate::canvas::{Color, PixelBuffer};
use crate::components::strokes::StrokeRecord;

// ============================================================================
// BRUSH DEFINITIONS
// ============================================================================

/// Brush families. Pen writes opaque pixels, Pencil and Crayon blend a
/// textured alpha, Eraser blends towards transparency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrushFamily {
    #[default]
    Pen,
    Pencil,
    Crayon,
    Eraser,
}

impl BrushFamily {
    pub fn all() -> &'static [BrushFamily] {
        &[BrushFamily::Pen, BrushFamily::Pencil, BrushFamily::Crayon, BrushFamily::Eraser]
    }

    pub fn label(&self) -> &'static str {
        match self {
            BrushFamily::Pen => "Pen",
            BrushFamily::Pencil => "Pencil",
            BrushFamily::Crayon => "Crayon",
            BrushFamily::Eraser => "Eraser",
        }
    }

    pub fn is_textured(&self) -> bool {
        matches!(self, BrushFamily::Pencil | BrushFamily::Crayon)
    }
}

/// Footprint of a single stamp (and of a placed shape).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrushShape {
    Rectangle,
    #[default]
    Circle,
}

/// Brush configuration captured at stroke start.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BrushSpec {
    pub family: BrushFamily,
    pub shape: BrushShape,
    /// Diameter / side length in pixels at full pressure (≥ 1).
    pub base_size: u32,
    pub color: Color,
    pub pressure_enabled: bool,
}

impl BrushSpec {
    /// Colour the brush moves pixels towards. Erasing targets full transparency.
    pub fn paint_color(&self) -> Color {
        match self.family {
            BrushFamily::Eraser => Color::TRANSPARENT,
            _ => self.color,
        }
    }
}

/// Whether pointer drags paint freehand or place a rectangle/circle shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ToolMode {
    #[default]
    Freehand,
    Shape,
}

/// Document-wide tool configuration, shared by every canvas.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolState {
    pub family: BrushFamily,
    pub shape: BrushShape,
    pub base_size: u32,
    pub color: Color,
    pub pressure_enabled: bool,
    pub mode: ToolMode,
}

impl Default for ToolState {
    fn default() -> Self {
        Self {
            family: BrushFamily::Pen,
            shape: BrushShape::Circle,
            base_size: 8,
            color: Color::BLACK,
            pressure_enabled: true,
            mode: ToolMode::Freehand,
        }
    }
}

impl ToolState {
    /// Snapshot the current settings as an immutable per-stroke brush.
    pub fn brush(&self) -> BrushSpec {
        BrushSpec {
            family: self.family,
            shape: self.shape,
            base_size: self.base_size.max(1),
            color: self.color,
            pressure_enabled: self.pressure_enabled,
        }
    }

    pub fn set_size(&mut self, size: u32) {
        self.base_size = size.max(1);
    }
}

/// Brush diameter for a given pressure, floored at one pixel. Every family
/// follows pressure on freehand strokes; placed shapes never consult it.
pub fn size_from_pressure(brush: &BrushSpec, pressure: f32) -> u32 {
    let base = brush.base_size.max(1);
    if !brush.pressure_enabled {
        return base;
    }
    let p = if pressure.is_finite() { pressure.clamp(0.0, 1.0) } else { 1.0 };
    let min = base as f32 * 0.2;
    let max = base as f32;
    ((min + (max - min) * p).round() as u32).max(1)
}

/// Pressure at the two ends of a segment; samples are interpolated per point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PressureSpan {
    pub start: f32,
    pub end: f32,
}

impl PressureSpan {
    pub fn new(start: f32, end: f32) -> Self {
        Self { start, end }
    }

    pub fn constant(pressure: f32) -> Self {
        Self { start: pressure, end: pressure }
    }

    fn at(&self, t: f32) -> f32 {
        self.start + (self.end - self.start) * t
    }
}

/// One stamped point of a stroke with its resolved size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stamp {
    pub x: i32,
    pub y: i32,
    pub size: u32,
}

// ============================================================================
// GRAIN
// ============================================================================

/// Positional integer hash. Depends on `(x, y)` only, so textured strokes
/// reproduce identical pixels for identical input.
#[inline]
pub fn grain_hash(x: i32, y: i32) -> u32 {
    let mut h = (x as u32)
        .wrapping_mul(374_761_393)
        .wrapping_add((y as u32).wrapping_mul(668_265_263));
    h ^= h >> 13;
    h = h.wrapping_mul(1_274_126_177);
    h ^= h >> 16;
    h
}

/// Hash mapped into `[0, 1]`.
#[inline]
fn grain(x: i32, y: i32) -> f32 {
    (grain_hash(x, y) & 0xFFFF) as f32 / 65535.0
}

/// Per-pixel alpha multiplier for textured families.
/// `radial` is the normalised distance from a circular stamp's centre.
fn textured_alpha(family: BrushFamily, x: i32, y: i32, pressure: f32, radial: Option<f32>) -> f32 {
    let p = pressure.clamp(0.0, 1.0);
    let alpha = match family {
        BrushFamily::Pencil => {
            let base = 0.35 + 0.65 * p;
            let tooth = 0.6 + 0.4 * grain(x, y);
            let falloff = radial.map_or(1.0, |t| (1.0 - t * t).max(0.0));
            base * tooth * falloff
        }
        BrushFamily::Crayon => {
            let base = 0.6 + 0.4 * p;
            // Wax skips over paper tooth in 2×2 clumps
            let clump = grain(x >> 1, y >> 1);
            let fine = grain(x, y);
            let tooth = if clump < 0.18 { 0.1 } else { 0.8 + 0.2 * fine };
            let falloff = radial.map_or(1.0, |t| 1.0 - 0.35 * t.powi(4));
            base * tooth * falloff
        }
        _ => 1.0,
    };
    alpha.clamp(0.0, 1.0)
}

// ============================================================================
// BRUSH ENGINE
// ============================================================================

/// Stateless rasteriser for strokes and shapes.
pub struct BrushEngine;

impl BrushEngine {
    /// Integer Bresenham points from `from` to `to`, both inclusive.
    pub fn line_points(from: (i32, i32), to: (i32, i32)) -> Vec<(i32, i32)> {
        let (mut x0, mut y0) = from;
        let (x1, y1) = to;
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        let mut points = Vec::with_capacity((dx.max(-dy) + 1) as usize);
        loop {
            points.push((x0, y0));
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
        points
    }

    /// Stamp every point of the straight line `from → to`. A zero-length
    /// line stamps once. Returns the stamps placed, in order.
    pub fn paint_line(
        buffer: &mut PixelBuffer,
        from: (i32, i32),
        to: (i32, i32),
        brush: &BrushSpec,
        pressure: PressureSpan,
    ) -> Vec<Stamp> {
        Self::paint_segment(buffer, from, to, brush, pressure, true)
    }

    /// Like [`BrushEngine::paint_line`], optionally skipping the start point
    /// (used when chaining segments of one stroke).
    pub fn paint_segment(
        buffer: &mut PixelBuffer,
        from: (i32, i32),
        to: (i32, i32),
        brush: &BrushSpec,
        pressure: PressureSpan,
        include_start: bool,
    ) -> Vec<Stamp> {
        let points = Self::line_points(from, to);
        let last = points.len().saturating_sub(1);
        let skip = if include_start || points.len() == 1 { 0 } else { 1 };

        let mut stamps = Vec::with_capacity(points.len());
        for (i, &(x, y)) in points.iter().enumerate().skip(skip) {
            let t = if last == 0 { 1.0 } else { i as f32 / last as f32 };
            let p = pressure.at(t);
            let size = size_from_pressure(brush, p);
            let stamp = Stamp { x, y, size };
            Self::stamp(buffer, stamp, brush, p);
            stamps.push(stamp);
        }
        stamps
    }

    /// Rasterise a single stamp. Pixels outside the buffer are skipped.
    pub fn stamp(buffer: &mut PixelBuffer, stamp: Stamp, brush: &BrushSpec, pressure: f32) {
        let size = stamp.size.max(1) as i64;
        let (sx, sy) = (stamp.x as i64, stamp.y as i64);
        let pressure = if brush.pressure_enabled { pressure } else { 1.0 };
        match brush.shape {
            BrushShape::Rectangle => {
                let x0 = sx - (size - 1) / 2;
                let y0 = sy - (size - 1) / 2;
                let Some((min_x, min_y, max_x, max_y)) =
                    clip_box(buffer, x0, y0, x0 + size - 1, y0 + size - 1)
                else {
                    return;
                };
                for y in min_y..=max_y {
                    for x in min_x..=max_x {
                        Self::apply_pixel(buffer, x, y, brush, pressure, None);
                    }
                }
            }
            BrushShape::Circle => {
                let r = size as f32 / 2.0;
                let reach = size / 2;
                let Some((min_x, min_y, max_x, max_y)) =
                    clip_box(buffer, sx - reach, sy - reach, sx + reach, sy + reach)
                else {
                    return;
                };
                let r2 = r * r;
                for y in min_y..=max_y {
                    for x in min_x..=max_x {
                        let dx = (x as i64 - sx) as f32;
                        let dy = (y as i64 - sy) as f32;
                        let d2 = dx * dx + dy * dy;
                        if d2 <= r2 {
                            let t = (d2.sqrt() / r).min(1.0);
                            Self::apply_pixel(buffer, x, y, brush, pressure, Some(t));
                        }
                    }
                }
            }
        }
    }

    /// Per-family pixel write. `x`/`y` are already inside the buffer.
    fn apply_pixel(
        buffer: &mut PixelBuffer,
        x: i32,
        y: i32,
        brush: &BrushSpec,
        pressure: f32,
        radial: Option<f32>,
    ) {
        let (ux, uy) = (x as u32, y as u32);
        match brush.family {
            BrushFamily::Pen => buffer.set(ux, uy, brush.color),
            BrushFamily::Eraser => {
                let dst = buffer.get(ux, uy);
                buffer.set(ux, uy, dst.lerp_towards(Color::TRANSPARENT, 1.0));
            }
            BrushFamily::Pencil | BrushFamily::Crayon => {
                let a = textured_alpha(brush.family, x, y, pressure, radial) * brush.color.a;
                if a <= 0.0 {
                    return;
                }
                let dst = buffer.get(ux, uy);
                buffer.set(ux, uy, dst.lerp_towards(brush.color.opaque(), a));
            }
        }
    }

    // ---- shapes -------------------------------------------------------------

    /// Whether [`BrushEngine::place_shape`] would draw anything.
    pub fn shape_has_area(brush: &BrushSpec, a: (i32, i32), b: (i32, i32)) -> bool {
        match brush.shape {
            BrushShape::Rectangle => true,
            BrushShape::Circle => circle_radius(a, b) > 0,
        }
    }

    /// Place a flat rectangle (corners `a`/`b`) or circle (centre `a`, radius
    /// `|b − a|`). Returns the record to log, or `None` for a no-op.
    pub fn place_shape(
        buffer: &mut PixelBuffer,
        brush: &BrushSpec,
        a: (i32, i32),
        b: (i32, i32),
    ) -> Option<StrokeRecord> {
        let color = brush.paint_color();
        match brush.shape {
            BrushShape::Rectangle => {
                let top_left = [a.0.min(b.0), a.1.min(b.1)];
                let bottom_right = [a.0.max(b.0), a.1.max(b.1)];
                Self::fill_rect(buffer, color, top_left, bottom_right);
                Some(StrokeRecord::Rect { color, top_left, bottom_right })
            }
            BrushShape::Circle => {
                let radius = circle_radius(a, b);
                if radius <= 0 {
                    return None;
                }
                let center = [a.0, a.1];
                Self::fill_circle(buffer, color, center, radius);
                Some(StrokeRecord::Circle { color, center, radius })
            }
        }
    }

    /// Clamped axis-aligned fill, corners inclusive.
    pub fn fill_rect(buffer: &mut PixelBuffer, color: Color, top_left: [i32; 2], bottom_right: [i32; 2]) {
        let [x0, y0] = top_left.map(i64::from);
        let [x1, y1] = bottom_right.map(i64::from);
        let Some((min_x, min_y, max_x, max_y)) = clip_box(buffer, x0, y0, x1, y1) else {
            return;
        };
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                buffer.set(x as u32, y as u32, color);
            }
        }
    }

    /// Clamped bounding-box scan with `dx² + dy² ≤ r²`. Radius ≤ 0 is a no-op.
    pub fn fill_circle(buffer: &mut PixelBuffer, color: Color, center: [i32; 2], radius: i32) {
        if radius <= 0 {
            return;
        }
        let [cx, cy] = center.map(i64::from);
        let r = radius as i64;
        let Some((min_x, min_y, max_x, max_y)) = clip_box(buffer, cx - r, cy - r, cx + r, cy + r) else {
            return;
        };
        let r2 = r * r;
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let dx = x as i64 - cx;
                let dy = y as i64 - cy;
                if dx * dx + dy * dy <= r2 {
                    buffer.set(x as u32, y as u32, color);
                }
            }
        }
    }
}

fn circle_radius(a: (i32, i32), b: (i32, i32)) -> i32 {
    let dx = b.0 as f64 - a.0 as f64;
    let dy = b.1 as f64 - a.1 as f64;
    (dx * dx + dy * dy).sqrt().round() as i32
}

/// Intersect an inclusive box with the buffer; `None` when nothing is left.
/// Corners are taken as `i64` so offsets from far-away points cannot overflow.
fn clip_box(buffer: &PixelBuffer, x0: i64, y0: i64, x1: i64, y1: i64) -> Option<(i32, i32, i32, i32)> {
    let max_x = buffer.width() as i64 - 1;
    let max_y = buffer.height() as i64 - 1;
    let min_x = x0.min(x1).max(0);
    let min_y = y0.min(y1).max(0);
    let hi_x = x0.max(x1).min(max_x);
    let hi_y = y0.max(y1).min(max_y);
    if min_x > hi_x || min_y > hi_y {
        None
    } else {
        Some((min_x as i32, min_y as i32, hi_x as i32, hi_y as i32))
    }
}
