use image::{Rgba, RgbaImage};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::components::history::HistoryStack;
use crate::components::strokes::{StrokeRecord, StrokeRecorder};
use crate::components::tools::{BrushEngine, BrushSpec, PressureSpan, Stamp};

/// Maximum supported canvas dimension in pixels (per axis).
pub const MAX_CANVAS_DIM: u32 = 32_768;

/// Default number of undo steps kept per canvas.
pub const DEFAULT_MAX_UNDO: usize = 20;

// ============================================================================
// COLOR
// ============================================================================

/// Straight (non-premultiplied) RGBA colour with channels in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const TRANSPARENT: Color = Color { r: 0.0, g: 0.0, b: 0.0, a: 0.0 };
    pub const BLACK: Color = Color { r: 0.0, g: 0.0, b: 0.0, a: 1.0 };
    pub const WHITE: Color = Color { r: 1.0, g: 1.0, b: 1.0, a: 1.0 };

    /// Build a colour, clamping every channel into `[0, 1]`.
    pub fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self {
            r: clamp01(r),
            g: clamp01(g),
            b: clamp01(b),
            a: clamp01(a),
        }
    }

    pub fn from_rgba8(px: [u8; 4]) -> Self {
        Self {
            r: px[0] as f32 / 255.0,
            g: px[1] as f32 / 255.0,
            b: px[2] as f32 / 255.0,
            a: px[3] as f32 / 255.0,
        }
    }

    pub fn to_rgba8(self) -> [u8; 4] {
        [
            to_u8(self.r),
            to_u8(self.g),
            to_u8(self.b),
            to_u8(self.a),
        ]
    }

    pub fn to_pixel(self) -> Rgba<u8> {
        Rgba(self.to_rgba8())
    }

    /// Same colour with alpha forced to 1.
    pub fn opaque(self) -> Self {
        Self { a: 1.0, ..self }
    }

    /// Parse `#RRGGBBAA` (or `#RRGGBB`, alpha defaults to opaque).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.trim().strip_prefix('#')?;
        if !digits.is_ascii() || (digits.len() != 6 && digits.len() != 8) {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
        let a = if digits.len() == 8 { channel(6)? } else { 255 };
        Some(Self::from_rgba8([channel(0)?, channel(2)?, channel(4)?, a]))
    }

    /// Format as upper-case `#RRGGBBAA`.
    pub fn to_hex(self) -> String {
        let [r, g, b, a] = self.to_rgba8();
        format!("#{:02X}{:02X}{:02X}{:02X}", r, g, b, a)
    }

    /// Move every channel of `self` towards `target` by `amount`:
    /// `out = self × (1 − a) + target × a`, clamped.
    pub fn lerp_towards(self, target: Color, amount: f32) -> Color {
        let a = clamp01(amount);
        Color::new(
            self.r * (1.0 - a) + target.r * a,
            self.g * (1.0 - a) + target.g * a,
            self.b * (1.0 - a) + target.b * a,
            self.a * (1.0 - a) + target.a * a,
        )
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Color::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid colour '{}'", s)))
    }
}

#[inline]
fn clamp01(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

#[inline]
fn to_u8(v: f32) -> u8 {
    (clamp01(v) * 255.0).round() as u8
}

/// Straight-alpha "over": composite `top` onto `base`.
pub fn blend_pixel_over(base: Rgba<u8>, top: Rgba<u8>) -> Rgba<u8> {
    // Fast paths: nothing on top, or an opaque top pixel replaces the base
    if top[3] == 0 {
        return base;
    }
    if top[3] == 255 {
        return top;
    }

    let ta = top[3] as f32 / 255.0;
    let ba = base[3] as f32 / 255.0;
    let out_a = ta + ba * (1.0 - ta);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let mut out = [0u8; 4];
    for c in 0..3 {
        let tc = top[c] as f32 / 255.0;
        let bc = base[c] as f32 / 255.0;
        out[c] = to_u8((tc * ta + bc * ba * (1.0 - ta)) / out_a);
    }
    out[3] = to_u8(out_a);
    Rgba(out)
}

/// Composite `top` over `base` in place, both anchored at the top-left corner.
pub fn composite_over(base: &mut RgbaImage, top: &RgbaImage) {
    let w = base.width().min(top.width());
    let h = base.height().min(top.height());
    for y in 0..h {
        for x in 0..w {
            let blended = blend_pixel_over(*base.get_pixel(x, y), *top.get_pixel(x, y));
            base.put_pixel(x, y, blended);
        }
    }
}

// ============================================================================
// PIXEL RECT
// ============================================================================

/// Axis-aligned pixel rectangle, `width × height` starting at `(x, y)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle covering a whole `width × height` image.
    pub fn full(width: u32, height: u32) -> Self {
        Self { x: 0, y: 0, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Intersect with a `width × height` image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let x = self.x.min(width);
        let y = self.y.min(height);
        let right = self.x.saturating_add(self.width).min(width);
        let bottom = self.y.saturating_add(self.height).min(height);
        Self {
            x,
            y,
            width: right.saturating_sub(x),
            height: bottom.saturating_sub(y),
        }
    }
}

// ============================================================================
// PIXEL BUFFER
// ============================================================================

/// Owned RGBA8 raster. `Clone` is a deep copy, which is what history snapshots rely on.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    image: RgbaImage,
}

impl PixelBuffer {
    /// Create a `width × height` buffer filled with `fill`.
    /// Dimensions are clamped into `1..=MAX_CANVAS_DIM`.
    pub fn new(width: u32, height: u32, fill: Color) -> Self {
        let width = width.clamp(1, MAX_CANVAS_DIM);
        let height = height.clamp(1, MAX_CANVAS_DIM);
        Self {
            image: RgbaImage::from_pixel(width, height, fill.to_pixel()),
        }
    }

    pub fn from_image(image: RgbaImage) -> Self {
        if image.width() == 0 || image.height() == 0 {
            return Self::new(1, 1, Color::TRANSPARENT);
        }
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width() && (y as u32) < self.height()
    }

    /// Read a pixel. Panics when out of range; callers clamp first.
    pub fn get(&self, x: u32, y: u32) -> Color {
        Color::from_rgba8(self.image.get_pixel(x, y).0)
    }

    /// Write a pixel. Panics when out of range; callers clamp first.
    pub fn set(&mut self, x: u32, y: u32, color: Color) {
        self.image.put_pixel(x, y, color.to_pixel());
    }

    pub fn get_rgba(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.image.get_pixel(x, y)
    }

    pub fn put_rgba(&mut self, x: u32, y: u32, px: Rgba<u8>) {
        self.image.put_pixel(x, y, px);
    }

    pub fn fill(&mut self, color: Color) {
        let px = color.to_pixel();
        for p in self.image.pixels_mut() {
            *p = px;
        }
    }

    /// Copy `src_rect` of `src` to `dst_origin`, top-left anchored and unscaled.
    /// Both the source rect and the destination are clipped.
    pub fn blit(&mut self, src: &PixelBuffer, src_rect: PixelRect, dst_origin: (u32, u32)) {
        let rect = src_rect.clamp_to(src.width(), src.height());
        let (dx, dy) = dst_origin;
        let copy_w = rect.width.min(self.width().saturating_sub(dx));
        let copy_h = rect.height.min(self.height().saturating_sub(dy));
        if copy_w == 0 || copy_h == 0 {
            return;
        }

        let src_stride = src.width() as usize * 4;
        let dst_stride = self.width() as usize * 4;
        let byte_len = copy_w as usize * 4;
        let src_raw = src.image.as_raw();
        let dst_raw: &mut [u8] = &mut self.image;
        for row in 0..copy_h as usize {
            let s = (rect.y as usize + row) * src_stride + rect.x as usize * 4;
            let d = (dy as usize + row) * dst_stride + dx as usize * 4;
            dst_raw[d..d + byte_len].copy_from_slice(&src_raw[s..s + byte_len]);
        }
    }

    /// Overwrite the whole extent with `src`'s content without replacing the
    /// underlying allocation. Returns `false` (and changes nothing) when the
    /// dimensions differ.
    pub fn copy_from(&mut self, src: &PixelBuffer) -> bool {
        if src.dimensions() != self.dimensions() {
            return false;
        }
        self.blit(src, PixelRect::full(src.width(), src.height()), (0, 0));
        true
    }

    /// New buffer of `new_w × new_h` holding the overlapping top-left region,
    /// the remainder fully transparent.
    pub fn resized(&self, new_w: u32, new_h: u32) -> PixelBuffer {
        let mut out = PixelBuffer::new(new_w, new_h, Color::TRANSPARENT);
        out.blit(self, PixelRect::full(self.width(), self.height()), (0, 0));
        out
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Approximate memory usage in bytes.
    pub fn memory_bytes(&self) -> usize {
        self.image.as_raw().len()
    }
}

// ============================================================================
// CANVAS STATE
// ============================================================================

/// Per-stroke state needed to interpolate from the previous pointer sample.
#[derive(Clone, Copy, Debug)]
struct ActiveStroke {
    last: (i32, i32),
    last_pressure: f32,
}

/// One paintable canvas: pixels, history, edit log and the metadata that
/// places it in the layered composition.
pub struct CanvasState {
    pub id: Uuid,
    /// May be empty; see [`CanvasState::display_name`].
    pub name: String,
    /// Ordering/placement key. Larger depth sits further back.
    pub depth: f32,
    pub background_color: Color,
    pixels: PixelBuffer,
    history: HistoryStack,
    edit_log: Vec<StrokeRecord>,
    recorder: StrokeRecorder,
    active_stroke: Option<ActiveStroke>,
    /// Bumped on every pixel modification.
    pub image_generation: u64,
}

impl CanvasState {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_history_limit(width, height, DEFAULT_MAX_UNDO)
    }

    pub fn with_history_limit(width: u32, height: u32, max_undo: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            depth: 0.0,
            background_color: Color::WHITE,
            pixels: PixelBuffer::new(width, height, Color::TRANSPARENT),
            history: HistoryStack::new(max_undo),
            edit_log: Vec::new(),
            recorder: StrokeRecorder::default(),
            active_stroke: None,
            image_generation: 0,
        }
    }

    /// Assemble a canvas from loaded parts; history starts empty.
    pub fn from_parts(
        name: String,
        depth: f32,
        background_color: Color,
        pixels: PixelBuffer,
        edit_log: Vec<StrokeRecord>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            depth,
            background_color,
            pixels,
            history: HistoryStack::new(DEFAULT_MAX_UNDO),
            edit_log,
            recorder: StrokeRecorder::default(),
            active_stroke: None,
            image_generation: 0,
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// The paintable area, always the full resolution.
    pub fn drawing_rect(&self) -> PixelRect {
        PixelRect::full(self.width(), self.height())
    }

    /// Name shown to the user; blank names fall back to "Canvas N" for the
    /// 0-based `index` the canvas currently occupies.
    pub fn display_name(&self, index: usize) -> String {
        let trimmed = self.name.trim();
        if trimmed.is_empty() {
            format!("Canvas {}", index + 1)
        } else {
            trimmed.to_string()
        }
    }

    pub fn pixels(&self) -> &PixelBuffer {
        &self.pixels
    }

    pub fn edit_log(&self) -> &[StrokeRecord] {
        &self.edit_log
    }

    pub fn history(&self) -> &HistoryStack {
        &self.history
    }

    pub fn is_stroke_open(&self) -> bool {
        self.active_stroke.is_some()
    }

    pub fn mark_dirty(&mut self) {
        self.image_generation = self.image_generation.wrapping_add(1);
    }

    /// Clamp a canvas-space position to the nearest valid pixel.
    pub fn clamp_point(&self, pos: (f32, f32)) -> (i32, i32) {
        let max_x = self.width().saturating_sub(1) as f32;
        let max_y = self.height().saturating_sub(1) as f32;
        let x = if pos.0.is_finite() { pos.0.round().clamp(0.0, max_x) } else { 0.0 };
        let y = if pos.1.is_finite() { pos.1.round().clamp(0.0, max_y) } else { 0.0 };
        (x as i32, y as i32)
    }

    // ---- stroke session -----------------------------------------------------

    /// Open a freehand stroke: snapshot history, open the recorder and stamp
    /// the first point. Returns the stamps placed.
    pub fn begin_stroke(&mut self, brush: &BrushSpec, pos: (f32, f32), pressure: f32) -> Vec<Stamp> {
        if self.active_stroke.is_some() {
            self.end_stroke();
        }
        self.history.begin_snapshot(&self.pixels, &self.edit_log);
        self.recorder.begin_stroke(brush);

        let point = self.clamp_point(pos);
        let stamps = BrushEngine::paint_line(
            &mut self.pixels,
            point,
            point,
            brush,
            PressureSpan::constant(pressure),
        );
        for stamp in &stamps {
            self.recorder.log_point(*stamp);
        }
        self.active_stroke = Some(ActiveStroke { last: point, last_pressure: pressure });
        self.mark_dirty();
        debug!(canvas = %self.id, family = ?brush.family, "stroke started at {:?}", point);
        stamps
    }

    /// Extend the open stroke to `pos`. The shared start point is not stamped twice.
    pub fn continue_stroke(&mut self, brush: &BrushSpec, pos: (f32, f32), pressure: f32) -> Vec<Stamp> {
        let Some(active) = self.active_stroke else {
            return Vec::new();
        };
        let point = self.clamp_point(pos);
        if point == active.last {
            return Vec::new();
        }
        let stamps = BrushEngine::paint_segment(
            &mut self.pixels,
            active.last,
            point,
            brush,
            PressureSpan::new(active.last_pressure, pressure),
            false,
        );
        for stamp in &stamps {
            self.recorder.log_point(*stamp);
        }
        self.active_stroke = Some(ActiveStroke { last: point, last_pressure: pressure });
        if !stamps.is_empty() {
            self.mark_dirty();
        }
        stamps
    }

    /// Close the open stroke and move its record into the edit log.
    /// Returns `true` if a record was appended.
    pub fn end_stroke(&mut self) -> bool {
        self.active_stroke = None;
        let appended = self.recorder.finalize(&mut self.edit_log);
        debug!(canvas = %self.id, appended, "stroke finalized");
        appended
    }

    /// Place a rectangle/circle shape between two drag corners as its own
    /// history step. Degenerate shapes change nothing and push no history.
    pub fn place_shape(&mut self, brush: &BrushSpec, corner_a: (f32, f32), corner_b: (f32, f32)) -> bool {
        if self.active_stroke.is_some() {
            return false;
        }
        let a = self.clamp_point(corner_a);
        let b = self.clamp_point(corner_b);
        if !BrushEngine::shape_has_area(brush, a, b) {
            return false;
        }
        self.history.begin_snapshot(&self.pixels, &self.edit_log);
        match BrushEngine::place_shape(&mut self.pixels, brush, a, b) {
            Some(record) => {
                self.edit_log.push(record);
                self.mark_dirty();
                true
            }
            None => false,
        }
    }

    // ---- history ------------------------------------------------------------

    pub fn undo(&mut self) -> bool {
        if self.active_stroke.is_some() {
            warn!(canvas = %self.id, "undo ignored while a stroke is open");
            return false;
        }
        let changed = self.history.undo(&mut self.pixels, &mut self.edit_log);
        if changed {
            self.mark_dirty();
        }
        changed
    }

    pub fn redo(&mut self) -> bool {
        if self.active_stroke.is_some() {
            warn!(canvas = %self.id, "redo ignored while a stroke is open");
            return false;
        }
        let changed = self.history.redo(&mut self.pixels, &mut self.edit_log);
        if changed {
            self.mark_dirty();
        }
        changed
    }

    /// Resize the canvas, keeping the top-left overlap. History is cleared
    /// because old snapshots no longer match the resolution.
    pub fn resize(&mut self, new_w: u32, new_h: u32) -> bool {
        if self.active_stroke.is_some() {
            return false;
        }
        self.pixels = self.pixels.resized(new_w, new_h);
        self.history.clear();
        self.mark_dirty();
        info!(canvas = %self.id, "resized to {}x{}", self.width(), self.height());
        true
    }

    pub fn set_max_undo(&mut self, max_undo: usize) {
        self.history.set_max_undo(max_undo);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::tools::{BrushFamily, BrushShape};

    fn pen(size: u32) -> BrushSpec {
        BrushSpec {
            family: BrushFamily::Pen,
            shape: BrushShape::Rectangle,
            base_size: size,
            color: Color::from_rgba8([255, 0, 0, 255]),
            pressure_enabled: false,
        }
    }

    #[test]
    fn hex_roundtrip_and_short_form() {
        let c = Color::from_hex("#12AbEf80").unwrap();
        assert_eq!(c.to_hex(), "#12ABEF80");
        assert_eq!(Color::from_hex("#000000").unwrap(), Color::BLACK);
        assert!(Color::from_hex("12ABEF80").is_none());
        assert!(Color::from_hex("#12AB").is_none());
        assert!(Color::from_hex("#GG0000FF").is_none());
    }

    #[test]
    fn color_new_clamps() {
        let c = Color::new(2.0, -1.0, 0.5, f32::NAN);
        assert_eq!(c, Color { r: 1.0, g: 0.0, b: 0.5, a: 0.0 });
    }

    #[test]
    fn blend_over_half_alpha() {
        let out = blend_pixel_over(Rgba([0, 0, 255, 255]), Rgba([255, 0, 0, 128]));
        assert_eq!(out[3], 255);
        assert!(out[0] > 120 && out[0] < 136);
        assert!(out[2] > 120 && out[2] < 136);
        assert_eq!(blend_pixel_over(Rgba([1, 2, 3, 4]), Rgba([9, 9, 9, 0])), Rgba([1, 2, 3, 4]));
    }

    #[test]
    fn buffer_new_clamps_zero_dimensions() {
        let buf = PixelBuffer::new(0, 0, Color::WHITE);
        assert_eq!(buf.dimensions(), (1, 1));
        assert_eq!(buf.as_raw().len(), 4);
    }

    #[test]
    fn blit_clips_to_destination() {
        let src = PixelBuffer::new(4, 4, Color::BLACK);
        let mut dst = PixelBuffer::new(3, 3, Color::TRANSPARENT);
        dst.blit(&src, PixelRect::new(1, 1, 10, 10), (1, 1));
        assert_eq!(dst.get(0, 0), Color::TRANSPARENT);
        assert_eq!(dst.get(1, 1), Color::BLACK);
        assert_eq!(dst.get(2, 2), Color::BLACK);
    }

    #[test]
    fn clone_is_independent() {
        let mut a = PixelBuffer::new(2, 2, Color::WHITE);
        let b = a.clone();
        a.set(0, 0, Color::BLACK);
        assert_eq!(b.get(0, 0), Color::WHITE);
    }

    #[test]
    fn copy_from_rejects_mismatched_dimensions() {
        let mut a = PixelBuffer::new(2, 2, Color::WHITE);
        let b = PixelBuffer::new(3, 2, Color::BLACK);
        assert!(!a.copy_from(&b));
        assert_eq!(a.get(0, 0), Color::WHITE);
    }

    #[test]
    fn resize_keeps_top_left_overlap_and_clears_history() {
        let mut canvas = CanvasState::new(100, 100);
        canvas.place_shape(&pen(1), (0.0, 0.0), (99.0, 99.0));
        assert!(canvas.history().can_undo());

        assert!(canvas.resize(50, 200));
        assert_eq!(canvas.resolution(), (50, 200));
        for y in 0..200 {
            for x in 0..50 {
                let expected = if y < 100 { [255, 0, 0, 255] } else { [0, 0, 0, 0] };
                assert_eq!(canvas.pixels().get_rgba(x, y).0, expected, "pixel {},{}", x, y);
            }
        }
        assert!(!canvas.history().can_undo());
        assert!(!canvas.history().can_redo());
    }

    #[test]
    fn display_name_falls_back_to_ordinal() {
        let mut canvas = CanvasState::new(4, 4);
        assert_eq!(canvas.display_name(2), "Canvas 3");
        canvas.name = "  Sky ".into();
        assert_eq!(canvas.display_name(2), "Sky");
    }

    #[test]
    fn stroke_session_records_one_entry() {
        let mut canvas = CanvasState::new(16, 16);
        let brush = pen(1);
        canvas.begin_stroke(&brush, (1.0, 1.0), 1.0);
        canvas.continue_stroke(&brush, (5.0, 1.0), 1.0);
        assert!(canvas.is_stroke_open());
        assert!(canvas.end_stroke());
        assert_eq!(canvas.edit_log().len(), 1);
        match &canvas.edit_log()[0] {
            StrokeRecord::Stroke { points, sizes, .. } => {
                assert_eq!(points.len(), 5);
                assert_eq!(points.len(), sizes.len());
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn pointer_positions_are_clamped() {
        let mut canvas = CanvasState::new(8, 8);
        let brush = pen(1);
        canvas.begin_stroke(&brush, (-20.0, 40.0), 1.0);
        canvas.end_stroke();
        assert_eq!(canvas.pixels().get_rgba(0, 7).0, [255, 0, 0, 255]);
    }

    #[test]
    fn undo_refused_while_stroke_open() {
        let mut canvas = CanvasState::new(8, 8);
        let brush = pen(1);
        canvas.begin_stroke(&brush, (1.0, 1.0), 1.0);
        assert!(!canvas.undo());
        canvas.end_stroke();
        assert!(canvas.undo());
    }
}
