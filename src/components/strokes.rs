use serde::{Deserialize, Serialize};

use crate::canvas::{Color, MAX_CANVAS_DIM, PixelBuffer};
use crate::components::tools::{BrushEngine, BrushFamily, BrushShape, BrushSpec, Stamp};

/// Largest coordinate, radius or stamp size a loaded record may carry.
pub const MAX_RECORD_EXTENT: i64 = MAX_CANVAS_DIM as i64 * 2;

/// One finalized entry of a canvas's edit log. Serialized as the
/// `brush_data_list` entries of a saved canvas, tagged by `kind`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StrokeRecord {
    Stroke {
        brush_family: BrushFamily,
        brush_shape: BrushShape,
        color: Color,
        base_size: u32,
        pressure_enabled: bool,
        /// Stamped points, parallel to `sizes`.
        points: Vec<[i32; 2]>,
        sizes: Vec<u32>,
    },
    Rect {
        color: Color,
        top_left: [i32; 2],
        bottom_right: [i32; 2],
    },
    Circle {
        color: Color,
        center: [i32; 2],
        radius: i32,
    },
}

impl StrokeRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            StrokeRecord::Stroke { .. } => "stroke",
            StrokeRecord::Rect { .. } => "rect",
            StrokeRecord::Circle { .. } => "circle",
        }
    }

    /// Check a record read from outside the recorder: strokes need at least
    /// one point and parallel `points`/`sizes`, and every coordinate, size and
    /// radius must lie within [`MAX_RECORD_EXTENT`].
    pub fn validate(&self) -> Result<(), String> {
        let in_range = |v: i64| (-MAX_RECORD_EXTENT..=MAX_RECORD_EXTENT).contains(&v);
        let point_ok = |p: &[i32; 2]| in_range(p[0] as i64) && in_range(p[1] as i64);
        match self {
            StrokeRecord::Stroke { points, sizes, .. } => {
                if points.is_empty() {
                    return Err("stroke has no points".into());
                }
                if points.len() != sizes.len() {
                    return Err(format!(
                        "stroke has {} points but {} sizes",
                        points.len(),
                        sizes.len()
                    ));
                }
                if !points.iter().all(point_ok) {
                    return Err("stroke point out of range".into());
                }
                if sizes.iter().any(|&s| s as i64 > MAX_RECORD_EXTENT) {
                    return Err("stroke size out of range".into());
                }
            }
            StrokeRecord::Rect { top_left, bottom_right, .. } => {
                if !point_ok(top_left) || !point_ok(bottom_right) {
                    return Err("rect corner out of range".into());
                }
            }
            StrokeRecord::Circle { center, radius, .. } => {
                if *radius < 0 || !in_range(*radius as i64) {
                    return Err(format!("circle radius {} out of range", radius));
                }
                if !point_ok(center) {
                    return Err("circle centre out of range".into());
                }
            }
        }
        Ok(())
    }

    /// Rough heap footprint, used for history memory accounting.
    pub fn memory_bytes(&self) -> usize {
        match self {
            StrokeRecord::Stroke { points, sizes, .. } => {
                std::mem::size_of::<Self>() + points.len() * 8 + sizes.len() * 4
            }
            _ => std::mem::size_of::<Self>(),
        }
    }
}

/// The record being built while a stroke is open.
#[derive(Clone, Debug)]
struct OpenRecord {
    brush: BrushSpec,
    points: Vec<[i32; 2]>,
    sizes: Vec<u32>,
}

/// Incremental recorder for freehand strokes. Shapes bypass it and are
/// logged directly when placed.
#[derive(Clone, Debug, Default)]
pub struct StrokeRecorder {
    open: Option<OpenRecord>,
}

impl StrokeRecorder {
    /// Open a new freehand record. Any previously open record is discarded.
    pub fn begin_stroke(&mut self, brush: &BrushSpec) {
        self.open = Some(OpenRecord {
            brush: *brush,
            points: Vec::new(),
            sizes: Vec::new(),
        });
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Append a stamped point and its resolved size to the open record.
    pub fn log_point(&mut self, stamp: Stamp) {
        if let Some(open) = self.open.as_mut() {
            open.points.push([stamp.x, stamp.y]);
            open.sizes.push(stamp.size);
        }
    }

    pub fn point_count(&self) -> usize {
        self.open.as_ref().map_or(0, |o| o.points.len())
    }

    /// Close the open record, appending it to `edit_log` when it holds at
    /// least one point. Returns whether a record was appended.
    pub fn finalize(&mut self, edit_log: &mut Vec<StrokeRecord>) -> bool {
        let Some(open) = self.open.take() else {
            return false;
        };
        if open.points.is_empty() {
            return false;
        }
        edit_log.push(StrokeRecord::Stroke {
            brush_family: open.brush.family,
            brush_shape: open.brush.shape,
            color: open.brush.color,
            base_size: open.brush.base_size,
            pressure_enabled: open.brush.pressure_enabled,
            points: open.points,
            sizes: open.sizes,
        });
        true
    }
}

/// Pressure that would have produced `size` for `base_size`, inverting the
/// 20%–100% pressure ramp. Only textured alpha depends on it during replay.
fn pressure_for_size(size: u32, base_size: u32) -> f32 {
    let base = base_size.max(1) as f32;
    ((size as f32 / base - 0.2) / 0.8).clamp(0.0, 1.0)
}

/// Re-rasterise an edit log onto `buffer`. Flat families and shapes replay
/// pixel-exact; textured families replay with pressure recovered from size.
pub fn replay(records: &[StrokeRecord], buffer: &mut PixelBuffer) {
    for record in records {
        match record {
            StrokeRecord::Stroke {
                brush_family,
                brush_shape,
                color,
                base_size,
                pressure_enabled,
                points,
                sizes,
            } => {
                let brush = BrushSpec {
                    family: *brush_family,
                    shape: *brush_shape,
                    base_size: *base_size,
                    color: *color,
                    pressure_enabled: *pressure_enabled,
                };
                for (point, size) in points.iter().zip(sizes) {
                    let stamp = Stamp { x: point[0], y: point[1], size: *size };
                    BrushEngine::stamp(buffer, stamp, &brush, pressure_for_size(*size, *base_size));
                }
            }
            StrokeRecord::Rect { color, top_left, bottom_right } => {
                BrushEngine::fill_rect(buffer, *color, *top_left, *bottom_right);
            }
            StrokeRecord::Circle { color, center, radius } => {
                BrushEngine::fill_circle(buffer, *color, *center, *radius);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::tools::PressureSpan;

    fn pen() -> BrushSpec {
        BrushSpec {
            family: BrushFamily::Pen,
            shape: BrushShape::Circle,
            base_size: 5,
            color: Color::from_rgba8([10, 200, 30, 255]),
            pressure_enabled: true,
        }
    }

    #[test]
    fn finalize_appends_one_record_with_parallel_arrays() {
        let mut recorder = StrokeRecorder::default();
        let mut log = Vec::new();
        recorder.begin_stroke(&pen());
        assert!(recorder.is_open());
        recorder.log_point(Stamp { x: 1, y: 2, size: 3 });
        recorder.log_point(Stamp { x: 2, y: 2, size: 4 });
        assert!(recorder.finalize(&mut log));
        assert!(!recorder.is_open());
        assert_eq!(log.len(), 1);
        match &log[0] {
            StrokeRecord::Stroke { points, sizes, base_size, .. } => {
                assert_eq!(points, &vec![[1, 2], [2, 2]]);
                assert_eq!(sizes, &vec![3, 4]);
                assert_eq!(*base_size, 5);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn empty_stroke_is_discarded() {
        let mut recorder = StrokeRecorder::default();
        let mut log = Vec::new();
        recorder.begin_stroke(&pen());
        assert!(!recorder.finalize(&mut log));
        assert!(log.is_empty());
        // Finalizing with nothing open is also a no-op
        assert!(!recorder.finalize(&mut log));
    }

    #[test]
    fn log_point_without_open_record_is_ignored() {
        let mut recorder = StrokeRecorder::default();
        recorder.log_point(Stamp { x: 0, y: 0, size: 1 });
        assert_eq!(recorder.point_count(), 0);
    }

    #[test]
    fn records_serialize_with_kind_tag() {
        let rect = StrokeRecord::Rect {
            color: Color::from_rgba8([255, 0, 0, 255]),
            top_left: [1, 2],
            bottom_right: [3, 4],
        };
        let value = serde_json::to_value(&rect).unwrap();
        assert_eq!(value["kind"], "rect");
        assert_eq!(value["color"], "#FF0000FF");
        assert_eq!(value["top_left"], serde_json::json!([1, 2]));

        let stroke: StrokeRecord = serde_json::from_value(serde_json::json!({
            "kind": "stroke",
            "brush_family": "crayon",
            "brush_shape": "rectangle",
            "color": "#00000080",
            "base_size": 4,
            "pressure_enabled": false,
            "points": [[0, 0], [1, 1]],
            "sizes": [4, 4]
        }))
        .unwrap();
        assert_eq!(stroke.kind(), "stroke");
    }

    #[test]
    fn replay_reproduces_flat_strokes() {
        let brush = pen();
        let mut live = PixelBuffer::new(24, 24, Color::TRANSPARENT);
        let mut recorder = StrokeRecorder::default();
        let mut log = Vec::new();
        recorder.begin_stroke(&brush);
        for stamp in BrushEngine::paint_line(&mut live, (2, 2), (20, 15), &brush, PressureSpan::new(0.2, 0.9)) {
            recorder.log_point(stamp);
        }
        recorder.finalize(&mut log);
        let mut circle_buf = live.clone();
        BrushEngine::fill_circle(&mut circle_buf, Color::BLACK, [12, 12], 4);
        log.push(StrokeRecord::Circle { color: Color::BLACK, center: [12, 12], radius: 4 });

        let mut replayed = PixelBuffer::new(24, 24, Color::TRANSPARENT);
        replay(&log, &mut replayed);
        assert_eq!(replayed, circle_buf);
    }

    #[test]
    fn validate_rejects_malformed_records() {
        let stroke = |points: Vec<[i32; 2]>, sizes: Vec<u32>| StrokeRecord::Stroke {
            brush_family: BrushFamily::Pen,
            brush_shape: BrushShape::Circle,
            color: Color::BLACK,
            base_size: 3,
            pressure_enabled: false,
            points,
            sizes,
        };
        assert!(stroke(vec![[0, 0], [1, 1]], vec![3, 3]).validate().is_ok());
        assert!(stroke(vec![[0, 0], [1, 1]], vec![3]).validate().is_err());
        assert!(stroke(vec![], vec![]).validate().is_err());
        assert!(stroke(vec![[i32::MIN, 0]], vec![3]).validate().is_err());
        assert!(stroke(vec![[0, 0]], vec![u32::MAX]).validate().is_err());

        let circle = |radius| StrokeRecord::Circle { color: Color::BLACK, center: [10, 0], radius };
        assert!(circle(4).validate().is_ok());
        assert!(circle(-1).validate().is_err());
        assert!(circle(i32::MAX).validate().is_err());

        let far = StrokeRecord::Rect { color: Color::BLACK, top_left: [0, 0], bottom_right: [i32::MAX, 4] };
        assert!(far.validate().is_err());
    }

    #[test]
    fn replay_survives_extreme_coordinates() {
        let mut buffer = PixelBuffer::new(16, 16, Color::TRANSPARENT);
        let records = vec![
            StrokeRecord::Circle { color: Color::BLACK, center: [10, 0], radius: i32::MAX },
            StrokeRecord::Circle { color: Color::BLACK, center: [i32::MIN, i32::MAX], radius: i32::MAX },
            StrokeRecord::Rect { color: Color::BLACK, top_left: [i32::MIN, i32::MIN], bottom_right: [i32::MAX, 2] },
            StrokeRecord::Stroke {
                brush_family: BrushFamily::Pen,
                brush_shape: BrushShape::Rectangle,
                color: Color::BLACK,
                base_size: 1,
                pressure_enabled: false,
                points: vec![[i32::MAX, i32::MAX], [i32::MIN, 3]],
                sizes: vec![u32::MAX, u32::MAX],
            },
        ];
        replay(&records, &mut buffer);
        // The huge circle centred just above row 0 covers the whole buffer
        assert!(buffer.as_raw().chunks_exact(4).all(|px| px == [0, 0, 0, 255]));
    }
}
