use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{ImageFormat, ImageOutputFormat, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::canvas::{CanvasState, Color, MAX_CANVAS_DIM, PixelBuffer};
use crate::components::layers::LayerCompositor;
use crate::components::strokes::StrokeRecord;
use crate::ops::export::GltfDocument;

pub const CANVAS_FORMAT_VERSION: u32 = 1;
pub const PROJECT_FORMAT_VERSION: u32 = 1;

/// Maximum number of canvases in a project file.
const MAX_CANVASES: usize = 256;

/// Error type for project load/save and export writes.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),
    #[error("project has no canvases")]
    Empty,
}

// ============================================================================
// FILE FORMAT
// ============================================================================

/// One serialized canvas. History is never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanvasFile {
    pub version: u32,
    pub canvas_resolution: [u32; 2],
    pub bg_color: Color,
    #[serde(default)]
    pub canvas_name: String,
    #[serde(default)]
    pub depth: f32,
    pub image_png_b64: String,
    #[serde(default)]
    pub brush_data_list: Vec<StrokeRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub version: u32,
    #[serde(default)]
    pub active_canvas_index: usize,
    pub canvases: Vec<CanvasFile>,
}

// ============================================================================
// PNG
// ============================================================================

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, ProjectError> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)?;
    Ok(bytes)
}

pub fn decode_png(bytes: &[u8]) -> Result<RgbaImage, ProjectError> {
    Ok(image::load_from_memory_with_format(bytes, ImageFormat::Png)?.to_rgba8())
}

// ============================================================================
// CANVAS (DE)SERIALIZATION
// ============================================================================

pub fn serialize_canvas(canvas: &CanvasState) -> Result<CanvasFile, ProjectError> {
    let (w, h) = canvas.resolution();
    let png = encode_png(canvas.pixels().as_image())?;
    Ok(CanvasFile {
        version: CANVAS_FORMAT_VERSION,
        canvas_resolution: [w, h],
        bg_color: canvas.background_color,
        canvas_name: canvas.name.clone(),
        depth: canvas.depth,
        image_png_b64: STANDARD.encode(png),
        brush_data_list: canvas.edit_log().to_vec(),
    })
}

/// Rebuild a canvas from its file form. The result has empty history.
pub fn deserialize_canvas(file: CanvasFile) -> Result<CanvasState, ProjectError> {
    if file.version == 0 || file.version > CANVAS_FORMAT_VERSION {
        return Err(ProjectError::UnsupportedVersion(file.version));
    }
    let [w, h] = file.canvas_resolution;
    if w == 0 || h == 0 || w > MAX_CANVAS_DIM || h > MAX_CANVAS_DIM {
        return Err(ProjectError::InvalidFormat(format!(
            "canvas resolution {}x{} out of range (1..={})",
            w, h, MAX_CANVAS_DIM
        )));
    }
    if !file.depth.is_finite() {
        return Err(ProjectError::InvalidFormat("canvas depth is not finite".into()));
    }

    for (i, record) in file.brush_data_list.iter().enumerate() {
        record.validate().map_err(|e| {
            ProjectError::InvalidFormat(format!("brush_data_list[{}] ({}): {}", i, record.kind(), e))
        })?;
    }

    let png = STANDARD.decode(file.image_png_b64.as_bytes())?;
    let image = decode_png(&png)?;
    if image.dimensions() != (w, h) {
        return Err(ProjectError::InvalidFormat(format!(
            "image is {}x{} but canvas_resolution is {}x{}",
            image.width(),
            image.height(),
            w,
            h
        )));
    }

    Ok(CanvasState::from_parts(
        file.canvas_name,
        file.depth,
        file.bg_color,
        PixelBuffer::from_image(image),
        file.brush_data_list,
    ))
}

// ============================================================================
// PROJECT (DE)SERIALIZATION
// ============================================================================

pub fn project_to_file(compositor: &LayerCompositor) -> Result<ProjectFile, ProjectError> {
    let canvases = compositor
        .canvases()
        .par_iter()
        .map(serialize_canvas)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ProjectFile {
        version: PROJECT_FORMAT_VERSION,
        active_canvas_index: compositor.active_index().unwrap_or(0),
        canvases,
    })
}

/// Validate and decode a project. Nothing is returned unless every canvas
/// decodes, so callers can swap state in all-or-nothing.
pub fn project_from_file(file: ProjectFile) -> Result<(Vec<CanvasState>, usize), ProjectError> {
    if file.version == 0 || file.version > PROJECT_FORMAT_VERSION {
        return Err(ProjectError::UnsupportedVersion(file.version));
    }
    if file.canvases.is_empty() {
        return Err(ProjectError::Empty);
    }
    if file.canvases.len() > MAX_CANVASES {
        return Err(ProjectError::InvalidFormat(format!(
            "{} canvases exceeds the limit of {}",
            file.canvases.len(),
            MAX_CANVASES
        )));
    }
    let active = file.active_canvas_index.min(file.canvases.len() - 1);
    let canvases = file
        .canvases
        .into_par_iter()
        .map(deserialize_canvas)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((canvases, active))
}

pub fn project_to_json(compositor: &LayerCompositor) -> Result<String, ProjectError> {
    Ok(serde_json::to_string_pretty(&project_to_file(compositor)?)?)
}

pub fn project_from_json(json: &str) -> Result<(Vec<CanvasState>, usize), ProjectError> {
    let file: ProjectFile = serde_json::from_str(json)?;
    project_from_file(file)
}

// ============================================================================
// FILES
// ============================================================================

pub fn save_project(compositor: &LayerCompositor, path: &Path) -> Result<(), ProjectError> {
    let json = project_to_json(compositor)?;
    write_text(path, &json)?;
    info!("saved {} canvas(es) to {}", compositor.len(), path.display());
    Ok(())
}

pub fn load_project(path: &Path) -> Result<(Vec<CanvasState>, usize), ProjectError> {
    let json = std::fs::read_to_string(path)?;
    match project_from_json(&json) {
        Ok(loaded) => {
            info!("loaded {} canvas(es) from {}", loaded.0.len(), path.display());
            Ok(loaded)
        }
        Err(e) => {
            warn!("failed to load {}: {}", path.display(), e);
            Err(e)
        }
    }
}

/// Write the image as a PNG file.
pub fn write_png(image: &RgbaImage, path: &Path) -> Result<(), ProjectError> {
    image.save_with_format(path, ImageFormat::Png)?;
    info!("wrote {}x{} PNG to {}", image.width(), image.height(), path.display());
    Ok(())
}

/// Write an exported scene as `.gltf` JSON.
pub fn write_document(doc: &GltfDocument, path: &Path) -> Result<(), ProjectError> {
    let json = doc.to_json_string()?;
    write_text(path, &json)?;
    info!("wrote scene with {} layer(s) to {}", doc.layer_count(), path.display());
    Ok(())
}

fn write_text(path: &Path, text: &str) -> Result<(), ProjectError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(text.as_bytes())?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::tools::{BrushFamily, BrushShape, BrushSpec};
    use serde_json::json;

    fn painted_canvas() -> CanvasState {
        let mut canvas = CanvasState::new(16, 9);
        canvas.name = "Hills".into();
        canvas.depth = 1.5;
        canvas.background_color = Color::from_rgba8([12, 34, 56, 200]);
        let brush = BrushSpec {
            family: BrushFamily::Crayon,
            shape: BrushShape::Circle,
            base_size: 3,
            color: Color::from_rgba8([200, 10, 10, 180]),
            pressure_enabled: true,
        };
        canvas.begin_stroke(&brush, (2.0, 2.0), 0.4);
        canvas.continue_stroke(&brush, (12.0, 6.0), 0.9);
        canvas.end_stroke();
        let rect = BrushSpec { family: BrushFamily::Pen, shape: BrushShape::Rectangle, ..brush };
        canvas.place_shape(&rect, (0.0, 8.0), (3.0, 7.0));
        canvas
    }

    #[test]
    fn canvas_roundtrip_preserves_pixels_metadata_and_log() {
        let canvas = painted_canvas();
        let file = serialize_canvas(&canvas).unwrap();
        let json = serde_json::to_string(&file).unwrap();
        let restored = deserialize_canvas(serde_json::from_str(&json).unwrap()).unwrap();

        assert_eq!(restored.resolution(), (16, 9));
        assert_eq!(restored.name, "Hills");
        assert_eq!(restored.depth, 1.5);
        assert_eq!(restored.background_color.to_hex(), "#0C2238C8");
        assert_eq!(restored.pixels().as_raw(), canvas.pixels().as_raw());
        assert_eq!(restored.edit_log(), canvas.edit_log());
        assert!(!restored.history().can_undo());
        assert!(!restored.history().can_redo());
    }

    #[test]
    fn canvas_json_uses_documented_keys() {
        let value = serde_json::to_value(serialize_canvas(&painted_canvas()).unwrap()).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["canvas_resolution"], json!([16, 9]));
        assert_eq!(value["bg_color"], "#0C2238C8");
        assert_eq!(value["brush_data_list"][0]["kind"], "stroke");
        assert_eq!(value["brush_data_list"][1]["kind"], "rect");
    }

    #[test]
    fn rejects_bad_versions_and_sizes() {
        let mut file = serialize_canvas(&painted_canvas()).unwrap();
        file.version = 7;
        assert!(matches!(deserialize_canvas(file.clone()), Err(ProjectError::UnsupportedVersion(7))));

        file.version = 1;
        file.canvas_resolution = [16, 10];
        assert!(matches!(deserialize_canvas(file.clone()), Err(ProjectError::InvalidFormat(_))));

        file.canvas_resolution = [0, 9];
        assert!(matches!(deserialize_canvas(file.clone()), Err(ProjectError::InvalidFormat(_))));

        file.canvas_resolution = [16, 9];
        file.image_png_b64 = "not base64!".into();
        assert!(matches!(deserialize_canvas(file), Err(ProjectError::Base64(_))));
    }

    #[test]
    fn rejects_malformed_edit_log_records() {
        let good = serde_json::to_value(serialize_canvas(&painted_canvas()).unwrap()).unwrap();
        let with_log = |records: serde_json::Value| {
            let mut value = good.clone();
            value["brush_data_list"] = records;
            let file: CanvasFile = serde_json::from_value(value).unwrap();
            deserialize_canvas(file)
        };
        let stroke = |points: serde_json::Value, sizes: serde_json::Value| {
            json!({
                "kind": "stroke", "brush_family": "pen", "brush_shape": "circle",
                "color": "#000000FF", "base_size": 3, "pressure_enabled": false,
                "points": points, "sizes": sizes,
            })
        };

        assert!(with_log(json!([stroke(json!([[0, 0], [1, 1]]), json!([3, 3]))])).is_ok());
        assert!(matches!(
            with_log(json!([stroke(json!([[0, 0], [1, 1]]), json!([3]))])),
            Err(ProjectError::InvalidFormat(_))
        ));
        assert!(matches!(
            with_log(json!([stroke(json!([]), json!([]))])),
            Err(ProjectError::InvalidFormat(_))
        ));
        let circle = |radius: i64| json!([{ "kind": "circle", "color": "#000000FF", "center": [10, 0], "radius": radius }]);
        assert!(matches!(with_log(circle(-2)), Err(ProjectError::InvalidFormat(_))));
        assert!(matches!(with_log(circle(i32::MAX as i64)), Err(ProjectError::InvalidFormat(_))));
        let far_rect = json!([{ "kind": "rect", "color": "#000000FF", "top_left": [0, 0], "bottom_right": [i32::MIN, 5] }]);
        assert!(matches!(with_log(far_rect), Err(ProjectError::InvalidFormat(_))));
    }

    #[test]
    fn project_roundtrip_keeps_order_and_active_index() {
        let mut compositor = LayerCompositor::new();
        compositor.insert_canvas(painted_canvas());
        let back = compositor.add_canvas(4, 4);
        compositor.set_depth(back, 3.0);
        let json = project_to_json(&compositor).unwrap();

        let (canvases, active) = project_from_json(&json).unwrap();
        assert_eq!(canvases.len(), 2);
        assert_eq!(canvases[0].name, "Hills");
        assert_eq!(canvases[1].depth, 3.0);
        assert_eq!(active, 1);
    }

    #[test]
    fn empty_or_malformed_project_is_an_error() {
        let empty = json!({ "version": 1, "active_canvas_index": 0, "canvases": [] }).to_string();
        assert!(matches!(project_from_json(&empty), Err(ProjectError::Empty)));

        let malformed = json!({ "version": 1, "canvases": [{ "version": 1 }] }).to_string();
        assert!(matches!(project_from_json(&malformed), Err(ProjectError::Json(_))));

        let future = json!({ "version": 2, "canvases": [] }).to_string();
        assert!(matches!(project_from_json(&future), Err(ProjectError::UnsupportedVersion(2))));
    }

    #[test]
    fn png_roundtrip_is_lossless() {
        let mut image = RgbaImage::new(3, 2);
        image.put_pixel(1, 1, image::Rgba([1, 2, 3, 4]));
        let decoded = decode_png(&encode_png(&image).unwrap()).unwrap();
        assert_eq!(decoded, image);
    }
}
