// ============================================================================
// SCENE EXPORT - flattened glTF 2.0 document, one textured quad per canvas
// ============================================================================

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::canvas::{CanvasState, Color, composite_over};
use crate::io::{ProjectError, encode_png};
use crate::ops::distance::{Connectivity, fill_enclosed_areas, sdf_halo_fill};
use crate::ops::transform::{Interpolation, compute_combined_bounds, scale_images_to_fit_bbox};

pub const DEFAULT_PIXELS_PER_UNIT: f32 = 1024.0;
pub const DEFAULT_HALO_RADIUS: f32 = 10.0;
pub const DEFAULT_ALPHA_THRESHOLD: u8 = 1;

const GENERATOR: &str = concat!("DepthPaint ", env!("CARGO_PKG_VERSION"));

// glTF enum values
const ARRAY_BUFFER: u32 = 34962;
const ELEMENT_ARRAY_BUFFER: u32 = 34963;
const FLOAT: u32 = 5126;
const UNSIGNED_SHORT: u32 = 5123;
const LINEAR: u32 = 9729;
const CLAMP_TO_EDGE: u32 = 33071;
const TRIANGLES: u32 = 4;

const QUAD_INDICES: [u16; 6] = [0, 3, 2, 0, 2, 1];
/// TL, TR, BR, BL with (0,0) at the top-left of the image.
const QUAD_UVS: [f32; 8] = [0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0];

// ============================================================================
// OPTIONS
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct ExportOptions {
    /// Canvas pixels per scene unit along each quad axis.
    pub pixels_per_unit: f32,
    /// Halo radius in pixels around painted content.
    pub halo_radius: f32,
    pub alpha_threshold: u8,
    /// Also divide the depth translation by `pixels_per_unit`.
    pub scale_depth: bool,
    /// Normalise every layer to this size using their combined bounds.
    pub fit_to: Option<(u32, u32)>,
    pub interpolation: Interpolation,
    pub connectivity: Connectivity,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            pixels_per_unit: DEFAULT_PIXELS_PER_UNIT,
            halo_radius: DEFAULT_HALO_RADIUS,
            alpha_threshold: DEFAULT_ALPHA_THRESHOLD,
            scale_depth: false,
            fit_to: None,
            interpolation: Interpolation::default(),
            connectivity: Connectivity::Four,
        }
    }
}

impl ExportOptions {
    pub fn pixels_per_unit(mut self, ppu: f32) -> Self {
        if ppu.is_finite() && ppu > 0.0 {
            self.pixels_per_unit = ppu;
        }
        self
    }

    pub fn halo_radius(mut self, radius: f32) -> Self {
        self.halo_radius = if radius.is_finite() { radius.max(0.0) } else { 0.0 };
        self
    }

    pub fn alpha_threshold(mut self, threshold: u8) -> Self {
        self.alpha_threshold = threshold;
        self
    }

    pub fn scale_depth(mut self, scale: bool) -> Self {
        self.scale_depth = scale;
        self
    }

    pub fn fit_to(mut self, size: Option<(u32, u32)>) -> Self {
        self.fit_to = size.filter(|(w, h)| *w > 0 && *h > 0);
        self
    }

    pub fn interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }
}

// ============================================================================
// DOCUMENT TYPES
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GltfDocument {
    pub asset: Asset,
    pub scene: usize,
    pub scenes: Vec<Scene>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<Node>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub meshes: Vec<Mesh>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<Material>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub textures: Vec<Texture>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samplers: Vec<Sampler>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buffers: Vec<Buffer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buffer_views: Vec<BufferView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accessors: Vec<Accessor>,
}

impl GltfDocument {
    fn empty() -> Self {
        Self {
            asset: Asset { version: "2.0".into(), generator: GENERATOR.into() },
            scene: 0,
            scenes: vec![Scene { name: "Scene".into(), nodes: Vec::new() }],
            nodes: Vec::new(),
            meshes: Vec::new(),
            materials: Vec::new(),
            textures: Vec::new(),
            images: Vec::new(),
            samplers: Vec::new(),
            buffers: Vec::new(),
            buffer_views: Vec::new(),
            accessors: Vec::new(),
        }
    }

    pub fn to_json_string(&self) -> Result<String, ProjectError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn layer_count(&self) -> usize {
        self.nodes.len()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub version: String,
    pub generator: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub mesh: usize,
    pub translation: [f32; 3],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub name: String,
    pub primitives: Vec<Primitive>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Primitive {
    pub attributes: Attributes,
    pub indices: usize,
    pub material: usize,
    pub mode: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(rename = "POSITION")]
    pub position: usize,
    #[serde(rename = "TEXCOORD_0")]
    pub texcoord_0: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    pub name: String,
    pub pbr_metallic_roughness: PbrMetallicRoughness,
    pub alpha_mode: String,
    pub alpha_cutoff: f32,
    pub double_sided: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbrMetallicRoughness {
    pub base_color_texture: TextureInfo,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextureInfo {
    pub index: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Texture {
    pub sampler: usize,
    pub source: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub name: String,
    pub mime_type: String,
    pub uri: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sampler {
    pub mag_filter: u32,
    pub min_filter: u32,
    pub wrap_s: u32,
    pub wrap_t: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Buffer {
    pub byte_length: usize,
    pub uri: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferView {
    pub buffer: usize,
    pub byte_offset: usize,
    pub byte_length: usize,
    pub target: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accessor {
    pub buffer_view: usize,
    pub component_type: u32,
    pub count: usize,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Vec<f32>>,
}

// ============================================================================
// BACKGROUND SYNTHESIS
// ============================================================================

/// Give a layer an opaque backing so it renders without blending: halo
/// around painted pixels, fill enclosed holes, then paint the source over it.
pub fn prepare_layer_image(src: &RgbaImage, background: Color, opts: &ExportOptions) -> RgbaImage {
    let fill = background.opaque();
    let halo = sdf_halo_fill(src, opts.halo_radius, fill, opts.alpha_threshold);
    let mut out = fill_enclosed_areas(&halo, fill, opts.alpha_threshold, opts.connectivity);
    composite_over(&mut out, src);
    out
}

// ============================================================================
// EXPORT
// ============================================================================

/// One layer after background synthesis, ready to embed.
struct PreparedLayer {
    name: String,
    depth: f32,
    size: (u32, u32),
    png: Vec<u8>,
}

/// Flatten `canvases` (already in composition order) into a glTF document
/// with embedded PNG textures and one shared geometry buffer.
pub fn export_document<'a>(
    canvases: impl IntoIterator<Item = &'a CanvasState>,
    opts: &ExportOptions,
) -> Result<GltfDocument, ProjectError> {
    let canvases: Vec<&CanvasState> = canvases.into_iter().collect();
    let mut doc = GltfDocument::empty();
    if canvases.is_empty() {
        info!("exported empty scene");
        return Ok(doc);
    }

    let sources: Vec<RgbaImage> = match opts.fit_to {
        Some(target) => {
            let bbox = compute_combined_bounds(
                canvases.iter().map(|c| c.pixels().as_image()),
                opts.alpha_threshold,
            );
            let images: Vec<RgbaImage> = canvases.iter().map(|c| c.pixels().as_image().clone()).collect();
            scale_images_to_fit_bbox(&images, bbox, target, opts.interpolation)
        }
        None => canvases.iter().map(|c| c.pixels().as_image().clone()).collect(),
    };

    let layers: Vec<PreparedLayer> = canvases
        .par_iter()
        .zip(sources.par_iter())
        .enumerate()
        .map(|(index, (canvas, source))| {
            let image = prepare_layer_image(source, canvas.background_color, opts);
            Ok(PreparedLayer {
                name: canvas.display_name(index),
                depth: canvas.depth,
                size: image.dimensions(),
                png: encode_png(&image)?,
            })
        })
        .collect::<Result<_, ProjectError>>()?;

    let ppu = opts.pixels_per_unit;
    let mut geometry: Vec<u8> = Vec::new();
    doc.samplers.push(Sampler {
        mag_filter: LINEAR,
        min_filter: LINEAR,
        wrap_s: CLAMP_TO_EDGE,
        wrap_t: CLAMP_TO_EDGE,
    });

    for (i, layer) in layers.iter().enumerate() {
        let half_w = layer.size.0 as f32 / ppu / 2.0;
        let half_h = layer.size.1 as f32 / ppu / 2.0;
        let positions: [f32; 12] = [
            -half_w, half_h, 0.0, //
            half_w, half_h, 0.0, //
            half_w, -half_h, 0.0, //
            -half_w, -half_h, 0.0,
        ];

        let position_view = push_view(&mut doc, &mut geometry, bytemuck::cast_slice(&positions), ARRAY_BUFFER);
        let uv_view = push_view(&mut doc, &mut geometry, bytemuck::cast_slice(&QUAD_UVS), ARRAY_BUFFER);
        let index_view = push_view(
            &mut doc,
            &mut geometry,
            bytemuck::cast_slice(&QUAD_INDICES),
            ELEMENT_ARRAY_BUFFER,
        );

        let position_accessor = doc.accessors.len();
        doc.accessors.push(Accessor {
            buffer_view: position_view,
            component_type: FLOAT,
            count: 4,
            kind: "VEC3".into(),
            min: Some(vec![-half_w, -half_h, 0.0]),
            max: Some(vec![half_w, half_h, 0.0]),
        });
        let uv_accessor = doc.accessors.len();
        doc.accessors.push(Accessor {
            buffer_view: uv_view,
            component_type: FLOAT,
            count: 4,
            kind: "VEC2".into(),
            min: None,
            max: None,
        });
        let index_accessor = doc.accessors.len();
        doc.accessors.push(Accessor {
            buffer_view: index_view,
            component_type: UNSIGNED_SHORT,
            count: QUAD_INDICES.len(),
            kind: "SCALAR".into(),
            min: None,
            max: None,
        });

        doc.images.push(Image {
            name: layer.name.clone(),
            mime_type: "image/png".into(),
            uri: format!("data:image/png;base64,{}", STANDARD.encode(&layer.png)),
        });
        doc.textures.push(Texture { sampler: 0, source: i });
        doc.materials.push(Material {
            name: layer.name.clone(),
            pbr_metallic_roughness: PbrMetallicRoughness {
                base_color_texture: TextureInfo { index: i },
                metallic_factor: 0.0,
                roughness_factor: 1.0,
            },
            alpha_mode: "MASK".into(),
            alpha_cutoff: 0.5,
            double_sided: true,
        });
        doc.meshes.push(Mesh {
            name: layer.name.clone(),
            primitives: vec![Primitive {
                attributes: Attributes { position: position_accessor, texcoord_0: uv_accessor },
                indices: index_accessor,
                material: i,
                mode: TRIANGLES,
            }],
        });

        let z = if opts.scale_depth { -layer.depth / ppu } else { -layer.depth };
        doc.nodes.push(Node { name: layer.name.clone(), mesh: i, translation: [0.0, 0.0, z] });
        doc.scenes[0].nodes.push(i);
    }

    doc.buffers.push(Buffer {
        byte_length: geometry.len(),
        uri: format!("data:application/octet-stream;base64,{}", STANDARD.encode(&geometry)),
    });
    info!("exported {} layer(s), {} byte geometry buffer", layers.len(), geometry.len());
    Ok(doc)
}

/// Append `bytes` to the geometry buffer (4-byte aligned) and register a view.
fn push_view(doc: &mut GltfDocument, geometry: &mut Vec<u8>, bytes: &[u8], target: u32) -> usize {
    while geometry.len() % 4 != 0 {
        geometry.push(0);
    }
    let index = doc.buffer_views.len();
    doc.buffer_views.push(BufferView {
        buffer: 0,
        byte_offset: geometry.len(),
        byte_length: bytes.len(),
        target,
    });
    geometry.extend_from_slice(bytes);
    index
}
