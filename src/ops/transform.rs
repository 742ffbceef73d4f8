// ============================================================================
// BOUNDS + NORMALISED RESCALING - shared scale for multi-resolution layers
// ============================================================================

use image::imageops::{self, FilterType};
use image::RgbaImage;
use rayon::prelude::*;

/// Axis-aligned box in a shared top-left-origin pixel space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BoundingBox {
    pub position: (u32, u32),
    pub size: (u32, u32),
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { position: (x, y), size: (width, height) }
    }

    pub fn is_empty(&self) -> bool {
        self.size.0 == 0 || self.size.1 == 0
    }
}

/// Resampling filter used by [`scale_images_to_fit_bbox`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
    Bicubic,
    Lanczos3,
}

impl Interpolation {
    fn filter(self) -> FilterType {
        match self {
            Interpolation::Nearest => FilterType::Nearest,
            Interpolation::Bilinear => FilterType::Triangle,
            Interpolation::Bicubic => FilterType::CatmullRom,
            Interpolation::Lanczos3 => FilterType::Lanczos3,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "nearest" => Some(Interpolation::Nearest),
            "bilinear" | "linear" => Some(Interpolation::Bilinear),
            "bicubic" | "cubic" => Some(Interpolation::Bicubic),
            "lanczos" | "lanczos3" => Some(Interpolation::Lanczos3),
            _ => None,
        }
    }
}

/// Tightest box covering every pixel with alpha ≥ `alpha_threshold` across
/// all images. Zero-size when nothing qualifies.
pub fn compute_combined_bounds<'a>(
    images: impl IntoIterator<Item = &'a RgbaImage>,
    alpha_threshold: u8,
) -> BoundingBox {
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0u32;
    let mut max_y = 0u32;
    let mut found = false;

    for image in images {
        for (x, y, px) in image.enumerate_pixels() {
            if px[3] >= alpha_threshold && px[3] > 0 {
                found = true;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }
    }

    if !found {
        return BoundingBox::default();
    }
    BoundingBox::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
}

/// Crop each image to `bbox` (transparent outside the source), scale it
/// uniformly to fit inside `target_size` and centre it on a transparent
/// canvas of exactly `target_size`.
pub fn scale_images_to_fit_bbox(
    images: &[RgbaImage],
    bbox: BoundingBox,
    target_size: (u32, u32),
    interpolation: Interpolation,
) -> Vec<RgbaImage> {
    let tw = target_size.0.max(1);
    let th = target_size.1.max(1);
    if bbox.is_empty() {
        return images.iter().map(|_| RgbaImage::new(tw, th)).collect();
    }

    let (bw, bh) = bbox.size;
    let scale = (tw as f64 / bw as f64).min(th as f64 / bh as f64);
    let nw = ((bw as f64 * scale).round() as u32).clamp(1, tw);
    let nh = ((bh as f64 * scale).round() as u32).clamp(1, th);
    let offset_x = ((tw - nw) / 2) as i64;
    let offset_y = ((th - nh) / 2) as i64;

    images
        .par_iter()
        .map(|image| {
            let cropped = crop_padded(image, bbox);
            let scaled = if (nw, nh) == (bw, bh) {
                cropped
            } else {
                imageops::resize(&cropped, nw, nh, interpolation.filter())
            };
            let mut out = RgbaImage::new(tw, th);
            imageops::replace(&mut out, &scaled, offset_x, offset_y);
            out
        })
        .collect()
}

/// Copy `bbox` out of `image`; parts outside the image stay transparent.
fn crop_padded(image: &RgbaImage, bbox: BoundingBox) -> RgbaImage {
    let (bx, by) = bbox.position;
    let mut out = RgbaImage::new(bbox.size.0, bbox.size.1);
    imageops::replace(&mut out, image, -(bx as i64), -(by as i64));
    out
}
