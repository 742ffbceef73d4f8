use image::RgbaImage;
use tracing::info;
use uuid::Uuid;

use crate::canvas::{CanvasState, composite_over};
use crate::io::ProjectError;
use crate::ops::export::{ExportOptions, GltfDocument, export_document};

/// Compositor-facing view of one canvas.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerDescriptor {
    pub id: Uuid,
    pub display_name: String,
    pub depth: f32,
}

/// Change notifications, drained by the owner with [`LayerCompositor::drain_events`].
#[derive(Clone, Debug, PartialEq)]
pub enum CompositorEvent {
    /// Canvas set, a name or the order changed.
    CanvasesChanged,
    /// A depth was set; `index` is the canvas's post-sort position.
    DepthChanged { index: usize, depth: f32 },
    ActiveChanged { index: usize },
}

// ============================================================================
// LAYER COMPOSITOR - depth-ordered canvas set
// ============================================================================

/// Owns the document's canvases, kept sorted by (depth, case-insensitive name).
/// The active canvas is tracked by id so reorders never retarget it.
#[derive(Default)]
pub struct LayerCompositor {
    canvases: Vec<CanvasState>,
    active: Option<Uuid>,
    events: Vec<CompositorEvent>,
}

impl LayerCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fresh canvas named after its ordinal position and make it active.
    pub fn add_canvas(&mut self, width: u32, height: u32) -> Uuid {
        let mut canvas = CanvasState::new(width, height);
        canvas.name = format!("Canvas {}", self.canvases.len() + 1);
        info!("added canvas {:?} ({}x{})", canvas.name, canvas.width(), canvas.height());
        self.insert_canvas(canvas)
    }

    /// Insert an existing canvas and make it active.
    pub fn insert_canvas(&mut self, canvas: CanvasState) -> Uuid {
        let id = canvas.id;
        self.canvases.push(canvas);
        self.active = Some(id);
        self.resort();
        self.events.push(CompositorEvent::CanvasesChanged);
        self.push_active_changed();
        id
    }

    /// Remove a canvas. When it was active, the canvas now at its former
    /// position (or the last one) becomes active.
    pub fn remove_canvas(&mut self, id: Uuid) -> Option<CanvasState> {
        let index = self.index_of(id)?;
        if self.canvases[index].is_stroke_open() {
            return None;
        }
        let removed = self.canvases.remove(index);
        if self.active == Some(id) {
            let next = index.min(self.canvases.len().saturating_sub(1));
            self.active = self.canvases.get(next).map(|c| c.id);
            self.push_active_changed();
        }
        info!("removed canvas {:?}", removed.name);
        self.events.push(CompositorEvent::CanvasesChanged);
        Some(removed)
    }

    /// Swap in a whole new canvas set (project load). History is not kept.
    pub fn replace_all(&mut self, canvases: Vec<CanvasState>, active_index: usize) {
        self.canvases = canvases;
        let index = active_index.min(self.canvases.len().saturating_sub(1));
        self.active = self.canvases.get(index).map(|c| c.id);
        self.resort();
        self.events.push(CompositorEvent::CanvasesChanged);
        self.push_active_changed();
    }

    // ---- access -------------------------------------------------------------

    pub fn canvases(&self) -> &[CanvasState] {
        &self.canvases
    }

    pub fn len(&self) -> usize {
        self.canvases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canvases.is_empty()
    }

    pub fn index_of(&self, id: Uuid) -> Option<usize> {
        self.canvases.iter().position(|c| c.id == id)
    }

    pub fn canvas(&self, id: Uuid) -> Option<&CanvasState> {
        self.canvases.iter().find(|c| c.id == id)
    }

    pub fn canvas_mut(&mut self, id: Uuid) -> Option<&mut CanvasState> {
        self.canvases.iter_mut().find(|c| c.id == id)
    }

    pub fn active_id(&self) -> Option<Uuid> {
        self.active
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active.and_then(|id| self.index_of(id))
    }

    pub fn active(&self) -> Option<&CanvasState> {
        self.active.and_then(|id| self.canvas(id))
    }

    pub fn active_mut(&mut self) -> Option<&mut CanvasState> {
        let id = self.active?;
        self.canvas_mut(id)
    }

    /// Select the canvas at `index` in sorted order.
    pub fn set_active(&mut self, index: usize) -> bool {
        let Some(id) = self.canvases.get(index).map(|c| c.id) else {
            return false;
        };
        if self.active().is_some_and(|c| c.is_stroke_open()) {
            return false;
        }
        if self.active != Some(id) {
            self.active = Some(id);
            self.events.push(CompositorEvent::ActiveChanged { index });
        }
        true
    }

    // ---- ordering -----------------------------------------------------------

    /// Set a canvas's depth and resort. Returns the canvas's new index.
    pub fn set_depth(&mut self, id: Uuid, depth: f32) -> Option<usize> {
        if !depth.is_finite() {
            return None;
        }
        let canvas = self.canvas_mut(id)?;
        if canvas.is_stroke_open() {
            return None;
        }
        canvas.depth = depth;
        self.resort();
        let index = self.index_of(id)?;
        info!("canvas {} depth set to {}", index, depth);
        self.events.push(CompositorEvent::DepthChanged { index, depth });
        Some(index)
    }

    /// Rename the active canvas. Whitespace is trimmed; empty becomes "Untitled".
    pub fn rename_active(&mut self, title: &str) -> bool {
        let Some(canvas) = self.active_mut() else {
            return false;
        };
        let trimmed = title.trim();
        canvas.name = if trimmed.is_empty() { "Untitled".to_string() } else { trimmed.to_string() };
        info!("renamed active canvas to {:?}", canvas.name);
        self.resort();
        self.events.push(CompositorEvent::CanvasesChanged);
        true
    }

    /// Stable sort by depth, ties broken by case-insensitive name.
    fn resort(&mut self) {
        self.canvases.sort_by(|a, b| {
            a.depth
                .total_cmp(&b.depth)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
    }

    pub fn descriptors(&self) -> Vec<LayerDescriptor> {
        self.canvases
            .iter()
            .enumerate()
            .map(|(i, c)| LayerDescriptor { id: c.id, display_name: c.display_name(i), depth: c.depth })
            .collect()
    }

    // ---- underlay -----------------------------------------------------------

    /// Indices (sorted order) of canvases deeper than the active one.
    pub fn underlay_indices(&self) -> Vec<usize> {
        let Some(active) = self.active() else {
            return Vec::new();
        };
        let depth = active.depth;
        self.canvases
            .iter()
            .enumerate()
            .filter(|(_, c)| c.id != active.id && c.depth > depth)
            .map(|(i, _)| i)
            .collect()
    }

    /// Active canvas over its background with the underlay beneath it,
    /// deepest first. Underlays are anchored top-left.
    pub fn underlay_preview(&self) -> Option<RgbaImage> {
        let active = self.active()?;
        let (w, h) = active.resolution();
        let mut out = RgbaImage::from_pixel(w, h, active.background_color.to_pixel());
        for &index in self.underlay_indices().iter().rev() {
            composite_over(&mut out, self.canvases[index].pixels().as_image());
        }
        composite_over(&mut out, active.pixels().as_image());
        Some(out)
    }

    // ---- export -------------------------------------------------------------

    pub fn export_document(&self, opts: &ExportOptions) -> Result<GltfDocument, ProjectError> {
        export_document(&self.canvases, opts)
    }

    pub fn drain_events(&mut self) -> Vec<CompositorEvent> {
        std::mem::take(&mut self.events)
    }

    fn push_active_changed(&mut self) {
        if let Some(index) = self.active_index() {
            self.events.push(CompositorEvent::ActiveChanged { index });
        }
    }
}
