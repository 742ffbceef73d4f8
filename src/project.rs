use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::canvas::CanvasState;
use crate::components::layers::{CompositorEvent, LayerCompositor};
use crate::components::tools::{ToolMode, ToolState};
use crate::io::{self, ProjectError};
use crate::ops::export::{ExportOptions, GltfDocument};

/// Minimum spacing between coalesced image-changed notifications.
pub const IMAGE_NOTIFY_INTERVAL: Duration = Duration::from_millis(250);

/// Resolution of the first canvas in a new project.
pub const DEFAULT_CANVAS_SIZE: (u32, u32) = (1024, 1024);

// ============================================================================
// CHANGE THROTTLE
// ============================================================================

/// Coalesces bursts of changes into at most one notification per interval,
/// plus a trailing notification for changes made inside the quiet period.
#[derive(Clone, Debug)]
pub struct ChangeThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
    pending: bool,
}

impl Default for ChangeThrottle {
    fn default() -> Self {
        Self::new(IMAGE_NOTIFY_INTERVAL)
    }
}

impl ChangeThrottle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_emit: None, pending: false }
    }

    fn ready(&self, now: Instant) -> bool {
        self.last_emit
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Record a change. Returns `true` if a notification should go out now;
    /// otherwise the change is held for [`poll`](Self::poll) or [`flush`](Self::flush).
    pub fn mark(&mut self, now: Instant) -> bool {
        if self.ready(now) {
            self.last_emit = Some(now);
            self.pending = false;
            true
        } else {
            self.pending = true;
            false
        }
    }

    /// Trailing emit once the interval has passed since the last one.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.pending && self.ready(now) {
            self.last_emit = Some(now);
            self.pending = false;
            true
        } else {
            false
        }
    }

    /// Emit any held change immediately.
    pub fn flush(&mut self, now: Instant) -> bool {
        if self.pending {
            self.last_emit = Some(now);
            self.pending = false;
            true
        } else {
            false
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

// ============================================================================
// PROJECT
// ============================================================================

/// Notifications for the host, drained with [`Project::poll_events`].
#[derive(Clone, Debug, PartialEq)]
pub enum ProjectEvent {
    Compositor(CompositorEvent),
    /// Pixels of `canvas` changed since the last notification.
    ImageUpdated { canvas: Uuid },
    Saved { path: PathBuf },
    Loaded { canvases: usize },
}

/// The paint session opened by a pointer-down.
#[derive(Clone, Copy, Debug, PartialEq)]
enum PaintSession {
    Idle,
    Freehand { canvas: Uuid },
    Shape { canvas: Uuid, anchor: (f32, f32) },
}

/// Single open document: the canvases, the document-wide tool settings and
/// the pointer-driven paint session.
pub struct Project {
    pub id: Uuid,
    /// Display name (derived from path or "Untitled-X")
    pub name: String,
    /// `None` for unsaved/untitled documents.
    pub path: Option<PathBuf>,
    pub tools: ToolState,
    is_dirty: bool,
    compositor: LayerCompositor,
    session: PaintSession,
    throttle: ChangeThrottle,
    throttled_canvas: Option<Uuid>,
    pending_image_export: Option<PathBuf>,
    events: Vec<ProjectEvent>,
}

impl Project {
    pub fn new_untitled(untitled_counter: usize, width: u32, height: u32) -> Self {
        let mut compositor = LayerCompositor::new();
        compositor.add_canvas(width, height);
        compositor.drain_events();
        Self::with_compositor(format!("Untitled-{}", untitled_counter), None, compositor)
    }

    /// Open a saved project file.
    pub fn open(path: &Path) -> Result<Self, ProjectError> {
        let (canvases, active) = io::load_project(path)?;
        let mut compositor = LayerCompositor::new();
        compositor.replace_all(canvases, active);
        compositor.drain_events();
        Ok(Self::with_compositor(name_from_path(path), Some(path.to_path_buf()), compositor))
    }

    fn with_compositor(name: String, path: Option<PathBuf>, compositor: LayerCompositor) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            path,
            tools: ToolState::default(),
            is_dirty: false,
            compositor,
            session: PaintSession::Idle,
            throttle: ChangeThrottle::default(),
            throttled_canvas: None,
            pending_image_export: None,
            events: Vec::new(),
        }
    }

    pub fn compositor(&self) -> &LayerCompositor {
        &self.compositor
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    /// Get the display title (name with dirty indicator)
    pub fn display_title(&self) -> String {
        if self.is_dirty {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }

    pub fn is_painting(&self) -> bool {
        self.session != PaintSession::Idle
    }

    // ---- pointer input ------------------------------------------------------

    /// Start a freehand stroke or anchor a shape drag on the active canvas.
    /// `pos` is in canvas pixel space.
    pub fn pointer_down(&mut self, pos: (f32, f32), pressure: f32, now: Instant) -> bool {
        if self.is_painting() {
            return false;
        }
        let brush = self.tools.brush();
        let mode = self.tools.mode;
        let Some(canvas) = self.compositor.active_mut() else {
            return false;
        };
        let id = canvas.id;
        match mode {
            ToolMode::Freehand => {
                canvas.begin_stroke(&brush, pos, pressure);
                self.session = PaintSession::Freehand { canvas: id };
                self.is_dirty = true;
                self.image_changed(id, now);
            }
            ToolMode::Shape => {
                self.session = PaintSession::Shape { canvas: id, anchor: pos };
            }
        }
        true
    }

    pub fn pointer_move(&mut self, pos: (f32, f32), pressure: f32, now: Instant) {
        let PaintSession::Freehand { canvas: id } = self.session else {
            return;
        };
        let brush = self.tools.brush();
        let painted = self
            .compositor
            .canvas_mut(id)
            .map(|c| !c.continue_stroke(&brush, pos, pressure).is_empty())
            .unwrap_or(false);
        if painted {
            self.image_changed(id, now);
        }
    }

    /// Close the paint session. Freehand strokes are always finalized; a
    /// shape is only placed when the pointer is released over the canvas.
    pub fn pointer_up(&mut self, pos: (f32, f32), pressure: f32, inside: bool, now: Instant) -> bool {
        let session = std::mem::replace(&mut self.session, PaintSession::Idle);
        let brush = self.tools.brush();
        let changed = match session {
            PaintSession::Idle => false,
            PaintSession::Freehand { canvas: id } => {
                let (painted, appended) = match self.compositor.canvas_mut(id) {
                    Some(canvas) => {
                        let painted = inside && !canvas.continue_stroke(&brush, pos, pressure).is_empty();
                        (painted, canvas.end_stroke())
                    }
                    None => (false, false),
                };
                if painted {
                    self.image_changed(id, now);
                }
                appended
            }
            PaintSession::Shape { canvas: id, anchor } => {
                if !inside {
                    debug!("shape drag released outside the canvas, nothing placed");
                    return false;
                }
                let placed = self
                    .compositor
                    .canvas_mut(id)
                    .is_some_and(|c| c.place_shape(&brush, anchor, pos));
                if placed {
                    self.is_dirty = true;
                    self.image_changed(id, now);
                }
                placed
            }
        };
        self.flush_image_events(now);
        changed
    }

    /// Emit a held image notification once its interval has passed.
    /// Hosts call this once per frame.
    pub fn tick(&mut self, now: Instant) {
        if self.throttle.poll(now)
            && let Some(canvas) = self.throttled_canvas.take()
        {
            self.events.push(ProjectEvent::ImageUpdated { canvas });
        }
    }

    fn image_changed(&mut self, canvas: Uuid, now: Instant) {
        if self.throttle.mark(now) {
            self.throttled_canvas = None;
            self.events.push(ProjectEvent::ImageUpdated { canvas });
        } else {
            self.throttled_canvas = Some(canvas);
        }
    }

    fn flush_image_events(&mut self, now: Instant) {
        if self.throttle.flush(now)
            && let Some(canvas) = self.throttled_canvas.take()
        {
            self.events.push(ProjectEvent::ImageUpdated { canvas });
        }
    }

    /// Drain pending notifications, compositor changes first.
    pub fn poll_events(&mut self) -> Vec<ProjectEvent> {
        let mut out: Vec<ProjectEvent> = self
            .compositor
            .drain_events()
            .into_iter()
            .map(ProjectEvent::Compositor)
            .collect();
        out.append(&mut self.events);
        out
    }

    // ---- canvas operations --------------------------------------------------

    pub fn undo(&mut self) -> bool {
        self.with_active(|c| c.undo())
    }

    pub fn redo(&mut self) -> bool {
        self.with_active(|c| c.redo())
    }

    pub fn resize_active(&mut self, width: u32, height: u32) -> bool {
        self.with_active(|c| c.resize(width, height))
    }

    /// Run a mutating canvas operation outside of any paint session.
    fn with_active(&mut self, op: impl FnOnce(&mut CanvasState) -> bool) -> bool {
        if self.is_painting() {
            warn!("canvas operation ignored while painting");
            return false;
        }
        let Some(canvas) = self.compositor.active_mut() else {
            return false;
        };
        let id = canvas.id;
        if !op(canvas) {
            return false;
        }
        self.is_dirty = true;
        self.events.push(ProjectEvent::ImageUpdated { canvas: id });
        true
    }

    pub fn add_canvas(&mut self, width: u32, height: u32) -> Option<Uuid> {
        if self.is_painting() {
            return None;
        }
        self.is_dirty = true;
        Some(self.compositor.add_canvas(width, height))
    }

    pub fn remove_canvas(&mut self, id: Uuid) -> bool {
        if self.is_painting() {
            return false;
        }
        let removed = self.compositor.remove_canvas(id).is_some();
        self.is_dirty |= removed;
        removed
    }

    pub fn set_active(&mut self, index: usize) -> bool {
        !self.is_painting() && self.compositor.set_active(index)
    }

    pub fn set_depth(&mut self, id: Uuid, depth: f32) -> Option<usize> {
        if self.is_painting() {
            return None;
        }
        let index = self.compositor.set_depth(id, depth)?;
        self.is_dirty = true;
        Some(index)
    }

    pub fn rename_active(&mut self, title: &str) -> bool {
        if self.is_painting() {
            return false;
        }
        let renamed = self.compositor.rename_active(title);
        self.is_dirty |= renamed;
        renamed
    }

    // ---- persistence --------------------------------------------------------

    /// Save to `path`, adopting it as the document path.
    pub fn save_as(&mut self, path: &Path) -> Result<(), ProjectError> {
        io::save_project(&self.compositor, path)?;
        self.path = Some(path.to_path_buf());
        self.name = name_from_path(path);
        self.is_dirty = false;
        self.events.push(ProjectEvent::Saved { path: path.to_path_buf() });
        Ok(())
    }

    /// Save to the current path.
    pub fn save(&mut self) -> Result<(), ProjectError> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| ProjectError::InvalidFormat("project has no file path".into()))?;
        self.save_as(&path)
    }

    /// Replace every canvas with the file's. On any error the current
    /// canvases are left untouched.
    pub fn load(&mut self, path: &Path) -> Result<(), ProjectError> {
        if self.is_painting() {
            return Err(ProjectError::InvalidFormat("cannot load while painting".into()));
        }
        let (canvases, active) = io::load_project(path)?;
        let count = canvases.len();
        self.compositor.replace_all(canvases, active);
        self.path = Some(path.to_path_buf());
        self.name = name_from_path(path);
        self.is_dirty = false;
        self.throttled_canvas = None;
        self.events.push(ProjectEvent::Loaded { canvases: count });
        Ok(())
    }

    // ---- export -------------------------------------------------------------

    pub fn export_document(&self, opts: &ExportOptions) -> Result<GltfDocument, ProjectError> {
        self.compositor.export_document(opts)
    }

    pub fn export_gltf(&self, path: &Path, opts: &ExportOptions) -> Result<(), ProjectError> {
        let doc = self.export_document(opts)?;
        io::write_document(&doc, path)
    }

    /// Queue a PNG of the active canvas; it is written by the next
    /// [`render_flushed`](Self::render_flushed) call.
    pub fn request_image_export(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        debug!("image export to {} queued", path.display());
        self.pending_image_export = Some(path);
    }

    pub fn has_pending_image_export(&self) -> bool {
        self.pending_image_export.is_some()
    }

    /// Called by the host after a frame has rendered. Performs the queued
    /// image export, if any, and returns its outcome.
    pub fn render_flushed(&mut self) -> Option<Result<(), ProjectError>> {
        let path = self.pending_image_export.take()?;
        let Some(canvas) = self.compositor.active() else {
            return Some(Err(ProjectError::Empty));
        };
        let result = io::write_png(canvas.pixels().as_image(), &path);
        if let Err(e) = &result {
            warn!("image export to {} failed: {}", path.display(), e);
        } else {
            info!("image exported to {}", path.display());
        }
        Some(result)
    }
}

fn name_from_path(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}
