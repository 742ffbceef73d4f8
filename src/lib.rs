//! Layered raster painting with a depth-ordered compositor and a flattened
//! glTF exporter.
//!
//! [`project::Project`] is the entry point for interactive hosts: it owns the
//! canvases ([`components::layers::LayerCompositor`]), the document-wide
//! [`components::tools::ToolState`] and turns pointer events into strokes.
//! [`cli`] drives the same code headlessly.

pub mod canvas;
pub mod cli;
pub mod components;
pub mod io;
pub mod logger;
pub mod ops;
pub mod project;
