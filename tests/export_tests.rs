//! End-to-end tests for the flattened scene export.

use depthpaint::components::layers::LayerCompositor;
use depthpaint::components::tools::{BrushFamily, BrushShape, BrushSpec};
use depthpaint::canvas::Color;
use depthpaint::io;
use depthpaint::ops::export::ExportOptions;
use serde_json::Value;

fn square_brush() -> BrushSpec {
    BrushSpec {
        family: BrushFamily::Pen,
        shape: BrushShape::Rectangle,
        base_size: 1,
        color: Color::from_rgba8([250, 200, 0, 255]),
        pressure_enabled: false,
    }
}

fn three_layer_scene() -> LayerCompositor {
    let mut compositor = LayerCompositor::new();
    for (name, depth, size) in [("B", 2.0, 64), ("A", 0.5, 32), ("C", 1.0, 128)] {
        let id = compositor.add_canvas(size, size);
        let canvas = compositor.canvas_mut(id).unwrap();
        canvas.name = name.to_string();
        canvas.place_shape(&square_brush(), (4.0, 4.0), (12.0, 12.0));
        compositor.set_depth(id, depth);
    }
    compositor
}

#[test]
fn test_export_follows_depth_order() {
    let compositor = three_layer_scene();
    let doc = compositor.export_document(&ExportOptions::default()).unwrap();
    let names: Vec<&str> = doc.nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, ["A", "C", "B"]);
    let z: Vec<f32> = doc.nodes.iter().map(|n| n.translation[2]).collect();
    assert_eq!(z, [-0.5, -1.0, -2.0]);
}

#[test]
fn test_written_document_is_self_contained() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scene.gltf");
    let compositor = three_layer_scene();
    let doc = compositor.export_document(&ExportOptions::default()).unwrap();
    io::write_document(&doc, &path).unwrap();

    let value: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    for key in ["asset", "scenes", "nodes", "meshes", "materials", "textures", "images", "samplers", "buffers", "bufferViews", "accessors"] {
        assert!(value.get(key).is_some(), "missing {}", key);
    }
    assert_eq!(value["meshes"].as_array().unwrap().len(), 3);
    for image in value["images"].as_array().unwrap() {
        assert!(image["uri"].as_str().unwrap().starts_with("data:image/png;base64,"));
    }
}

#[test]
fn test_embedded_textures_have_opaque_halo() {
    use base64::Engine as _;

    let compositor = three_layer_scene();
    let opts = ExportOptions::default().halo_radius(2.0);
    let doc = compositor.export_document(&opts).unwrap();
    let uri = &doc.images[0].uri;
    let b64 = uri.trim_start_matches("data:image/png;base64,");
    let png = base64::engine::general_purpose::STANDARD.decode(b64).unwrap();
    let image = io::decode_png(&png).unwrap();

    // Painted square survives, halo uses the opaque white background
    assert_eq!(image.get_pixel(8, 8).0, [250, 200, 0, 255]);
    assert_eq!(image.get_pixel(14, 8).0, [255, 255, 255, 255]);
    assert_eq!(image.get_pixel(20, 20)[3], 0);
}

#[test]
fn test_empty_compositor_exports_empty_scene() {
    let doc = LayerCompositor::new().export_document(&ExportOptions::default()).unwrap();
    assert_eq!(doc.layer_count(), 0);
    let json = doc.to_json_string().unwrap();
    let value: Value = serde_json::from_str(&json).unwrap();
    assert!(value.get("meshes").is_none());
    assert_eq!(value["scenes"][0]["name"], "Scene");
}
