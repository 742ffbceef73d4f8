pub mod history;
pub mod layers;
pub mod strokes;
pub mod tools;
