pub mod distance;
pub mod export;
pub mod transform;
