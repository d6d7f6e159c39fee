//! Click-to-segment object masks and motion authoring.
//!
//! A promptable segmentation model turns clicks into object masks; each
//! committed mask can then be given a dragged trajectory plus rotation and
//! scale keyframes, all expanded into per-frame artifacts.

pub mod assets;
pub mod authoring;
pub mod config;
pub mod error;
pub mod geometry;
pub mod inference;
pub mod keyframes;
pub mod mask;
pub mod preview;
pub mod segmentation;
pub mod surface;
pub mod trajectory;
pub mod worker;
