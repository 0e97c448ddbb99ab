//! Plane stress finite element analysis of a plate with a rectangular slot.
//!
//! The pipeline runs geometry → mesh → assembly → boundary conditions →
//! solve → stress recovery, and can be repeated over a range of slot depths
//! or edge loads with per-step VTK export.

pub mod analysis;
pub mod assembler;
pub mod boundary;
pub mod datatypes;
pub mod element;
pub mod error;
pub mod exporter;
pub mod geometry;
pub mod mesher;
pub mod model;
pub mod post_processor;
pub mod report;
pub mod solver;
pub mod sweep;
pub mod worker;

pub use analysis::{Analysis, OutputData};
pub use error::SlotPlateError;
pub use model::InputData;
