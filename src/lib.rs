pub mod archive;
pub mod cli;
pub mod convert;
pub mod ctx;
pub mod dicom;
pub mod group;
pub mod heuristic;
pub mod pipeline;
pub mod plan;
pub mod queue;
pub mod scan;
pub mod store;
