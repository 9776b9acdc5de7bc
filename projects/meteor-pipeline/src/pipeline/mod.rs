// Frame normalization and detection pipeline

pub mod detection;
pub mod export;
pub mod normalizer;
pub mod orchestrator;
pub mod runner;
pub mod shutdown;
pub mod size_normalizer;
pub mod types;
