//! Ingestion and normalization services

pub mod app_detect;
pub mod chipset;
pub mod decode;
pub mod extract;
pub mod ingest;
pub mod model_map;
