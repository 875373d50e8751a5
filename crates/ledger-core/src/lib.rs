pub mod assistant;
pub mod config;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod model;
pub mod report;
pub mod storage;
pub mod vector;
