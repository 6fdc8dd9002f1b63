pub mod artifacts;
pub mod config;
pub mod error;
pub mod http;
pub mod invoker;
pub mod metrics;
pub mod parser;
pub mod prediction;
pub mod recommendation;
pub mod service;

// Re-export commonly used types for easier testing
pub use crate::config::{Config, InferenceConfig};
pub use crate::error::{ErrorCategory, PredictError};
pub use crate::invoker::{interrupt_channel, InterruptSignal, InterruptTrigger};
pub use crate::prediction::{PredictionRequest, PredictionResult, PredictionStatus};
pub use crate::recommendation::RecommendationTable;
pub use crate::service::{BundledScripts, CropDiseaseService};
