//! Resilient orchestration of long-form text generation over unreliable
//! language-model providers.
//!
//! A [`executor::GenerationExecutor`] walks a document's sections in order.
//! Each provider call goes through a per-provider circuit breaker and a retry
//! loop with model fallback; generated text passes a quality gate and is
//! regenerated when rejected. Job state and live progress events are exposed
//! to callers while the work runs.

pub mod config;
pub mod cost;
pub mod error;
pub mod executor;
pub mod generation;
pub mod job;
pub mod logging;
pub mod progress;
pub mod provider;
pub mod quality;
pub mod request;
pub mod resilience;
