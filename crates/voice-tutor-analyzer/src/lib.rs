//! Periodic analysis of the session transcript.
//!
//! - `PeriodicAnalyzer` - Summarize the current transcript on a fixed clock
//! - `HttpSummarizer` - Chat-completion client, usually aimed at the relay

pub mod client;
pub mod periodic;

pub use client::{HttpSummarizer, SamplingOptions};
pub use periodic::{
    AnalyzerHandle, FALLBACK_MESSAGE, MIN_PERIOD, PeriodicAnalyzer, WAITING_MESSAGE, analyze_once,
    map_messages,
};
