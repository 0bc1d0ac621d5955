//! Multi-agent reasoning pipeline.
//!
//! A prompt goes to every agent, each answer is self-verified, critiqued by a
//! peer, refined, and finally blended into one response. Past sessions are
//! kept as keyword-searchable memory and fed back into later discussions.

pub mod agent;
pub mod budget;
pub mod config;
pub mod gateway;
pub mod llm;
pub mod memory;
pub mod pipeline;
pub mod profile;
