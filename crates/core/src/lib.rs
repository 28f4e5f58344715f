//! Tutor Core
//!
//! Transport-independent logic of the tutoring relay: conversation state,
//! the completion gateway, reply normalization and speech synthesis.

pub mod conversation;
pub mod llm_client;
pub mod normalizer;
pub mod prompt;
pub mod speech;
