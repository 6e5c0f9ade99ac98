//! # trellis-llm — provider implementations for trellis
//!
//! The engine crate defines the [`trellis_core::llm::ChatProvider`] trait;
//! this crate implements it for OpenRouter's OpenAI-compatible chat
//! completions API, with SSE streaming, rate-limit header propagation, and
//! static model-capability inference.
//!
//! ```rust,ignore
//! use trellis_llm::{OpenRouterClient, RemoteLlmConfig};
//!
//! let config = RemoteLlmConfig::from_env(
//!     "OPENROUTER_API_KEY",
//!     "https://openrouter.ai/api/v1",
//! )?
//! .with_app_name("my-app");
//! let provider = OpenRouterClient::new(config);
//! ```

pub mod capabilities;
pub mod config;
pub mod openrouter;
pub mod sse;

pub use capabilities::infer_capabilities;
pub use config::RemoteLlmConfig;
pub use openrouter::OpenRouterClient;
