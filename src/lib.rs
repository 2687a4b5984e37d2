//! Browser automation for LLM agents.
//!
//! A [`tools::ToolRegistry`] exposes browser actions as tools over a
//! [`engine::BrowserEngine`]. Every tool result carries the page state it
//! left behind, trimmed to a fixed token budget. [`agent::AgentLoop`] drives
//! an LLM through those tools via a [`provider::ProviderDelegate`].

pub mod agent;
pub mod budget;
pub mod chrome;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod paginate;
pub mod provider;
pub mod response;
pub mod tools;
pub mod types;

pub use agent::{AgentEvent, AgentLoop, LoopOptions};
pub use config::Config;
pub use conversation::{Conversation, Message, ToolCall, ToolDescriptor, ToolResult};
pub use engine::{BrowserEngine, Context};
pub use error::{AgentError, ProviderError};
pub use response::{Response, ToolOutput};
pub use tools::{Tool, ToolRegistry};
