//! `fg-mcp-client` — MCP (Model Context Protocol) client for the frevaGPT
//! backend.
//!
//! This crate provides:
//! - JSON-RPC 2.0 protocol types for communicating with MCP tool servers.
//! - A streamable-HTTP transport: one POST endpoint per server, SSE-framed
//!   responses, and a server-assigned `Mcp-Session-Id` echoed on every call.
//! - A [`ToolManager`] owned by one conversation that lazily connects to the
//!   configured servers, discovers tools, and routes calls by tool name.
//!
//! # Usage
//!
//! ```rust,ignore
//! use fg_mcp_client::ToolManager;
//!
//! let manager = ToolManager::new(servers, urls, timeout);
//! manager.initialize(headers).await;
//! let result = manager
//!     .call_tool(Some("code"), "code_interpreter", json!({"code": "1+1"}), None)
//!     .await?;
//! ```

pub mod client;
pub mod manager;
pub mod protocol;

pub use client::{McpClient, McpError};
pub use manager::{ToolDescriptor, ToolManager};
