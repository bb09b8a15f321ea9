// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON-RPC 2.0 server surface.
//!
//! - [`rpc`] - message types and error codes
//! - [`tools`] - the four context tools and their request structs
//! - [`stdio`] - the newline-delimited stdio transport
//!
//! HTTP framing is an external collaborator; this crate serves stdio.

pub mod rpc;
pub mod stdio;
pub mod tools;

pub use rpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use stdio::{handle_line, handle_request, run_stdio};
pub use tools::{dispatch_tool, tool_descriptors};
