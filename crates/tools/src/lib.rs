//! Tool layer: each analysis exposed as a named operation with a JSON
//! schema, JSON input, and pretty-printed JSON output.

pub mod input;
pub mod mermaid;
pub mod registry;
pub mod tool;
pub mod tools;

#[cfg(test)]
mod testing;

pub use registry::{RegistryError, ToolRegistry};
pub use tool::{Tool, ToolContext, ToolDefinition, ToolError, ToolResult};
