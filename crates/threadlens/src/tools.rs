//! Transport-neutral tool dispatch.
//!
//! Each call produces a [`ToolResponse`]: a text block for humans plus the
//! structured payload, or an error marked with `isError`. Failures never
//! escape as Rust errors.

use facet::Facet;
use threadlens_types::{DiagnosticReport, ThreadInfo};
use tracing::warn;

use crate::DiagnosticEngine;
use crate::render::{render_stack_info, render_thread_info};

pub const TOOL_THREAD_INFO: &str = "get_thread_info";
pub const TOOL_THREAD_STACK_INFO: &str = "get_thread_stack_info";

#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
}

pub fn tool_descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: TOOL_THREAD_INFO.to_string(),
            description: "Process summary and the list of live threads with their states"
                .to_string(),
        },
        ToolDescriptor {
            name: TOOL_THREAD_STACK_INFO.to_string(),
            description:
                "Per-thread stacks, lock wait edges and potential deadlocks in the running process"
                    .to_string(),
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct ToolContent {
    #[facet(rename = "type")]
    pub content_type: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Facet)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum StructuredContent {
    ThreadInfo(ThreadInfo),
    StackInfo(DiagnosticReport),
}

#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct ToolError {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Facet)]
pub struct ToolResponse {
    pub content: Vec<ToolContent>,
    #[facet(rename = "isError")]
    pub is_error: bool,
    #[facet(rename = "structuredContent", skip_unless_truthy)]
    pub structured_content: Option<StructuredContent>,
    #[facet(skip_unless_truthy)]
    pub error: Option<ToolError>,
}

impl ToolResponse {
    fn success(text: String, structured: StructuredContent) -> Self {
        Self {
            content: vec![text_block(text)],
            is_error: false,
            structured_content: Some(structured),
            error: None,
        }
    }

    fn failure(kind: &str, message: String) -> Self {
        Self {
            content: vec![text_block(format!("Error: {message}"))],
            is_error: true,
            structured_content: None,
            error: Some(ToolError {
                kind: kind.to_string(),
                message,
            }),
        }
    }

    /// First text block, if any.
    pub fn text(&self) -> Option<&str> {
        self.content.first().map(|c| c.text.as_str())
    }

    pub fn to_json(&self) -> Result<String, String> {
        facet_json::to_string(self).map_err(|e| format!("encode tool response: {e}"))
    }
}

fn text_block(text: String) -> ToolContent {
    ToolContent {
        content_type: "text".to_string(),
        text,
    }
}

/// Run the named tool against `engine`.
pub async fn call_tool(engine: &DiagnosticEngine, name: &str) -> ToolResponse {
    let response = match name {
        TOOL_THREAD_INFO => match engine.get_thread_info().await {
            Ok(info) => ToolResponse::success(
                render_thread_info(&info),
                StructuredContent::ThreadInfo(info),
            ),
            Err(err) => ToolResponse::failure(err.kind(), err.to_string()),
        },
        TOOL_THREAD_STACK_INFO => match engine.get_thread_stack_info().await {
            Ok(report) => ToolResponse::success(
                render_stack_info(&report),
                StructuredContent::StackInfo(report.as_ref().clone()),
            ),
            Err(err) => ToolResponse::failure(err.kind(), err.to_string()),
        },
        other => ToolResponse::failure("unknown_tool", format!("unknown tool `{other}`")),
    };

    if let Some(error) = &response.error {
        warn!(tool = name, kind = %error.kind, message = %error.message, "tool call failed");
    }
    response
}
