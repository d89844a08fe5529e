//! Default graph served by the gateway.
//!
//! A deterministic plan → draft → review loop over the virtual filesystem.
//! It stands in for a model-driven agent so the run, stream and storage
//! layers can be exercised end to end.

use serde_json::{json, Value};

use super::graph::{FnNode, Graph, NodeContext, NodeOutput, NodeResult};
use super::{ExecutorError, RunError};
use crate::config::DEFAULT_DURABLE_PREFIX;
use crate::messages::{state_messages, Message};

pub const QUESTION_PATH: &str = "/question.txt";
pub const REPORT_PATH: &str = "/final_report.md";

#[derive(Debug, Clone)]
pub struct ResearchOptions {
    /// Pause in `review` until the client resumes with an approval.
    pub require_approval: bool,
    /// Durable prefix approved reports are copied under.
    pub archive_prefix: String,
}

impl Default for ResearchOptions {
    fn default() -> Self {
        Self {
            require_approval: true,
            archive_prefix: DEFAULT_DURABLE_PREFIX.to_string(),
        }
    }
}

pub fn research_graph(options: ResearchOptions) -> Result<Graph, ExecutorError> {
    let ResearchOptions {
        require_approval,
        archive_prefix,
    } = options;
    let archive_prefix = format!("{}/", archive_prefix.trim_end_matches('/'));

    Graph::builder()
        .node("plan", FnNode::new(plan))
        .node("draft", FnNode::new(draft))
        .node(
            "review",
            FnNode::new(move |ctx: &NodeContext| review(ctx, require_approval, &archive_prefix)),
        )
        .edge("plan", "draft")
        .edge("draft", "review")
        .entry("plan")
        .build()
}

fn plan(ctx: &NodeContext) -> Result<NodeResult, RunError> {
    let question = state_messages(&ctx.state)
        .into_iter()
        .rev()
        .find(|m| m.role() == "human")
        .map(|m| m.content().trim().to_string())
        .filter(|q| !q.is_empty());
    let Some(question) = question else {
        return Ok(NodeOutput::new().end().into());
    };

    ctx.files.write(QUESTION_PATH, &question)?;
    Ok(NodeOutput::new()
        .set("question", Value::String(question))
        .into())
}

fn draft(ctx: &NodeContext) -> Result<NodeResult, RunError> {
    let question = ctx.files.read_content(QUESTION_PATH)?;
    let notes: Vec<String> = ctx
        .files
        .list("/")?
        .into_iter()
        .map(|f| f.path)
        .filter(|p| p != QUESTION_PATH && p != REPORT_PATH)
        .collect();

    let mut report = format!("# Research report\n\n## Question\n\n{question}\n\n## Findings\n\n");
    if notes.is_empty() {
        report.push_str("No notes were collected for this question.\n");
    } else {
        for path in &notes {
            report.push_str(&format!("- see `{path}`\n"));
        }
    }
    ctx.files.write(REPORT_PATH, &report)?;

    Ok(NodeOutput::new()
        .set("report_path", json!(REPORT_PATH))
        .message(Message::ai(format!("Drafted a report at {REPORT_PATH}.")))
        .into())
}

fn review(
    ctx: &NodeContext,
    require_approval: bool,
    archive_prefix: &str,
) -> Result<NodeResult, RunError> {
    if require_approval {
        let Some(answer) = ctx.resume.as_ref() else {
            return Ok(NodeResult::Interrupt(json!({
                "action": "approve_report",
                "path": REPORT_PATH,
                "question": ctx.state_str("question"),
            })));
        };
        if !is_approval(answer) {
            return Ok(NodeOutput::new()
                .set("published", Value::Null)
                .message(Message::ai("Report kept as a draft."))
                .into());
        }
    }

    let report = ctx.files.read_content(REPORT_PATH)?;
    let target = format!("{archive_prefix}{}{REPORT_PATH}", ctx.thread_id);
    ctx.files
        .write(&target, &report)
        .map_err(|e| ctx.fail(format!("publish to {target}: {e}")))?;

    Ok(NodeOutput::new()
        .set("published", json!(target))
        .message(Message::ai(format!("Report saved to {target}.")))
        .into())
}

/// `"approved"`, `"yes"`, `true` or `{"approved": true}`.
fn is_approval(answer: &Value) -> bool {
    match answer {
        Value::Bool(b) => *b,
        Value::String(s) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("approved") || s.eq_ignore_ascii_case("yes")
        }
        Value::Object(o) => o.get("approved").and_then(Value::as_bool).unwrap_or(false),
        _ => false,
    }
}
