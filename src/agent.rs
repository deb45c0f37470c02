//! Agent runtime: prompt construction, the tool-call XML wire format, and
//! the iterative plan/act/observe loop.
//!
//! The LLM is instructed to reply with a single `<response>` root holding
//! either `<final_answer>` or `<tool_calls>`. Parsing uses `quick-xml` in
//! event-reader mode (already a teacher dependency, there used for OOXML
//! text extraction) so CDATA sections survive byte-for-byte; primitive
//! values are inferred with the boolean/integer/float/else cascade.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};
use std::collections::VecDeque;

use crate::config::AgentConfig;
use crate::error::RagForgeError;
use crate::llm::{generate_text, ChatTurn, LLMProvider};
use crate::models::Persona;
use crate::schema::ToolDescriptor;
use crate::traits::{Tool, ToolRegistry};
use crate::tools::ToolContext;

/// One parsed `<tool_call>`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    pub name: String,
    pub arguments: Value,
}

/// What the LLM's `<response>` resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentAction {
    FinalAnswer(String),
    ToolCalls(Vec<ParsedToolCall>),
}

/// A tool invocation awaiting external approval (§4.5 step 4).
#[derive(Debug, Clone)]
pub struct PendingAction {
    pub tool_name: String,
    pub arguments: Value,
    pub preview: String,
}

/// Observer hooks for the TUI / any other watcher of agent progress.
/// Default methods are no-ops so most callers only override what they need.
pub trait AgentObserver: Send + Sync {
    fn on_tool_call(&self, _name: &str, _args: &Value) {}
    fn on_tool_result(&self, _name: &str, _result: &Result<Value, String>, _duration_ms: u64) {}
}

pub struct SilentObserver;
impl AgentObserver for SilentObserver {}

/// Gate deciding whether a pending action may proceed. Tests and
/// unattended runs use [`AutoApprove`]/[`AutoReject`]; an interactive
/// front-end implements its own.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    async fn confirm(&self, action: &PendingAction) -> bool;
}

pub struct AutoApprove;
#[async_trait]
impl ConfirmationGate for AutoApprove {
    async fn confirm(&self, _action: &PendingAction) -> bool {
        true
    }
}

pub struct AutoReject;
#[async_trait]
impl ConfirmationGate for AutoReject {
    async fn confirm(&self, _action: &PendingAction) -> bool {
        false
    }
}

// ============ Primitive inference (§8.4) ============

fn infer_primitive(raw: &str) -> Value {
    if raw == "true" {
        return Value::Bool(true);
    }
    if raw == "false" {
        return Value::Bool(false);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

// ============ XML tool-call parsing ============

/// One frame of the parse stack: the element name and the JSON value
/// being assembled for it. Arrays are containers whose children repeat
/// under one tag name (`<items><item>a</item><item>b</item></items>`);
/// objects accumulate named children.
enum Frame {
    Object { tag: String, map: Map<String, Value>, text: String },
    Array { tag: String, items: Vec<Value> },
}

fn finish_frame(frame: Frame) -> (String, Value) {
    match frame {
        Frame::Object { tag, map, text } => {
            if map.is_empty() {
                (tag, infer_primitive(text.trim()))
            } else {
                (tag, Value::Object(map))
            }
        }
        Frame::Array { tag, items } => (tag, Value::Array(items)),
    }
}

fn push_child(parent: &mut Frame, name: String, value: Value) {
    match parent {
        Frame::Object { map, .. } => {
            map.insert(name, value);
        }
        Frame::Array { items, .. } => {
            items.push(value);
        }
    }
}

/// Parses a `<response>...</response>` document into an [`AgentAction`].
pub fn parse_response(xml: &str) -> Result<AgentAction> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: VecDeque<Frame> = VecDeque::new();
    let mut final_answer: Option<String> = None;
    let mut tool_calls: Vec<ParsedToolCall> = Vec::new();
    let mut current_tool_name: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "items" || name.ends_with("_list") {
                    stack.push_back(Frame::Array { tag: name, items: Vec::new() });
                } else {
                    stack.push_back(Frame::Object { tag: name, map: Map::new(), text: String::new() });
                }
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if let Some(parent) = stack.back_mut() {
                    push_child(parent, name, Value::String(String::new()));
                }
            }
            Event::Text(t) => {
                let text = t.unescape().unwrap_or_default().to_string();
                if let Some(Frame::Object { text: buf_text, .. }) = stack.back_mut() {
                    buf_text.push_str(&text);
                }
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(c.as_ref()).to_string();
                if let Some(Frame::Object { text: buf_text, .. }) = stack.back_mut() {
                    buf_text.push_str(&text);
                }
            }
            Event::End(_) => {
                let frame = stack
                    .pop_back()
                    .ok_or_else(|| anyhow!("unbalanced closing tag in tool-call XML"))?;
                let (tag, value) = finish_frame(frame);

                match tag.as_str() {
                    "response" => {}
                    "final_answer" => {
                        final_answer = Some(value.as_str().unwrap_or_default().to_string());
                    }
                    "tool_calls" => {}
                    "tool_call" => {
                        let name = current_tool_name
                            .take()
                            .ok_or_else(|| anyhow!("tool_call missing tool_name"))?;
                        let arguments = value.get("arguments").cloned().unwrap_or(Value::Object(Map::new()));
                        tool_calls.push(ParsedToolCall { name, arguments });
                    }
                    "tool_name" => {
                        current_tool_name = value.as_str().map(str::to_string);
                    }
                    _ => {
                        if let Some(parent) = stack.back_mut() {
                            push_child(parent, tag, value);
                        }
                    }
                }
            }
            _ => {}
        }
        buf.clear();
    }

    if let Some(answer) = final_answer {
        return Ok(AgentAction::FinalAnswer(answer));
    }
    if !tool_calls.is_empty() {
        return Ok(AgentAction::ToolCalls(tool_calls));
    }
    bail!("response contained neither <final_answer> nor <tool_calls>")
}

/// Reminder appended to a retry turn after a first parse failure (§4.4
/// "Output discipline").
const MALFORMED_OUTPUT_REMINDER: &str =
    "Your previous reply did not parse as valid <response> XML. Reply with exactly one \
     <response> root containing either <final_answer> or <tool_calls>, with no other text.";

// ============ Prompt construction ============

pub fn build_system_prompt(persona: &Persona, tools: &[ToolDescriptor], capabilities: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!("You are {}, speaking in {}.\n", persona.name, persona.language));
    prompt.push_str(&persona.persona);
    prompt.push_str("\n\n# Capabilities\n");
    prompt.push_str(capabilities);
    prompt.push_str("\n\n# Tools\n");
    for t in tools {
        prompt.push_str(&format!("- {} : {}\n", t.name, t.description));
        for a in &t.args {
            prompt.push_str(&format!(
                "    - {} ({:?}{}): {}\n",
                a.name,
                a.arg_type,
                if a.required { ", required" } else { "" },
                a.description
            ));
        }
    }
    prompt.push_str(
        "\nReply with a single <response> root element containing either <final_answer> \
         or <tool_calls> with one or more <tool_call><tool_name/><arguments/></tool_call>. \
         Wrap free-text argument values likely to contain '<', '>' or '&' in CDATA.",
    );
    prompt
}

// ============ Iterative loop ============

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub final_answer: String,
    pub truncated: bool,
    pub iterations: usize,
}

/// Runs the plan/act/observe loop described in §4.5 to completion or until
/// `config.iteration_cap` is hit.
pub async fn run_agent(
    persona: &Persona,
    task: &str,
    capabilities: &str,
    tools: &[ToolDescriptor],
    registry: &ToolRegistry,
    ctx: &ToolContext,
    llm_provider: &dyn LLMProvider,
    llm_config: &crate::config::LLMConfig,
    config: &AgentConfig,
    gate: &dyn ConfirmationGate,
    observer: &dyn AgentObserver,
) -> Result<AgentOutcome, RagForgeError> {
    let system_prompt = build_system_prompt(persona, tools, capabilities);
    let mut turns = vec![ChatTurn::system(system_prompt), ChatTurn::user(task.to_string())];

    let mut iterations = 0usize;
    let mut evidence_bytes = 0usize;
    let mut evidence_count = 0usize;

    loop {
        if iterations >= config.iteration_cap {
            return Ok(AgentOutcome {
                final_answer: "Iteration cap reached without a final answer.".to_string(),
                truncated: true,
                iterations,
            });
        }
        iterations += 1;

        let reply = generate_text(llm_provider, llm_config, &turns)
            .await
            .map_err(|e| RagForgeError::LLMFailed(e.to_string()))?;

        let action = match parse_response(&reply) {
            Ok(action) => action,
            Err(_) => {
                turns.push(ChatTurn::assistant(reply));
                turns.push(ChatTurn::user(MALFORMED_OUTPUT_REMINDER));
                let retry = generate_text(llm_provider, llm_config, &turns)
                    .await
                    .map_err(|e| RagForgeError::LLMFailed(e.to_string()))?;
                parse_response(&retry).map_err(|e| RagForgeError::MalformedOutput(e.to_string()))?
            }
        };

        match action {
            AgentAction::FinalAnswer(text) => {
                return Ok(AgentOutcome { final_answer: text, truncated: false, iterations });
            }
            AgentAction::ToolCalls(calls) => {
                turns.push(ChatTurn::assistant(format!("{} tool call(s) issued", calls.len())));

                for call in calls {
                    let tool = registry
                        .find(&call.name)
                        .ok_or_else(|| RagForgeError::ToolRejected(format!("unknown tool '{}'", call.name)))?;

                    let descriptor_requires_validation =
                        tools.iter().find(|t| t.name == call.name).map(|t| t.requires_validation).unwrap_or(false);
                    if descriptor_requires_validation || requires_confirmation(&call.arguments) {
                        let pending = PendingAction {
                            tool_name: call.name.clone(),
                            arguments: call.arguments.clone(),
                            preview: preview_for(&call.name, &call.arguments),
                        };
                        if !gate.confirm(&pending).await {
                            turns.push(ChatTurn::user(format!(
                                "tool '{}' rejected by user confirmation",
                                call.name
                            )));
                            continue;
                        }
                    }

                    observer.on_tool_call(&call.name, &call.arguments);
                    let started = std::time::Instant::now();
                    let result = tool.execute(call.arguments.clone(), ctx).await;
                    let duration_ms = started.elapsed().as_millis() as u64;
                    let observation = match &result {
                        Ok(v) => v.to_string(),
                        Err(e) => format!("error: {e}"),
                    };
                    observer.on_tool_result(&call.name, &result.as_ref().map(Clone::clone).map_err(|e| e.to_string()), duration_ms);

                    evidence_count += 1;
                    evidence_bytes += observation.len();
                    let text = if evidence_count > config.summarize_result_threshold
                        || evidence_bytes > config.summarize_byte_threshold
                    {
                        summarize_evidence(&observation)
                    } else {
                        observation
                    };
                    turns.push(ChatTurn::user(format!("Tool `{}` result:\n{}", call.name, text)));
                }
            }
        }
    }
}

fn requires_confirmation(arguments: &Value) -> bool {
    arguments.get("_requestValidation").and_then(Value::as_bool).unwrap_or(false)
}

fn preview_for(tool_name: &str, arguments: &Value) -> String {
    format!("{tool_name}({arguments})")
}

/// Compresses accumulated evidence once it crosses the configured
/// threshold (§4.5 "Context summarization"). A real deployment would call
/// the LLM here too; this reference implementation truncates with a
/// marker, which keeps the loop deterministic for small result sets.
fn summarize_evidence(text: &str) -> String {
    const HEAD: usize = 2000;
    if text.len() <= HEAD {
        text.to_string()
    } else {
        format!("{}... [truncated {} bytes]", &text[..HEAD], text.len() - HEAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_primitive_types() {
        assert_eq!(infer_primitive("true"), Value::Bool(true));
        assert_eq!(infer_primitive("false"), Value::Bool(false));
        assert_eq!(infer_primitive("42"), Value::Number(42.into()));
        assert_eq!(infer_primitive("hello"), Value::String("hello".to_string()));
        assert!(matches!(infer_primitive("3.14"), Value::Number(_)));
    }

    #[test]
    fn parses_final_answer() {
        let xml = "<response><final_answer><![CDATA[done]]></final_answer></response>";
        let action = parse_response(xml).unwrap();
        assert_eq!(action, AgentAction::FinalAnswer("done".to_string()));
    }

    #[test]
    fn parses_tool_call_with_cdata_and_nested_args() {
        let xml = r#"<response>
          <tool_calls>
            <tool_call>
              <tool_name>semantic_search_Scope</tool_name>
              <arguments>
                <query><![CDATA[```ts\nexport const x = 1 < 2 && 3 > 2;\n```]]></query>
                <topK>5</topK>
                <fieldFilter><language>ts</language></fieldFilter>
              </arguments>
            </tool_call>
          </tool_calls>
        </response>"#;
        let action = parse_response(xml).unwrap();
        match action {
            AgentAction::ToolCalls(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "semantic_search_Scope");
                assert_eq!(
                    calls[0].arguments["query"],
                    Value::String("```ts\\nexport const x = 1 < 2 && 3 > 2;\\n```".to_string())
                );
                assert_eq!(calls[0].arguments["topK"], Value::Number(5.into()));
                assert_eq!(calls[0].arguments["fieldFilter"]["language"], Value::String("ts".to_string()));
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn parses_array_of_items() {
        let xml = "<response><tool_calls><tool_call><tool_name>x</tool_name>\
                   <arguments><items><item>a</item><item>b</item></items></arguments>\
                   </tool_call></tool_calls></response>";
        let action = parse_response(xml).unwrap();
        match action {
            AgentAction::ToolCalls(calls) => {
                assert_eq!(calls[0].arguments["items"], Value::Array(vec![Value::String("a".into()), Value::String("b".into())]));
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn rejects_response_without_final_answer_or_tool_calls() {
        let xml = "<response></response>";
        assert!(parse_response(xml).is_err());
    }
}
