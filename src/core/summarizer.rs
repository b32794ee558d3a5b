//! 历史摘要与初始规划
//!
//! 用角色状态、持有物、世界状态与对话记录拼出一次性请求，要求模型按三个固定段落汇报；
//! 按字面段落标题切分结果。任一段缺失或为空即视为不可用，调用方保留原历史。

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::{render_transcript, Message};
use crate::tools::render;
use crate::world::Perception;

pub const RECENT_ACTIONS: &str = "## Recent Actions";
pub const CURRENT_SITUATION: &str = "## Current Situation";
pub const NEXT_OBJECTIVES: &str = "## Next Objectives";

/// 摘要请求使用的采样温度
pub const SUMMARY_TEMPERATURE: f32 = 0.5;

/// 跳过 system 前言与第一条开场 user 消息
const TRANSCRIPT_SKIP: usize = 2;

const REPORTER_PROMPT: &str = "You keep the progress log of a Don't Starve Together character controlled by an agent. \
Write a concise report with exactly three sections, using these headers verbatim:\n\
## Recent Actions\n## Current Situation\n## Next Objectives\n\
Do not call any tools.";

/// 三段式状态报告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub recent_actions: String,
    pub current_situation: String,
    pub next_objectives: String,
}

impl StatusReport {
    /// 作为新历史中唯一 user 消息的内容
    pub fn to_prompt(&self, goal: Option<&str>) -> String {
        let mut text = String::new();
        if let Some(goal) = goal {
            text.push_str(&format!("Your standing goal: {}\n\n", goal));
        }
        text.push_str("Here is a report of your progress so far.\n\n");
        text.push_str(&format!(
            "{}\n{}\n\n{}\n{}\n\n{}\n{}\n\n",
            RECENT_ACTIONS,
            self.recent_actions,
            CURRENT_SITUATION,
            self.current_situation,
            NEXT_OBJECTIVES,
            self.next_objectives
        ));
        text.push_str("Continue working towards the next objectives.");
        text
    }
}

/// 组装摘要请求；`goal` 存在时为初始规划
pub fn build_request(world: &Perception, history: &[Message], goal: Option<&str>) -> Vec<Message> {
    let mut body = String::new();
    body.push_str(&world.status_line());
    body.push_str("\n\n");
    body.push_str(&render::inventory(world));
    body.push_str(&format!("\n\nWorld status: {}\n", world.world));
    if let Some(goal) = goal {
        body.push_str(&format!(
            "\nThe player gave you this goal: {}\nPlan how to reach it; list the first steps under {}.\n",
            goal, NEXT_OBJECTIVES
        ));
    }
    let transcript = render_transcript(history, TRANSCRIPT_SKIP);
    if !transcript.is_empty() {
        body.push_str("\nConversation so far:\n\n");
        body.push_str(&transcript);
    }
    vec![Message::system(REPORTER_PROMPT), Message::user(body)]
}

/// 按段落标题切分报告
pub fn parse_report(text: &str) -> Result<StatusReport, AgentError> {
    if text.trim().is_empty() {
        return Err(AgentError::SummaryUnusable("empty summary".into()));
    }
    let headers = [RECENT_ACTIONS, CURRENT_SITUATION, NEXT_OBJECTIVES];
    let mut found: Vec<(usize, &str)> = Vec::with_capacity(headers.len());
    for header in headers {
        let pos = text
            .find(header)
            .ok_or_else(|| AgentError::SummaryUnusable(format!("missing section `{}`", header)))?;
        found.push((pos, header));
    }
    found.sort_by_key(|(pos, _)| *pos);

    let section = |header: &str| -> Result<String, AgentError> {
        let idx = found.iter().position(|(_, h)| *h == header).unwrap_or(0);
        let start = found[idx].0 + header.len();
        let end = found.get(idx + 1).map(|(p, _)| *p).unwrap_or(text.len());
        let body = text[start..end].trim();
        if body.is_empty() {
            Err(AgentError::SummaryUnusable(format!("section `{}` is empty", header)))
        } else {
            Ok(body.to_string())
        }
    };

    Ok(StatusReport {
        recent_actions: section(RECENT_ACTIONS)?,
        current_situation: section(CURRENT_SITUATION)?,
        next_objectives: section(NEXT_OBJECTIVES)?,
    })
}

/// 发起一次非流式请求并解析报告
pub async fn summarize(
    llm: &dyn LlmClient,
    world: &Perception,
    history: &[Message],
    goal: Option<&str>,
) -> Result<StatusReport, AgentError> {
    let request = build_request(world, history, goal);
    let reply = llm.complete(&request, SUMMARY_TEMPERATURE).await?;
    parse_report(&reply)
}
