//! 助手消息解析：XML 风格标签 -> ContentBlock 列表
//!
//! 文法：`<name>…</name>`，name 为 `[A-Za-z0-9_]+`，与之后第一个同名闭合标签配对。
//! 白名单内的标签是工具调用，其内部 `<param>value</param>` 为参数；其余标签与普通文本一样原样保留。
//! 无外部状态，可对同一缓冲的更长前缀反复调用（流式场景下首个工具调用闭合即可提前停止）。

use std::collections::BTreeMap;

/// 可识别为工具调用的标签名
pub const TOOL_ALLOW_LIST: &[&str] = &[
    "check_inventory",
    "check_equipslots",
    "check_surroundings",
    "check_status",
    "check_map",
    "mark_loc",
    "check_self_GUID",
    "check_recipe",
    "do",
    "explore",
    "stop_explore",
    "stop_pathfind",
    "task_completion",
    "wait",
];

/// 解析出的内容块
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBlock {
    /// 普通文本（已 trim，非空）
    Text { content: String },
    /// 工具调用；body 为标签内原始文本（trim 后），供 `do` 直接书写动作时使用
    ToolUse {
        name: String,
        params: BTreeMap<String, String>,
        body: String,
    },
}

impl ContentBlock {
    pub fn is_tool_use(&self) -> bool {
        matches!(self, ContentBlock::ToolUse { .. })
    }
}

/// 一次解析的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMessage {
    pub blocks: Vec<ContentBlock>,
    pub has_tool_use: bool,
}

impl ParsedMessage {
    /// 第一个工具调用块
    pub fn first_tool_use(&self) -> Option<&ContentBlock> {
        self.blocks.iter().find(|b| b.is_tool_use())
    }
}

/// 一个配对成功的标签：整体区间与内部区间（字节下标）
struct TagMatch<'a> {
    name: &'a str,
    start: usize,
    end: usize,
    inner_start: usize,
    inner_end: usize,
}

/// 从 `from` 开始寻找下一个配对标签；与 `<(\w+)>(.*?)</\1>` 的逐位置匹配语义一致
fn next_tag(text: &str, from: usize) -> Option<TagMatch<'_>> {
    let bytes = text.as_bytes();
    let mut pos = from;
    while let Some(offset) = text[pos..].find('<') {
        let start = pos + offset;
        let name_start = start + 1;
        let name_len = bytes[name_start..]
            .iter()
            .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
            .count();
        let name_end = name_start + name_len;
        if name_len > 0 && bytes.get(name_end) == Some(&b'>') {
            let name = &text[name_start..name_end];
            let inner_start = name_end + 1;
            let close = format!("</{}>", name);
            if let Some(close_offset) = text[inner_start..].find(&close) {
                let inner_end = inner_start + close_offset;
                return Some(TagMatch {
                    name,
                    start,
                    end: inner_end + close.len(),
                    inner_start,
                    inner_end,
                });
            }
        }
        pos = start + 1;
    }
    None
}

fn push_text(blocks: &mut Vec<ContentBlock>, slice: &str) {
    let content = slice.trim();
    if !content.is_empty() {
        blocks.push(ContentBlock::Text {
            content: content.to_string(),
        });
    }
}

/// 提取工具标签内部的参数；同名参数后者覆盖前者
fn parse_params(inner: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    let mut pos = 0;
    while let Some(m) = next_tag(inner, pos) {
        params.insert(
            m.name.to_string(),
            inner[m.inner_start..m.inner_end].trim().to_string(),
        );
        pos = m.end;
    }
    params
}

/// 解析助手消息；畸形输入最坏情况下整体作为一个 Text 块，不会失败
pub fn parse_assistant_message(message: &str) -> ParsedMessage {
    let mut blocks = Vec::new();
    let mut last = 0;

    while let Some(m) = next_tag(message, last) {
        push_text(&mut blocks, &message[last..m.start]);
        if TOOL_ALLOW_LIST.contains(&m.name) {
            let inner = &message[m.inner_start..m.inner_end];
            blocks.push(ContentBlock::ToolUse {
                name: m.name.to_string(),
                params: parse_params(inner),
                body: inner.trim().to_string(),
            });
        } else {
            push_text(&mut blocks, &message[m.start..m.end]);
        }
        last = m.end;
    }
    push_text(&mut blocks, &message[last..]);

    let has_tool_use = blocks.iter().any(ContentBlock::is_tool_use);
    ParsedMessage {
        blocks,
        has_tool_use,
    }
}
