//! 类型化工具调用
//!
//! 由 `ContentBlock::ToolUse` 构造并校验参数；缺少必填参数时得到 `Invalid`，
//! 由分发器转成说明文本交还模型。未知工具名返回 None。

use crate::react::ContentBlock;

/// 一次经过校验的工具调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    CheckInventory { item_name: Option<String> },
    CheckEquipslots,
    CheckSurroundings,
    CheckStatus,
    CheckMap { name: Option<String> },
    MarkLoc {
        name: String,
        coords: String,
        info: Option<String>,
    },
    CheckSelfGuid,
    CheckRecipe { recipe: Option<String> },
    Do { action: String },
    Explore { entities: Vec<String> },
    StopExplore,
    StopPathfind,
    TaskCompletion { result: String },
    /// 赶路途中无事可做的占位
    Wait,
    /// 缺少必填参数
    Invalid { tool: &'static str, reason: String },
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty()).map(String::from)
}

impl ToolCall {
    /// 从工具块构造；文本块与未知工具名返回 None
    pub fn from_block(block: &ContentBlock) -> Option<Self> {
        let ContentBlock::ToolUse { name, params, body } = block else {
            return None;
        };
        let param = |key: &str| non_empty(params.get(key));

        let call = match name.as_str() {
            "check_inventory" => ToolCall::CheckInventory {
                item_name: param("item_name"),
            },
            "check_equipslots" => ToolCall::CheckEquipslots,
            "check_surroundings" => ToolCall::CheckSurroundings,
            "check_status" => ToolCall::CheckStatus,
            "check_map" => ToolCall::CheckMap {
                name: param("name"),
            },
            "mark_loc" => match (param("name"), param("coords")) {
                (Some(name), Some(coords)) => ToolCall::MarkLoc {
                    name,
                    coords,
                    info: param("info"),
                },
                _ => ToolCall::Invalid {
                    tool: "mark_loc",
                    reason: "You must specify both 'name' and 'coords' to mark a location.".into(),
                },
            },
            "check_self_GUID" => ToolCall::CheckSelfGuid,
            "check_recipe" => ToolCall::CheckRecipe {
                recipe: param("recipe"),
            },
            // 动作可以写在 <action> 参数里，也可以直接写在 <do> 标签内
            "do" => ToolCall::Do {
                action: param("action").unwrap_or_else(|| body.trim().to_string()),
            },
            "explore" => {
                let entities: Vec<String> = param("entities")
                    .or_else(|| param("search"))
                    .map(|s| {
                        s.split(',')
                            .map(str::trim)
                            .filter(|n| !n.is_empty())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();
                if entities.is_empty() {
                    ToolCall::Invalid {
                        tool: "explore",
                        reason: "Observer Error: You must specify the 'entities' to look for items."
                            .into(),
                    }
                } else {
                    ToolCall::Explore { entities }
                }
            }
            "stop_explore" => ToolCall::StopExplore,
            "stop_pathfind" => ToolCall::StopPathfind,
            "task_completion" => ToolCall::TaskCompletion {
                result: params.get("result").cloned().unwrap_or_default(),
            },
            "wait" => ToolCall::Wait,
            _ => return None,
        };
        Some(call)
    }

    /// 工具名（与标签名一致）
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::CheckInventory { .. } => "check_inventory",
            ToolCall::CheckEquipslots => "check_equipslots",
            ToolCall::CheckSurroundings => "check_surroundings",
            ToolCall::CheckStatus => "check_status",
            ToolCall::CheckMap { .. } => "check_map",
            ToolCall::MarkLoc { .. } => "mark_loc",
            ToolCall::CheckSelfGuid => "check_self_GUID",
            ToolCall::CheckRecipe { .. } => "check_recipe",
            ToolCall::Do { .. } => "do",
            ToolCall::Explore { .. } => "explore",
            ToolCall::StopExplore => "stop_explore",
            ToolCall::StopPathfind => "stop_pathfind",
            ToolCall::TaskCompletion { .. } => "task_completion",
            ToolCall::Wait => "wait",
            ToolCall::Invalid { tool, .. } => tool,
        }
    }
}
