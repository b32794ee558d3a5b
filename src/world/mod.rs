//! 世界快照
//!
//! 由外部感知源整体替换，core 只读；每次读取拿到当时的最新快照（`Arc`），不做缓存。

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 绑定的游戏角色标识（客户端上报的 GUID）
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 视野内实体（字段名与游戏客户端一致）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Entity {
    #[serde(rename = "GUID")]
    pub guid: u64,
    #[serde(default)]
    pub prefab: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default, rename = "X", skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, rename = "Z", skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collectable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choppable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mineable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hammerable: Option<bool>,
}

/// 物品栏 / 装备栏 / 背包中的物品
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Item {
    #[serde(rename = "GUID")]
    pub guid: u64,
    #[serde(default)]
    pub prefab: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
}

/// 空槽位由客户端以 null 表示
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Possessions {
    #[serde(default)]
    pub item_slots: Vec<Option<Item>>,
    #[serde(default)]
    pub equip_slots: Vec<Option<Item>>,
    #[serde(default)]
    pub backpack: Vec<Option<Item>>,
}

/// 角色数值；客户端可能发字符串也可能发数字，原样保留
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoleStatus {
    #[serde(default)]
    pub health: Value,
    #[serde(default)]
    pub sanity: Value,
    #[serde(default)]
    pub hunger: Value,
    #[serde(default)]
    pub moisture: Value,
    #[serde(default)]
    pub temperature: Value,
}

/// 一次完整的感知快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Perception {
    #[serde(default)]
    pub vision: Vec<Entity>,
    #[serde(default)]
    pub possessions: Possessions,
    #[serde(default)]
    pub role_status: RoleStatus,
    #[serde(default)]
    pub pos_x: Option<f64>,
    #[serde(default)]
    pub pos_z: Option<f64>,
    /// 可前往的地点
    #[serde(default)]
    pub positions: Value,
    /// 世界状态（季节、昼夜等）
    #[serde(default)]
    pub world: Value,
}

/// 数值转展示文本：字符串去掉引号，null 显示为 unknown
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "unknown".to_string(),
        other => other.to_string(),
    }
}

impl Perception {
    /// `Your current status is: Health: …, Sanity: …` 形式的状态行
    pub fn status_line(&self) -> String {
        let s = &self.role_status;
        format!(
            "Your current status is: Health: {}, Sanity: {}, Hunger: {}, Moisture: {}, Temperature: {}",
            display_value(&s.health),
            display_value(&s.sanity),
            display_value(&s.hunger),
            display_value(&s.moisture),
            display_value(&s.temperature),
        )
    }

    pub fn position_text(&self) -> String {
        let fmt = |v: Option<f64>| v.map(|n| n.to_string()).unwrap_or_else(|| "unknown".into());
        format!("x: {}, z: {}", fmt(self.pos_x), fmt(self.pos_z))
    }
}

/// 世界快照持有者：整体替换，读取时克隆 Arc
#[derive(Debug, Default)]
pub struct WorldState {
    current: RwLock<Arc<Perception>>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, perception: Perception) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(perception);
    }

    /// 用客户端上报的原始 JSON 替换快照
    pub fn replace_json(&self, value: Value) -> Result<(), serde_json::Error> {
        let perception: Perception = serde_json::from_value(value)?;
        self.replace(perception);
        Ok(())
    }

    pub fn current(&self) -> Arc<Perception> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
