//! 世界快照 -> 反馈文本
//!
//! 只输出精选字段，键按字母序排列，避免把整份感知数据塞给模型。

use std::collections::BTreeMap;

use serde_json::Value;

use crate::world::{Item, Perception};

fn compact_item(item: &Option<Item>, with_quantity: bool) -> Value {
    let mut fields = BTreeMap::new();
    if let Some(item) = item {
        fields.insert("GUID", Value::from(item.guid));
        fields.insert("Prefab", Value::from(item.prefab.clone()));
        if with_quantity {
            if let Some(q) = item.quantity {
                fields.insert("Quantity", Value::from(q));
            }
        }
    }
    serde_json::to_value(fields).unwrap_or(Value::Null)
}

fn slots_json(slots: &[Option<Item>], with_quantity: bool) -> String {
    Value::Array(slots.iter().map(|i| compact_item(i, with_quantity)).collect()).to_string()
}

/// 完整物品清单：物品栏、装备、背包，末尾附状态行
pub fn inventory(p: &Perception) -> String {
    let pos = &p.possessions;
    format!(
        "Your current inventory has the following items:\n{}\nAnd you are equipped with:\n{}\nAnd your backpack has:\n{}\n{}",
        slots_json(&pos.item_slots, true),
        slots_json(&pos.equip_slots, true),
        slots_json(&pos.backpack, true),
        p.status_line()
    )
}

fn count(slots: &[Option<Item>], name: &str) -> u32 {
    slots
        .iter()
        .flatten()
        .filter(|i| i.prefab == name)
        .map(|i| i.quantity.unwrap_or(0))
        .sum()
}

/// 指定物品在各处的数量；数量为 0 的位置不出现
pub fn item_counts(p: &Perception, name: &str) -> String {
    let pos = &p.possessions;
    let mut text = String::new();
    for (slots, place) in [
        (&pos.item_slots, "ItemSlots"),
        (&pos.equip_slots, "EquipSlots"),
        (&pos.backpack, "Backpack"),
    ] {
        let n = count(slots, name);
        if n > 0 {
            text.push_str(&format!("Your have {} {} in your {}.\n", n, name, place));
        }
    }
    text.push_str(&p.status_line());
    text
}

pub fn equipment(p: &Perception) -> String {
    format!(
        "You are equipped with:\n{}",
        slots_json(&p.possessions.equip_slots, false)
    )
}

/// 视野内实体，只保留 GUID / 可交互标记 / 数量 / 名称 / 坐标
pub fn surroundings(p: &Perception) -> String {
    let entities: Vec<Value> = p
        .vision
        .iter()
        .map(|e| {
            let mut fields: BTreeMap<&str, Value> = BTreeMap::new();
            fields.insert("GUID", Value::from(e.guid));
            fields.insert("Prefab", Value::from(e.prefab.clone()));
            let optional = [
                ("Hammerable", e.hammerable.map(Value::from)),
                ("Mineable", e.mineable.map(Value::from)),
                ("Choppable", e.choppable.map(Value::from)),
                ("Collectable", e.collectable.map(Value::from)),
                ("Quantity", e.quantity.map(Value::from)),
                ("X", e.x.map(Value::from)),
                ("Z", e.z.map(Value::from)),
            ];
            for (key, value) in optional {
                if let Some(v) = value {
                    fields.insert(key, v);
                }
            }
            serde_json::to_value(fields).unwrap_or(Value::Null)
        })
        .collect();
    format!(
        "There are the following entities near you:\n{}",
        Value::Array(entities)
    )
}

/// 可前往的地点（命令开场白用）
pub fn positions(p: &Perception) -> String {
    format!("The positions that you can go to: {}", p.positions)
}
