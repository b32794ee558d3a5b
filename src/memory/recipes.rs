//! 配方表（只读）
//!
//! 启动时加载一次；内部名、产物名、英文与中文显示名都指向同一份原料列表。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::memory::StoreError;

#[derive(Debug, Deserialize)]
struct RecipeRecord {
    name: String,
    #[serde(default)]
    product: Option<String>,
    #[serde(default)]
    display_name_en: Option<String>,
    #[serde(default)]
    display_name_zh: Option<String>,
    #[serde(default)]
    ingredients: Vec<Value>,
}

/// 名称（含别名）-> 原料列表
#[derive(Debug, Default, Clone)]
pub struct RecipeBook {
    by_alias: HashMap<String, Arc<Vec<Value>>>,
}

impl RecipeBook {
    /// 从 JSON 数组文件加载；文件不存在时返回空表并记录警告
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Recipe file missing, check_recipe will find nothing");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let book = Self::from_json(&data)?;
        tracing::info!(path = %path.display(), aliases = book.by_alias.len(), "Recipe table loaded");
        Ok(book)
    }

    pub fn from_json(data: &str) -> Result<Self, StoreError> {
        let records: Vec<RecipeRecord> = serde_json::from_str(data)?;
        let mut by_alias = HashMap::new();
        for record in records {
            let ingredients = Arc::new(record.ingredients);
            let aliases = std::iter::once(record.name)
                .chain(record.product)
                .chain(record.display_name_en)
                .chain(record.display_name_zh);
            for alias in aliases {
                if !alias.is_empty() {
                    by_alias.insert(alias, ingredients.clone());
                }
            }
        }
        Ok(Self { by_alias })
    }

    pub fn ingredients(&self, name: &str) -> Option<&[Value]> {
        self.by_alias.get(name).map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.by_alias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_alias.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {
            "name": "axe",
            "product": "axe",
            "display_name_en": "Axe",
            "display_name_zh": "斧头",
            "ingredients": [
                {"type": "twigs", "amount": 1},
                {"type": "flint", "amount": 1}
            ]
        },
        {
            "name": "torch",
            "product": "torch",
            "display_name_en": "Torch",
            "ingredients": [{"type": "cutgrass", "amount": 2}, {"type": "twigs", "amount": 2}]
        }
    ]"#;

    #[test]
    fn test_all_aliases_resolve_to_same_list() {
        let book = RecipeBook::from_json(SAMPLE).unwrap();
        let by_name = book.ingredients("axe").unwrap();
        assert_eq!(by_name.len(), 2);
        assert_eq!(book.ingredients("Axe").unwrap(), by_name);
        assert_eq!(book.ingredients("斧头").unwrap(), by_name);
        assert!(book.ingredients("Torch").is_some());
        assert!(book.ingredients("pickaxe").is_none());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let book = RecipeBook::load(dir.path().join("nope.json")).unwrap();
        assert!(book.is_empty());
    }
}
