//! 动作文法：`Action(VERB, inv, x, z, recipe) = target`
//!
//! 解析为带固定字段集的 `Action`；缺省操作数统一用 `-`，下游无需处理可选字段。
//! 解析失败返回带类型的 `ActionParseError`，其文本会作为反馈交还模型。

use std::fmt;
use std::str::FromStr;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// 缺省操作数占位符
pub const NONE: &str = "-";

macro_rules! action_kinds {
    ($($variant:ident => $verb:literal),+ $(,)?) => {
        /// 动作动词（固定词表）
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ActionKind {
            $($variant),+
        }

        impl ActionKind {
            pub const ALL: &'static [ActionKind] = &[$(ActionKind::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ActionKind::$variant => $verb),+
                }
            }
        }

        impl FromStr for ActionKind {
            type Err = ActionParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($verb => Ok(ActionKind::$variant),)+
                    other => Err(ActionParseError::UnknownVerb(other.to_string())),
                }
            }
        }
    };
}

action_kinds! {
    Activate => "ACTIVATE",
    AddFuel => "ADDFUEL",
    Attack => "ATTACK",
    Bait => "BAIT",
    Build => "BUILD",
    CastSpell => "CASTSPELL",
    CheckTrap => "CHECKTRAP",
    Chop => "CHOP",
    CombineStack => "COMBINESTACK",
    Cook => "COOK",
    Deploy => "DEPLOY",
    Dig => "DIG",
    Drop => "DROP",
    Dry => "DRY",
    Eat => "EAT",
    Equip => "EQUIP",
    Explore => "EXPLORE",
    Extinguish => "EXTINGUISH",
    Feed => "FEED",
    FeedPlayer => "FEEDPLAYER",
    Fertilize => "FERTILIZE",
    Fill => "FILL",
    Fish => "FISH",
    Give => "GIVE",
    GiveAllToPlayer => "GIVEALLTOPLAYER",
    GiveToPlayer => "GIVETOPLAYER",
    Hammer => "HAMMER",
    Harvest => "HARVEST",
    Heal => "HEAL",
    JumpIn => "JUMPIN",
    Light => "LIGHT",
    LookAt => "LOOKAT",
    ManualExtinguish => "MANUALEXTINGUISH",
    Mine => "MINE",
    Mount => "MOUNT",
    Murder => "MURDER",
    Net => "NET",
    Pathfind => "PATHFIND",
    Pick => "PICK",
    Pickup => "PICKUP",
    Plant => "PLANT",
    Reel => "REEL",
    ResetMine => "RESETMINE",
    Rummage => "RUMMAGE",
    Saddle => "SADDLE",
    Sew => "SEW",
    Shave => "SHAVE",
    SleepIn => "SLEEPIN",
    Smother => "SMOTHER",
    Stop => "STOP",
    Store => "STORE",
    TakeItem => "TAKEITEM",
    Terraform => "TERRAFORM",
    TurnOff => "TURNOFF",
    TurnOn => "TURNON",
    Unequip => "UNEQUIP",
    Unsaddle => "UNSADDLE",
    Upgrade => "UPGRADE",
    WalkTo => "WALKTO",
}

impl ActionKind {
    /// 持续性采集动作：执行期间模型可以继续排队下一个动作
    pub fn is_long_running(&self) -> bool {
        matches!(self, ActionKind::Chop | ActionKind::Mine | ActionKind::Hammer)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ActionKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// 动作字符串解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionParseError {
    #[error("expected the action to start with `Action(`")]
    MissingPrefix,

    #[error("missing closing `)` in the action")]
    UnclosedParen,

    #[error("expected 5 arguments inside Action(...), found {0}")]
    WrongArity(usize),

    #[error("unknown action verb `{0}` (verbs are upper-case, e.g. CHOP, PICKUP)")]
    UnknownVerb(String),

    #[error("argument {0} is empty, use `-` when it is not needed")]
    EmptyArgument(usize),

    #[error("invobject must be a GUID or `-`, got `{0}`")]
    InvalidInvObject(String),

    #[error("coordinate must be a number or `-`, got `{0}`")]
    InvalidCoordinate(String),

    #[error("missing `= target` after Action(...)")]
    MissingTarget,

    #[error("target must be a GUID or `-`, got `{0}`")]
    InvalidTarget(String),
}

/// 发往游戏客户端的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub kind: ActionKind,
    pub inv_object: String,
    pub pos_x: String,
    pub pos_z: String,
    pub recipe: String,
    pub target: String,
    /// 原始动作字符串
    pub canonical_form: String,
    pub id: String,
}

// 字段名与游戏客户端约定一致；Name 与 WFN 都携带原始动作字符串
impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Action", 10)?;
        s.serialize_field("Type", "Action")?;
        s.serialize_field("Action", self.kind.as_str())?;
        s.serialize_field("InvObject", &self.inv_object)?;
        s.serialize_field("PosX", &self.pos_x)?;
        s.serialize_field("PosZ", &self.pos_z)?;
        s.serialize_field("Recipe", &self.recipe)?;
        s.serialize_field("Target", &self.target)?;
        s.serialize_field("Name", &self.canonical_form)?;
        s.serialize_field("WFN", &self.canonical_form)?;
        s.serialize_field("AUID", &self.id)?;
        s.end()
    }
}

impl Action {
    /// 解析动作字符串；成功时分配一个短 id
    pub fn parse(text: &str) -> Result<Self, ActionParseError> {
        let text = text.trim();
        let rest = text
            .strip_prefix("Action")
            .map(str::trim_start)
            .and_then(|r| r.strip_prefix('('))
            .ok_or(ActionParseError::MissingPrefix)?;
        let close = rest.find(')').ok_or(ActionParseError::UnclosedParen)?;
        let args: Vec<&str> = rest[..close].split(',').map(str::trim).collect();
        if args.len() != 5 {
            return Err(ActionParseError::WrongArity(args.len()));
        }
        if let Some(idx) = args.iter().position(|a| a.is_empty()) {
            return Err(ActionParseError::EmptyArgument(idx + 1));
        }

        let kind: ActionKind = args[0].parse()?;
        let inv_object = guid_or_none(args[1])
            .ok_or_else(|| ActionParseError::InvalidInvObject(args[1].to_string()))?;
        let pos_x = coordinate_or_none(args[2])?;
        let pos_z = coordinate_or_none(args[3])?;
        let recipe = args[4].to_string();

        let after_eq = rest[close + 1..]
            .trim_start()
            .strip_prefix('=')
            .map(str::trim_start)
            .ok_or(ActionParseError::MissingTarget)?;
        if after_eq.is_empty() {
            return Err(ActionParseError::MissingTarget);
        }
        // target 之后的内容（如同一 <do> 里的第二行动作）忽略
        let end = after_eq.find(char::is_whitespace).unwrap_or(after_eq.len());
        let target_part = &after_eq[..end];
        let target = guid_or_none(target_part)
            .ok_or_else(|| ActionParseError::InvalidTarget(target_part.to_string()))?;
        let consumed = text.len() - after_eq[end..].len();

        Ok(Self {
            kind,
            inv_object,
            pos_x,
            pos_z,
            recipe,
            target,
            canonical_form: text[..consumed].to_string(),
            id: short_id(),
        })
    }

    /// 无操作数的动作（EXPLORE / STOP 等系统动作）
    pub fn bare(kind: ActionKind) -> Self {
        let canonical_form = format!("Action({}, -, -, -, -) = -", kind.as_str());
        Self {
            kind,
            inv_object: NONE.to_string(),
            pos_x: NONE.to_string(),
            pos_z: NONE.to_string(),
            recipe: NONE.to_string(),
            target: NONE.to_string(),
            canonical_form,
            id: short_id(),
        }
    }

    /// 客户端 JSON
    pub fn wire_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn guid_or_none(s: &str) -> Option<String> {
    if s == NONE || (!s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())) {
        Some(s.to_string())
    } else {
        None
    }
}

fn coordinate_or_none(s: &str) -> Result<String, ActionParseError> {
    if s == NONE || s.parse::<f64>().is_ok() {
        Ok(s.to_string())
    } else {
        Err(ActionParseError::InvalidCoordinate(s.to_string()))
    }
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chop_with_target() {
        let action = Action::parse("Action(CHOP, -, -, -, -) = 12345").unwrap();
        assert_eq!(action.kind, ActionKind::Chop);
        assert_eq!(action.target, "12345");
        assert_eq!(action.inv_object, "-");
        assert_eq!(action.pos_x, "-");
        assert_eq!(action.recipe, "-");
        assert_eq!(action.canonical_form, "Action(CHOP, -, -, -, -) = 12345");
        assert_eq!(action.id.len(), 8);
    }

    #[test]
    fn test_parse_build_with_position_and_recipe() {
        let action = Action::parse("  Action(BUILD, -, 262.5, -100, homesign) = -  ").unwrap();
        assert_eq!(action.kind, ActionKind::Build);
        assert_eq!(action.pos_x, "262.5");
        assert_eq!(action.pos_z, "-100");
        assert_eq!(action.recipe, "homesign");
        assert_eq!(action.target, "-");
    }

    #[test]
    fn test_parse_errors_are_typed() {
        assert_eq!(
            Action::parse("CHOP the tree"),
            Err(ActionParseError::MissingPrefix)
        );
        assert_eq!(
            Action::parse("Action(CHOP, -, -, - = 1"),
            Err(ActionParseError::UnclosedParen)
        );
        assert_eq!(
            Action::parse("Action(CHOP, -, -) = 1"),
            Err(ActionParseError::WrongArity(3))
        );
        assert_eq!(
            Action::parse("Action(chop, -, -, -, -) = 1"),
            Err(ActionParseError::UnknownVerb("chop".to_string()))
        );
        assert_eq!(
            Action::parse("Action(EQUIP, axe, -, -, -) = -"),
            Err(ActionParseError::InvalidInvObject("axe".to_string()))
        );
        assert_eq!(
            Action::parse("Action(PATHFIND, -, north, 3, -) = -"),
            Err(ActionParseError::InvalidCoordinate("north".to_string()))
        );
        assert_eq!(
            Action::parse("Action(CHOP, -, -, -, -)"),
            Err(ActionParseError::MissingTarget)
        );
        assert_eq!(
            Action::parse("Action(CHOP, -, -, -, -) = tree"),
            Err(ActionParseError::InvalidTarget("tree".to_string()))
        );
        assert_eq!(
            Action::parse("Action(CHOP, , -, -, -) = 1"),
            Err(ActionParseError::EmptyArgument(2))
        );
    }

    #[test]
    fn test_trailing_text_after_target_is_ignored() {
        let action =
            Action::parse("Action(CHOP, -, -, -, -) = 12345\nAction(CHOP, -, -, -, -) = 678").unwrap();
        assert_eq!(action.target, "12345");
        assert_eq!(action.canonical_form, "Action(CHOP, -, -, -, -) = 12345");

        let action = Action::parse("Action(PICKUP, -, -, -, -) = -  then rest").unwrap();
        assert_eq!(action.target, "-");
        assert_eq!(action.canonical_form, "Action(PICKUP, -, -, -, -) = -");

        assert_eq!(
            Action::parse("Action(CHOP, -, -, -, -) = 12x45 more"),
            Err(ActionParseError::InvalidTarget("12x45".to_string()))
        );
    }

    #[test]
    fn test_every_verb_round_trips_through_from_str() {
        for kind in ActionKind::ALL {
            assert_eq!(kind.as_str().parse::<ActionKind>().unwrap(), *kind);
        }
    }

    #[test]
    fn test_wire_json_uses_client_field_names() {
        let action = Action::parse("Action(PICKUP, -, -, -, -) = 777").unwrap();
        let json = action.wire_json();
        assert_eq!(json["Type"], "Action");
        assert_eq!(json["Action"], "PICKUP");
        assert_eq!(json["Target"], "777");
        assert_eq!(json["WFN"], "Action(PICKUP, -, -, -, -) = 777");
        assert_eq!(json["Name"], json["WFN"]);
        assert_eq!(json["AUID"], action.id.as_str());
    }

    #[test]
    fn test_bare_action() {
        let stop = Action::bare(ActionKind::Stop);
        assert_eq!(stop.canonical_form, "Action(STOP, -, -, -, -) = -");
        assert_eq!(stop.target, "-");
        assert_ne!(stop.id, Action::bare(ActionKind::Stop).id);
    }
}
