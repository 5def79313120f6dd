use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// 允许的最大行数，超出视为越界
pub const MAX_ROWS: u32 = 1 << 20;

/// 网格坐标，单位为格
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Position {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.w)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.h)
    }

    pub fn overlaps(&self, other: &Position) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// 宽高至少为1，且完整落在`columns`列、[`MAX_ROWS`]行之内
    pub fn fits_within(&self, columns: u32) -> bool {
        self.w >= 1
            && self.h >= 1
            && self.x < columns
            && self.x.checked_add(self.w).map_or(false, |r| r <= columns)
            && self.y.checked_add(self.h).map_or(false, |b| b <= MAX_ROWS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub can_edit: bool,
    pub can_delete: bool,
    pub can_share: bool,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            can_edit: true,
            can_delete: true,
            can_share: false,
        }
    }
}

/// 看板组件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    /// 会话内唯一且稳定
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub position: Position,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub permissions: Permissions,
}

/// 新增组件的参数，位置由引擎分配
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetDraft {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub permissions: Permissions,
}

impl WidgetDraft {
    pub fn new(kind: impl Into<String>, title: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            kind: kind.into(),
            title: title.into(),
            width,
            height,
            config: Value::Null,
            permissions: Permissions::default(),
        }
    }
}

/// 组件的非位置字段修改
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub permissions: Option<Permissions>,
}

/// 某个断点下一个组件的摆放
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub widget_id: String,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Placement {
    pub fn new(widget_id: impl Into<String>, position: Position) -> Self {
        Self {
            widget_id: widget_id.into(),
            x: position.x,
            y: position.y,
            w: position.w,
            h: position.h,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y, self.w, self.h)
    }
}

/// 响应式断点，从宽到窄
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Breakpoint {
    Lg,
    Md,
    Sm,
    Xs,
    Xxs,
}

impl Breakpoint {
    pub const ALL: [Breakpoint; 5] = [
        Breakpoint::Lg,
        Breakpoint::Md,
        Breakpoint::Sm,
        Breakpoint::Xs,
        Breakpoint::Xxs,
    ];

    /// 该断点的列数，不超过配置的网格列数
    pub fn columns(&self, configured: u32) -> u32 {
        let configured = configured.max(1);
        match self {
            Breakpoint::Lg => configured,
            Breakpoint::Md => configured.min(10),
            Breakpoint::Sm => configured.min(6),
            Breakpoint::Xs => configured.min(4),
            Breakpoint::Xxs => configured.min(2),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Breakpoint::Lg => "lg",
            Breakpoint::Md => "md",
            Breakpoint::Sm => "sm",
            Breakpoint::Xs => "xs",
            Breakpoint::Xxs => "xxs",
        }
    }
}

impl fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Breakpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|bp| bp.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("未知断点: {}", s))
    }
}

/// 断点 -> 摆放列表
pub type GridLayout = BTreeMap<Breakpoint, Vec<Placement>>;

/// 引擎持有的完整布局状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutState {
    pub widgets: Vec<Widget>,
    pub layout: GridLayout,
}

impl LayoutState {
    pub fn widget(&self, id: &str) -> Option<&Widget> {
        self.widgets.iter().find(|w| w.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.widget(id).is_some()
    }

    pub fn placements(&self, breakpoint: Breakpoint) -> &[Placement] {
        self.layout
            .get(&breakpoint)
            .map(|list| list.as_slice())
            .unwrap_or(&[])
    }
}
