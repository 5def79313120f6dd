/// 布局协调引擎
/// 持有组件集合与各断点网格，合并外部配置与用户编辑，并在弹层期间保护状态
use chrono::Utc;
use std::collections::{BTreeSet, HashSet};

use super::grid;
use super::model::{
    Breakpoint, GridLayout, LayoutState, Placement, Position, Widget, WidgetDraft, WidgetPatch,
};
use crate::core::config::LayoutConfig;
use crate::core::error::{DashboardError, Result};

/// end_overlay 的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayOutcome {
    /// 状态与快照一致
    Clean,
    /// 检测到未经许可的修改，已回滚到快照
    RolledBack,
    /// 内层弹层关闭，外层仍打开
    Nested,
    /// 没有匹配的 begin_overlay
    Unmatched,
}

pub struct LayoutEngine {
    columns: u32,
    state: LayoutState,
    initialized: bool,
    overlay_depth: u32,
    snapshot: Option<LayoutState>,
    next_seq: u64,
}

impl LayoutEngine {
    pub fn new(columns: u32) -> Self {
        let columns = columns.max(1);
        let layout: GridLayout = Breakpoint::ALL.iter().map(|bp| (*bp, Vec::new())).collect();
        Self {
            columns,
            state: LayoutState {
                widgets: Vec::new(),
                layout,
            },
            initialized: false,
            overlay_depth: 0,
            snapshot: None,
            next_seq: 0,
        }
    }

    pub fn from_config(config: &LayoutConfig) -> Self {
        Self::new(config.columns)
    }

    // ============= 只读访问 =============

    pub fn columns(&self) -> u32 {
        self.columns
    }

    pub fn widgets(&self) -> Vec<Widget> {
        self.state.widgets.clone()
    }

    pub fn layout(&self) -> GridLayout {
        self.state.layout.clone()
    }

    pub fn widget(&self, id: &str) -> Option<Widget> {
        self.state.widget(id).cloned()
    }

    pub fn state(&self) -> LayoutState {
        self.state.clone()
    }

    pub fn is_overlay_open(&self) -> bool {
        self.overlay_depth > 0
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    // ============= 外部配置合并 =============

    /// 合并外部下发的组件列表
    ///
    /// 首次配置或组件集合变化时重算网格，返回true；集合不变时只采纳非位置字段，
    /// 保留用户当前的位置，返回false。
    pub fn apply_external_config(&mut self, widgets: Vec<Widget>) -> bool {
        let mut seen = HashSet::new();
        let mut incoming = Vec::with_capacity(widgets.len());
        for widget in widgets {
            if seen.insert(widget.id.clone()) {
                incoming.push(widget);
            } else {
                log::warn!("⚠️ 外部配置中组件ID重复，忽略后出现的条目: {}", widget.id);
            }
        }

        let incoming_ids: BTreeSet<&str> = incoming.iter().map(|w| w.id.as_str()).collect();
        let current_ids: BTreeSet<&str> =
            self.state.widgets.iter().map(|w| w.id.as_str()).collect();

        if self.initialized && incoming_ids == current_ids {
            for external in incoming {
                if let Some(widget) = self.state.widgets.iter_mut().find(|w| w.id == external.id)
                {
                    widget.kind = external.kind;
                    widget.title = external.title;
                    widget.config = external.config;
                    widget.permissions = external.permissions;
                }
            }
            log::debug!("外部配置组件集合未变，保留当前位置");
            self.refresh_baseline();
            self.debug_check();
            return false;
        }

        let requested: Vec<Placement> = incoming
            .iter()
            .map(|w| Placement::new(w.id.clone(), w.position))
            .collect();
        let lg = grid::normalize(&requested, self.columns);

        let mut widgets = incoming;
        for (widget, placement) in widgets.iter_mut().zip(&lg) {
            widget.position = placement.position();
        }

        self.state.widgets = widgets;
        self.rebuild_layout(lg);
        self.initialized = true;

        log::info!(
            "📐 已根据外部配置重算布局: {} 个组件",
            self.state.widgets.len()
        );
        self.refresh_baseline();
        self.debug_check();
        true
    }

    // ============= 用户编辑 =============

    /// 用户拖拽/缩放结束后的布局变更
    ///
    /// 弹层打开期间忽略并返回None。只有`lg`断点会更新组件位置。
    pub fn on_layout_change(
        &mut self,
        breakpoint: Breakpoint,
        placements: &[Placement],
    ) -> Option<Vec<Widget>> {
        if self.is_overlay_open() {
            log::debug!("弹层打开中，忽略 {} 断点的布局变更", breakpoint);
            return None;
        }

        let mut merged: Vec<Placement> = Vec::with_capacity(self.state.widgets.len());
        let mut seen = HashSet::new();
        for placement in placements {
            if !self.state.contains(&placement.widget_id) {
                log::debug!("布局变更引用了未知组件: {}", placement.widget_id);
                continue;
            }
            if seen.insert(placement.widget_id.clone()) {
                merged.push(placement.clone());
            }
        }
        // 未出现在变更里的组件保持原位
        for existing in self.state.placements(breakpoint) {
            if !seen.contains(&existing.widget_id) {
                merged.push(existing.clone());
            }
        }

        let normalized = grid::normalize(&merged, breakpoint.columns(self.columns));

        if breakpoint == Breakpoint::Lg {
            for placement in &normalized {
                if let Some(widget) = self
                    .state
                    .widgets
                    .iter_mut()
                    .find(|w| w.id == placement.widget_id)
                {
                    widget.position = placement.position();
                }
            }
        }
        self.state.layout.insert(breakpoint, normalized);

        self.debug_check();
        Some(self.widgets())
    }

    /// 首次适配查找可放置`w`x`h`的位置
    pub fn next_free_position(&self, w: u32, h: u32) -> Position {
        let occupied: Vec<Position> = self
            .state
            .placements(Breakpoint::Lg)
            .iter()
            .map(|p| p.position())
            .collect();
        grid::find_free_position(&occupied, self.columns, w, h)
    }

    /// 新增组件，在每个断点上首次适配放置
    pub fn add_widget(&mut self, draft: WidgetDraft) -> Widget {
        let id = self.allocate_id();
        let position = self.next_free_position(draft.width, draft.height);

        let widget = Widget {
            id: id.clone(),
            kind: draft.kind,
            title: draft.title,
            position,
            config: draft.config,
            permissions: draft.permissions,
        };
        self.state.widgets.push(widget.clone());

        for breakpoint in Breakpoint::ALL {
            let placement = if breakpoint == Breakpoint::Lg {
                Placement::new(id.clone(), position)
            } else {
                let occupied: Vec<Position> = self
                    .state
                    .placements(breakpoint)
                    .iter()
                    .map(|p| p.position())
                    .collect();
                let found = grid::find_free_position(
                    &occupied,
                    breakpoint.columns(self.columns),
                    position.w,
                    position.h,
                );
                Placement::new(id.clone(), found)
            };
            self.state
                .layout
                .entry(breakpoint)
                .or_insert_with(Vec::new)
                .push(placement);
        }

        self.initialized = true;
        log::info!(
            "➕ 新增组件 {} ({}) 于 ({}, {}) {}x{}",
            widget.id,
            widget.kind,
            position.x,
            position.y,
            position.w,
            position.h
        );
        self.refresh_baseline();
        self.debug_check();
        widget
    }

    /// 修改组件的标题、配置或权限
    pub fn update_widget(&mut self, id: &str, patch: WidgetPatch) -> Result<Widget> {
        let widget = self
            .state
            .widgets
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| DashboardError::LayoutError(format!("组件不存在: {}", id)))?;

        if let Some(title) = patch.title {
            widget.title = title;
        }
        if let Some(config) = patch.config {
            widget.config = config;
        }
        if let Some(permissions) = patch.permissions {
            widget.permissions = permissions;
        }
        let updated = widget.clone();

        log::debug!("更新组件: {}", id);
        self.refresh_baseline();
        Ok(updated)
    }

    /// 删除组件及其在各断点的摆放
    pub fn remove_widget(&mut self, id: &str) -> Result<Widget> {
        let index = self
            .state
            .widgets
            .iter()
            .position(|w| w.id == id)
            .ok_or_else(|| DashboardError::LayoutError(format!("组件不存在: {}", id)))?;

        let removed = self.state.widgets.remove(index);
        for placements in self.state.layout.values_mut() {
            placements.retain(|p| p.widget_id != id);
        }

        log::info!("➖ 删除组件: {}", id);
        self.refresh_baseline();
        self.debug_check();
        Ok(removed)
    }

    // ============= 弹层保护 =============

    /// 打开弹层，最外层打开时保存快照
    pub fn begin_overlay(&mut self) {
        if self.overlay_depth == 0 {
            self.snapshot = Some(self.state.clone());
        }
        self.overlay_depth += 1;
        log::debug!("弹层打开，深度 {}", self.overlay_depth);
    }

    /// 关闭弹层，最外层关闭时校验状态，发现未经许可的修改则回滚
    pub fn end_overlay(&mut self) -> OverlayOutcome {
        if self.overlay_depth == 0 {
            log::warn!("⚠️ end_overlay 没有匹配的 begin_overlay，忽略");
            return OverlayOutcome::Unmatched;
        }

        self.overlay_depth -= 1;
        if self.overlay_depth > 0 {
            return OverlayOutcome::Nested;
        }

        match self.snapshot.take() {
            Some(snapshot) if snapshot != self.state => {
                log::warn!("⚠️ 弹层期间布局状态被意外修改，已回滚到弹层打开前的快照");
                self.state = snapshot;
                self.debug_check();
                OverlayOutcome::RolledBack
            }
            _ => OverlayOutcome::Clean,
        }
    }

    // ============= 不变量 =============

    /// 校验：每个组件在每个断点恰有一个摆放，同一断点内互不重叠且不越界
    pub fn check_invariants(&self) -> Result<()> {
        let ids: BTreeSet<&str> = self.state.widgets.iter().map(|w| w.id.as_str()).collect();
        if ids.len() != self.state.widgets.len() {
            return Err(DashboardError::LayoutError("组件ID重复".to_string()));
        }

        for breakpoint in Breakpoint::ALL {
            let placements = self.state.placements(breakpoint);
            let placed: BTreeSet<&str> = placements.iter().map(|p| p.widget_id.as_str()).collect();
            if placed != ids || placements.len() != ids.len() {
                return Err(DashboardError::LayoutError(format!(
                    "{} 断点的摆放与组件集合不一致",
                    breakpoint
                )));
            }

            let columns = breakpoint.columns(self.columns);
            if let Some(p) = placements.iter().find(|p| !p.position().fits_within(columns)) {
                return Err(DashboardError::LayoutError(format!(
                    "{} 断点组件 {} 超出 {} 列",
                    breakpoint, p.widget_id, columns
                )));
            }
            if grid::has_overlap(placements) {
                return Err(DashboardError::LayoutError(format!(
                    "{} 断点存在重叠的组件",
                    breakpoint
                )));
            }
        }
        Ok(())
    }

    fn debug_check(&self) {
        debug_assert!(
            self.check_invariants().is_ok(),
            "布局不变量被破坏: {:?}",
            self.check_invariants()
        );
    }

    /// 测试用：直接修改内部状态，模拟绕过API的修改
    #[cfg(test)]
    pub fn raw_state_mut(&mut self) -> &mut LayoutState {
        &mut self.state
    }

    // ============= 内部 =============

    /// 弹层期间经API的修改计入快照
    fn refresh_baseline(&mut self) {
        if self.overlay_depth > 0 {
            self.snapshot = Some(self.state.clone());
        }
    }

    /// 以lg摆放为准重建全部断点
    fn rebuild_layout(&mut self, lg: Vec<Placement>) {
        let mut layout = GridLayout::new();
        for breakpoint in Breakpoint::ALL {
            if breakpoint == Breakpoint::Lg {
                continue;
            }
            layout.insert(breakpoint, grid::pack(&lg, breakpoint.columns(self.columns)));
        }
        layout.insert(Breakpoint::Lg, lg);
        self.state.layout = layout;
    }

    fn allocate_id(&mut self) -> String {
        loop {
            self.next_seq += 1;
            let id = format!("widget-{}-{}", Utc::now().timestamp_millis(), self.next_seq);
            if !self.state.contains(&id) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn widget(id: &str, x: u32, y: u32, w: u32, h: u32) -> Widget {
        Widget {
            id: id.to_string(),
            kind: "price_chart".to_string(),
            title: format!("Widget {}", id),
            position: Position::new(x, y, w, h),
            config: json!({}),
            permissions: Default::default(),
        }
    }

    #[test]
    fn test_three_width_four_widgets_fill_first_row() {
        let mut engine = LayoutEngine::new(12);
        let xs: Vec<(u32, u32)> = (0..3)
            .map(|i| {
                let w = engine.add_widget(WidgetDraft::new("kpi", format!("KPI {}", i), 4, 2));
                (w.position.x, w.position.y)
            })
            .collect();
        assert_eq!(xs, vec![(0, 0), (4, 0), (8, 0)]);
        assert!(engine.check_invariants().is_ok());
    }

    #[test]
    fn test_add_widget_never_overlaps() {
        let mut engine = LayoutEngine::new(12);
        let sizes = [(5, 2), (7, 3), (3, 1), (12, 2), (1, 4), (6, 6), (20, 1), (0, 0), (4, 4)];
        let mut ids = HashSet::new();
        for (w, h) in sizes {
            let widget = engine.add_widget(WidgetDraft::new("kpi", "x", w, h));
            assert!(ids.insert(widget.id.clone()));
            assert!(widget.position.right() <= 12);
        }
        let layout = engine.layout();
        for breakpoint in Breakpoint::ALL {
            let placements = &layout[&breakpoint];
            assert_eq!(placements.len(), sizes.len());
            assert!(!grid::has_overlap(placements));
            let columns = breakpoint.columns(12);
            assert!(placements.iter().all(|p| p.x + p.w <= columns));
        }
    }

    #[test]
    fn test_first_external_config_builds_every_breakpoint() {
        let mut engine = LayoutEngine::new(12);
        let recomputed = engine.apply_external_config(vec![
            widget("a", 0, 0, 6, 2),
            widget("b", 6, 0, 6, 2),
            widget("c", 2, 1, 4, 2),
        ]);
        assert!(recomputed);
        assert!(engine.is_initialized());

        let widgets = engine.widgets();
        assert_eq!(widgets[0].position, Position::new(0, 0, 6, 2));
        assert_eq!(widgets[1].position, Position::new(6, 0, 6, 2));
        // c 与 a 重叠，被放到下方
        assert_eq!(widgets[2].position, Position::new(0, 2, 4, 2));
        assert!(engine.check_invariants().is_ok());
    }

    #[test]
    fn test_external_config_with_same_ids_keeps_live_positions() {
        let mut engine = LayoutEngine::new(12);
        engine.apply_external_config(vec![widget("a", 0, 0, 4, 2), widget("b", 4, 0, 4, 2)]);

        // 用户把 b 拖到第二行
        engine
            .on_layout_change(
                Breakpoint::Lg,
                &[Placement::new("b", Position::new(0, 2, 4, 2))],
            )
            .unwrap();
        let before = engine.layout();

        let mut echo = vec![widget("b", 4, 0, 4, 2), widget("a", 0, 0, 4, 2)];
        echo[0].title = "Renamed".to_string();
        assert!(!engine.apply_external_config(echo.clone()));
        assert!(!engine.apply_external_config(echo));

        assert_eq!(engine.layout(), before);
        let b = engine.widget("b").unwrap();
        assert_eq!(b.position, Position::new(0, 2, 4, 2));
        assert_eq!(b.title, "Renamed");
    }

    #[test]
    fn test_external_config_add_remove_recomputes() {
        let mut engine = LayoutEngine::new(12);
        engine.apply_external_config(vec![widget("a", 0, 0, 4, 2)]);
        assert!(engine.apply_external_config(vec![
            widget("a", 0, 0, 4, 2),
            widget("d", 4, 0, 4, 2),
        ]));
        assert_eq!(engine.widgets().len(), 2);

        assert!(engine.apply_external_config(vec![widget("d", 4, 0, 4, 2)]));
        let ids: Vec<String> = engine.layout()[&Breakpoint::Xxs]
            .iter()
            .map(|p| p.widget_id.clone())
            .collect();
        assert_eq!(ids, vec!["d"]);
        assert!(engine.check_invariants().is_ok());
    }

    #[test]
    fn test_duplicate_external_ids_first_wins() {
        let mut engine = LayoutEngine::new(12);
        let mut dup = widget("a", 8, 0, 4, 2);
        dup.title = "second".to_string();
        engine.apply_external_config(vec![widget("a", 0, 0, 4, 2), dup]);

        assert_eq!(engine.widgets().len(), 1);
        assert_eq!(engine.widget("a").unwrap().title, "Widget a");
        assert!(engine.check_invariants().is_ok());
    }

    #[test]
    fn test_layout_change_normalizes_and_ignores_unknown() {
        let mut engine = LayoutEngine::new(12);
        engine.apply_external_config(vec![
            widget("a", 0, 0, 4, 2),
            widget("b", 4, 0, 4, 2),
            widget("c", 8, 0, 4, 2),
        ]);

        // b 拖到 a 上面，同时夹带一个未知组件
        let widgets = engine
            .on_layout_change(
                Breakpoint::Lg,
                &[
                    Placement::new("a", Position::new(0, 0, 4, 2)),
                    Placement::new("b", Position::new(2, 0, 4, 2)),
                    Placement::new("ghost", Position::new(0, 5, 2, 2)),
                ],
            )
            .unwrap();

        assert_eq!(widgets.len(), 3);
        assert!(!engine.widgets().iter().any(|w| w.id == "ghost"));
        assert!(!grid::has_overlap(&engine.layout()[&Breakpoint::Lg]));
        // c 未出现在变更中，保持原位
        assert_eq!(engine.widget("c").unwrap().position, Position::new(8, 0, 4, 2));
        assert!(engine.check_invariants().is_ok());
    }

    #[test]
    fn test_external_config_with_far_out_of_range_geometry() {
        let mut engine = LayoutEngine::new(12);
        assert!(engine.apply_external_config(vec![
            widget("a", 0, 0, 4, 2),
            widget("far_right", u32::MAX - 1, 0, 4, 2),
            widget("far_down", 0, u32::MAX, 4, 2),
            widget("past_edge", 12, 3, 2, 2),
        ]));

        assert_eq!(engine.widget("far_right").unwrap().position, Position::new(4, 0, 4, 2));
        assert_eq!(engine.widget("far_down").unwrap().position, Position::new(8, 0, 4, 2));
        assert_eq!(engine.widget("past_edge").unwrap().position, Position::new(0, 2, 2, 2));
        assert!(engine.check_invariants().is_ok());
    }

    #[test]
    fn test_layout_change_with_far_out_of_range_geometry() {
        let mut engine = LayoutEngine::new(12);
        engine.apply_external_config(vec![widget("a", 0, 0, 4, 2), widget("b", 4, 0, 4, 2)]);

        // 拖到网格外很远的地方，吸附回第一个空位
        engine
            .on_layout_change(
                Breakpoint::Lg,
                &[Placement::new("b", Position::new(u32::MAX - 1, u32::MAX, 4, 2))],
            )
            .unwrap();
        assert_eq!(engine.widget("b").unwrap().position, Position::new(4, 0, 4, 2));

        // sm 只有6列，x=6 已越界
        engine
            .on_layout_change(
                Breakpoint::Sm,
                &[Placement::new("a", Position::new(6, 0, 2, 2))],
            )
            .unwrap();
        let sm = &engine.layout()[&Breakpoint::Sm];
        let a = sm.iter().find(|p| p.widget_id == "a").unwrap();
        assert_eq!(a.position(), Position::new(0, 0, 2, 2));
        assert!(engine.check_invariants().is_ok());
    }

    #[test]
    fn test_layout_change_on_narrow_breakpoint_keeps_widget_positions() {
        let mut engine = LayoutEngine::new(12);
        engine.apply_external_config(vec![widget("a", 0, 0, 4, 2), widget("b", 4, 0, 4, 2)]);
        let before = engine.widgets();

        engine
            .on_layout_change(
                Breakpoint::Sm,
                &[Placement::new("b", Position::new(0, 0, 6, 1))],
            )
            .unwrap();

        assert_eq!(engine.widgets(), before);
        assert_eq!(
            engine.layout()[&Breakpoint::Sm][0].position(),
            Position::new(0, 0, 6, 1)
        );
        assert!(engine.check_invariants().is_ok());
    }

    #[test]
    fn test_layout_change_rejected_while_overlay_open() {
        let mut engine = LayoutEngine::new(12);
        engine.apply_external_config(vec![widget("a", 0, 0, 4, 2)]);

        engine.begin_overlay();
        let result = engine.on_layout_change(
            Breakpoint::Lg,
            &[Placement::new("a", Position::new(6, 6, 4, 2))],
        );
        assert!(result.is_none());
        assert_eq!(engine.end_overlay(), OverlayOutcome::Clean);
        assert_eq!(engine.widget("a").unwrap().position, Position::new(0, 0, 4, 2));
    }

    #[test]
    fn test_overlay_rolls_back_out_of_band_mutation() {
        let mut engine = LayoutEngine::new(12);
        engine.apply_external_config(vec![widget("a", 0, 0, 4, 2), widget("b", 4, 0, 4, 2)]);
        let before = serde_json::to_string(&engine.state()).unwrap();

        engine.begin_overlay();
        {
            let state = engine.raw_state_mut();
            state.widgets[0].title = "hijacked".to_string();
            state.widgets[1].position = Position::new(0, 9, 1, 1);
        }
        assert_eq!(engine.end_overlay(), OverlayOutcome::RolledBack);

        assert_eq!(serde_json::to_string(&engine.state()).unwrap(), before);
        assert!(!engine.is_overlay_open());
    }

    #[test]
    fn test_sanctioned_edits_inside_overlay_survive() {
        let mut engine = LayoutEngine::new(12);
        engine.apply_external_config(vec![widget("a", 0, 0, 4, 2)]);

        engine.begin_overlay();
        engine.begin_overlay();
        let added = engine.add_widget(WidgetDraft::new("gauge", "Demand", 4, 2));
        engine
            .update_widget(
                "a",
                WidgetPatch {
                    title: Some("Prices".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(engine.end_overlay(), OverlayOutcome::Nested);
        assert!(engine.is_overlay_open());
        assert_eq!(engine.end_overlay(), OverlayOutcome::Clean);

        assert!(engine.widget(&added.id).is_some());
        assert_eq!(engine.widget("a").unwrap().title, "Prices");
    }

    #[test]
    fn test_unmatched_end_overlay_is_noop() {
        let mut engine = LayoutEngine::new(12);
        engine.add_widget(WidgetDraft::new("kpi", "x", 3, 3));
        let before = engine.state();
        assert_eq!(engine.end_overlay(), OverlayOutcome::Unmatched);
        assert_eq!(engine.state(), before);
    }

    #[test]
    fn test_remove_and_update_unknown_widget() {
        let mut engine = LayoutEngine::new(12);
        let w = engine.add_widget(WidgetDraft::new("kpi", "x", 3, 3));
        assert!(engine.update_widget("missing", WidgetPatch::default()).is_err());
        assert!(engine.remove_widget("missing").is_err());

        engine.remove_widget(&w.id).unwrap();
        assert!(engine.widgets().is_empty());
        assert!(engine.layout().values().all(|list| list.is_empty()));
    }
}
