//! 网格摆放算法
//!
//! 首次适配：自上而下逐行、自左向右逐列寻找第一个不重叠的矩形，
//! 找不到时追加到当前最低组件的下方。结果确定，不追求最优。
//!
//! 最靠上的空位只可能出现在第0行或某个组件的下边沿，最靠左的只可能出现在
//! 第0列或某个组件的右边沿，所以只需检查这些候选坐标。

use super::model::{Placement, Position, MAX_ROWS};

/// 把宽高收敛到合法范围：宽度 [1, columns]，高度 [1, MAX_ROWS]
pub fn clamp_size(columns: u32, w: u32, h: u32) -> (u32, u32) {
    let columns = columns.max(1);
    (w.clamp(1, columns), h.clamp(1, MAX_ROWS))
}

/// 在已占用区域中寻找第一个可放下`w`x`h`的位置
pub fn find_free_position(occupied: &[Position], columns: u32, w: u32, h: u32) -> Position {
    let columns = columns.max(1);
    let (w, h) = clamp_size(columns, w, h);
    let max_bottom = occupied.iter().map(|p| p.bottom()).max().unwrap_or(0);

    let mut rows: Vec<u32> = std::iter::once(0)
        .chain(occupied.iter().map(|p| p.bottom()))
        .collect();
    rows.sort_unstable();
    rows.dedup();

    let mut cols: Vec<u32> = std::iter::once(0)
        .chain(occupied.iter().map(|p| p.right()))
        .filter(|x| *x <= columns - w)
        .collect();
    cols.sort_unstable();
    cols.dedup();

    for &y in rows.iter().filter(|y| **y < max_bottom) {
        for &x in &cols {
            let candidate = Position::new(x, y, w, h);
            if !occupied.iter().any(|p| p.overlaps(&candidate)) {
                return candidate;
            }
        }
    }

    Position::new(0, max_bottom, w, h)
}

/// 规整一组摆放
///
/// 在界内且与前面条目不冲突的保持原位；越界或冲突的条目按列表顺序重新首次适配。
/// 输出顺序与输入一致。
pub fn normalize(placements: &[Placement], columns: u32) -> Vec<Placement> {
    let columns = columns.max(1);
    let mut accepted: Vec<Position> = Vec::with_capacity(placements.len());
    let mut resolved: Vec<Option<Position>> = Vec::with_capacity(placements.len());

    for placement in placements {
        let (w, h) = clamp_size(columns, placement.w, placement.h);
        let position = Position::new(placement.x, placement.y, w, h);
        if position.fits_within(columns) && !accepted.iter().any(|p| p.overlaps(&position)) {
            accepted.push(position);
            resolved.push(Some(position));
        } else {
            resolved.push(None);
        }
    }

    placements
        .iter()
        .zip(resolved)
        .map(|(placement, resolved)| {
            let position = match resolved {
                Some(position) => position,
                None => {
                    let position =
                        find_free_position(&accepted, columns, placement.w, placement.h);
                    log::debug!(
                        "组件 {} 位置冲突或越界，重新放置到 ({}, {})",
                        placement.widget_id,
                        position.x,
                        position.y
                    );
                    accepted.push(position);
                    position
                }
            };
            Placement::new(placement.widget_id.clone(), position)
        })
        .collect()
}

/// 按顺序逐个首次适配，用于从宽断点推导窄断点
pub fn pack(placements: &[Placement], columns: u32) -> Vec<Placement> {
    let mut occupied: Vec<Position> = Vec::with_capacity(placements.len());
    placements
        .iter()
        .map(|placement| {
            let position = find_free_position(&occupied, columns, placement.w, placement.h);
            occupied.push(position);
            Placement::new(placement.widget_id.clone(), position)
        })
        .collect()
}

/// 列表中是否存在重叠
pub fn has_overlap(placements: &[Placement]) -> bool {
    placements.iter().enumerate().any(|(i, a)| {
        placements[i + 1..]
            .iter()
            .any(|b| a.position().overlaps(&b.position()))
    })
}
