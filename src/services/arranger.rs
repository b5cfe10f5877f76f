//! 排序 - 业务能力层
//!
//! 只调整题目顺序，不改变选中的题目集合。

use rand::seq::SliceRandom;
use rand::Rng;

use crate::models::blueprint::OrderingPolicy;
use crate::services::planner::SelectionTarget;
use crate::services::selector::Picked;

/// 按排序策略重排选题结果
///
/// 大题顺序：必答大题在前，选做大题在后，同类之间保持规划顺序。
pub fn arrange<R: Rng + ?Sized>(
    target: &SelectionTarget,
    picks: Vec<Picked>,
    policy: OrderingPolicy,
    rng: &mut R,
) -> Vec<Picked> {
    let mut sections: Vec<(usize, bool, &str)> = target
        .sections
        .iter()
        .enumerate()
        .map(|(i, s)| (i, s.is_optional(), s.name.as_str()))
        .collect();
    // 稳定排序：false (必答) 在前
    sections.sort_by_key(|&(i, optional, _)| (optional, i));

    let mut remaining = picks;
    let mut ordered = Vec::with_capacity(remaining.len());

    for (_, _, name) in sections {
        let (mut group, rest): (Vec<Picked>, Vec<Picked>) =
            remaining.into_iter().partition(|p| p.section == name);
        remaining = rest;

        match policy {
            OrderingPolicy::BySection => group.shuffle(rng),
            OrderingPolicy::MarkRamp {
                early_pct,
                middle_pct,
            } => group = mark_ramp(group, early_pct, middle_pct, rng),
        }
        ordered.extend(group);
    }

    // 不属于任何规划大题的题目（正常情况下不存在）保持原样追加在末尾
    ordered.extend(remaining);
    ordered
}

/// 按分值由低到高切成前/中/后三段，段内随机
fn mark_ramp<R: Rng + ?Sized>(
    mut group: Vec<Picked>,
    early_pct: u32,
    middle_pct: u32,
    rng: &mut R,
) -> Vec<Picked> {
    // 先打乱再稳定排序，同分题目之间的顺序也是随机的
    group.shuffle(rng);
    group.sort_by_key(|p| p.question.marks);

    let len = group.len();
    let early = len * early_pct as usize / 100;
    let middle = (len * middle_pct as usize / 100).min(len - early);

    let mut late = group.split_off(early + middle);
    let mut mid = group.split_off(early);
    let mut head = group;

    head.shuffle(rng);
    mid.shuffle(rng);
    late.shuffle(rng);

    head.extend(mid);
    head.extend(late);
    head
}
