//! LinkSelector：按攻击链顺序为 Agent 选出下一条 Link
//!
//! 从游标位置开始顺序扫描 atomic_ordering 的剩余部分：第一个出现在候选中的 ability 被选中，
//! 游标移到它之后；扫描到末尾仍无匹配，则游标停在末尾、不产出 Link。
//! 纯函数，不修改任何状态；显式循环，栈深度与攻击链长度无关。

use std::collections::HashMap;

use crate::objects::Link;

/// 一次选择的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// 选中的候选（None 表示攻击链已耗尽）
    pub link: Option<Link>,
    /// 新游标，永不小于输入游标
    pub cursor: usize,
    /// 本次跳过的位置数
    pub skipped: usize,
}

pub struct LinkSelector<'a> {
    ordering: &'a [String],
}

impl<'a> LinkSelector<'a> {
    pub fn new(ordering: &'a [String]) -> Self {
        Self { ordering }
    }

    pub fn select(&self, cursor: usize, candidates: &[Link]) -> Selection {
        // 同一 ability 有多个候选时取最后一个
        let by_ability: HashMap<&str, &Link> = candidates.iter().map(|l| (l.ability_id(), l)).collect();

        let mut skipped = 0;
        for (position, ability_id) in self.ordering.iter().enumerate().skip(cursor) {
            if let Some(link) = by_ability.get(ability_id.as_str()) {
                return Selection {
                    link: Some((*link).clone()),
                    cursor: position + 1,
                    skipped,
                };
            }
            skipped += 1;
        }

        Selection {
            link: None,
            cursor: cursor.max(self.ordering.len()),
            skipped,
        }
    }
}
