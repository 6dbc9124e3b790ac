//! 分析状态机
//!
//! 管理分析/结果对的生命周期阶段转换：
//! 已创建 → 已标注 → 已确认 → 已治疗

use medcv_core::{AnalysisStage, MedcvError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 阶段转换事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AnalysisEvent {
    /// CV推理输出已应用
    Annotate,
    /// 诊断医生确认结论
    Confirm,
    /// 临床医生制定治疗方案
    Prescribe,
}

/// 分析状态机
///
/// 转换表只描述标称流程；确认前开方属于软约束的偏离路径，
/// 由引擎记录警告而非拒绝（见工作流引擎）。
#[derive(Debug)]
pub struct AnalysisStateMachine {
    transitions: HashMap<(AnalysisStage, AnalysisEvent), AnalysisStage>,
}

impl AnalysisStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        // 标称流程
        transitions.insert(
            (AnalysisStage::Created, AnalysisEvent::Annotate),
            AnalysisStage::Annotated,
        );
        transitions.insert(
            (AnalysisStage::Annotated, AnalysisEvent::Confirm),
            AnalysisStage::Confirmed,
        );
        transitions.insert(
            (AnalysisStage::Confirmed, AnalysisEvent::Prescribe),
            AnalysisStage::Treated,
        );

        // last-write-wins：重复确认、治疗后修订结论、重复开方均允许
        transitions.insert(
            (AnalysisStage::Confirmed, AnalysisEvent::Confirm),
            AnalysisStage::Confirmed,
        );
        transitions.insert(
            (AnalysisStage::Treated, AnalysisEvent::Confirm),
            AnalysisStage::Treated,
        );
        transitions.insert(
            (AnalysisStage::Treated, AnalysisEvent::Prescribe),
            AnalysisStage::Treated,
        );

        Self { transitions }
    }

    /// 检查状态转换是否在标称流程内
    pub fn can_transition(&self, from: &AnalysisStage, event: &AnalysisEvent) -> bool {
        self.transitions.contains_key(&(*from, event.clone()))
    }

    /// 执行状态转换
    pub fn transition(&self, from: &AnalysisStage, event: &AnalysisEvent) -> Result<AnalysisStage> {
        match self.transitions.get(&(*from, event.clone())) {
            Some(to) => Ok(*to),
            None => Err(MedcvError::InvalidStateTransition {
                from: format!("{from:?}"),
                event: format!("{event:?}"),
            }),
        }
    }

    /// 获取某阶段的所有标称事件
    pub fn get_possible_events(&self, current_stage: &AnalysisStage) -> Vec<AnalysisEvent> {
        self.transitions
            .keys()
            .filter(|(stage, _)| stage == current_stage)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

impl Default for AnalysisStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominal_flow() {
        let sm = AnalysisStateMachine::new();

        assert_eq!(
            sm.transition(&AnalysisStage::Created, &AnalysisEvent::Annotate)
                .unwrap(),
            AnalysisStage::Annotated
        );
        assert_eq!(
            sm.transition(&AnalysisStage::Annotated, &AnalysisEvent::Confirm)
                .unwrap(),
            AnalysisStage::Confirmed
        );
        assert_eq!(
            sm.transition(&AnalysisStage::Confirmed, &AnalysisEvent::Prescribe)
                .unwrap(),
            AnalysisStage::Treated
        );
    }

    #[test]
    fn test_last_write_wins_loops() {
        let sm = AnalysisStateMachine::new();

        // 重复确认保持已确认
        assert_eq!(
            sm.transition(&AnalysisStage::Confirmed, &AnalysisEvent::Confirm)
                .unwrap(),
            AnalysisStage::Confirmed
        );
        // 治疗后修订结论保持已治疗
        assert_eq!(
            sm.transition(&AnalysisStage::Treated, &AnalysisEvent::Confirm)
                .unwrap(),
            AnalysisStage::Treated
        );
    }

    #[test]
    fn test_off_path_transitions_rejected() {
        let sm = AnalysisStateMachine::new();

        // 确认前开方不在标称流程内（引擎层作为软约束放行并告警）
        assert!(!sm.can_transition(&AnalysisStage::Annotated, &AnalysisEvent::Prescribe));
        // 推理输出应用前确认同样偏离标称流程
        assert!(!sm.can_transition(&AnalysisStage::Created, &AnalysisEvent::Confirm));

        let result = sm.transition(&AnalysisStage::Created, &AnalysisEvent::Prescribe);
        assert!(result.is_err());
    }

    #[test]
    fn test_possible_events() {
        let sm = AnalysisStateMachine::new();

        let events = sm.get_possible_events(&AnalysisStage::Annotated);
        assert_eq!(events, vec![AnalysisEvent::Confirm]);
    }
}
