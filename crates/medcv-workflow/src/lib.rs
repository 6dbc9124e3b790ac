//! # MEDCV工作流模块
//!
//! 提供诊断工作流的核心编排能力，包括：
//! - 分析状态机：已创建 → 已标注 → 已确认 → 已治疗 的生命周期管理
//! - 工作流引擎：上传-推理-确认-开方的完整编排与事务形态
//! - CV推理边界：可替换的推理协作方接口与占位实现
//! - 访问控制闸门：按操作与角色的纯授权谓词

pub mod access;
pub mod engine;
pub mod inference;
pub mod state_machine;

// 重新导出主要类型
pub use access::{authorize, is_allowed, WorkflowAction};
pub use engine::{AnalysisWorkflow, ImageUpload};
pub use inference::{CvInference, InferenceOutput, StubCvModel};
pub use state_machine::{AnalysisEvent, AnalysisStateMachine};
