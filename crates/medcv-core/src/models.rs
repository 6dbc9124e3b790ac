//! 核心数据模型定义

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MedcvError;

/// 用户角色
///
/// 封闭枚举，所有边界（注册、角色更新、令牌解码）均须通过 `FromStr` 校验，
/// 系统内部不允许出现自由文本角色。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// 管理员 - 用户管理与全局视图
    Admin,
    /// 诊断医生 - 上传影像、确认诊断
    Diagnostician,
    /// 临床医生 - 查看患者历史、制定治疗方案
    Clinician,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Diagnostician => "diagnostician",
            UserRole::Clinician => "clinician",
        }
    }
}

impl FromStr for UserRole {
    type Err = MedcvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "diagnostician" => Ok(UserRole::Diagnostician),
            "clinician" => Ok(UserRole::Clinician),
            other => Err(MedcvError::InvalidInput(format!(
                "未知角色: {other}，可用角色: admin, diagnostician, clinician"
            ))),
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 系统用户
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// 对外展示视图（不含密码哈希）
    pub fn info(&self) -> UserInfo {
        UserInfo {
            id: self.id,
            username: self.username.clone(),
            role: self.role,
            is_active: self.is_active,
        }
    }
}

/// 用户信息（不包含敏感数据）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    pub role: UserRole,
    pub is_active: bool,
}

/// 患者记录
///
/// 上传分析时按MRN自动建档：仅写入MRN，姓名与出生日期留空。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub medical_record_number: String, // 病历号，全局唯一
    pub created_at: DateTime<Utc>,
}

/// 分析记录
///
/// 每次上传创建一条，归属于上传的诊断医生；
/// clinician_id 在临床医生制定治疗方案时回填。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub id: i64,
    pub patient_id: i64,
    pub diagnostician_id: i64,
    pub clinician_id: Option<i64>,
    pub image_path: String, // 原始影像的相对存储路径
    pub created_at: DateTime<Utc>,
}

/// 诊断反馈（三态）
///
/// 数据库列沿用 -1/0/1 哨兵编码，域内只出现封闭枚举。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    /// 尚未确认
    Unset,
    /// 系统诊断有误
    Incorrect,
    /// 系统诊断正确
    Correct,
}

impl Feedback {
    pub fn as_db_value(&self) -> i16 {
        match self {
            Feedback::Unset => -1,
            Feedback::Incorrect => 0,
            Feedback::Correct => 1,
        }
    }

    pub fn from_db_value(value: i16) -> Self {
        match value {
            0 => Feedback::Incorrect,
            1 => Feedback::Correct,
            _ => Feedback::Unset, // 默认未设置
        }
    }
}

/// 分析结果
///
/// 与 Analysis 一对一，在同一事务中创建。
/// system_* 字段在推理输出应用前为空（占位结果）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: i64,
    pub analysis_id: i64,
    pub system_diagnosis: Option<String>,
    pub system_confidence: Option<f64>,
    pub segmentation_path: Option<String>, // CV分割产物的相对路径
    pub diagnostician_conclusion: Option<String>,
    pub is_confirmed: bool,
    pub feedback: Feedback,
    pub treatment_plan: Option<String>,
}

impl AnalysisResult {
    /// 由结果字段推导当前工作流阶段
    pub fn stage(&self) -> AnalysisStage {
        if self.treatment_plan.is_some() {
            AnalysisStage::Treated
        } else if self.is_confirmed {
            AnalysisStage::Confirmed
        } else if self.system_diagnosis.is_some() {
            AnalysisStage::Annotated
        } else {
            AnalysisStage::Created
        }
    }
}

/// 分析工作流阶段
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStage {
    /// 已创建（推理输出尚未应用）
    Created,
    /// 已标注（CV推理输出已写入）
    Annotated,
    /// 已确认（诊断医生给出结论）
    Confirmed,
    /// 已治疗（临床医生制定治疗方案）
    Treated,
}

impl fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnalysisStage::Created => "created",
            AnalysisStage::Annotated => "annotated",
            AnalysisStage::Confirmed => "confirmed",
            AnalysisStage::Treated => "treated",
        };
        f.write_str(s)
    }
}

/// 分析组合视图
///
/// 用于展示：分析本体 + 患者 + 诊断医生 + 结果，一次性预加载。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisDetail {
    pub analysis: Analysis,
    pub patient: Patient,
    pub diagnostician: UserInfo,
    pub result: Option<AnalysisResult>,
    pub stage: AnalysisStage,
}

/// 患者完整分析历史
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientHistory {
    pub patient: Patient,
    pub analyses: Vec<AnalysisDetail>,
}

/// 模型反馈指标
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackMetrics {
    pub total_confirmed: i64,
    pub correct_predictions: i64,
    pub accuracy_percentage: f64,
}

impl FeedbackMetrics {
    /// 由聚合计数计算准确率（百分比，保留两位小数）
    ///
    /// total_confirmed 为 0 时准确率定义为 0.0，避免除零。
    pub fn from_counts(total_confirmed: i64, correct_predictions: i64) -> Self {
        let accuracy_percentage = if total_confirmed == 0 {
            0.0
        } else {
            let raw = 100.0 * correct_predictions as f64 / total_confirmed as f64;
            (raw * 100.0).round() / 100.0
        };

        Self {
            total_confirmed,
            correct_predictions,
            accuracy_percentage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholder_result() -> AnalysisResult {
        AnalysisResult {
            id: 1,
            analysis_id: 1,
            system_diagnosis: None,
            system_confidence: None,
            segmentation_path: None,
            diagnostician_conclusion: None,
            is_confirmed: false,
            feedback: Feedback::Unset,
            treatment_plan: None,
        }
    }

    #[test]
    fn test_role_parse_roundtrip() {
        for role in [UserRole::Admin, UserRole::Diagnostician, UserRole::Clinician] {
            assert_eq!(role.as_str().parse::<UserRole>().unwrap(), role);
        }
    }

    #[test]
    fn test_role_parse_rejects_unknown() {
        assert!("radiologist".parse::<UserRole>().is_err());
        assert!("".parse::<UserRole>().is_err());
        assert!("Admin".parse::<UserRole>().is_err()); // 大小写敏感
    }

    #[test]
    fn test_feedback_db_mapping() {
        assert_eq!(Feedback::from_db_value(-1), Feedback::Unset);
        assert_eq!(Feedback::from_db_value(0), Feedback::Incorrect);
        assert_eq!(Feedback::from_db_value(1), Feedback::Correct);
        // 未知值回落到未设置
        assert_eq!(Feedback::from_db_value(7), Feedback::Unset);

        for fb in [Feedback::Unset, Feedback::Incorrect, Feedback::Correct] {
            assert_eq!(Feedback::from_db_value(fb.as_db_value()), fb);
        }
    }

    #[test]
    fn test_stage_derivation() {
        let mut result = placeholder_result();
        assert_eq!(result.stage(), AnalysisStage::Created);

        result.system_diagnosis = Some("Probable pneumonia (CV stub)".to_string());
        assert_eq!(result.stage(), AnalysisStage::Annotated);

        result.is_confirmed = true;
        result.feedback = Feedback::Correct;
        assert_eq!(result.stage(), AnalysisStage::Confirmed);

        result.treatment_plan = Some("Amoxicillin 500mg".to_string());
        assert_eq!(result.stage(), AnalysisStage::Treated);
    }

    #[test]
    fn test_metrics_zero_confirmed() {
        let metrics = FeedbackMetrics::from_counts(0, 0);
        assert_eq!(metrics.accuracy_percentage, 0.0);
    }

    #[test]
    fn test_metrics_rounding() {
        let metrics = FeedbackMetrics::from_counts(3, 2);
        assert_eq!(metrics.accuracy_percentage, 66.67);

        let metrics = FeedbackMetrics::from_counts(1, 1);
        assert_eq!(metrics.accuracy_percentage, 100.0);

        let metrics = FeedbackMetrics::from_counts(8, 1);
        assert_eq!(metrics.accuracy_percentage, 12.5);
    }

    #[test]
    fn test_metrics_within_bounds() {
        for total in 1..=10i64 {
            for correct in 0..=total {
                let m = FeedbackMetrics::from_counts(total, correct);
                assert!(m.accuracy_percentage >= 0.0 && m.accuracy_percentage <= 100.0);
            }
        }
    }
}
