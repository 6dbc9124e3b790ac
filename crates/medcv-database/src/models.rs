//! 数据库模型

use chrono::{DateTime, NaiveDate, Utc};
use medcv_core::models::*;
use sqlx::FromRow;

// 数据库表模型 - 使用FromRow trait用于SQL查询

/// 数据库用户表
#[derive(Debug, FromRow)]
pub struct DbUser {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role: String, // 存储为字符串，转换为UserRole枚举
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<DbUser> for User {
    fn from(db_user: DbUser) -> Self {
        User {
            id: db_user.id,
            username: db_user.username,
            password_hash: db_user.password_hash,
            role: db_user
                .role
                .parse()
                .unwrap_or(UserRole::Diagnostician), // 默认角色
            is_active: db_user.is_active,
            created_at: db_user.created_at,
        }
    }
}

/// 数据库患者表
#[derive(Debug, FromRow)]
pub struct DbPatient {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub medical_record_number: String,
    pub created_at: DateTime<Utc>,
}

impl From<DbPatient> for Patient {
    fn from(db_patient: DbPatient) -> Self {
        Patient {
            id: db_patient.id,
            first_name: db_patient.first_name,
            last_name: db_patient.last_name,
            date_of_birth: db_patient.date_of_birth,
            medical_record_number: db_patient.medical_record_number,
            created_at: db_patient.created_at,
        }
    }
}

/// 数据库分析表
#[derive(Debug, FromRow)]
pub struct DbAnalysis {
    pub id: i64,
    pub patient_id: i64,
    pub diagnostician_id: i64,
    pub clinician_id: Option<i64>,
    pub image_path: String,
    pub created_at: DateTime<Utc>,
}

impl From<DbAnalysis> for Analysis {
    fn from(db_analysis: DbAnalysis) -> Self {
        Analysis {
            id: db_analysis.id,
            patient_id: db_analysis.patient_id,
            diagnostician_id: db_analysis.diagnostician_id,
            clinician_id: db_analysis.clinician_id,
            image_path: db_analysis.image_path,
            created_at: db_analysis.created_at,
        }
    }
}

/// 数据库结果表
#[derive(Debug, FromRow)]
pub struct DbResult {
    pub id: i64,
    pub analysis_id: i64,
    pub system_diagnosis: Option<String>,
    pub system_confidence: Option<f64>,
    pub segmentation_path: Option<String>,
    pub diagnostician_conclusion: Option<String>,
    pub is_confirmed: bool,
    pub feedback_correct: i16, // -1: 未设置, 0: 有误, 1: 正确
    pub treatment_plan: Option<String>,
}

impl From<DbResult> for AnalysisResult {
    fn from(db_result: DbResult) -> Self {
        AnalysisResult {
            id: db_result.id,
            analysis_id: db_result.analysis_id,
            system_diagnosis: db_result.system_diagnosis,
            system_confidence: db_result.system_confidence,
            segmentation_path: db_result.segmentation_path,
            diagnostician_conclusion: db_result.diagnostician_conclusion,
            is_confirmed: db_result.is_confirmed,
            feedback: Feedback::from_db_value(db_result.feedback_correct),
            treatment_plan: db_result.treatment_plan,
        }
    }
}

/// 分析组合视图的扁平查询行
///
/// analyses JOIN patients JOIN users LEFT JOIN results 的别名列集合，
/// 一次查询完成展示所需的全部预加载。
#[derive(Debug, FromRow)]
pub struct DbAnalysisDetail {
    pub id: i64,
    pub patient_id: i64,
    pub diagnostician_id: i64,
    pub clinician_id: Option<i64>,
    pub image_path: String,
    pub created_at: DateTime<Utc>,

    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub medical_record_number: String,
    pub patient_created_at: DateTime<Utc>,

    pub diagnostician_username: String,
    pub diagnostician_role: String,
    pub diagnostician_active: bool,

    pub result_id: Option<i64>,
    pub system_diagnosis: Option<String>,
    pub system_confidence: Option<f64>,
    pub segmentation_path: Option<String>,
    pub diagnostician_conclusion: Option<String>,
    pub is_confirmed: Option<bool>,
    pub feedback_correct: Option<i16>,
    pub treatment_plan: Option<String>,
}

impl From<DbAnalysisDetail> for AnalysisDetail {
    fn from(row: DbAnalysisDetail) -> Self {
        let analysis = Analysis {
            id: row.id,
            patient_id: row.patient_id,
            diagnostician_id: row.diagnostician_id,
            clinician_id: row.clinician_id,
            image_path: row.image_path,
            created_at: row.created_at,
        };

        let patient = Patient {
            id: row.patient_id,
            first_name: row.first_name,
            last_name: row.last_name,
            date_of_birth: row.date_of_birth,
            medical_record_number: row.medical_record_number,
            created_at: row.patient_created_at,
        };

        let diagnostician = UserInfo {
            id: row.diagnostician_id,
            username: row.diagnostician_username,
            role: row
                .diagnostician_role
                .parse()
                .unwrap_or(UserRole::Diagnostician), // 默认角色
            is_active: row.diagnostician_active,
        };

        let result = row.result_id.map(|result_id| AnalysisResult {
            id: result_id,
            analysis_id: row.id,
            system_diagnosis: row.system_diagnosis,
            system_confidence: row.system_confidence,
            segmentation_path: row.segmentation_path,
            diagnostician_conclusion: row.diagnostician_conclusion,
            is_confirmed: row.is_confirmed.unwrap_or(false),
            feedback: Feedback::from_db_value(row.feedback_correct.unwrap_or(-1)),
            treatment_plan: row.treatment_plan,
        });

        let stage = result
            .as_ref()
            .map(|r| r.stage())
            .unwrap_or(AnalysisStage::Created);

        AnalysisDetail {
            analysis,
            patient,
            diagnostician,
            result,
            stage,
        }
    }
}

// 插入模型 - 用于创建新记录

/// 新用户插入模型
#[derive(Debug)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub role: UserRole,
}

/// 新分析插入模型
#[derive(Debug)]
pub struct NewAnalysis {
    pub patient_mrn: String,
    pub diagnostician_id: i64,
    pub image_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn db_user(role: &str) -> DbUser {
        DbUser {
            id: 7,
            username: "dr_ivanov".to_string(),
            password_hash: "$2b$12$abcdefghijklmnopqrstuv".to_string(),
            role: role.to_string(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_db_user_role_conversion() {
        let user: User = db_user("clinician").into();
        assert_eq!(user.role, UserRole::Clinician);

        // 非法角色字符串回落到默认角色
        let user: User = db_user("superuser").into();
        assert_eq!(user.role, UserRole::Diagnostician);
    }

    #[test]
    fn test_db_result_feedback_conversion() {
        let db_result = DbResult {
            id: 1,
            analysis_id: 2,
            system_diagnosis: Some("Probable pneumonia (CV stub)".to_string()),
            system_confidence: Some(0.85),
            segmentation_path: Some("segmentations/chest_mask.png".to_string()),
            diagnostician_conclusion: None,
            is_confirmed: false,
            feedback_correct: -1,
            treatment_plan: None,
        };

        let result: AnalysisResult = db_result.into();
        assert_eq!(result.feedback, Feedback::Unset);
        assert_eq!(result.stage(), AnalysisStage::Annotated);
    }
}
