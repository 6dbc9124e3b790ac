//! 访问控制闸门
//!
//! 每个工作流操作对应一条纯授权谓词：给定调用者角色与资源归属即可判定，
//! 不做任何I/O。未认证的请求在进入闸门之前就以 Unauthorized 失败，
//! 闸门本身只产生 Forbidden，绝不降级为 NotFound。

use medcv_core::{MedcvError, Result, UserRole};

/// 工作流操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowAction {
    /// 上传影像并创建分析
    UploadAnalysis,
    /// 查看本人分析历史
    ViewOwnHistory,
    /// 查看单个分析（携带资源归属）
    ViewAnalysis { is_owner: bool },
    /// 确认诊断（归属校验由引擎执行）
    ConfirmDiagnosis,
    /// 制定治疗方案
    PrescribeTreatment,
    /// 查看患者完整历史
    ViewPatientHistory,
    /// 用户管理（列表/建档/改角色）
    ManageUsers,
    /// 全局视图（全部分析、反馈指标）
    ViewSystemWide,
}

/// 判定角色是否允许执行操作
pub fn is_allowed(role: UserRole, action: &WorkflowAction) -> bool {
    match action {
        WorkflowAction::UploadAnalysis => role == UserRole::Diagnostician,
        WorkflowAction::ViewOwnHistory => {
            matches!(role, UserRole::Diagnostician | UserRole::Admin)
        }
        // 管理员与临床医生可查看任意分析；诊断医生仅限本人创建的
        WorkflowAction::ViewAnalysis { is_owner } => match role {
            UserRole::Admin | UserRole::Clinician => true,
            UserRole::Diagnostician => *is_owner,
        },
        WorkflowAction::ConfirmDiagnosis => role == UserRole::Diagnostician,
        WorkflowAction::PrescribeTreatment => role == UserRole::Clinician,
        WorkflowAction::ViewPatientHistory => {
            matches!(role, UserRole::Clinician | UserRole::Admin)
        }
        WorkflowAction::ManageUsers | WorkflowAction::ViewSystemWide => role == UserRole::Admin,
    }
}

/// 执行授权检查，拒绝时返回 Forbidden
pub fn authorize(role: UserRole, action: &WorkflowAction) -> Result<()> {
    if is_allowed(role, action) {
        Ok(())
    } else {
        Err(MedcvError::Forbidden(denial_message(action).to_string()))
    }
}

fn denial_message(action: &WorkflowAction) -> &'static str {
    match action {
        WorkflowAction::UploadAnalysis => "仅诊断医生可上传分析",
        WorkflowAction::ViewOwnHistory => "仅诊断医生与管理员可查看分析历史",
        WorkflowAction::ViewAnalysis { .. } => "无权查看该分析",
        WorkflowAction::ConfirmDiagnosis => "仅诊断医生可确认诊断",
        WorkflowAction::PrescribeTreatment => "仅临床医生可制定治疗方案",
        WorkflowAction::ViewPatientHistory => "仅临床医生与管理员可查看患者历史",
        WorkflowAction::ManageUsers => "仅管理员可管理用户",
        WorkflowAction::ViewSystemWide => "仅管理员可访问全局视图",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_ROLES: [UserRole; 3] = [
        UserRole::Admin,
        UserRole::Diagnostician,
        UserRole::Clinician,
    ];

    /// 逐角色断言操作的允许集合
    fn assert_allowed_roles(action: WorkflowAction, allowed: &[UserRole]) {
        for role in ALL_ROLES {
            let expected = allowed.contains(&role);
            assert_eq!(
                is_allowed(role, &action),
                expected,
                "action {action:?} role {role:?}"
            );

            if expected {
                assert!(authorize(role, &action).is_ok());
            } else {
                assert!(matches!(
                    authorize(role, &action),
                    Err(MedcvError::Forbidden(_))
                ));
            }
        }
    }

    #[test]
    fn test_upload_is_diagnostician_only() {
        assert_allowed_roles(WorkflowAction::UploadAnalysis, &[UserRole::Diagnostician]);
    }

    #[test]
    fn test_own_history_roles() {
        assert_allowed_roles(
            WorkflowAction::ViewOwnHistory,
            &[UserRole::Diagnostician, UserRole::Admin],
        );
    }

    #[test]
    fn test_view_analysis_ownership() {
        // 非归属者：诊断医生被拒，管理员与临床医生放行
        assert_allowed_roles(
            WorkflowAction::ViewAnalysis { is_owner: false },
            &[UserRole::Admin, UserRole::Clinician],
        );
        // 归属者：三种角色都放行
        assert_allowed_roles(
            WorkflowAction::ViewAnalysis { is_owner: true },
            &ALL_ROLES,
        );
    }

    #[test]
    fn test_confirm_is_diagnostician_only() {
        assert_allowed_roles(WorkflowAction::ConfirmDiagnosis, &[UserRole::Diagnostician]);
    }

    #[test]
    fn test_prescribe_is_clinician_only() {
        assert_allowed_roles(WorkflowAction::PrescribeTreatment, &[UserRole::Clinician]);
    }

    #[test]
    fn test_patient_history_roles() {
        assert_allowed_roles(
            WorkflowAction::ViewPatientHistory,
            &[UserRole::Clinician, UserRole::Admin],
        );
    }

    #[test]
    fn test_admin_only_actions() {
        assert_allowed_roles(WorkflowAction::ManageUsers, &[UserRole::Admin]);
        assert_allowed_roles(WorkflowAction::ViewSystemWide, &[UserRole::Admin]);
    }

    #[test]
    fn test_role_update_changes_decisions() {
        // 同一用户从诊断医生改为临床医生后，闸门决策随角色改变
        let before = UserRole::Diagnostician;
        let after = UserRole::Clinician;

        assert!(is_allowed(before, &WorkflowAction::UploadAnalysis));
        assert!(!is_allowed(after, &WorkflowAction::UploadAnalysis));

        assert!(!is_allowed(before, &WorkflowAction::PrescribeTreatment));
        assert!(is_allowed(after, &WorkflowAction::PrescribeTreatment));
    }
}
