//! 工作流引擎
//!
//! 协调影像存储、数据库事务、CV推理与状态机的核心引擎。
//! 上传采用「先落库、再分发、后应用」的事务形态：
//! 分析与占位结果在单事务中提交，推理调用发生在事务之外，
//! 推理输出以按分析ID幂等更新的方式写回。

use crate::inference::{CvInference, InferenceOutput};
use crate::state_machine::{AnalysisEvent, AnalysisStateMachine};
use medcv_core::{
    Analysis, AnalysisDetail, Feedback, FeedbackMetrics, MedcvError, PatientHistory, Result,
};
use medcv_database::{DatabasePool, DatabaseQueries, NewAnalysis};
use medcv_storage::StorageManager;
use std::sync::Arc;
use tracing::{info, warn};

/// 上传的影像
#[derive(Debug)]
pub struct ImageUpload {
    pub filename: String,
    pub content: Vec<u8>,
}

/// 分析工作流引擎
pub struct AnalysisWorkflow {
    db: DatabasePool,
    storage: Arc<StorageManager>,
    inference: Arc<dyn CvInference>,
    state_machine: AnalysisStateMachine,
}

impl AnalysisWorkflow {
    pub fn new(
        db: DatabasePool,
        storage: Arc<StorageManager>,
        inference: Arc<dyn CvInference>,
    ) -> Self {
        Self {
            db,
            storage,
            inference,
            state_machine: AnalysisStateMachine::new(),
        }
    }

    /// 上传影像并执行CV分析
    ///
    /// 1. 影像分块落盘（失败即中止，无半成品文件、无数据库行）
    /// 2. 单事务创建患者（按需自动建档）、分析、占位结果
    /// 3. 事务外调用推理协作方
    /// 4. 幂等应用推理输出
    pub async fn upload_and_analyze(
        &self,
        diagnostician_id: i64,
        mrn: &str,
        image: ImageUpload,
    ) -> Result<AnalysisDetail> {
        let stored = self
            .storage
            .store_image(&image.filename, &image.content)
            .await?;

        let queries = DatabaseQueries::new(&self.db);
        let new_analysis = NewAnalysis {
            patient_mrn: mrn.to_string(),
            diagnostician_id,
            image_path: stored.relative_path.clone(),
        };
        let (patient, analysis, _placeholder) =
            queries.create_analysis_with_result(&new_analysis).await?;

        info!(
            analysis_id = analysis.id,
            patient_id = patient.id,
            diagnostician_id,
            mrn,
            "Analysis created, dispatching inference"
        );

        let output = self.inference.analyze(&stored.relative_path).await?;
        validate_inference_output(&output)?;

        queries
            .apply_inference_output(
                analysis.id,
                &output.diagnosis,
                output.confidence,
                &output.segmentation_path,
            )
            .await?;

        info!(
            analysis_id = analysis.id,
            diagnosis = %output.diagnosis,
            confidence = output.confidence,
            "Inference output applied"
        );

        self.get_detail(analysis.id).await
    }

    /// 确认诊断结论并记录反馈
    ///
    /// 仅分析的归属诊断医生可确认；重复确认按 last-write-wins 覆盖。
    pub async fn confirm(
        &self,
        analysis_id: i64,
        actor_id: i64,
        conclusion: &str,
        is_correct: bool,
    ) -> Result<AnalysisDetail> {
        let detail = self.get_detail(analysis_id).await?;
        ensure_owner(&detail.analysis, actor_id)?;

        let result = detail.result.as_ref().ok_or_else(|| {
            MedcvError::NotFound(format!("分析 {analysis_id} 的结果不存在"))
        })?;

        let stage = result.stage();
        if !self
            .state_machine
            .can_transition(&stage, &AnalysisEvent::Confirm)
        {
            warn!(
                analysis_id,
                %stage,
                "Confirming outside the nominal flow (inference output not yet applied)"
            );
        }

        let feedback = if is_correct {
            Feedback::Correct
        } else {
            Feedback::Incorrect
        };

        let queries = DatabaseQueries::new(&self.db);
        queries
            .update_conclusion(analysis_id, conclusion, feedback)
            .await?;

        info!(
            analysis_id,
            actor_id,
            feedback = ?feedback,
            "Diagnosis confirmed"
        );

        self.get_detail(analysis_id).await
    }

    /// 制定治疗方案
    ///
    /// 不以确认为前置条件（软约束）：未确认时放行并记录警告。
    pub async fn prescribe(
        &self,
        analysis_id: i64,
        clinician_id: i64,
        treatment_plan: &str,
    ) -> Result<AnalysisDetail> {
        let detail = self.get_detail(analysis_id).await?;

        let result = detail.result.as_ref().ok_or_else(|| {
            MedcvError::NotFound(format!("分析 {analysis_id} 的结果不存在"))
        })?;

        let stage = result.stage();
        if !self
            .state_machine
            .can_transition(&stage, &AnalysisEvent::Prescribe)
        {
            warn!(
                analysis_id,
                %stage,
                "Prescribing before diagnostician confirmation"
            );
        }

        let queries = DatabaseQueries::new(&self.db);
        queries
            .update_treatment(analysis_id, clinician_id, treatment_plan)
            .await?;

        info!(analysis_id, clinician_id, "Treatment plan recorded");

        self.get_detail(analysis_id).await
    }

    /// 获取指定诊断医生的分析历史（新在前）
    pub async fn owned_history(&self, diagnostician_id: i64) -> Result<Vec<AnalysisDetail>> {
        DatabaseQueries::new(&self.db)
            .get_analyses_for_diagnostician(diagnostician_id)
            .await
    }

    /// 获取单个分析的组合视图
    pub async fn get_detail(&self, analysis_id: i64) -> Result<AnalysisDetail> {
        DatabaseQueries::new(&self.db)
            .get_analysis_detail(analysis_id)
            .await?
            .ok_or_else(|| MedcvError::NotFound(format!("分析 {analysis_id} 不存在")))
    }

    /// 获取患者的完整分析历史
    pub async fn patient_history(&self, mrn: &str) -> Result<PatientHistory> {
        let queries = DatabaseQueries::new(&self.db);

        let patient = queries
            .get_patient_by_mrn(mrn)
            .await?
            .ok_or_else(|| MedcvError::NotFound(format!("患者 MRN {mrn} 不存在")))?;

        let analyses = queries.get_analyses_for_patient(patient.id).await?;

        Ok(PatientHistory { patient, analyses })
    }

    /// 管理员全局视图（分页，新在前）
    pub async fn list_all(&self, offset: i64, limit: i64) -> Result<Vec<AnalysisDetail>> {
        DatabaseQueries::new(&self.db)
            .list_all_analyses(offset, limit)
            .await
    }

    /// 模型反馈指标
    pub async fn feedback_metrics(&self) -> Result<FeedbackMetrics> {
        let (total_confirmed, correct_predictions) =
            DatabaseQueries::new(&self.db).count_feedback().await?;

        Ok(FeedbackMetrics::from_counts(
            total_confirmed,
            correct_predictions,
        ))
    }
}

/// 归属校验：仅创建分析的诊断医生可确认
fn ensure_owner(analysis: &Analysis, actor_id: i64) -> Result<()> {
    if analysis.diagnostician_id == actor_id {
        Ok(())
    } else {
        Err(MedcvError::Forbidden(
            "只有该分析的归属诊断医生可以确认".to_string(),
        ))
    }
}

/// 推理输出契约校验：置信度必须落在 [0, 1]
fn validate_inference_output(output: &InferenceOutput) -> Result<()> {
    if (0.0..=1.0).contains(&output.confidence) {
        Ok(())
    } else {
        Err(MedcvError::Upstream(format!(
            "推理置信度越界: {}",
            output.confidence
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn analysis_owned_by(diagnostician_id: i64) -> Analysis {
        Analysis {
            id: 1,
            patient_id: 10,
            diagnostician_id,
            clinician_id: None,
            image_path: "uploads/abc.png".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_ensure_owner_accepts_owner() {
        let analysis = analysis_owned_by(42);
        assert!(ensure_owner(&analysis, 42).is_ok());
    }

    #[test]
    fn test_ensure_owner_rejects_other_diagnostician() {
        let analysis = analysis_owned_by(42);
        let err = ensure_owner(&analysis, 43).unwrap_err();
        assert!(matches!(err, MedcvError::Forbidden(_)));
    }

    #[test]
    fn test_inference_confidence_bounds() {
        let mut output = InferenceOutput {
            diagnosis: "Probable pneumonia (CV stub)".to_string(),
            confidence: 0.85,
            segmentation_path: "segmentations/abc_mask.png".to_string(),
        };
        assert!(validate_inference_output(&output).is_ok());

        output.confidence = 1.3;
        assert!(matches!(
            validate_inference_output(&output),
            Err(MedcvError::Upstream(_))
        ));

        output.confidence = -0.1;
        assert!(validate_inference_output(&output).is_err());
    }
}
