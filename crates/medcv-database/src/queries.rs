//! 数据库查询操作

use crate::connection::DatabasePool;
use crate::models::*;
use medcv_core::{
    Analysis, AnalysisDetail, AnalysisResult, Feedback, MedcvError, Patient, Result, User,
};
use sqlx::{PgConnection, Postgres, Transaction};

/// 分析组合视图的公共SELECT片段
const ANALYSIS_DETAIL_SELECT: &str = r#"
    SELECT a.id, a.patient_id, a.diagnostician_id, a.clinician_id, a.image_path, a.created_at,
           p.first_name, p.last_name, p.date_of_birth, p.medical_record_number,
           p.created_at AS patient_created_at,
           u.username AS diagnostician_username, u.role AS diagnostician_role,
           u.is_active AS diagnostician_active,
           r.id AS result_id, r.system_diagnosis, r.system_confidence, r.segmentation_path,
           r.diagnostician_conclusion, r.is_confirmed, r.feedback_correct, r.treatment_plan
    FROM analyses a
    JOIN patients p ON p.id = a.patient_id
    JOIN users u ON u.id = a.diagnostician_id
    LEFT JOIN results r ON r.analysis_id = a.id
"#;

/// 数据库查询操作接口
pub struct DatabaseQueries<'a> {
    pool: &'a DatabasePool,
}

impl<'a> DatabaseQueries<'a> {
    pub fn new(pool: &'a DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        // 创建用户表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGSERIAL PRIMARY KEY,
                username VARCHAR(64) UNIQUE NOT NULL,
                password_hash VARCHAR(128) NOT NULL,
                role VARCHAR(16) NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| MedcvError::Database(e.to_string()))?;

        // 创建患者表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS patients (
                id BIGSERIAL PRIMARY KEY,
                first_name VARCHAR(128),
                last_name VARCHAR(128),
                date_of_birth DATE,
                medical_record_number VARCHAR(64) UNIQUE NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| MedcvError::Database(e.to_string()))?;

        // 创建分析表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS analyses (
                id BIGSERIAL PRIMARY KEY,
                patient_id BIGINT NOT NULL REFERENCES patients(id),
                diagnostician_id BIGINT NOT NULL REFERENCES users(id),
                clinician_id BIGINT REFERENCES users(id),
                image_path VARCHAR(512) NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| MedcvError::Database(e.to_string()))?;

        // 创建结果表（与分析表一对一）
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS results (
                id BIGSERIAL PRIMARY KEY,
                analysis_id BIGINT UNIQUE NOT NULL REFERENCES analyses(id),
                system_diagnosis TEXT,
                system_confidence DOUBLE PRECISION,
                segmentation_path VARCHAR(512),
                diagnostician_conclusion TEXT,
                is_confirmed BOOLEAN NOT NULL DEFAULT FALSE,
                feedback_correct SMALLINT NOT NULL DEFAULT -1,
                treatment_plan TEXT
            )
        "#).execute(pool).await.map_err(|e| MedcvError::Database(e.to_string()))?;

        // 创建索引以优化查询性能
        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let indexes = vec![
            "CREATE INDEX IF NOT EXISTS idx_users_username ON users(username)",
            "CREATE INDEX IF NOT EXISTS idx_patients_mrn ON patients(medical_record_number)",
            "CREATE INDEX IF NOT EXISTS idx_analyses_patient_id ON analyses(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_analyses_diagnostician_id ON analyses(diagnostician_id)",
            "CREATE INDEX IF NOT EXISTS idx_analyses_created_at ON analyses(created_at)",
            "CREATE INDEX IF NOT EXISTS idx_results_analysis_id ON results(analysis_id)",
            "CREATE INDEX IF NOT EXISTS idx_results_is_confirmed ON results(is_confirmed)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql)
                .execute(pool)
                .await
                .map_err(|e| MedcvError::Database(e.to_string()))?;
        }

        tracing::info!("Database indexes created successfully");
        Ok(())
    }

    // ========== 用户相关操作 ==========

    /// 创建新用户
    ///
    /// 用户名冲突映射为 Conflict 错误（唯一约束 23505）。
    pub async fn create_user(&self, new_user: &NewUser) -> Result<User> {
        let pool = self.pool.pool();

        let db_user = sqlx::query_as::<_, DbUser>(r#"
            INSERT INTO users (username, password_hash, role)
            VALUES ($1, $2, $3)
            RETURNING *
        "#)
        .bind(&new_user.username)
        .bind(&new_user.password_hash)
        .bind(new_user.role.as_str())
        .fetch_one(pool)
        .await
        .map_err(|e| map_unique_violation(e, "用户名已存在"))?;

        Ok(db_user.into())
    }

    /// 根据用户名查找用户
    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let pool = self.pool.pool();

        let result = sqlx::query_as::<_, DbUser>(
            "SELECT * FROM users WHERE username = $1"
        )
        .bind(username)
        .fetch_optional(pool)
        .await
        .map_err(|e| MedcvError::Database(e.to_string()))?;

        Ok(result.map(User::from))
    }

    /// 根据ID查找用户
    pub async fn get_user_by_id(&self, user_id: i64) -> Result<Option<User>> {
        let pool = self.pool.pool();

        let result = sqlx::query_as::<_, DbUser>(
            "SELECT * FROM users WHERE id = $1"
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| MedcvError::Database(e.to_string()))?;

        Ok(result.map(User::from))
    }

    /// 获取用户列表（分页）
    pub async fn list_users(&self, offset: i64, limit: i64) -> Result<Vec<User>> {
        let pool = self.pool.pool();

        let results = sqlx::query_as::<_, DbUser>(
            "SELECT * FROM users ORDER BY id OFFSET $1 LIMIT $2"
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(|e| MedcvError::Database(e.to_string()))?;

        Ok(results.into_iter().map(User::from).collect())
    }

    /// 更新用户角色
    pub async fn update_user_role(
        &self,
        user_id: i64,
        role: medcv_core::UserRole,
    ) -> Result<User> {
        let pool = self.pool.pool();

        let result = sqlx::query_as::<_, DbUser>(
            "UPDATE users SET role = $2 WHERE id = $1 RETURNING *"
        )
        .bind(user_id)
        .bind(role.as_str())
        .fetch_optional(pool)
        .await
        .map_err(|e| MedcvError::Database(e.to_string()))?;

        result
            .map(User::from)
            .ok_or_else(|| MedcvError::NotFound(format!("用户 {user_id} 不存在")))
    }

    // ========== 患者相关操作 ==========

    /// 根据MRN查找患者
    pub async fn get_patient_by_mrn(&self, mrn: &str) -> Result<Option<Patient>> {
        let pool = self.pool.pool();

        let result = sqlx::query_as::<_, DbPatient>(
            "SELECT * FROM patients WHERE medical_record_number = $1"
        )
        .bind(mrn)
        .fetch_optional(pool)
        .await
        .map_err(|e| MedcvError::Database(e.to_string()))?;

        Ok(result.map(Patient::from))
    }

    /// 根据MRN查找患者，不存在时自动建档
    ///
    /// 自动建档策略：MRN来自上传表单的自由文本，不做格式校验，
    /// 也不做重复意图检测；仅写入MRN，姓名与出生日期留空。
    pub async fn find_or_create_patient_by_mrn(&self, mrn: &str) -> Result<Patient> {
        let mut conn = self
            .pool
            .pool()
            .acquire()
            .await
            .map_err(|e| MedcvError::Database(e.to_string()))?;

        find_or_create_patient(&mut conn, mrn).await
    }

    // ========== 分析相关操作 ==========

    /// 在单事务中创建分析及其占位结果
    ///
    /// 患者按MRN在同一事务内解析或自动建档；
    /// 分析与占位结果要么同时落库，要么都不落库。
    pub async fn create_analysis_with_result(
        &self,
        new_analysis: &NewAnalysis,
    ) -> Result<(Patient, Analysis, AnalysisResult)> {
        let mut tx: Transaction<'_, Postgres> = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| MedcvError::Database(e.to_string()))?;

        let patient = find_or_create_patient(&mut tx, &new_analysis.patient_mrn).await?;

        let db_analysis = sqlx::query_as::<_, DbAnalysis>(r#"
            INSERT INTO analyses (patient_id, diagnostician_id, image_path)
            VALUES ($1, $2, $3)
            RETURNING *
        "#)
        .bind(patient.id)
        .bind(new_analysis.diagnostician_id)
        .bind(&new_analysis.image_path)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| MedcvError::Database(e.to_string()))?;

        // 占位结果：推理输出稍后以幂等更新方式写入
        let db_result = sqlx::query_as::<_, DbResult>(r#"
            INSERT INTO results (analysis_id)
            VALUES ($1)
            RETURNING *
        "#)
        .bind(db_analysis.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| MedcvError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| MedcvError::Database(e.to_string()))?;

        Ok((patient, db_analysis.into(), db_result.into()))
    }

    /// 应用CV推理输出（按analysis_id幂等更新）
    pub async fn apply_inference_output(
        &self,
        analysis_id: i64,
        diagnosis: &str,
        confidence: f64,
        segmentation_path: &str,
    ) -> Result<AnalysisResult> {
        let pool = self.pool.pool();

        let result = sqlx::query_as::<_, DbResult>(r#"
            UPDATE results
            SET system_diagnosis = $2, system_confidence = $3, segmentation_path = $4
            WHERE analysis_id = $1
            RETURNING *
        "#)
        .bind(analysis_id)
        .bind(diagnosis)
        .bind(confidence)
        .bind(segmentation_path)
        .fetch_optional(pool)
        .await
        .map_err(|e| MedcvError::Database(e.to_string()))?;

        result
            .map(AnalysisResult::from)
            .ok_or_else(|| MedcvError::NotFound(format!("分析 {analysis_id} 的结果不存在")))
    }

    /// 更新诊断结论与反馈（last-write-wins，允许重复确认）
    pub async fn update_conclusion(
        &self,
        analysis_id: i64,
        conclusion: &str,
        feedback: Feedback,
    ) -> Result<AnalysisResult> {
        let pool = self.pool.pool();

        let result = sqlx::query_as::<_, DbResult>(r#"
            UPDATE results
            SET diagnostician_conclusion = $2, is_confirmed = TRUE, feedback_correct = $3
            WHERE analysis_id = $1
            RETURNING *
        "#)
        .bind(analysis_id)
        .bind(conclusion)
        .bind(feedback.as_db_value())
        .fetch_optional(pool)
        .await
        .map_err(|e| MedcvError::Database(e.to_string()))?;

        result
            .map(AnalysisResult::from)
            .ok_or_else(|| MedcvError::NotFound(format!("分析 {analysis_id} 的结果不存在")))
    }

    /// 更新治疗方案并回填临床医生（单事务，两表同写）
    pub async fn update_treatment(
        &self,
        analysis_id: i64,
        clinician_id: i64,
        treatment_plan: &str,
    ) -> Result<()> {
        let mut tx: Transaction<'_, Postgres> = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| MedcvError::Database(e.to_string()))?;

        let updated = sqlx::query(r#"
            UPDATE results SET treatment_plan = $2 WHERE analysis_id = $1
        "#)
        .bind(analysis_id)
        .bind(treatment_plan)
        .execute(&mut *tx)
        .await
        .map_err(|e| MedcvError::Database(e.to_string()))?;

        if updated.rows_affected() == 0 {
            return Err(MedcvError::NotFound(format!(
                "分析 {analysis_id} 的结果不存在"
            )));
        }

        sqlx::query(r#"
            UPDATE analyses SET clinician_id = $2 WHERE id = $1
        "#)
        .bind(analysis_id)
        .bind(clinician_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| MedcvError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| MedcvError::Database(e.to_string()))?;

        Ok(())
    }

    /// 根据ID获取分析组合视图
    pub async fn get_analysis_detail(&self, analysis_id: i64) -> Result<Option<AnalysisDetail>> {
        let pool = self.pool.pool();
        let sql = format!("{ANALYSIS_DETAIL_SELECT} WHERE a.id = $1");

        let result = sqlx::query_as::<_, DbAnalysisDetail>(&sql)
            .bind(analysis_id)
            .fetch_optional(pool)
            .await
            .map_err(|e| MedcvError::Database(e.to_string()))?;

        Ok(result.map(AnalysisDetail::from))
    }

    /// 获取指定诊断医生的分析历史（新在前）
    pub async fn get_analyses_for_diagnostician(
        &self,
        diagnostician_id: i64,
    ) -> Result<Vec<AnalysisDetail>> {
        let pool = self.pool.pool();
        let sql = format!(
            "{ANALYSIS_DETAIL_SELECT} WHERE a.diagnostician_id = $1 ORDER BY a.created_at DESC, a.id DESC"
        );

        let results = sqlx::query_as::<_, DbAnalysisDetail>(&sql)
            .bind(diagnostician_id)
            .fetch_all(pool)
            .await
            .map_err(|e| MedcvError::Database(e.to_string()))?;

        Ok(results.into_iter().map(AnalysisDetail::from).collect())
    }

    /// 获取指定患者的全部分析（新在前）
    pub async fn get_analyses_for_patient(&self, patient_id: i64) -> Result<Vec<AnalysisDetail>> {
        let pool = self.pool.pool();
        let sql = format!(
            "{ANALYSIS_DETAIL_SELECT} WHERE a.patient_id = $1 ORDER BY a.created_at DESC, a.id DESC"
        );

        let results = sqlx::query_as::<_, DbAnalysisDetail>(&sql)
            .bind(patient_id)
            .fetch_all(pool)
            .await
            .map_err(|e| MedcvError::Database(e.to_string()))?;

        Ok(results.into_iter().map(AnalysisDetail::from).collect())
    }

    /// 获取系统内全部分析（管理员全局视图，分页，新在前）
    pub async fn list_all_analyses(&self, offset: i64, limit: i64) -> Result<Vec<AnalysisDetail>> {
        let pool = self.pool.pool();
        let sql = format!(
            "{ANALYSIS_DETAIL_SELECT} ORDER BY a.created_at DESC, a.id DESC OFFSET $1 LIMIT $2"
        );

        let results = sqlx::query_as::<_, DbAnalysisDetail>(&sql)
            .bind(offset)
            .bind(limit)
            .fetch_all(pool)
            .await
            .map_err(|e| MedcvError::Database(e.to_string()))?;

        Ok(results.into_iter().map(AnalysisDetail::from).collect())
    }

    // ========== 反馈指标 ==========

    /// 聚合已确认结果的反馈计数
    ///
    /// 返回 (已确认总数, 被标记为正确的数量)。
    pub async fn count_feedback(&self) -> Result<(i64, i64)> {
        let pool = self.pool.pool();

        let counts: (i64, i64) = sqlx::query_as(r#"
            SELECT COUNT(*) FILTER (WHERE is_confirmed) AS total_confirmed,
                   COUNT(*) FILTER (WHERE is_confirmed AND feedback_correct = 1) AS correct_predictions
            FROM results
        "#)
        .fetch_one(pool)
        .await
        .map_err(|e| MedcvError::Database(e.to_string()))?;

        Ok(counts)
    }
}

/// 在给定连接上按MRN解析患者，不存在时自动建档
///
/// 以 ON CONFLICT DO NOTHING + 复查的方式处理并发建档，
/// 同一MRN在任何交错下都只会产生一条患者记录。
async fn find_or_create_patient(conn: &mut PgConnection, mrn: &str) -> Result<Patient> {
    let existing = sqlx::query_as::<_, DbPatient>(
        "SELECT * FROM patients WHERE medical_record_number = $1"
    )
    .bind(mrn)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| MedcvError::Database(e.to_string()))?;

    if let Some(db_patient) = existing {
        return Ok(db_patient.into());
    }

    let inserted = sqlx::query_as::<_, DbPatient>(r#"
        INSERT INTO patients (medical_record_number)
        VALUES ($1)
        ON CONFLICT (medical_record_number) DO NOTHING
        RETURNING *
    "#)
    .bind(mrn)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| MedcvError::Database(e.to_string()))?;

    match inserted {
        Some(db_patient) => {
            tracing::info!(mrn, "Auto-provisioned patient record");
            Ok(db_patient.into())
        }
        // 并发写入者抢先建档，复查取回已有记录
        None => {
            let db_patient = sqlx::query_as::<_, DbPatient>(
                "SELECT * FROM patients WHERE medical_record_number = $1"
            )
            .bind(mrn)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| MedcvError::Database(e.to_string()))?;

            Ok(db_patient.into())
        }
    }
}

/// 唯一约束冲突映射为 Conflict，其余映射为 Database
fn map_unique_violation(e: sqlx::Error, conflict_message: &str) -> MedcvError {
    match &e {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
            MedcvError::Conflict(conflict_message.to_string())
        }
        _ => MedcvError::Database(e.to_string()),
    }
}
