//! CV推理协作方
//!
//! 推理调用被限定在 trait 边界之后：当前为同步返回固定结果的占位实现，
//! 换成真实的异步推理服务时周边事务形态不变。

use async_trait::async_trait;
use medcv_core::{utils, Result};
use serde::{Deserialize, Serialize};

/// 推理输出
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceOutput {
    pub diagnosis: String,
    pub confidence: f64, // [0, 1]
    pub segmentation_path: String,
}

/// CV推理协作方接口
#[async_trait]
pub trait CvInference: Send + Sync {
    /// 对已落盘的影像执行推理
    async fn analyze(&self, image_path: &str) -> Result<InferenceOutput>;
}

/// 占位CV模型
///
/// 返回固定的诊断与置信度；分割产物路径由影像文件名主干推导。
/// 真实系统中此处为模型推理（分类/分割）并落盘分割掩码。
pub struct StubCvModel;

#[async_trait]
impl CvInference for StubCvModel {
    async fn analyze(&self, image_path: &str) -> Result<InferenceOutput> {
        let stem = utils::file_stem(image_path);

        Ok(InferenceOutput {
            diagnosis: "Probable pneumonia (CV stub)".to_string(),
            confidence: 0.85,
            segmentation_path: format!("segmentations/{stem}_mask.png"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_output_is_fixed() {
        let model = StubCvModel;
        let output = model.analyze("uploads/abc123.png").await.unwrap();

        assert_eq!(output.diagnosis, "Probable pneumonia (CV stub)");
        assert!((0.0..=1.0).contains(&output.confidence));
        assert_eq!(output.segmentation_path, "segmentations/abc123_mask.png");
    }
}
