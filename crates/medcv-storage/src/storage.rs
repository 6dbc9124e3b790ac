//! 影像存储管理

use medcv_core::{utils, MedcvError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// 上传目录
const UPLOAD_DIR: &str = "uploads";
/// 分割产物目录
const SEGMENTATION_DIR: &str = "segmentations";
/// 临时写入目录
const TMP_DIR: &str = "tmp";
/// 分块写入大小（与上传链路的分块粒度一致）
const CHUNK_SIZE: usize = 1024 * 1024;

/// 已落盘影像的描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredImage {
    pub relative_path: String,
    pub size_bytes: u64,
    pub sha256_hex: String,
}

/// 存储管理器
///
/// 影像按内容寻址存放：最终路径由内容SHA-256前缀决定，
/// 相同内容重复上传得到同一路径。写入先落临时文件，
/// 成功后原子改名，任何失败路径都不会留下半成品文件。
pub struct StorageManager {
    base_path: PathBuf,
}

impl StorageManager {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// 初始化存储目录结构
    pub async fn init(&self) -> Result<()> {
        for dir in [UPLOAD_DIR, SEGMENTATION_DIR, TMP_DIR] {
            tokio::fs::create_dir_all(self.base_path.join(dir))
                .await
                .map_err(|e| MedcvError::Storage(format!("创建存储目录失败: {e}")))?;
        }

        tracing::info!(base_path = %self.base_path.display(), "Storage directories ready");
        Ok(())
    }

    /// 存储上传的影像
    pub async fn store_image(&self, filename: &str, data: &[u8]) -> Result<StoredImage> {
        let tmp_path = self
            .base_path
            .join(TMP_DIR)
            .join(format!("{}.part", Uuid::new_v4()));

        let sha256_hex = match write_chunked(&tmp_path, data).await {
            Ok(hex) => hex,
            Err(e) => {
                // 失败路径：清理临时文件，不留半成品
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(MedcvError::Storage(format!("影像写入失败: {e}")));
            }
        };

        let stored_name = format!("{}{}", &sha256_hex[..16], utils::file_extension(filename));
        let relative_path = format!("{UPLOAD_DIR}/{stored_name}");
        let final_path = self.base_path.join(&relative_path);

        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(MedcvError::Storage(format!("影像落盘失败: {e}")));
        }

        tracing::info!(
            filename,
            relative_path,
            size_bytes = data.len(),
            "Image stored"
        );

        Ok(StoredImage {
            relative_path,
            size_bytes: data.len() as u64,
            sha256_hex,
        })
    }

    /// 读取已存储的文件（影像或分割产物）
    pub async fn read_image(&self, relative_path: &str) -> Result<Vec<u8>> {
        let full_path = self.base_path.join(relative_path);
        tokio::fs::read(&full_path)
            .await
            .map_err(|e| MedcvError::Storage(format!("读取文件 {relative_path} 失败: {e}")))
    }

    pub fn absolute_path(&self, relative_path: &str) -> PathBuf {
        self.base_path.join(relative_path)
    }
}

/// 分块写入临时文件并计算内容SHA-256
async fn write_chunked(path: &Path, data: &[u8]) -> std::io::Result<String> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut hasher = Sha256::new();

    for chunk in data.chunks(CHUNK_SIZE) {
        hasher.update(chunk);
        file.write_all(chunk).await?;
    }

    file.flush().await?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_store_and_read_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = StorageManager::new(dir.path());
        storage.init().await.unwrap();

        let data = b"fake png bytes".to_vec();
        let stored = storage.store_image("chest.png", &data).await.unwrap();

        assert!(stored.relative_path.starts_with("uploads/"));
        assert!(stored.relative_path.ends_with(".png"));
        assert_eq!(stored.size_bytes, data.len() as u64);

        let read_back = storage.read_image(&stored.relative_path).await.unwrap();
        assert_eq!(read_back, data);
    }

    #[tokio::test]
    async fn test_content_addressed_path_is_deterministic() {
        let dir = tempdir().unwrap();
        let storage = StorageManager::new(dir.path());
        storage.init().await.unwrap();

        let first = storage.store_image("a.png", b"same content").await.unwrap();
        let second = storage.store_image("b.png", b"same content").await.unwrap();
        let other = storage.store_image("c.png", b"other content").await.unwrap();

        // 同内容不同文件名 → 扩展名相同时路径只由内容决定
        assert_eq!(first.sha256_hex, second.sha256_hex);
        assert_ne!(first.sha256_hex, other.sha256_hex);
        assert_ne!(first.relative_path, other.relative_path);
    }

    #[tokio::test]
    async fn test_read_missing_file_is_storage_error() {
        let dir = tempdir().unwrap();
        let storage = StorageManager::new(dir.path());
        storage.init().await.unwrap();

        let err = storage.read_image("uploads/nope.png").await.unwrap_err();
        assert!(matches!(err, MedcvError::Storage(_)));
    }
}
