//! # MEDCV存储模块
//!
//! 负责上传影像与分割产物的本地持久化：分块写入、内容寻址路径、失败清理。

pub mod storage;

pub use storage::{StorageManager, StoredImage};
