//! 通用工具函数

use std::path::Path;

/// 提取文件名的扩展名（含点号），无扩展名时返回空串
pub fn file_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

/// 提取文件名的主干部分（不含目录与扩展名）
pub fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("image")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("chest.png"), ".png");
        assert_eq!(file_extension("scan.DCM"), ".DCM");
        assert_eq!(file_extension("noext"), "");
        assert_eq!(file_extension("dir/sub/image.jpeg"), ".jpeg");
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("chest.png"), "chest");
        assert_eq!(file_stem("dir/sub/image.jpeg"), "image");
        assert_eq!(file_stem(""), "image");
    }
}
