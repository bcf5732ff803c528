//! 소스 파일 탐색
//!
//! 로그 디렉토리에서 지정된 확장자의 파일을 이름순으로 나열합니다.

use std::path::{Path, PathBuf};

use crate::error::IngestError;

/// `dir`에서 `extension`으로 끝나는 일반 파일을 이름순으로 반환합니다.
pub async fn discover(dir: impl AsRef<Path>, extension: &str) -> Result<Vec<PathBuf>, IngestError> {
    let dir = dir.as_ref();
    let extension = extension.trim_start_matches('.');
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| IngestError::FileRead {
        path: dir.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        if entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_matching_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.log", "a.log", "notes.txt", "c.log.gz"] {
            tokio::fs::write(dir.path().join(name), b"x\n").await.unwrap();
        }
        tokio::fs::create_dir(dir.path().join("nested.log")).await.unwrap();

        let files = discover(dir.path(), "log").await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_owned())
            .collect();
        assert_eq!(names, vec!["a.log", "b.log"]);
    }

    #[tokio::test]
    async fn leading_dot_in_extension_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("x.log"), b"x\n").await.unwrap();
        assert_eq!(discover(dir.path(), ".log").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_directory_is_error() {
        let err = discover("/nonexistent/logsift", "log").await.unwrap_err();
        assert!(matches!(err, IngestError::FileRead { .. }));
    }
}
