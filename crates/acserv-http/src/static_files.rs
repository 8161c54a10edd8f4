//! Files served from the public directory

use http::header::{HeaderValue, CONNECTION, CONTENT_TYPE};
use http::StatusCode;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::ResponseRecorder;

const NOT_FOUND_BODY: &[u8] = b"<html><body><h1>404 Not Found</h1></body></html>";

/// Serve `path` from `root`, or a 404 page
pub async fn serve(root: &Path, path: &str, recorder: &mut ResponseRecorder) {
    let file = root.join(clean_path(path));

    match tokio::fs::metadata(&file).await {
        Ok(meta) if meta.is_file() => {}
        _ => {
            debug!("Static file not found: {}", path);
            not_found(recorder);
            return;
        }
    }

    match tokio::fs::read(&file).await {
        Ok(content) => {
            recorder.write(&content);
            if let Some(content_type) = content_type_for(path) {
                if let Ok(value) = HeaderValue::from_str(&content_type) {
                    recorder.headers_mut().insert(CONTENT_TYPE, value);
                }
            }
        }
        Err(e) => {
            debug!("Failed to read {}: {}", file.display(), e);
            not_found(recorder);
        }
    }
}

/// 404 with a fixed body; the connection is closed afterwards
pub fn not_found(recorder: &mut ResponseRecorder) {
    recorder.set_status(StatusCode::NOT_FOUND);
    recorder.set_header(CONNECTION, "close");
    recorder.write(NOT_FOUND_BODY);
}

/// Resolve `.` and `..` lexically so the result stays below the root
fn clean_path(path: &str) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => cleaned.push(part),
            Component::ParentDir => {
                cleaned.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    cleaned
}

/// MIME type from the file extension, parameters stripped
fn content_type_for(path: &str) -> Option<String> {
    let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();

    let mime = match ext.as_str() {
        "sh" => "application/x-shellscript".to_string(),
        "txt" => "text/plain".to_string(),
        _ => mime_guess::from_ext(&ext).first()?.essence_str().to_string(),
    };

    Some(match mime.split_once(';') {
        Some((essence, _)) => essence.trim().to_string(),
        None => mime,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("/a/b.txt"), PathBuf::from("a/b.txt"));
        assert_eq!(clean_path("/../../etc/passwd"), PathBuf::from("etc/passwd"));
        assert_eq!(clean_path("/a/./b/../c"), PathBuf::from("a/c"));
        assert_eq!(clean_path("/"), PathBuf::new());
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("/install.sh").as_deref(), Some("application/x-shellscript"));
        assert_eq!(content_type_for("/notes.TXT").as_deref(), Some("text/plain"));
        assert_eq!(content_type_for("/index.html").as_deref(), Some("text/html"));
        assert_eq!(content_type_for("/README"), None);
        assert_eq!(content_type_for("/blob.unknownext"), None);
    }

    #[tokio::test]
    async fn test_serve_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("profile.xml"), b"<profile/>").unwrap();

        let mut recorder = ResponseRecorder::new();
        serve(dir.path(), "/profile.xml", &mut recorder).await;

        assert_eq!(recorder.status(), StatusCode::OK);
        assert_eq!(recorder.body(), b"<profile/>");
        assert_eq!(recorder.headers()[CONTENT_TYPE], "text/xml");
    }

    #[tokio::test]
    async fn test_serve_missing_file() {
        let dir = tempfile::tempdir().unwrap();

        let mut recorder = ResponseRecorder::new();
        serve(dir.path(), "/does-not-exist", &mut recorder).await;

        assert_eq!(recorder.status(), StatusCode::NOT_FOUND);
        assert_eq!(recorder.headers()[CONNECTION], "close");
        assert_eq!(recorder.body(), NOT_FOUND_BODY);
        assert!(recorder.wants_close());
    }

    #[tokio::test]
    async fn test_directory_is_not_served() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let mut recorder = ResponseRecorder::new();
        serve(dir.path(), "/sub", &mut recorder).await;
        assert_eq!(recorder.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_traversal_stays_in_root() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("public");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(outer.path().join("secret.txt"), b"secret").unwrap();

        let mut recorder = ResponseRecorder::new();
        serve(&root, "/../secret.txt", &mut recorder).await;
        assert_eq!(recorder.status(), StatusCode::NOT_FOUND);
    }
}
