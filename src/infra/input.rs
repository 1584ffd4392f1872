use std::path::{Path, PathBuf};

use mime_guess::mime;
use thiserror::Error;
use tokio::io::AsyncReadExt;

#[derive(Debug, Error)]
pub enum InputError {
    #[error(
        "`{path}` is not a text file; upload a .txt or .md file (for PDFs, copy and paste the text instead)"
    )]
    NotText { path: PathBuf },
    #[error("failed to read input {source_name}: {source}")]
    Read {
        source_name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Only `text/*` files are accepted, judged by extension the way a browser file picker would.
pub fn ensure_text_file(path: &Path) -> Result<(), InputError> {
    let is_text = mime_guess::from_path(path)
        .iter()
        .any(|guess| guess.type_() == mime::TEXT);
    if is_text {
        Ok(())
    } else {
        Err(InputError::NotText {
            path: path.to_path_buf(),
        })
    }
}

pub async fn read_text_file(path: &Path) -> Result<String, InputError> {
    ensure_text_file(path)?;
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| InputError::Read {
            source_name: path.display().to_string(),
            source,
        })
}

pub async fn read_stdin() -> Result<String, InputError> {
    let mut buffer = String::new();
    tokio::io::stdin()
        .read_to_string(&mut buffer)
        .await
        .map_err(|source| InputError::Read {
            source_name: "stdin".to_string(),
            source,
        })?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_text_and_markdown() {
        assert!(ensure_text_file(Path::new("notes.txt")).is_ok());
        assert!(ensure_text_file(Path::new("lecture.md")).is_ok());
    }

    #[test]
    fn rejects_binary_documents() {
        let err = ensure_text_file(Path::new("slides.pdf")).expect_err("pdf rejected");
        assert!(err.to_string().contains("copy and paste"));
        assert!(ensure_text_file(Path::new("photo.png")).is_err());
    }

    #[tokio::test]
    async fn reads_text_file_contents() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("input.txt");
        std::fs::write(&path, "Entropy and $S = k \\ln W$").expect("write");

        let text = read_text_file(&path).await.expect("read");
        assert!(text.starts_with("Entropy"));
    }
}
