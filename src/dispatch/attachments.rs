//! Attachment path validation.
//!
//! Attachments name files inside the project root. Paths must be relative,
//! free of `..` segments, resolve strictly inside the root, and must not be
//! symbolic links.

use std::path::{Component, Path, PathBuf};

use crate::error::AttachmentError;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp", "svg"];

/// Validate one attachment and return its canonical path.
pub fn validate_attachment(root: &Path, raw: &str) -> Result<PathBuf, AttachmentError> {
    let path = Path::new(raw);
    let err_path = || raw.to_string();

    if raw.trim().is_empty() {
        return Err(AttachmentError::Io {
            path: err_path(),
            reason: "empty path".to_string(),
        });
    }
    if path.is_absolute() || path.has_root() {
        return Err(AttachmentError::Absolute { path: err_path() });
    }
    for component in path.components() {
        match component {
            Component::ParentDir => return Err(AttachmentError::ParentSegment { path: err_path() }),
            Component::Prefix(_) | Component::RootDir => {
                return Err(AttachmentError::Absolute { path: err_path() });
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    let io_err = |e: std::io::Error| AttachmentError::Io {
        path: err_path(),
        reason: e.to_string(),
    };
    let root = root.canonicalize().map_err(io_err)?;
    let joined = root.join(path);

    let metadata = std::fs::symlink_metadata(&joined).map_err(io_err)?;
    if metadata.file_type().is_symlink() {
        return Err(AttachmentError::Symlink { path: err_path() });
    }

    // Symlinked parent directories surface here as an escape.
    let resolved = joined.canonicalize().map_err(io_err)?;
    if resolved == root || !resolved.starts_with(&root) {
        return Err(AttachmentError::OutsideRoot { path: err_path() });
    }
    Ok(resolved)
}

/// Validate every attachment, failing on the first rejection.
pub fn validate_attachments(root: &Path, raw: &[String]) -> Result<Vec<PathBuf>, AttachmentError> {
    raw.iter().map(|p| validate_attachment(root, p)).collect()
}

/// Append an `Attachments:` list to a worker prompt.
pub fn append_attachment_list(prompt: &mut String, attachments: &[String]) {
    if attachments.is_empty() {
        return;
    }
    prompt.push_str("\n\nAttachments:");
    for path in attachments {
        prompt.push_str("\n- ");
        prompt.push_str(path);
    }
}

/// Whether the path names an image by extension.
pub fn is_image(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|i| i.eq_ignore_ascii_case(ext)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("shot.PNG"), [0u8; 4]).unwrap();
        dir
    }

    #[test]
    fn accepts_relative_file() {
        let dir = project();
        let resolved = validate_attachment(dir.path(), "src/main.rs").unwrap();
        assert!(resolved.ends_with("src/main.rs"));
        assert!(validate_attachment(dir.path(), "./src/main.rs").is_ok());
    }

    #[test]
    fn rejects_absolute_and_parent_paths() {
        let dir = project();
        assert!(matches!(
            validate_attachment(dir.path(), "/etc/passwd"),
            Err(AttachmentError::Absolute { .. })
        ));
        assert!(matches!(
            validate_attachment(dir.path(), "src/../../secret"),
            Err(AttachmentError::ParentSegment { .. })
        ));
    }

    #[test]
    fn rejects_root_itself_and_missing_files() {
        let dir = project();
        assert!(matches!(
            validate_attachment(dir.path(), "."),
            Err(AttachmentError::OutsideRoot { .. })
        ));
        assert!(matches!(
            validate_attachment(dir.path(), "nope.txt"),
            Err(AttachmentError::Io { .. })
        ));
        assert!(validate_attachment(dir.path(), "  ").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlinks() {
        let dir = project();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), "x").unwrap();

        std::os::unix::fs::symlink(outside.path().join("secret"), dir.path().join("link")).unwrap();
        assert!(matches!(
            validate_attachment(dir.path(), "link"),
            Err(AttachmentError::Symlink { .. })
        ));

        std::os::unix::fs::symlink(outside.path(), dir.path().join("linked_dir")).unwrap();
        assert!(matches!(
            validate_attachment(dir.path(), "linked_dir/secret"),
            Err(AttachmentError::OutsideRoot { .. })
        ));
    }

    #[test]
    fn batch_fails_on_first_rejection() {
        let dir = project();
        let ok = validate_attachments(dir.path(), &["src/main.rs".into(), "shot.PNG".into()]);
        assert_eq!(ok.unwrap().len(), 2);
        let bad = validate_attachments(dir.path(), &["src/main.rs".into(), "../x".into()]);
        assert!(bad.is_err());
    }

    #[test]
    fn attachment_list_is_appended() {
        let mut prompt = "Fix it".to_string();
        append_attachment_list(&mut prompt, &[]);
        assert_eq!(prompt, "Fix it");
        append_attachment_list(&mut prompt, &["a.rs".into(), "b.rs".into()]);
        assert_eq!(prompt, "Fix it\n\nAttachments:\n- a.rs\n- b.rs");
    }

    #[test]
    fn image_detection() {
        assert!(is_image("shot.PNG"));
        assert!(is_image("docs/diagram.svg"));
        assert!(!is_image("src/main.rs"));
        assert!(!is_image("png"));
    }
}
