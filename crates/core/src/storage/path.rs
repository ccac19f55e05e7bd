//! Storage path rules shared by both backends.

use std::path::Path;

use super::error::StorageError;

/// Prefix the application puts in front of stored files.
const UPLOADS_PREFIX: &str = "uploads/";

/// File name prefix of chunk files in a chunk directory.
const CHUNK_PREFIX: &str = "chunk-";

/// Extensions served through the range-capable API route.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "avi", "mkv", "m4v", "ogv"];

/// Reject paths that could escape the storage root.
///
/// A path is invalid when it is empty, absolute, starts with `./`, or
/// contains `..` anywhere.
pub fn validate(path: &str) -> Result<(), StorageError> {
    if path.is_empty()
        || path.starts_with('/')
        || path.starts_with('\\')
        || path.starts_with("./")
        || path.contains("..")
        || Path::new(path).is_absolute()
    {
        return Err(StorageError::invalid_path(path));
    }
    Ok(())
}

/// Normalize a logical path into an object key: leading slashes and a
/// leading `uploads/` segment are removed.
#[must_use]
pub fn object_key(path: &str) -> &str {
    let trimmed = path.trim_start_matches('/');
    trimmed
        .strip_prefix(UPLOADS_PREFIX)
        .unwrap_or(trimmed)
        .trim_start_matches('/')
}

/// Chunk index encoded in a `chunk-<n>` file name.
///
/// Only the canonical spelling is accepted: `chunk-01` and `chunk-+1` are not
/// chunk files.
#[must_use]
pub fn chunk_index(file_name: &str) -> Option<u64> {
    let index: u64 = file_name.strip_prefix(CHUNK_PREFIX)?.parse().ok()?;
    (chunk_file_name(index) == file_name).then_some(index)
}

/// File name for chunk `index`.
#[must_use]
pub fn chunk_file_name(index: u64) -> String {
    format!("{CHUNK_PREFIX}{index}")
}

/// Whether the path's extension is a video format.
#[must_use]
pub fn is_video(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|video| video.eq_ignore_ascii_case(ext))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("uploads/a.txt")]
    #[case("public/avatars/1.png")]
    #[case("a/b/c/file.tar.gz")]
    #[case("file")]
    fn test_validate_accepts(#[case] path: &str) {
        assert!(validate(path).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("/etc/passwd")]
    #[case("./file")]
    #[case("../file")]
    #[case("uploads/../../etc")]
    #[case("a/..")]
    fn test_validate_rejects(#[case] path: &str) {
        let err = validate(path).unwrap_err();
        assert!(err.to_string().starts_with("Invalid storage path"));
    }

    #[rstest]
    #[case("uploads/test/image.jpg", "test/image.jpg")]
    #[case("/uploads/test/image.jpg", "test/image.jpg")]
    #[case("//uploads//test.jpg", "test.jpg")]
    #[case("test/image.jpg", "test/image.jpg")]
    #[case("other/uploads/x", "other/uploads/x")]
    fn test_object_key(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(object_key(path), expected);
    }

    #[test]
    fn test_chunk_index() {
        assert_eq!(chunk_index("chunk-0"), Some(0));
        assert_eq!(chunk_index("chunk-11"), Some(11));
        assert_eq!(chunk_index("chunk-"), None);
        assert_eq!(chunk_index("chunk-1a"), None);
        assert_eq!(chunk_index("chunk-01"), None);
        assert_eq!(chunk_index("chunk-+1"), None);
        assert_eq!(chunk_index("part-1"), None);
        assert_eq!(chunk_index(&chunk_file_name(42)), Some(42));
    }

    #[test]
    fn test_is_video() {
        assert!(is_video("uploads/test/video.mp4"));
        assert!(is_video("clip.WEBM"));
        assert!(!is_video("image.jpg"));
        assert!(!is_video("mp4"));
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_dotdot_always_rejected(prefix in "[a-z/]{0,10}", suffix in "[a-z/]{0,10}") {
            let path = format!("{prefix}..{suffix}");
            prop_assert!(validate(&path).is_err());
        }

        #[test]
        fn prop_absolute_always_rejected(rest in "[a-z0-9/._-]{0,20}") {
            let absolute = format!("/{rest}");
            let dotted = format!("./{rest}");
            prop_assert!(validate(&absolute).is_err());
            prop_assert!(validate(&dotted).is_err());
        }

        #[test]
        fn prop_object_key_has_no_leading_slash(path in "/{0,3}(uploads/)?[a-z0-9/]{0,20}") {
            prop_assert!(!object_key(&path).starts_with('/'));
        }
    }
}
