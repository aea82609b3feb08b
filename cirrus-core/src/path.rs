//! Cloud path helpers
//!
//! Remote paths are absolute, `/`-separated, without a trailing slash
//! (except the root itself).

/// Path separator used by the remote store
pub const SEPARATOR: char = '/';

/// Normalize a path: backslashes become `/`, duplicate and trailing
/// separators are dropped, and a leading `/` is ensured.
pub fn clean(path: &str) -> String {
    let segments: Vec<&str> = path
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}

/// Last segment of the path (empty for the root)
pub fn name(path: &str) -> String {
    let cleaned = clean(path);
    cleaned
        .rsplit(SEPARATOR)
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Parent directory of the path (the root is its own parent)
pub fn parent(path: &str) -> String {
    let cleaned = clean(path);
    match cleaned.rfind(SEPARATOR) {
        Some(0) | None => "/".to_string(),
        Some(idx) => cleaned[..idx].to_string(),
    }
}

/// Join a directory and a child name
pub fn combine(dir: &str, child: &str) -> String {
    clean(&format!("{}/{}", dir, child))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean() {
        assert_eq!(clean("a/b/"), "/a/b");
        assert_eq!(clean("//a//b"), "/a/b");
        assert_eq!(clean("\\a\\b"), "/a/b");
        assert_eq!(clean(""), "/");
        assert_eq!(clean("/"), "/");
    }

    #[test]
    fn test_name_and_parent() {
        assert_eq!(name("/docs/report.pdf"), "report.pdf");
        assert_eq!(parent("/docs/report.pdf"), "/docs");
        assert_eq!(parent("/report.pdf"), "/");
        assert_eq!(parent("/"), "/");
        assert_eq!(name("/"), "");
    }

    #[test]
    fn test_combine() {
        assert_eq!(combine("/docs", "a.txt"), "/docs/a.txt");
        assert_eq!(combine("/", "a.txt"), "/a.txt");
        assert_eq!(combine("/docs/", "/a.txt"), "/docs/a.txt");
    }
}
