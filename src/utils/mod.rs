pub mod fs;
pub mod slug;

/// Joins slash-separated remote path segments, dropping empty pieces and
/// duplicate separators.
pub fn join_remote_path(base: &str, rest: &str) -> String {
    base.split('/')
        .chain(rest.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Splits `a/b/c.txt` into (`a/b`, `c.txt`).
pub fn split_parent(path: &str) -> (&str, &str) {
    let trimmed = path.trim_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, leaf)) => (parent, leaf),
        None => ("", trimmed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_remote_path() {
        assert_eq!(join_remote_path("", "a/b.txt"), "a/b.txt");
        assert_eq!(join_remote_path("/backups/", "/2024-01-01__2024-01-07/x"), "backups/2024-01-01__2024-01-07/x");
        assert_eq!(join_remote_path("root//nested", "file"), "root/nested/file");
        assert_eq!(join_remote_path("", ""), "");
    }

    #[test]
    fn test_split_parent() {
        assert_eq!(split_parent("a/b/c.txt"), ("a/b", "c.txt"));
        assert_eq!(split_parent("c.txt"), ("", "c.txt"));
        assert_eq!(split_parent("/a/c.txt"), ("a", "c.txt"));
    }
}
