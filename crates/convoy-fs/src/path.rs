//! Forward-slash paths for metadata files and checkouts

use std::path::{Path, PathBuf};

/// A path normalized to use forward slashes internally.
///
/// Metadata repository paths are rendered from templates and compared as
/// strings, so they are kept in one canonical form and only converted to
/// platform-native paths at I/O boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedPath {
    inner: String,
}

impl NormalizedPath {
    /// Normalize any path-like input, turning backslashes into `/`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path_str = path.as_ref().to_string_lossy();
        Self {
            inner: path_str.replace('\\', "/"),
        }
    }

    /// The canonical `/`-separated form.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Native form for handing to `std::fs` and git2.
    pub fn to_native(&self) -> PathBuf {
        PathBuf::from(&self.inner)
    }

    /// Append `segment`, never producing a doubled separator.
    pub fn join(&self, segment: &str) -> Self {
        let segment = segment.replace('\\', "/");
        let segment = segment.trim_start_matches('/');
        let joined = if self.inner.is_empty() {
            segment.to_string()
        } else if self.inner.ends_with('/') {
            format!("{}{}", self.inner, segment)
        } else {
            format!("{}/{}", self.inner, segment)
        };
        Self { inner: joined }
    }

    /// Everything before the last component; `None` for a bare file name.
    pub fn parent(&self) -> Option<Self> {
        let trimmed = self.inner.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(0) => Some(Self {
                inner: "/".to_string(),
            }),
            Some(idx) => Some(Self {
                inner: trimmed[..idx].to_string(),
            }),
            None => None,
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        let trimmed = self.inner.trim_end_matches('/');
        trimmed.rsplit('/').next().filter(|s| !s.is_empty())
    }

    /// Extension of the last component; dotfiles have none.
    pub fn extension(&self) -> Option<&str> {
        self.file_name().and_then(|name| {
            let idx = name.rfind('.')?;
            if idx == 0 { None } else { Some(&name[idx + 1..]) }
        })
    }

    pub fn exists(&self) -> bool {
        self.to_native().exists()
    }

    pub fn is_file(&self) -> bool {
        self.to_native().is_file()
    }
}

impl AsRef<Path> for NormalizedPath {
    fn as_ref(&self) -> &Path {
        Path::new(&self.inner)
    }
}

impl std::fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn backslashes_are_normalized() {
        let p = NormalizedPath::new("bundles\\svc\\bundle.yaml");
        assert_eq!(p.as_str(), "bundles/svc/bundle.yaml");
    }

    #[rstest]
    #[case("bundles/svc", "aliases/RELEASED.yaml", "bundles/svc/aliases/RELEASED.yaml")]
    #[case("bundles/svc/", "x.yaml", "bundles/svc/x.yaml")]
    #[case("", "x.yaml", "x.yaml")]
    #[case("root", "/abs.yaml", "root/abs.yaml")]
    fn join_produces_single_separator(#[case] base: &str, #[case] seg: &str, #[case] expected: &str) {
        assert_eq!(NormalizedPath::new(base).join(seg).as_str(), expected);
    }

    #[test]
    fn parent_and_file_parts() {
        let p = NormalizedPath::new("bundles/svc/trunks/rel-2.yaml");
        assert_eq!(p.parent().unwrap().as_str(), "bundles/svc/trunks");
        assert_eq!(p.file_name(), Some("rel-2.yaml"));
        assert_eq!(p.extension(), Some("yaml"));
        assert_eq!(NormalizedPath::new("top.yaml").parent(), None);
    }

    #[test]
    fn dotfile_has_no_extension() {
        let p = NormalizedPath::new("dir/.hidden");
        assert_eq!(p.extension(), None);
        assert_eq!(p.file_name(), Some(".hidden"));
    }
}
