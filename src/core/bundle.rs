//! Purpose: Resolve an installation's plugin set into runtime bundle
//! references.
//! Exports: `BundleReference`, `resolve_bundles`, `reference_string`.
//! Invariants: The framework's own core bundle never appears in the result.
//! Invariants: Plugin-directory entries come from one atomic listing; extra
//! locations append after them in set iteration order.
//! Invariants: Reference URLs are absolute, lexically normalized, and
//! percent-encoded.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use url::Url;

use crate::core::error::{Error, ErrorKind};

/// Directory entries starting with this prefix are the framework's own core
/// bundle and are excluded from the resolved set.
pub const FRAMEWORK_BUNDLE_PREFIX: &str = "org.eclipse.osgi_";

/// Name of the plugin directory under the installation root.
pub const PLUGINS_DIR: &str = "plugins";

/// One resolved `reference:file:` URL pointing at a bundle install location.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BundleReference {
    url: String,
}

impl BundleReference {
    /// Builds a reference for `path` without touching the filesystem. The
    /// path is made absolute against the current directory if needed, then
    /// lexically normalized and percent-encoded.
    pub fn for_path(path: &Path) -> Result<Self, Error> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|err| Error::new(ErrorKind::Io).with_source(err))?
                .join(path)
        };
        let normalized = normalize(&absolute);
        let url = Url::from_file_path(&normalized).map_err(|()| {
            Error::new(ErrorKind::Config)
                .with_message("path cannot be expressed as a file URL")
                .with_path(&normalized)
        })?;
        Ok(Self {
            url: format!("reference:file:{}", url.path()),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for BundleReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Resolves the ordered bundle set for an installation: every entry of
/// `<install_root>/plugins` except the framework core bundle, then every
/// extra location. A plugin entry whose name lacks a `_` version separator
/// is a hard error.
pub fn resolve_bundles(
    install_root: &Path,
    extra_locations: &BTreeSet<PathBuf>,
) -> Result<Vec<BundleReference>, Error> {
    let plugins_dir = install_root.join(PLUGINS_DIR);
    let mut references = Vec::new();

    // One listing; a missing plugin directory yields an empty plugin set.
    if plugins_dir.is_dir() {
        let entries = std::fs::read_dir(&plugins_dir)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(&plugins_dir).with_source(err))?;
        for entry in entries {
            let entry = entry.map_err(|err| {
                Error::new(ErrorKind::Io).with_path(&plugins_dir).with_source(err)
            })?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            validate_bundle_name(&name, &entry.path())?;
            if name.starts_with(FRAMEWORK_BUNDLE_PREFIX) {
                continue;
            }
            references.push(BundleReference::for_path(&entry.path())?);
        }
    }

    for location in extra_locations {
        references.push(BundleReference::for_path(location)?);
    }

    Ok(references)
}

/// Comma-joined form of `resolve_bundles`, as handed to the runtime host.
pub fn reference_string(
    install_root: &Path,
    extra_locations: &BTreeSet<PathBuf>,
) -> Result<String, Error> {
    let references = resolve_bundles(install_root, extra_locations)?;
    Ok(references
        .iter()
        .map(BundleReference::as_str)
        .collect::<Vec<_>>()
        .join(","))
}

fn validate_bundle_name(name: &str, path: &Path) -> Result<(), Error> {
    match name.find('_') {
        Some(index) if index > 0 => Ok(()),
        _ => Err(Error::new(ErrorKind::Config)
            .with_message("bundle directory name has no version separator")
            .with_path(path)),
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{normalize, reference_string, resolve_bundles, BundleReference};
    use crate::core::error::ErrorKind;
    use std::collections::BTreeSet;
    use std::path::{Path, PathBuf};

    fn install_with_plugins(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in names {
            std::fs::create_dir_all(dir.path().join("plugins").join(name)).expect("plugin dir");
        }
        dir
    }

    #[test]
    fn framework_core_bundle_is_excluded() {
        let dir = install_with_plugins(&[
            "org.eclipse.osgi_1.2.3",
            "foo.bar_2.0.0",
            "org.eclipse.osgi_9.9.9",
        ]);
        let refs = resolve_bundles(dir.path(), &BTreeSet::new()).expect("resolve");
        assert_eq!(refs.len(), 1);
        assert!(refs[0].as_str().contains("foo.bar_2.0.0"));
        assert!(!refs.iter().any(|r| r.as_str().contains("org.eclipse.osgi")));
    }

    #[test]
    fn extra_locations_append_after_plugins() {
        let dir = install_with_plugins(&["foo.bar_2.0.0"]);
        let mut extra = BTreeSet::new();
        extra.insert(PathBuf::from("/tmp/extra.jar"));
        let joined = reference_string(dir.path(), &extra).expect("resolve");
        let parts: Vec<&str> = joined.split(',').collect();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].starts_with("reference:file:"));
        assert!(parts[0].contains("foo.bar_2.0.0"));
        assert_eq!(parts[1], "reference:file:/tmp/extra.jar");
    }

    #[test]
    fn malformed_bundle_name_is_fatal() {
        let dir = install_with_plugins(&["no-version-here"]);
        let err = resolve_bundles(dir.path(), &BTreeSet::new()).expect_err("malformed");
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn leading_separator_is_malformed() {
        let dir = install_with_plugins(&["_1.0.0"]);
        let err = resolve_bundles(dir.path(), &BTreeSet::new()).expect_err("malformed");
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn missing_plugins_dir_yields_extras_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut extra = BTreeSet::new();
        extra.insert(PathBuf::from("/tmp/extra.jar"));
        let refs = resolve_bundles(dir.path(), &extra).expect("resolve");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].as_str(), "reference:file:/tmp/extra.jar");
    }

    #[test]
    fn reference_urls_are_percent_encoded() {
        let reference =
            BundleReference::for_path(Path::new("/tmp/with space/bundle_1.0")).expect("reference");
        assert_eq!(reference.as_str(), "reference:file:/tmp/with%20space/bundle_1.0");
    }

    #[test]
    fn normalize_folds_dot_segments() {
        assert_eq!(
            normalize(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
    }
}
