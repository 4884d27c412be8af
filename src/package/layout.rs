use std::path::{Path, PathBuf};

use crate::provider::ProviderKind;
use crate::source::PackageRef;

/// Paths derived from the data root.
///
/// ```text
/// <root>/packages/<provider>/<dir name>   install dirs
/// <root>/tmp/<provider>/<dir name>        temp workspaces
/// <root>/lock.json                        desired state
/// <bin_dir>/<name>                        exposed executables
/// ```
///
/// The dir name is the package id as a single path segment (see
/// [`dir_name`]), so `golang.org/x/tools` and `golang.org/x/tools/gopls`
/// get sibling directories instead of one living inside the other.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    root: PathBuf,
    bin_dir: PathBuf,
}

impl Layout {
    pub fn new(root: PathBuf, bin_dir: PathBuf) -> Self {
        Self { root, bin_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    pub fn packages_root(&self) -> PathBuf {
        self.root.join("packages")
    }

    pub fn provider_root(&self, provider: ProviderKind) -> PathBuf {
        self.packages_root().join(provider.as_str())
    }

    pub fn install_dir(&self, package: &PackageRef) -> PathBuf {
        self.provider_root(package.provider())
            .join(dir_name(package.package_id()))
    }

    pub fn temp_dir(&self, package: &PackageRef) -> PathBuf {
        self.root
            .join("tmp")
            .join(package.provider().as_str())
            .join(dir_name(package.package_id()))
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.root.join("lock.json")
    }
}

/// `package_id` escaped into one directory name: `%` becomes `%25` and `/`
/// becomes `%2F`. The mapping is injective.
pub fn dir_name(package_id: &str) -> String {
    package_id.replace('%', "%25").replace('/', "%2F")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = Layout::new(PathBuf::from("/data/provi"), PathBuf::from("/data/provi/bin"));
        let package = PackageRef::parse("pkg:github/BurntSushi/ripgrep").unwrap();

        assert_eq!(
            layout.install_dir(&package),
            PathBuf::from("/data/provi/packages/github/BurntSushi%2Fripgrep")
        );
        assert_eq!(
            layout.temp_dir(&package),
            PathBuf::from("/data/provi/tmp/github/BurntSushi%2Fripgrep")
        );
        assert_eq!(
            layout.provider_root(ProviderKind::Npm),
            PathBuf::from("/data/provi/packages/npm")
        );
        assert_eq!(layout.lockfile_path(), PathBuf::from("/data/provi/lock.json"));
        assert_eq!(layout.bin_dir(), Path::new("/data/provi/bin"));
    }

    #[test]
    fn test_nested_ids_get_sibling_dirs() {
        let layout = Layout::new(PathBuf::from("/r"), PathBuf::from("/r/bin"));
        let tools = PackageRef::parse("golang:golang.org/x/tools").unwrap();
        let gopls = PackageRef::parse("golang:golang.org/x/tools/gopls").unwrap();

        let tools_dir = layout.install_dir(&tools);
        let gopls_dir = layout.install_dir(&gopls);
        assert_eq!(tools_dir.parent(), gopls_dir.parent());
        assert!(!gopls_dir.starts_with(&tools_dir));
        assert_eq!(
            gopls_dir,
            PathBuf::from("/r/packages/golang/golang.org%2Fx%2Ftools%2Fgopls")
        );
    }

    #[test]
    fn test_dir_name_escapes_percent() {
        assert_eq!(dir_name("a/b"), "a%2Fb");
        assert_eq!(dir_name("a%2Fb"), "a%252Fb");
        assert_ne!(dir_name("a/b"), dir_name("a%2Fb"));
        assert_eq!(dir_name("ripgrep"), "ripgrep");
    }
}
