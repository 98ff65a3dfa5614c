use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use crate::AddWatchError;

/// The set of registered watch roots.
///
/// Roots are stored absolute with trailing separators stripped so that
/// event paths can be tested for coverage component-wise.
#[derive(Debug, Default)]
pub(crate) struct WatchSet {
    roots: BTreeSet<PathBuf>,
}

impl WatchSet {
    /// Make `path` absolute without resolving symlinks and normalize
    /// away trailing separators.
    pub(crate) fn canonicalize(path: &Path) -> Result<PathBuf, AddWatchError> {
        let absolute = std::path::absolute(path)
            .map_err(|err| AddWatchError::Resolve(path.to_owned(), err))?;
        Ok(absolute.components().collect())
    }

    /// Register an already-canonicalized root, rejecting exact
    /// duplicates.
    pub(crate) fn insert(&mut self, root: PathBuf) -> Result<(), AddWatchError> {
        if !self.roots.insert(root.clone()) {
            return Err(AddWatchError::AlreadyWatched(root));
        }
        Ok(())
    }

    pub(crate) fn remove(&mut self, root: &Path) {
        self.roots.remove(root);
    }

    /// Whether `path` is one of the registered roots or lies below one.
    pub(crate) fn covers(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| path.starts_with(root))
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::WatchSet;
    use crate::AddWatchError;

    #[test]
    fn canonicalize_strips_trailing_separator() {
        let canonical = WatchSet::canonicalize(Path::new("/etc/app/")).unwrap();
        assert_eq!(canonical, PathBuf::from("/etc/app"));
    }

    #[test]
    fn canonicalize_does_not_resolve_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        let link = dir.path().join("link");
        std::fs::create_dir(&target).unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, &link).unwrap();
        #[cfg(unix)]
        assert_eq!(WatchSet::canonicalize(&link).unwrap(), link);
    }

    #[test]
    fn duplicate_root_is_rejected() {
        let mut watches = WatchSet::default();
        let root = WatchSet::canonicalize(Path::new("/etc/app")).unwrap();
        watches.insert(root.clone()).unwrap();

        let second = WatchSet::canonicalize(Path::new("/etc/app/")).unwrap();
        assert!(matches!(
            watches.insert(second),
            Err(AddWatchError::AlreadyWatched(path)) if path == root
        ));
    }

    #[test]
    fn covers_roots_and_descendants_only() {
        let mut watches = WatchSet::default();
        watches.insert(PathBuf::from("/etc/app")).unwrap();

        assert!(watches.covers(Path::new("/etc/app")));
        assert!(watches.covers(Path::new("/etc/app/conf.d/a.conf")));
        assert!(!watches.covers(Path::new("/etc/application")));
        assert!(!watches.covers(Path::new("/var/lib/app")));
    }

    #[test]
    fn remove_unregisters_root() {
        let mut watches = WatchSet::default();
        watches.insert(PathBuf::from("/etc/app")).unwrap();
        watches.remove(Path::new("/etc/app"));

        assert!(!watches.covers(Path::new("/etc/app")));
        assert!(watches.insert(PathBuf::from("/etc/app")).is_ok());
    }
}
