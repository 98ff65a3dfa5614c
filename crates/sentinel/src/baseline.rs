use std::{
    iter,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::fs_object::{FsObject, MaterializeError};

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("failed to walk {}: {}", .0.display(), .1)]
    Walk(PathBuf, #[source] walkdir::Error),
    #[error("failed to materialize {}: {}", .0.display(), .1)]
    Materialize(PathBuf, #[source] MaterializeError),
}

/// Lazily produce an [`FsObject`] for every entry under the given
/// roots, pre-order, each root included. Roots that no longer exist
/// yield nothing; the server infers deletion from the baseline diff.
pub fn walk_roots(roots: &[PathBuf]) -> impl Iterator<Item = Result<FsObject, WalkError>> + '_ {
    roots.iter().flat_map(|root| walk_root(root))
}

fn walk_root(root: &Path) -> Box<dyn Iterator<Item = Result<FsObject, WalkError>>> {
    let root = match std::path::absolute(root) {
        Ok(root) => root,
        Err(err) => {
            debug!("skipping unresolvable root {}: {err}", root.display());
            return Box::new(iter::empty());
        }
    };

    let metadata = match std::fs::symlink_metadata(&root) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!("skipping missing root {}", root.display());
            return Box::new(iter::empty());
        }
        Err(err) => {
            return Box::new(iter::once(Err(WalkError::Materialize(
                root,
                MaterializeError::Stat(err),
            ))));
        }
    };

    if !metadata.is_dir() {
        return Box::new(iter::once_with(move || materialize(&root)).flatten());
    }

    Box::new(
        WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => materialize(entry.path()),
                Err(err) => {
                    let path = err.path().map(Path::to_owned).unwrap_or_default();
                    Some(Err(WalkError::Walk(path, err)))
                }
            }),
    )
}

fn materialize(path: &Path) -> Option<Result<FsObject, WalkError>> {
    match FsObject::materialize(path) {
        Ok(object) => Some(Ok(object)),
        // Entries can vanish between listing and stat; the event loop
        // will report the deletion.
        Err(MaterializeError::NotFound) => {
            debug!("entry vanished during walk: {}", path.display());
            None
        }
        Err(err) => Some(Err(WalkError::Materialize(path.to_owned(), err))),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::walk_roots;

    #[test]
    fn walks_a_mixed_tree_and_skips_missing_roots() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("etc-app");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("a.conf"), b"hi\n").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(root.join("a.conf"), root.join("s")).unwrap();

        let roots = vec![root.clone(), dir.path().join("missing")];
        let objects: Vec<_> = walk_roots(&roots)
            .collect::<Result<_, _>>()
            .expect("walk succeeds");

        // The root itself comes first; children follow in walk order.
        assert_eq!(objects[0].path, root.to_string_lossy());
        assert!(objects[0].hash.is_empty());

        let conf = objects
            .iter()
            .find(|o| o.path.ends_with("a.conf"))
            .expect("a.conf present");
        assert_eq!(conf.hash, blake3::hash(b"hi\n").to_hex().to_string());

        #[cfg(unix)]
        {
            assert_eq!(objects.len(), 3);
            let link = objects.iter().find(|o| o.path.ends_with("/s")).unwrap();
            assert!(link.hash.is_empty());
        }
        #[cfg(not(unix))]
        assert_eq!(objects.len(), 2);
    }

    #[test]
    fn missing_root_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let roots = vec![dir.path().join("missing")];

        assert_eq!(walk_roots(&roots).count(), 0);
    }

    #[test]
    fn non_directory_root_materializes_alone() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("only.txt");
        std::fs::write(&file, b"payload").unwrap();

        let roots = vec![file.clone()];
        let objects: Vec<_> = walk_roots(&roots).collect::<Result<_, _>>().unwrap();

        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].path, file.to_string_lossy());
        assert_eq!(
            objects[0].hash,
            blake3::hash(b"payload").to_hex().to_string()
        );
    }

    #[test]
    fn walks_roots_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        std::fs::create_dir(&first).unwrap();
        std::fs::create_dir(&second).unwrap();

        let roots = vec![first.clone(), second.clone()];
        let objects: Vec<_> = walk_roots(&roots).collect::<Result<Vec<_>, _>>().unwrap();

        let paths: Vec<PathBuf> = objects.iter().map(|o| PathBuf::from(&o.path)).collect();
        assert_eq!(paths, vec![first, second]);
    }
}
