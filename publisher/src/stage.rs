//! Copying the packaged directory somewhere it can be archived from.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::Error;

const SKIPPED: &[&str] = &[".git"];

/// Copy the tree at `source` into `staging`.
///
/// `.git` directories are left behind. Symbolic links are not followed and
/// are not copied.
pub fn stage_action_files(source: &Utf8Path, staging: &Utf8Path) -> Result<(), Error> {
    if !source.is_dir() {
        return Err(Error::NotADirectory(source.to_owned()));
    }

    fs::create_dir_all(staging).map_err(Error::io(format!("Creating {staging}")))?;
    copy_dir(source, staging)?;
    tracing::debug!(%source, %staging, "Staged action files");
    Ok(())
}

fn copy_dir(from: &Utf8Path, to: &Utf8Path) -> Result<(), Error> {
    let entries = fs::read_dir(from).map_err(Error::io(format!("Reading directory {from}")))?;

    for entry in entries {
        let entry = entry.map_err(Error::io(format!("Reading directory {from}")))?;
        let path = Utf8PathBuf::from_path_buf(entry.path()).map_err(Error::NonUtf8Path)?;
        let Some(name) = path.file_name() else {
            continue;
        };
        if SKIPPED.contains(&name) {
            continue;
        }

        let file_type = entry
            .file_type()
            .map_err(Error::io(format!("Reading metadata of {path}")))?;
        let target = to.join(name);

        if file_type.is_symlink() {
            tracing::warn!(%path, "Skipping symbolic link");
        } else if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(Error::io(format!("Creating {target}")))?;
            copy_dir(&path, &target)?;
        } else {
            fs::copy(&path, &target).map_err(Error::io(format!("Copying {path}")))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf8(dir: &tempfile::TempDir) -> &Utf8Path {
        Utf8Path::from_path(dir.path()).unwrap()
    }

    #[test]
    fn copies_the_tree_without_git() {
        let source = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let root = utf8(&source);

        fs::write(root.join("action.yml"), "name: hello").unwrap();
        fs::create_dir_all(root.join("dist/lib")).unwrap();
        fs::write(root.join("dist/lib/index.js"), "console.log(1)").unwrap();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/main").unwrap();

        stage_action_files(root, utf8(&staging)).unwrap();

        let staged = utf8(&staging);
        assert_eq!(
            fs::read_to_string(staged.join("action.yml")).unwrap(),
            "name: hello"
        );
        assert_eq!(
            fs::read_to_string(staged.join("dist/lib/index.js")).unwrap(),
            "console.log(1)"
        );
        assert!(!staged.join(".git").exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_followed() {
        let source = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let root = utf8(&source);

        fs::write(utf8(&outside).join("secret.txt"), "secret").unwrap();
        std::os::unix::fs::symlink(utf8(&outside), root.join("linked")).unwrap();
        fs::write(root.join("action.yml"), "name: hello").unwrap();

        stage_action_files(root, utf8(&staging)).unwrap();
        assert!(utf8(&staging).join("action.yml").exists());
        assert!(!utf8(&staging).join("linked").exists());
    }

    #[test]
    fn source_must_be_a_directory() {
        let staging = tempfile::tempdir().unwrap();
        let err = stage_action_files(Utf8Path::new("/does/not/exist"), utf8(&staging)).unwrap_err();
        assert_eq!(err.to_string(), "/does/not/exist is not a directory");
    }
}
