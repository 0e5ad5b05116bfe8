//! Tarball and zip archives of the staged action.

use std::fs::{self, File};
use std::io::{self, BufReader, Read as _};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::write::GzEncoder;
use flate2::Compression;
use ghcr::FileMetadata;
use sha2::{Digest as _, Sha256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::Error;

const TAR_NAME: &str = "archive.tar.gz";
const ZIP_NAME: &str = "archive.zip";

/// Both archives of one staged tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archives {
    /// `archive.tar.gz`
    pub tar: FileMetadata,
    /// `archive.zip`
    pub zip: FileMetadata,
}

/// Archive `source` into `target/archive.tar.gz` and `target/archive.zip`.
///
/// Entries are named relative to `source`, in sorted order.
pub fn create_archives(source: &Utf8Path, target: &Utf8Path) -> Result<Archives, Error> {
    let entries = walk(source)?;

    let tar_path = target.join(TAR_NAME);
    write_tar(source, &entries, &tar_path)?;

    let zip_path = target.join(ZIP_NAME);
    write_zip(source, &entries, &zip_path)?;

    let archives = Archives {
        tar: file_metadata(&tar_path)?,
        zip: file_metadata(&zip_path)?,
    };
    tracing::info!(
        tar = %archives.tar.sha256,
        tar_size = archives.tar.size,
        zip = %archives.zip.sha256,
        zip_size = archives.zip.size,
        "Created archives"
    );
    Ok(archives)
}

/// Size and digest of the file at `path`.
pub fn file_metadata(path: &Utf8Path) -> Result<FileMetadata, Error> {
    let file = File::open(path).map_err(Error::io(format!("Opening {path}")))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    let mut size = 0u64;

    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(Error::io(format!("Reading {path}")))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        size += read as u64;
    }

    Ok(FileMetadata {
        path: path.to_owned(),
        size,
        sha256: format!(
            "{}{}",
            ghcr::digest::SHA256_PREFIX,
            hex::encode(hasher.finalize())
        ),
    })
}

#[derive(Debug)]
struct Entry {
    relative: Utf8PathBuf,
    is_dir: bool,
}

impl Entry {
    /// Archive member name, always `/` separated.
    fn name(&self) -> String {
        self.relative
            .components()
            .map(|component| component.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn walk(root: &Utf8Path) -> Result<Vec<Entry>, Error> {
    let mut entries = Vec::new();
    walk_into(root, root, &mut entries)?;
    Ok(entries)
}

fn walk_into(root: &Utf8Path, current: &Utf8Path, entries: &mut Vec<Entry>) -> Result<(), Error> {
    let mut children = fs::read_dir(current)
        .map_err(Error::io(format!("Reading directory {current}")))?
        .map(|entry| {
            let entry = entry.map_err(Error::io(format!("Reading directory {current}")))?;
            let path = Utf8PathBuf::from_path_buf(entry.path()).map_err(Error::NonUtf8Path)?;
            let file_type = entry
                .file_type()
                .map_err(Error::io(format!("Reading metadata of {path}")))?;
            Ok((path, file_type))
        })
        .collect::<Result<Vec<_>, Error>>()?;
    children.sort_by(|(a, _), (b, _)| a.cmp(b));

    for (path, file_type) in children {
        if file_type.is_symlink() {
            continue;
        }

        let relative = path
            .strip_prefix(root)
            .map(Utf8Path::to_owned)
            .unwrap_or_else(|_| path.clone());

        entries.push(Entry {
            relative,
            is_dir: file_type.is_dir(),
        });
        if file_type.is_dir() {
            walk_into(root, &path, entries)?;
        }
    }

    Ok(())
}

fn write_tar(root: &Utf8Path, entries: &[Entry], path: &Utf8Path) -> Result<(), Error> {
    let file = File::create(path).map_err(Error::io(format!("Creating {path}")))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);

    for entry in entries {
        let source = root.join(&entry.relative);
        let name = entry.name();
        let appended = if entry.is_dir {
            builder.append_dir(&name, &source)
        } else {
            builder.append_path_with_name(&source, &name)
        };
        appended.map_err(Error::io(format!("Adding {name} to {path}")))?;
    }

    builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .map_err(Error::io(format!("Finishing {path}")))?;
    Ok(())
}

fn write_zip(root: &Utf8Path, entries: &[Entry], path: &Utf8Path) -> Result<(), Error> {
    let file = File::create(path).map_err(Error::io(format!("Creating {path}")))?;
    let mut writer = ZipWriter::new(file);

    for entry in entries {
        let source = root.join(&entry.relative);
        let options = zip_options(&source)?;
        let name = entry.name();

        if entry.is_dir {
            writer.add_directory(name, options)?;
        } else {
            writer.start_file(name, options)?;
            let mut input = File::open(&source).map_err(Error::io(format!("Opening {source}")))?;
            io::copy(&mut input, &mut writer)
                .map_err(Error::io(format!("Adding {source} to {path}")))?;
        }
    }

    writer.finish()?;
    Ok(())
}

fn zip_options(source: &Utf8Path) -> Result<SimpleFileOptions, Error> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let metadata =
            fs::metadata(source).map_err(Error::io(format!("Reading metadata of {source}")))?;
        Ok(options.unix_permissions(metadata.permissions().mode()))
    }

    #[cfg(not(unix))]
    {
        let _ = source;
        Ok(options)
    }
}
