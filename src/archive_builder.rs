use crate::archive_index;
use crate::PrepError;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const MARKER_FORMAT: &str = "unitpack-archive";
pub const MARKER_VERSION: u32 = 1;

/// Written into the archive comment once every member is in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub format: String,
    pub version: u32,
    pub members: u64,
}

impl CompletionMarker {
    fn new(members: u64) -> Self {
        Self {
            format: MARKER_FORMAT.to_string(),
            version: MARKER_VERSION,
            members,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveStatus {
    Missing,
    Valid { members: u64 },
    Invalid { reason: String },
}

impl ArchiveStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, ArchiveStatus::Valid { .. })
    }
}

/// Proof of a successful build. Removing the packed sources goes through here.
#[derive(Debug)]
#[must_use]
pub struct BuildReceipt {
    pub archive_path: PathBuf,
    pub members: u64,
    pub reused: bool,
    source_dir: Option<PathBuf>,
}

impl BuildReceipt {
    /// Delete the directory the archive was built from.
    pub fn remove_source(self) -> Result<(), PrepError> {
        if let Some(dir) = self.source_dir {
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
                info!(dir = %dir.display(), "removed packed source directory");
            }
        }
        Ok(())
    }

    pub fn source_dir(&self) -> Option<&Path> {
        self.source_dir.as_deref()
    }
}

pub fn partial_path(archive_path: &Path) -> PathBuf {
    with_suffix(archive_path, ".partial")
}

pub fn lock_path(archive_path: &Path) -> PathBuf {
    with_suffix(archive_path, ".lock")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Check an archive's completion marker against its member count and, when
/// given, the number of members the caller expects.
pub fn inspect(archive_path: &Path, expected_members: Option<u64>) -> ArchiveStatus {
    if !archive_path.exists() {
        return ArchiveStatus::Missing;
    }
    let invalid = |reason: String| ArchiveStatus::Invalid { reason };

    let archive = match File::open(archive_path).map_err(PrepError::from).and_then(|f| Ok(ZipArchive::new(f)?)) {
        Ok(archive) => archive,
        Err(e) => return invalid(format!("unreadable: {}", e)),
    };
    let marker: CompletionMarker = match serde_json::from_slice(archive.comment()) {
        Ok(marker) => marker,
        Err(_) => return invalid("no completion marker".to_string()),
    };
    if marker.format != MARKER_FORMAT || marker.version != MARKER_VERSION {
        return invalid(format!("unknown marker {}/{}", marker.format, marker.version));
    }
    let actual = archive.len() as u64;
    if marker.members != actual {
        return invalid(format!("marker records {} members, archive has {}", marker.members, actual));
    }
    if let Some(expected) = expected_members {
        if expected != actual {
            return invalid(format!("expected {} members, archive has {}", expected, actual));
        }
    }
    ArchiveStatus::Valid { members: actual }
}

/// Artifact files directly inside `source_dir`, sorted by name.
pub fn list_artifacts(source_dir: &Path, extension: &str) -> Result<Vec<PathBuf>, PrepError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(source_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if name.ends_with(extension) => files.push(path),
            Some(_) => {}
            None => {
                return Err(PrepError::MalformedInput {
                    path: path.clone(),
                    line: 0,
                    reason: "file name is not valid UTF-8".to_string(),
                });
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Advisory lock on `<archive>.lock`, released on drop. Builders hold it
/// exclusively; index readers hold it shared.
pub(crate) struct DestinationLock {
    _file: File,
}

impl DestinationLock {
    fn open(archive_path: &Path) -> Result<File, PrepError> {
        if let Some(parent) = archive_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path(archive_path))?)
    }

    pub(crate) fn exclusive(archive_path: &Path) -> Result<Self, PrepError> {
        let file = Self::open(archive_path)?;
        fs2::FileExt::lock_exclusive(&file)?;
        Ok(Self { _file: file })
    }

    pub(crate) fn shared(archive_path: &Path) -> Result<Self, PrepError> {
        let file = Self::open(archive_path)?;
        fs2::FileExt::lock_shared(&file)?;
        Ok(Self { _file: file })
    }
}

/// Pack every artifact of `source_dir` into `archive_path` as stored members.
///
/// The archive only appears at `archive_path` once it is complete; an existing
/// valid archive is reused. `source_dir` is never modified here.
pub fn build(source_dir: &Path, archive_path: &Path, extension: &str) -> Result<BuildReceipt, PrepError> {
    let _lock = DestinationLock::exclusive(archive_path)?;

    let partial = partial_path(archive_path);
    if partial.exists() {
        warn!(path = %partial.display(), "discarding interrupted archive build");
        fs::remove_file(&partial)?;
    }

    // an empty source directory says nothing about the archive
    let sources = if source_dir.is_dir() {
        Some(list_artifacts(source_dir, extension)?).filter(|files| !files.is_empty())
    } else {
        None
    };
    let expected = sources.as_ref().map(|files| files.len() as u64);

    match (sources, inspect(archive_path, expected)) {
        (_, ArchiveStatus::Valid { members }) => {
            info!(archive = %archive_path.display(), members, "archive already complete, reusing");
            Ok(BuildReceipt {
                archive_path: archive_path.to_path_buf(),
                members,
                reused: true,
                source_dir: source_dir.is_dir().then(|| source_dir.to_path_buf()),
            })
        }
        (None, ArchiveStatus::Missing) if source_dir.is_dir() => Err(PrepError::missing(source_dir, "feature files")),
        (None, ArchiveStatus::Missing) => Err(PrepError::missing(source_dir, "feature source directory")),
        (None, ArchiveStatus::Invalid { reason }) => Err(PrepError::PartialArchive {
            path: archive_path.to_path_buf(),
            reason: format!("{} and no source artifacts to rebuild from", reason),
        }),
        (Some(files), status) => {
            if let ArchiveStatus::Invalid { reason } = status {
                warn!(archive = %archive_path.display(), reason = %reason, "rebuilding invalid archive");
                fs::remove_file(archive_path)?;
            }
            remove_if_exists(&archive_index::cache_path(archive_path))?;

            if let Err(e) = write_archive(&files, &partial) {
                let _ = fs::remove_file(&partial);
                return Err(e);
            }
            fs::rename(&partial, archive_path)?;

            info!(archive = %archive_path.display(), members = files.len(), "archive built");
            Ok(BuildReceipt {
                archive_path: archive_path.to_path_buf(),
                members: files.len() as u64,
                reused: false,
                source_dir: Some(source_dir.to_path_buf()),
            })
        }
    }
}

fn write_archive(files: &[PathBuf], partial: &Path) -> Result<(), PrepError> {
    let mut writer = ZipWriter::new(File::create(partial)?);

    for path in files {
        // list_artifacts only returns UTF-8 names
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PrepError::Config(format!("bad artifact name {}", path.display())))?;
        let mut source = File::open(path)?;
        let size = source.metadata()?.len();
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .large_file(size >= u32::MAX as u64);
        writer.start_file(name, options)?;
        io::copy(&mut source, &mut writer)?;
    }

    let marker = CompletionMarker::new(files.len() as u64);
    writer.set_comment(serde_json::to_string(&marker)?);
    let file = writer.finish()?;
    file.sync_all()?;
    drop(file);

    match inspect(partial, Some(files.len() as u64)) {
        ArchiveStatus::Valid { .. } => Ok(()),
        ArchiveStatus::Invalid { reason } => Err(PrepError::PartialArchive {
            path: partial.to_path_buf(),
            reason,
        }),
        ArchiveStatus::Missing => Err(PrepError::PartialArchive {
            path: partial.to_path_buf(),
            reason: "archive vanished while writing".to_string(),
        }),
    }
}

fn remove_if_exists(path: &Path) -> Result<(), PrepError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
