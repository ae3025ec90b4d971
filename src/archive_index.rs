use crate::archive_builder::DestinationLock;
use crate::locator::FeatureLocator;
use crate::PrepError;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::{CompressionMethod, ZipArchive};

/// Fixed part of a ZIP local file header, before the name and extra field.
pub const LOCAL_HEADER_SIZE: u64 = 30;
const LOCAL_HEADER_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
const CENTRAL_HEADER_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x01, 0x02];
const CENTRAL_HEADER_SIZE: usize = 46;
const EOCD_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x05, 0x06];
const EOCD_SIZE: usize = 22;
const ZIP64_LOCATOR_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x06, 0x07];
const ZIP64_LOCATOR_SIZE: usize = 20;
const ZIP64_EOCD_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x06, 0x06];
const CACHE_VERSION: u32 = 1;

/// Utterance id to feature locator, ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetIndex {
    entries: BTreeMap<String, FeatureLocator>,
}

impl OffsetIndex {
    pub fn get(&self, id: &str) -> Option<&FeatureLocator> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FeatureLocator)> {
        self.entries.iter().map(|(id, loc)| (id.as_str(), loc))
    }

    /// Persist next to the archive so later runs can skip the scan.
    pub fn save(&self, archive_path: &Path, extension: &str) -> Result<(), PrepError> {
        let stamp = ArchiveStamp::read(archive_path)?;
        let cache = IndexCache {
            version: CACHE_VERSION,
            archive_len: stamp.len,
            member_count: stamp.members,
            extension: extension.to_string(),
            entries: self
                .entries
                .iter()
                .map(|(id, loc)| (id.clone(), loc.byte_offset(), loc.byte_length()))
                .collect(),
        };

        let path = cache_path(archive_path);
        let tmp = path.with_extension("idx.tmp");
        let mut writer = BufWriter::new(File::create(&tmp)?);
        bincode::encode_into_std_write(&cache, &mut writer, bincode::config::standard())?;
        writer.flush()?;
        drop(writer);
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), entries = self.len(), "saved offset index cache");
        Ok(())
    }

    /// Load a cached index if it still describes the archive on disk.
    pub fn load_cached(archive_path: &Path, extension: &str) -> Result<Option<Self>, PrepError> {
        let path = cache_path(archive_path);
        if !path.is_file() {
            return Ok(None);
        }
        let mut reader = BufReader::new(File::open(&path)?);
        let cache: IndexCache = match bincode::decode_from_std_read(&mut reader, bincode::config::standard()) {
            Ok(cache) => cache,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable offset index cache");
                return Ok(None);
            }
        };
        let stamp = ArchiveStamp::read(archive_path)?;
        if cache.version != CACHE_VERSION
            || cache.extension != extension
            || cache.archive_len != stamp.len
            || cache.member_count != stamp.members
        {
            debug!(path = %path.display(), "offset index cache is stale");
            return Ok(None);
        }

        let mut entries = BTreeMap::new();
        for (id, offset, length) in cache.entries {
            entries.insert(id, FeatureLocator::new(archive_path, offset, length)?);
        }
        Ok(Some(Self { entries }))
    }
}

#[derive(bincode::Encode, bincode::Decode)]
struct IndexCache {
    version: u32,
    archive_len: u64,
    member_count: u64,
    extension: String,
    entries: Vec<(String, u64, u64)>,
}

struct ArchiveStamp {
    len: u64,
    members: u64,
}

impl ArchiveStamp {
    fn read(archive_path: &Path) -> Result<Self, PrepError> {
        let len = fs::metadata(archive_path)?.len();
        let members = ZipArchive::new(File::open(archive_path)?)?.len() as u64;
        Ok(Self { len, members })
    }
}

pub fn cache_path(archive_path: &Path) -> PathBuf {
    let mut name = archive_path.as_os_str().to_owned();
    name.push(".idx");
    PathBuf::from(name)
}

/// Utterance id for a member name: basename with the extension stripped.
/// Returns `None` for members that are not artifacts of this extension.
pub fn member_id<'a>(name: &'a str, extension: &str) -> Option<&'a str> {
    let base = name.rsplit('/').next().unwrap_or(name);
    base.strip_suffix(extension).filter(|id| !id.is_empty())
}

/// Compute the locator of every stored artifact member of the archive.
pub fn index(archive_path: &Path, extension: &str) -> Result<OffsetIndex, PrepError> {
    if !archive_path.is_file() {
        return Err(PrepError::missing(archive_path, "feature archive"));
    }
    let archive_len = fs::metadata(archive_path)?.len();
    let mut raw = File::open(archive_path)?;

    // before the zip reader, which folds repeated names into one member
    let names = central_directory_names(&mut raw, archive_path, archive_len)?;
    check_collisions(archive_path, &names, extension)?;
    let mut archive = ZipArchive::new(File::open(archive_path)?)?;
    if names.len() != archive.len() {
        debug!(
            archive = %archive_path.display(),
            entries = names.len(),
            distinct = archive.len(),
            "archive repeats non-artifact member names"
        );
    }

    let mut entries: BTreeMap<String, FeatureLocator> = BTreeMap::new();
    let mut ignored = 0usize;

    for i in 0..archive.len() {
        let member = archive.by_index_raw(i)?;
        let name = member.name().to_string();
        let Some(id) = member_id(&name, extension) else {
            ignored += 1;
            continue;
        };
        if member.compression() != CompressionMethod::Stored {
            return Err(PrepError::UnsupportedCompressionMethod {
                archive: archive_path.to_path_buf(),
                member: name.clone(),
                method: format!("{:?}", member.compression()),
            });
        }
        let header_start = member.header_start();
        let length = member.size();
        drop(member);

        let offset = data_offset(&mut raw, archive_path, header_start, &name)?;
        if offset.checked_add(length).is_none_or(|end| end > archive_len) {
            return Err(PrepError::PartialArchive {
                path: archive_path.to_path_buf(),
                reason: format!("member {} extends past end of file", name),
            });
        }

        entries.insert(id.to_string(), FeatureLocator::new(archive_path, offset, length)?);
    }

    info!(
        archive = %archive_path.display(),
        indexed = entries.len(),
        ignored,
        "indexed feature archive"
    );
    Ok(OffsetIndex { entries })
}

/// Index using the cache when it is current, refreshing it otherwise.
///
/// Runs under a shared destination lock so a concurrent build cannot replace
/// the archive between scanning it and stamping the cache.
pub fn index_cached(archive_path: &Path, extension: &str) -> Result<OffsetIndex, PrepError> {
    if !archive_path.is_file() {
        return Err(PrepError::missing(archive_path, "feature archive"));
    }
    let _lock = DestinationLock::shared(archive_path)?;
    if let Some(cached) = OffsetIndex::load_cached(archive_path, extension)? {
        info!(archive = %archive_path.display(), entries = cached.len(), "using cached offset index");
        return Ok(cached);
    }
    let fresh = index(archive_path, extension)?;
    if let Err(e) = fresh.save(archive_path, extension) {
        warn!(archive = %archive_path.display(), error = %e, "could not write offset index cache");
    }
    Ok(fresh)
}

/// Two artifact members mapping to one id, including two members with the
/// same name, make the whole archive unusable.
fn check_collisions(archive_path: &Path, names: &[String], extension: &str) -> Result<(), PrepError> {
    let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
    for name in names {
        let Some(id) = member_id(name, extension) else {
            continue;
        };
        if let Some(first) = seen.insert(id, name) {
            return Err(PrepError::KeyCollision {
                archive: archive_path.to_path_buf(),
                id: id.to_string(),
                first: first.to_string(),
                second: name.clone(),
            });
        }
    }
    Ok(())
}

fn le16(bytes: &[u8], at: usize) -> u64 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]]) as u64
}

fn le32(bytes: &[u8], at: usize) -> u64 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]) as u64
}

fn le64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

/// Every member name in central-directory order, repeats included. The `zip`
/// reader keys members by name, so a repeated name never shows up there.
fn central_directory_names(raw: &mut File, archive_path: &Path, archive_len: u64) -> Result<Vec<String>, PrepError> {
    let corrupt = |reason: String| PrepError::PartialArchive {
        path: archive_path.to_path_buf(),
        reason,
    };

    // the end record is followed by at most a u16-sized comment
    let tail_len = archive_len.min((EOCD_SIZE + u16::MAX as usize) as u64);
    let tail_start = archive_len - tail_len;
    let mut tail = vec![0u8; tail_len as usize];
    raw.seek(SeekFrom::Start(tail_start))?;
    raw.read_exact(&mut tail)?;
    if tail.len() < EOCD_SIZE {
        return Err(corrupt("too short for an end of central directory record".to_string()));
    }
    let eocd = (0..=tail.len() - EOCD_SIZE)
        .rev()
        .find(|&i| tail[i..i + 4] == EOCD_SIGNATURE)
        .ok_or_else(|| corrupt("no end of central directory record".to_string()))?;

    let mut entries = le16(&tail, eocd + 10);
    let mut dir_size = le32(&tail, eocd + 12);
    let dir_offset = le32(&tail, eocd + 16);
    // measured back from the end record, which tolerates data prepended to the archive
    let mut dir_start = (tail_start + eocd as u64)
        .checked_sub(dir_size)
        .ok_or_else(|| corrupt("central directory larger than the archive".to_string()))?;

    if entries == u16::MAX as u64 || dir_size == u32::MAX as u64 || dir_offset == u32::MAX as u64 {
        let locator = eocd
            .checked_sub(ZIP64_LOCATOR_SIZE)
            .filter(|&at| tail[at..at + 4] == ZIP64_LOCATOR_SIGNATURE)
            .ok_or_else(|| corrupt("zip64 end record locator missing".to_string()))?;
        let mut record = [0u8; 56];
        raw.seek(SeekFrom::Start(le64(&tail, locator + 8)))?;
        raw.read_exact(&mut record)?;
        if record[..4] != ZIP64_EOCD_SIGNATURE {
            return Err(corrupt("bad zip64 end of central directory record".to_string()));
        }
        entries = le64(&record, 32);
        dir_size = le64(&record, 40);
        dir_start = le64(&record, 48);
    }

    if dir_start.checked_add(dir_size).is_none_or(|end| end > archive_len) {
        return Err(corrupt("central directory extends past end of file".to_string()));
    }
    let mut directory = vec![0u8; dir_size as usize];
    raw.seek(SeekFrom::Start(dir_start))?;
    raw.read_exact(&mut directory)?;

    let mut names = Vec::new();
    let mut pos = 0usize;
    for _ in 0..entries {
        let header = directory
            .get(pos..pos + CENTRAL_HEADER_SIZE)
            .filter(|h| h[..4] == CENTRAL_HEADER_SIGNATURE)
            .ok_or_else(|| corrupt(format!("bad central directory entry at {}", dir_start + pos as u64)))?;
        let name_len = le16(header, 28) as usize;
        let extra_len = le16(header, 30) as usize;
        let comment_len = le16(header, 32) as usize;
        let name_start = pos + CENTRAL_HEADER_SIZE;
        let name = directory
            .get(name_start..name_start + name_len)
            .ok_or_else(|| corrupt(format!("truncated central directory entry at {}", dir_start + pos as u64)))?;
        names.push(String::from_utf8_lossy(name).into_owned());
        pos = name_start + name_len + extra_len + comment_len;
    }
    Ok(names)
}

// offset = header_start + 30 + name length + extra length, with the lengths
// taken from the local header itself since the central directory copy of the
// extra field may differ.
fn data_offset(raw: &mut File, archive_path: &Path, header_start: u64, name: &str) -> Result<u64, PrepError> {
    let mut header = [0u8; LOCAL_HEADER_SIZE as usize];
    raw.seek(SeekFrom::Start(header_start))?;
    raw.read_exact(&mut header).map_err(|e| PrepError::PartialArchive {
        path: archive_path.to_path_buf(),
        reason: format!("cannot read local header of {}: {}", name, e),
    })?;
    if header[..4] != LOCAL_HEADER_SIGNATURE {
        return Err(PrepError::PartialArchive {
            path: archive_path.to_path_buf(),
            reason: format!("bad local header signature for {} at {}", name, header_start),
        });
    }
    let name_len = u16::from_le_bytes([header[26], header[27]]) as u64;
    let extra_len = u16::from_le_bytes([header[28], header[29]]) as u64;
    if name_len != name.len() as u64 {
        return Err(PrepError::PartialArchive {
            path: archive_path.to_path_buf(),
            reason: format!("local header name length {} disagrees with {}", name_len, name),
        });
    }
    Ok(header_start + LOCAL_HEADER_SIZE + name_len + extra_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn write_zip(path: &Path, members: &[(&str, &[u8], CompressionMethod)]) {
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        for (name, data, method) in members {
            let options = SimpleFileOptions::default().compression_method(*method);
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_member_id() {
        assert_eq!(member_id("utt1.npy", ".npy"), Some("utt1"));
        assert_eq!(member_id("src_fbank80/utt1.npy", ".npy"), Some("utt1"));
        assert_eq!(member_id("utt1.flac", ".npy"), None);
        assert_eq!(member_id(".npy", ".npy"), None);
    }

    #[test]
    fn test_offsets_read_back_exact_bytes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("feats.zip");
        write_zip(
            &path,
            &[
                ("a.npy", b"alpha-bytes", CompressionMethod::Stored),
                ("notes.txt", b"ignored", CompressionMethod::Stored),
                ("bb.npy", b"", CompressionMethod::Stored),
                ("ccc.npy", &[7u8; 1000], CompressionMethod::Stored),
            ],
        );

        let index = index(&path, ".npy").unwrap();
        assert_eq!(index.len(), 3);
        assert!(!index.contains("notes"));
        assert_eq!(index.get("a").unwrap().read_bytes().unwrap(), b"alpha-bytes");
        assert_eq!(index.get("bb").unwrap().byte_length(), 0);
        assert_eq!(index.get("ccc").unwrap().read_bytes().unwrap(), vec![7u8; 1000]);

        let ids: Vec<&str> = index.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "bb", "ccc"]);
    }

    #[test]
    fn test_compressed_member_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("feats.zip");
        write_zip(
            &path,
            &[
                ("a.npy", b"stored", CompressionMethod::Stored),
                ("b.npy", &[0u8; 4096], CompressionMethod::Deflated),
            ],
        );
        match index(&path, ".npy") {
            Err(PrepError::UnsupportedCompressionMethod { member, .. }) => assert_eq!(member, "b.npy"),
            other => panic!("expected UnsupportedCompressionMethod, got {:?}", other),
        }
    }

    #[test]
    fn test_compressed_non_artifact_is_ignored() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("feats.zip");
        write_zip(
            &path,
            &[
                ("a.npy", b"stored", CompressionMethod::Stored),
                ("readme.txt", &[b'x'; 512], CompressionMethod::Deflated),
            ],
        );
        assert_eq!(index(&path, ".npy").unwrap().len(), 1);
    }

    #[test]
    fn test_collision_is_fatal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("feats.zip");
        write_zip(
            &path,
            &[
                ("a.npy", b"one", CompressionMethod::Stored),
                ("nested/a.npy", b"two", CompressionMethod::Stored),
            ],
        );
        match index(&path, ".npy") {
            Err(PrepError::KeyCollision { id, first, second, .. }) => {
                assert_eq!(id, "a");
                assert_eq!(first, "a.npy");
                assert_eq!(second, "nested/a.npy");
            }
            other => panic!("expected KeyCollision, got {:?}", other),
        }
    }

    #[test]
    fn test_repeated_member_name_is_a_collision() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("feats.zip");
        write_zip(
            &path,
            &[
                ("a.npy", b"first", CompressionMethod::Stored),
                ("b.npy", b"second-longer", CompressionMethod::Stored),
                ("c.npy", b"third", CompressionMethod::Stored),
            ],
        );
        // rename b.npy to a.npy in both its local header and its directory entry
        let bytes = fs::read(&path).unwrap();
        let mut renamed = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i..].starts_with(b"b.npy") {
                renamed.extend_from_slice(b"a.npy");
                i += 5;
            } else {
                renamed.push(bytes[i]);
                i += 1;
            }
        }
        fs::write(&path, &renamed).unwrap();

        let names = central_directory_names(&mut File::open(&path).unwrap(), &path, renamed.len() as u64).unwrap();
        assert_eq!(names, vec!["a.npy", "a.npy", "c.npy"]);
        match index(&path, ".npy") {
            Err(PrepError::KeyCollision { id, first, second, .. }) => {
                assert_eq!(id, "a");
                assert_eq!(first, "a.npy");
                assert_eq!(second, "a.npy");
            }
            other => panic!("expected KeyCollision, got {:?}", other),
        }
    }

    #[test]
    fn test_central_directory_names_with_archive_comment() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("feats.zip");
        let mut writer = ZipWriter::new(File::create(&path).unwrap());
        writer.set_comment("{\"members\":2}");
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        writer.start_file("x.npy", stored).unwrap();
        writer.write_all(b"xx").unwrap();
        writer.start_file("dir/y.npy", stored).unwrap();
        writer.write_all(b"yy").unwrap();
        writer.finish().unwrap();

        let len = fs::metadata(&path).unwrap().len();
        let names = central_directory_names(&mut File::open(&path).unwrap(), &path, len).unwrap();
        assert_eq!(names, vec!["x.npy", "dir/y.npy"]);

        let garbage = temp_dir.path().join("garbage.zip");
        fs::write(&garbage, b"not an archive at all, just bytes").unwrap();
        assert!(matches!(
            central_directory_names(&mut File::open(&garbage).unwrap(), &garbage, 33),
            Err(PrepError::PartialArchive { .. })
        ));
    }

    #[test]
    fn test_missing_archive() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            index(&temp_dir.path().join("none.zip"), ".npy"),
            Err(PrepError::MissingInputFile { .. })
        ));
    }

    #[test]
    fn test_cache_round_trip_and_staleness() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("feats.zip");
        write_zip(&path, &[("a.npy", b"alpha", CompressionMethod::Stored)]);

        assert!(OffsetIndex::load_cached(&path, ".npy").unwrap().is_none());
        let fresh = index_cached(&path, ".npy").unwrap();
        assert!(cache_path(&path).is_file());
        assert_eq!(OffsetIndex::load_cached(&path, ".npy").unwrap(), Some(fresh.clone()));
        assert!(OffsetIndex::load_cached(&path, ".flac").unwrap().is_none());

        // rewriting the archive invalidates the cache
        write_zip(
            &path,
            &[
                ("a.npy", b"alpha", CompressionMethod::Stored),
                ("b.npy", b"beta", CompressionMethod::Stored),
            ],
        );
        assert!(OffsetIndex::load_cached(&path, ".npy").unwrap().is_none());
        assert_eq!(index_cached(&path, ".npy").unwrap().len(), 2);
    }

    #[test]
    fn test_index_cached_waits_for_running_build() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("feats.zip");
        write_zip(&path, &[("a.npy", b"alpha", CompressionMethod::Stored)]);

        let build_lock = DestinationLock::exclusive(&path).unwrap();
        let reader = {
            let path = path.clone();
            std::thread::spawn(move || index_cached(&path, ".npy").unwrap())
        };
        std::thread::sleep(std::time::Duration::from_millis(100));
        write_zip(
            &path,
            &[
                ("b.npy", b"beta", CompressionMethod::Stored),
                ("a.npy", b"alpha", CompressionMethod::Stored),
            ],
        );
        drop(build_lock);

        // the reader only sees the archive the build left behind
        let seen = reader.join().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen.get("a").unwrap().read_bytes().unwrap(), b"alpha");
        assert_eq!(OffsetIndex::load_cached(&path, ".npy").unwrap(), Some(seen));
    }

    #[test]
    fn test_index_cached_missing_archive_leaves_no_lock() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("none.zip");
        assert!(matches!(index_cached(&path, ".npy"), Err(PrepError::MissingInputFile { .. })));
        assert!(!temp_dir.path().join("none.zip.lock").exists());
    }
}
