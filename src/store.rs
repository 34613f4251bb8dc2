use std::fs;
use std::io::{self, Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use csv::{ReaderBuilder, StringRecord};
use tempfile::Builder;
use tracing::debug;

use crate::domain::WorkItem;
use crate::error::BulkError;

pub const DEFAULT_VALIDITY_MARKER: &str = "GHI";

/// Bytes read before a header row is declared garbage.
pub const HEADER_LIMIT: u64 = 64 * 1024;

/// On-disk layout of downloaded artifacts: `<root>/<year>/<artifact>.csv`.
///
/// Published artifacts only ever appear at their final path through a rename
/// from the `.part` staging file next to them.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: Utf8PathBuf,
    marker: String,
}

impl ArtifactStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self::with_marker(root, DEFAULT_VALIDITY_MARKER)
    }

    pub fn with_marker(root: Utf8PathBuf, marker: &str) -> Self {
        Self {
            root,
            marker: marker.to_uppercase(),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn year_dir(&self, year: i32) -> Utf8PathBuf {
        self.root.join(year.to_string())
    }

    pub fn path_for(&self, item: &WorkItem) -> Utf8PathBuf {
        self.year_dir(item.year).join(item.artifact_name())
    }

    pub fn staging_path(&self, item: &WorkItem) -> Utf8PathBuf {
        self.path_for(item).with_extension("part")
    }

    pub fn error_path_for(&self, item: &WorkItem) -> Utf8PathBuf {
        self.path_for(item).with_extension("err.txt")
    }

    pub fn ensure_root(&self) -> Result<(), BulkError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| BulkError::Filesystem(format!("create {}: {err}", self.root)))
    }

    pub fn ensure_year_dir(&self, year: i32) -> Result<(), BulkError> {
        let dir = self.year_dir(year);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| BulkError::Filesystem(format!("create {dir}: {err}")))
    }

    pub fn artifact_exists(&self, item: &WorkItem) -> bool {
        self.path_for(item).as_std_path().exists()
    }

    pub fn exists_and_valid(&self, item: &WorkItem) -> bool {
        let path = self.path_for(item);
        path.as_std_path().is_file() && self.looks_like_valid_csv(&path)
    }

    pub fn has_error_record(&self, item: &WorkItem) -> bool {
        self.error_path_for(item).as_std_path().exists()
    }

    /// Cheap structural check: the header row must name a column containing the marker.
    ///
    /// Read and decode failures count as invalid rather than errors.
    pub fn looks_like_valid_csv(&self, path: &Utf8Path) -> bool {
        match read_header(path) {
            Ok(Some(columns)) => columns
                .iter()
                .any(|column| column.to_uppercase().contains(&self.marker)),
            Ok(None) => false,
            Err(err) => {
                debug!(path = %path, error = %err, "artifact header unreadable");
                false
            }
        }
    }

    /// Moves a fully written staging file onto the item's final path.
    ///
    /// An invalid staging file is removed and never becomes visible under the final name.
    pub fn publish(&self, staged: &Utf8Path, item: &WorkItem) -> Result<Utf8PathBuf, BulkError> {
        let target = self.path_for(item);
        if !self.looks_like_valid_csv(staged) {
            remove_if_exists(staged)?;
            return Err(BulkError::InvalidArtifact(target.to_string()));
        }
        fs::rename(staged.as_std_path(), target.as_std_path())
            .map_err(|err| BulkError::Filesystem(format!("rename {staged} -> {target}: {err}")))?;
        Ok(target)
    }

    /// Removes a published artifact that no longer passes validation.
    pub fn discard_invalid(&self, item: &WorkItem) -> Result<bool, BulkError> {
        let path = self.path_for(item);
        if !path.as_std_path().exists() || self.looks_like_valid_csv(&path) {
            return Ok(false);
        }
        remove_if_exists(&path)?;
        Ok(true)
    }

    pub fn discard_staging(&self, item: &WorkItem) -> Result<(), BulkError> {
        remove_if_exists(&self.staging_path(item))
    }

    pub fn write_error_record(&self, item: &WorkItem, message: &str) -> Result<Utf8PathBuf, BulkError> {
        let path = self.error_path_for(item);
        write_bytes_atomic(&path, message.as_bytes())?;
        Ok(path)
    }

    pub fn read_error_record(&self, item: &WorkItem) -> Option<String> {
        fs::read_to_string(self.error_path_for(item).as_std_path()).ok()
    }
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), BulkError> {
    let parent = path
        .parent()
        .ok_or_else(|| BulkError::Filesystem(format!("invalid destination path {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| BulkError::Filesystem(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix(".nsrdb-bulk")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| BulkError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| BulkError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| BulkError::Filesystem(err.to_string()))?;
    Ok(())
}

fn remove_if_exists(path: &Utf8Path) -> Result<(), BulkError> {
    match fs::remove_file(path.as_std_path()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(BulkError::Filesystem(format!("remove {path}: {err}"))),
    }
}

fn read_header(path: &Utf8Path) -> csv::Result<Option<StringRecord>> {
    let file = fs::File::open(path.as_std_path())?;
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file.take(HEADER_LIMIT));
    let mut record = StringRecord::new();
    if !reader.read_record(&mut record)? {
        return Ok(None);
    }
    if reader.position().byte() >= HEADER_LIMIT {
        debug!(path = %path, limit = HEADER_LIMIT, "header row hit the size limit");
        return Ok(None);
    }
    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GridPoint;

    fn store_in(temp: &tempfile::TempDir) -> ArtifactStore {
        ArtifactStore::new(Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap())
    }

    #[test]
    fn layout_paths() {
        let store = ArtifactStore::new(Utf8PathBuf::from("out"));
        let item = WorkItem::new(2020, GridPoint::new(8.0, 102.0));

        assert_eq!(
            store.path_for(&item),
            Utf8PathBuf::from("out/2020/nsrdb_2020_8.0000_102.0000.csv")
        );
        assert_eq!(
            store.staging_path(&item),
            Utf8PathBuf::from("out/2020/nsrdb_2020_8.0000_102.0000.part")
        );
        assert_eq!(
            store.error_path_for(&item),
            Utf8PathBuf::from("out/2020/nsrdb_2020_8.0000_102.0000.err.txt")
        );
    }

    #[test]
    fn quoted_header_fields_are_parsed_as_csv() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        let path = store.root().join("quoted.csv");

        fs::write(path.as_std_path(), "\"Time\nZone\",GHI,DNI\n1,2,3\n").unwrap();
        assert!(store.looks_like_valid_csv(&path));

        fs::write(path.as_std_path(), "Year,\"ghi, W/m2\"\n2020,1\n").unwrap();
        assert!(store.looks_like_valid_csv(&path));

        fs::write(path.as_std_path(), "\"Time\nZone\",DNI\nGHI,1\n").unwrap();
        assert!(!store.looks_like_valid_csv(&path));
    }

    #[test]
    fn header_past_size_limit_is_invalid() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        let path = store.root().join("garbage.csv");

        let mut junk = "GHI".to_string();
        junk.push_str(&"x".repeat(4 * HEADER_LIMIT as usize));
        fs::write(path.as_std_path(), &junk).unwrap();
        assert!(!store.looks_like_valid_csv(&path));
    }

    #[test]
    fn long_body_after_short_header_is_valid() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        let path = store.root().join("big.csv");

        let mut content = "Year,Month,Day,Hour,Minute,GHI\n".to_string();
        for _ in 0..20_000 {
            content.push_str("2020,1,1,0,0,0\n");
        }
        assert!(content.len() as u64 > HEADER_LIMIT);
        fs::write(path.as_std_path(), &content).unwrap();
        assert!(store.looks_like_valid_csv(&path));
    }

    #[test]
    fn non_utf8_header_is_invalid() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        let path = store.root().join("binary.csv");
        fs::write(path.as_std_path(), [b'G', b'H', b'I', 0xff, 0xfe, b'\n']).unwrap();
        assert!(!store.looks_like_valid_csv(&path));
    }

    #[test]
    fn validity_is_case_insensitive() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        let path = store.root().join("a.csv");

        fs::write(path.as_std_path(), "Source,Location ID,City\nNSRDB,1,x\n").unwrap();
        assert!(!store.looks_like_valid_csv(&path));

        fs::write(path.as_std_path(), "Year,Month,Day,Hour,Minute,ghi,DNI\r\n2020,1,1,0,0,0,0\r\n")
            .unwrap();
        assert!(store.looks_like_valid_csv(&path));

        fs::write(path.as_std_path(), "").unwrap();
        assert!(!store.looks_like_valid_csv(&path));

        assert!(!store.looks_like_valid_csv(&store.root().join("missing.csv")));
    }

    #[test]
    fn html_error_page_is_invalid() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        let path = store.root().join("page.csv");
        fs::write(path.as_std_path(), "<html><body>Too many requests</body></html>").unwrap();
        assert!(!store.looks_like_valid_csv(&path));
    }

    #[test]
    fn error_record_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        let item = WorkItem::new(2021, GridPoint::new(9.5, 104.0));

        let path = store.write_error_record(&item, "HTTP 500: boom").unwrap();
        assert!(path.as_std_path().exists());
        assert!(store.has_error_record(&item));
        assert_eq!(store.read_error_record(&item).as_deref(), Some("HTTP 500: boom"));
        assert!(!store.artifact_exists(&item));
    }
}
