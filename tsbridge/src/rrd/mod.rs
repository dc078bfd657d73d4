//! Mapping between measurement tag sets and RRD files on disk.
//!
//! RRDtool has no notion of tags, so every distinct tag set of a measurement
//! lives in its own file. A [`TagStrategy`] decides where that file is and
//! answers the reverse question for queries: which files match a list of tag
//! conditions.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::model::{QueryCondition, Value};

pub mod codec;
pub mod file_name;
pub mod folder;
pub mod no_tags;
pub mod search;

pub use codec::TagMap;
pub use file_name::FileNameStrategy;
pub use folder::FolderStrategy;
pub use no_tags::NoTagsStrategy;
pub use search::{TagCondition, TagSearch};

/// Strategy for locating RRD files by measurement and tags.
pub trait TagStrategy: Send + Sync + Debug {
    /// Directory every file lives under.
    fn base_dir(&self) -> &Path;

    /// File holding `measurement` with exactly these tags.
    ///
    /// # Errors
    ///
    /// Fails for list-valued tags and for values that are unsafe as path
    /// segments.
    fn file_path(&self, measurement: &str, tags: &BTreeMap<String, Value>) -> Result<PathBuf>;

    /// Existing files of `measurement` whose tags satisfy `conditions`, sorted.
    fn resolve_file_paths(
        &self,
        measurement: &str,
        conditions: &[QueryCondition],
    ) -> Result<Vec<PathBuf>>;

    /// Measurements having at least one file whose tags satisfy `conditions`,
    /// sorted and deduplicated.
    fn find_measurements_by_tags(&self, conditions: &[QueryCondition]) -> Result<Vec<String>>;
}

/// Collects, in sorted order, the files under `base` matching `pattern`.
///
/// `base` is matched literally; only `pattern` may contain glob syntax.
pub(crate) fn glob_files(base: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = Path::new(&glob::Pattern::escape(&base.to_string_lossy())).join(pattern);
    let mut paths = Vec::new();
    for entry in glob::glob(&full.to_string_lossy())? {
        let path = entry?;
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// File stem with the `.rrd` extension removed, if it has one.
pub(crate) fn rrd_stem(path: &Path) -> Option<&str> {
    if path.extension()?.to_str()? != codec::RRD_EXTENSION {
        return None;
    }
    path.file_stem()?.to_str()
}
