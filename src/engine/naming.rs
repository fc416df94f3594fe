use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// Hex characters of randomness appended to each archive name
const SUFFIX_LEN: usize = 12;

/// Identifier of a generated archive: `<prefix>/<yyyyMMddHHmmss>.<suffix>.zip`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputId(String);

impl OutputId {
    /// Generate a fresh identifier under `prefix`
    pub fn generate(prefix: &str) -> Self {
        Self::generate_at(prefix, Utc::now())
    }

    fn generate_at(prefix: &str, at: DateTime<Utc>) -> Self {
        // The first 12 hex digits of a v4 UUID are all random bits
        let random = Uuid::new_v4().simple().to_string();
        OutputId(format!(
            "{}/{}.{}.zip",
            prefix.trim_matches('/'),
            at.format("%Y%m%d%H%M%S"),
            &random[..SUFFIX_LEN]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for OutputId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Name used when a path has no non-empty segment
pub const UNNAMED_ENTRY: &str = "unnamed";

/// Name an entry after the final non-empty segment of its source path.
///
/// Trailing slashes are ignored, so `docs/folder/` becomes `folder`. A path
/// made only of slashes gets `UNNAMED_ENTRY`. The result never contains a
/// `/`, so readers never take an entry for a directory.
pub fn entry_name(path: &str) -> &str {
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(UNNAMED_ENTRY)
}
