use time::OffsetDateTime;
use uuid::Uuid;

use crate::{StorageError, StorageResult};

const NAMESPACE_MIN_LEN: usize = 3;
const NAMESPACE_MAX_LEN: usize = 63;

/// Where one workflow log is archived.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ArchiveTarget {
    pub namespace: String,
    pub object_key: String,
}

impl ArchiveTarget {
    pub fn new(owner: &str, repo: &str) -> StorageResult<Self> {
        Self::at(owner, repo, OffsetDateTime::now_utc())
    }

    pub fn at(owner: &str, repo: &str, now: OffsetDateTime) -> StorageResult<Self> {
        Ok(Self { namespace: namespace_for(owner, repo)?, object_key: object_key(now) })
    }
}

/// `{owner}-{repo}`, folded into a valid container name.
///
/// Container names are 3-63 characters of lowercase letters, digits and single hyphens,
/// starting and ending with a letter or digit. Anything else becomes a hyphen.
pub fn namespace_for(owner: &str, repo: &str) -> StorageResult<String> {
    let raw = format!("{owner}-{repo}");
    let mut name = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' };
        if c == '-' && (name.is_empty() || name.ends_with('-')) {
            continue;
        }
        name.push(c);
    }
    name.truncate(NAMESPACE_MAX_LEN);
    while name.ends_with('-') {
        name.pop();
    }
    if name.len() < NAMESPACE_MIN_LEN {
        return Err(StorageError::InvalidNamespace {
            name: raw,
            reason: "fewer than 3 valid characters",
        });
    }
    Ok(name)
}

/// `{YYYYMMDDHHMMSS}-{uuid}.log.gz`, timestamp in UTC.
fn object_key(now: OffsetDateTime) -> String {
    let now = now.to_offset(time::UtcOffset::UTC);
    format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}-{}.log.gz",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        Uuid::new_v4()
    )
}
