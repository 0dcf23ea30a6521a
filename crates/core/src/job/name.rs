//! Identifying metadata embedded in source item names.
//!
//! Items named `<kind>-<uuid>.<ext>` (for example
//! `DPJ-SIP-9e4c8d49-2e11-4c49-9a6c-2c7c0b1ffb2a.zip`) carry the identifier
//! of the record they were exported from.

use std::path::Path;

use serde::{Deserialize, Serialize};

const NAME_PATTERN: &str = r"^(?P<kind>.*)-(?P<uuid>[a-z0-9]{8}-[a-z0-9]{4}-[1-5][a-z0-9]{3}-[a-z0-9]{4}-[a-z0-9]{12})\.(?P<ext>.*)$";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameInfo {
    pub kind: String,
    pub uuid: String,
}

/// Parse the final path segment of `key`. Returns `None` for names that do
/// not follow the convention.
pub fn parse_name(key: &str) -> Option<NameInfo> {
    let name = Path::new(key).file_name()?.to_str()?;
    let re = regex_lite::Regex::new(NAME_PATTERN).ok()?;
    let caps = re.captures(name)?;
    Some(NameInfo {
        kind: caps.name("kind")?.as_str().to_string(),
        uuid: caps.name("uuid")?.as_str().to_string(),
    })
}
