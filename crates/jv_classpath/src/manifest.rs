use crate::archive::ArchiveHandle;
use std::collections::BTreeMap;

pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

const MULTI_RELEASE_KEY: &str = "Multi-Release";

/// Main section of a JAR manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    attributes: BTreeMap<String, String>,
}

impl Manifest {
    pub fn parse(content: &str) -> Self {
        let mut attributes = BTreeMap::new();
        let mut current: Option<(String, String)> = None;

        for line in content.lines() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                // end of the main section
                break;
            }
            if let Some(continuation) = line.strip_prefix(' ') {
                if let Some((_, value)) = current.as_mut() {
                    value.push_str(continuation);
                }
                continue;
            }
            if let Some((key, value)) = current.take() {
                attributes.insert(key.to_ascii_lowercase(), value);
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            current = Some((key.trim().to_string(), value.trim_start().to_string()));
        }
        if let Some((key, value)) = current {
            attributes.insert(key.to_ascii_lowercase(), value);
        }

        Self { attributes }
    }

    /// Reads the manifest from an open archive, `None` when it is missing or
    /// unreadable.
    pub fn read(handle: &mut ArchiveHandle) -> Option<Self> {
        let bytes = handle.read_entry(MANIFEST_PATH).ok()??;
        Some(Self::parse(&String::from_utf8_lossy(&bytes)))
    }

    /// Attribute lookup; keys are case-insensitive.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(&key.to_ascii_lowercase())
            .map(|value| value.trim_end())
    }

    pub fn is_multi_release(&self) -> bool {
        self.get(MULTI_RELEASE_KEY)
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}
