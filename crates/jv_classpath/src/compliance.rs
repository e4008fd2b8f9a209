use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Earliest Java release that understands `META-INF/versions/<n>/` overlays.
pub const MULTI_RELEASE_FLOOR: u16 = 9;

/// Release assumed when no compliance is configured.
pub const DEFAULT_RELEASE: u16 = 25;

/// Target compliance level of a classpath entry, e.g. `"17"` or `"1.8"`.
///
/// The token is kept verbatim; [`Compliance::release`] exposes the
/// numeric rank used to decide which overlays are visible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Compliance {
    token: String,
    release: Option<u16>,
}

impl Compliance {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        let release = parse_release(&token);
        Self { token, release }
    }

    pub fn from_release(release: u16) -> Self {
        Self {
            token: release.to_string(),
            release: Some(release),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// Numeric release rank, `None` when the token is not a Java version.
    pub fn release(&self) -> Option<u16> {
        self.release
    }

    pub fn supports_multi_release(&self) -> bool {
        self.release
            .map(|release| release >= MULTI_RELEASE_FLOOR)
            .unwrap_or(false)
    }
}

impl Default for Compliance {
    fn default() -> Self {
        Self::from_release(DEFAULT_RELEASE)
    }
}

impl fmt::Display for Compliance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}

impl FromStr for Compliance {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for Compliance {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Compliance {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<Compliance> for String {
    fn from(value: Compliance) -> Self {
        value.token
    }
}

fn parse_release(token: &str) -> Option<u16> {
    let token = token.trim();
    let mut segments = token.split('.');
    let first = segments.next()?.parse::<u16>().ok()?;

    // Java 8 and earlier are spelled 1.x
    if first == 1 {
        return match segments.next() {
            Some(minor) => minor.parse::<u16>().ok(),
            None => Some(1),
        };
    }

    if first == 0 {
        return None;
    }

    Some(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modern_release_tokens() {
        assert_eq!(Compliance::new("9").release(), Some(9));
        assert_eq!(Compliance::new("17").release(), Some(17));
        assert_eq!(Compliance::new(" 21 ").release(), Some(21));
        assert_eq!(Compliance::new("21.0.2").release(), Some(21));
    }

    #[test]
    fn parses_legacy_release_tokens() {
        assert_eq!(Compliance::new("1.8").release(), Some(8));
        assert_eq!(Compliance::new("1.5").release(), Some(5));
        assert!(!Compliance::new("1.8").supports_multi_release());
    }

    #[test]
    fn rejects_garbage_tokens() {
        assert_eq!(Compliance::new("latest").release(), None);
        assert_eq!(Compliance::new("").release(), None);
        assert_eq!(Compliance::new("0").release(), None);
        assert!(!Compliance::new("latest").supports_multi_release());
    }

    #[test]
    fn large_tokens_keep_their_rank() {
        assert_eq!(Compliance::new("65500").release(), Some(65500));
        assert_eq!(Compliance::new("70000").release(), None);
    }

    #[test]
    fn keeps_token_verbatim() {
        let compliance = Compliance::new("1.8");
        assert_eq!(compliance.as_str(), "1.8");
        assert_eq!(compliance.to_string(), "1.8");
        assert_eq!(Compliance::default().release(), Some(DEFAULT_RELEASE));
    }
}
