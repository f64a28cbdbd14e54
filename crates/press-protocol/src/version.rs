// SPDX-License-Identifier: MIT OR Apache-2.0
//! Contract version parsing and compatibility.

/// Parse a version string of the form `"press/vMAJOR.MINOR"` into
/// `(MAJOR, MINOR)`.
///
/// Returns `None` if the string does not match the expected format.
#[must_use]
pub fn parse_version(version: &str) -> Option<(u32, u32)> {
    let rest = version.strip_prefix("press/v")?;
    let (major_str, minor_str) = rest.split_once('.')?;
    let major = major_str.parse::<u32>().ok()?;
    let minor = minor_str.parse::<u32>().ok()?;
    Some((major, minor))
}

/// Two versions are compatible when they share the same major component.
///
/// Returns `false` if either string cannot be parsed.
#[must_use]
pub fn is_compatible_version(their_version: &str, our_version: &str) -> bool {
    match (parse_version(their_version), parse_version(our_version)) {
        (Some((their_major, _)), Some((our_major, _))) => their_major == our_major,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_versions() {
        assert_eq!(parse_version("press/v1.0"), Some((1, 0)));
        assert_eq!(parse_version("press/v2.13"), Some((2, 13)));
        assert_eq!(parse_version("abc/v1.0"), None);
        assert_eq!(parse_version("press/v1"), None);
    }

    #[test]
    fn same_major_is_compatible() {
        assert!(is_compatible_version("press/v1.4", "press/v1.0"));
        assert!(!is_compatible_version("press/v2.0", "press/v1.9"));
        assert!(!is_compatible_version("garbage", "press/v1.0"));
    }
}
