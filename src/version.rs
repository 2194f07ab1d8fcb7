//! Version parsing and update classification
//!
//! Everything here is pure. Version strings in the wild are not guaranteed
//! to be semantic versions, so unparsable input yields `None` or
//! [`UpdateClass::Unknown`] instead of an error or a guessed default.

use crate::types::UpdateClass;
use chrono::NaiveDate;
use semver::Version;
use std::cmp::Ordering;

/// Non-numeric release tokens accepted as versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseTag {
    Latest,
    Stable,
    Current,
}

/// A version string that matched one of the recognized shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedVersion {
    /// Strict semver, or a partial/bare-integer version padded with zeros
    Semver(Version),
    /// Date-stamped release (`2023-01-15`, `2023.01.15`, `20230115`)
    Date(NaiveDate),
    Tag(ReleaseTag),
}

impl ParsedVersion {
    fn cmp_same_kind(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Semver(a), Self::Semver(b)) => Some(precedence(a).cmp(&precedence(b))),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::Tag(a), Self::Tag(b)) if a == b => Some(Ordering::Equal),
            _ => None,
        }
    }
}

/// Build metadata does not take part in ordering or equality
fn precedence(v: &Version) -> (u64, u64, u64, &semver::Prerelease) {
    (v.major, v.minor, v.patch, &v.pre)
}

/// Remove leading range operators and a `v` prefix: `^1.2.3`, `>= 1.0`, `v2.0.0`
fn strip_range_operators(input: &str) -> &str {
    const OPERATORS: [&str; 7] = [">=", "<=", "^", "~", ">", "<", "="];

    let mut rest = input.trim();
    loop {
        if let Some(stripped) = OPERATORS.iter().find_map(|op| rest.strip_prefix(op)) {
            rest = stripped.trim_start();
            continue;
        }

        let mut chars = rest.chars();
        if matches!(chars.next(), Some('v' | 'V'))
            && chars.next().is_some_and(|c| c.is_ascii_digit())
        {
            rest = &rest[1..];
            continue;
        }

        return rest;
    }
}

fn parse_tag(input: &str) -> Option<ReleaseTag> {
    match input.to_ascii_lowercase().as_str() {
        "latest" => Some(ReleaseTag::Latest),
        "stable" => Some(ReleaseTag::Stable),
        "current" => Some(ReleaseTag::Current),
        _ => None,
    }
}

fn parse_date(input: &str) -> Option<NaiveDate> {
    if !input.is_ascii() {
        return None;
    }

    let (year, month, day) = match input.len() {
        8 => (&input[..4], &input[4..6], &input[6..8]),
        10 => {
            let bytes = input.as_bytes();
            let separator = bytes[4];
            if !matches!(separator, b'-' | b'.') || bytes[7] != separator {
                return None;
            }
            (&input[..4], &input[5..7], &input[8..10])
        }
        _ => return None,
    };

    if ![year, month, day]
        .iter()
        .all(|part| part.bytes().all(|b| b.is_ascii_digit()))
    {
        return None;
    }

    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

/// `1` -> 1.0.0, `1.2` -> 1.2.0
fn parse_partial(input: &str) -> Option<Version> {
    let parts: Vec<&str> = input.split('.').collect();
    if parts.len() > 2
        || parts
            .iter()
            .any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()))
    {
        return None;
    }

    let major = parts[0].parse().ok()?;
    let minor = match parts.get(1) {
        Some(minor) => minor.parse().ok()?,
        None => 0,
    };
    Some(Version::new(major, minor, 0))
}

/// Parse a version string, tolerating leading range operators.
///
/// Returns `None` when no recognized shape matches.
///
/// # Examples
///
/// ```
/// use deps_inspect::version::{parse, ParsedVersion};
///
/// assert!(matches!(parse("^1.2.3"), Some(ParsedVersion::Semver(_))));
/// assert!(matches!(parse("2023-01-15"), Some(ParsedVersion::Date(_))));
/// assert_eq!(parse("not a version"), None);
/// ```
pub fn parse(input: &str) -> Option<ParsedVersion> {
    let stripped = strip_range_operators(input);
    if stripped.is_empty() {
        return None;
    }

    if let Some(tag) = parse_tag(stripped) {
        return Some(ParsedVersion::Tag(tag));
    }
    if let Ok(version) = Version::parse(stripped) {
        return Some(ParsedVersion::Semver(version));
    }
    if let Some(date) = parse_date(stripped) {
        return Some(ParsedVersion::Date(date));
    }
    parse_partial(stripped).map(ParsedVersion::Semver)
}

/// Classify the upgrade step from `current` to `latest`.
///
/// Returns the most significant differing component. `Major`, `Minor` and
/// `Patch` are only returned when `latest` is strictly greater; an installed
/// version at or ahead of `latest` is `Current`.
///
/// # Examples
///
/// ```
/// use deps_inspect::{version::classify, UpdateClass};
///
/// assert_eq!(classify("1.0.0", "2.0.0"), UpdateClass::Major);
/// assert_eq!(classify("^1.2.0", "1.3.1"), UpdateClass::Minor);
/// assert_eq!(classify("1.2.3", "1.2.3"), UpdateClass::Current);
/// assert_eq!(classify("garbage", "1.0.0"), UpdateClass::Unknown);
/// ```
pub fn classify(current: &str, latest: &str) -> UpdateClass {
    match (parse(current), parse(latest)) {
        (Some(current), Some(latest)) => classify_parsed(&current, &latest),
        _ => UpdateClass::Unknown,
    }
}

/// [`classify`] over already-parsed versions
pub fn classify_parsed(current: &ParsedVersion, latest: &ParsedVersion) -> UpdateClass {
    match current.cmp_same_kind(latest) {
        None => UpdateClass::Unknown,
        Some(Ordering::Equal | Ordering::Greater) => UpdateClass::Current,
        Some(Ordering::Less) => match (current, latest) {
            (ParsedVersion::Semver(a), ParsedVersion::Semver(b)) => {
                if a.major != b.major {
                    UpdateClass::Major
                } else if a.minor != b.minor {
                    UpdateClass::Minor
                } else {
                    // Differing patch, or only a differing pre-release.
                    UpdateClass::Patch
                }
            }
            (ParsedVersion::Date(a), ParsedVersion::Date(b)) => {
                use chrono::Datelike;
                if a.year() != b.year() {
                    UpdateClass::Major
                } else if a.month() != b.month() {
                    UpdateClass::Minor
                } else {
                    UpdateClass::Patch
                }
            }
            _ => UpdateClass::Unknown,
        },
    }
}

/// The concrete version a range names on its own (`^1.2.3` -> `1.2.3`)
pub fn range_floor(range: &str) -> Option<String> {
    match parse(range)? {
        ParsedVersion::Semver(v) => Some(v.to_string()),
        ParsedVersion::Date(_) => Some(strip_range_operators(range).to_string()),
        ParsedVersion::Tag(_) => None,
    }
}

/// Order two version strings when both parse to the same shape
pub fn compare(a: &str, b: &str) -> Option<Ordering> {
    parse(a)?.cmp_same_kind(&parse(b)?)
}

/// Whether `version` falls inside the npm-style `range`.
///
/// Malformed versions or ranges return `false`.
pub fn satisfies_range(version: &str, range: &str) -> bool {
    let Ok(range) = node_semver::Range::parse(range.trim()) else {
        return false;
    };
    let Ok(version) = node_semver::Version::parse(version.trim()) else {
        return false;
    };
    range.satisfies(&version)
}

/// Highest of `versions` inside `range`, or `None` if none match or the range is malformed
pub fn max_satisfying<S: AsRef<str>>(versions: &[S], range: &str) -> Option<String> {
    let range = node_semver::Range::parse(range.trim()).ok()?;

    versions
        .iter()
        .filter_map(|raw| {
            let parsed = node_semver::Version::parse(raw.as_ref()).ok()?;
            range.satisfies(&parsed).then_some((parsed, raw.as_ref()))
        })
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, raw)| raw.to_string())
}
