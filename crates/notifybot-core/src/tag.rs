//! Build-numbered release tags.
//!
//! Tags such as `jdk-17+35` or `jdk8u341-b07` carry a build counter. The
//! previous build of a version is found by decrementing that counter, which
//! lets a single event cover every commit between two consecutive builds.

use crate::types::Tag;
use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;

// Capture groups: 1 prefix, 2 version, 4 build separator, 5 build number.
const TAG_PATTERNS: [&str; 5] = [
    r"(jdk([0-9]{1,2}(u[0-9]{1,3}(?:-[a-z0-9]+)?)?))(-b)([0-9]{2,3})",
    r"((hs[0-9]{1,2}(\.[0-9]{1,3})?))(-b)([0-9]{2,3})",
    r"((?:jdk-){0,1}([1-9](?:(?:[0-9]*)(\.(?:0|[1-9][0-9]*)){0,6})))(?:(\+)([0-9]+)|(-ga))",
    r"(([0-9](u[0-9]{1,3})?))(-b)([0-9]{2,3})",
    r"(([a-z]+[0-9]{1,2}(u[0-9]{1,3}(?:-[a-z0-9]+)?)?))(-b)([0-9]{2,3})",
];

static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    TAG_PATTERNS
        .iter()
        .map(|pattern| Regex::new(&format!("^(?:{pattern})$")).expect("tag pattern compiles"))
        .collect()
});

/// A tag following the release naming convention
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpenJdkTag {
    tag: Tag,
    prefix: String,
    version: String,
    build_prefix: Option<String>,
    build_num: Option<String>,
}

impl OpenJdkTag {
    /// Parse a tag, returning `None` when it does not follow the convention.
    pub fn create(tag: &Tag) -> Option<Self> {
        PATTERNS.iter().find_map(|pattern| {
            let captures = pattern.captures(tag.name())?;
            Some(Self {
                tag: tag.clone(),
                prefix: captures.get(1)?.as_str().to_string(),
                version: captures.get(2)?.as_str().to_string(),
                build_prefix: captures.get(4).map(|m| m.as_str().to_string()),
                build_num: captures.get(5).map(|m| m.as_str().to_string()),
            })
        })
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    /// Everything before the build separator, e.g. `jdk-17` or `jdk8u341`
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Version part of the prefix, e.g. `17` or `8u341`
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Build counter, absent for `-ga` tags
    pub fn build_num(&self) -> Option<u32> {
        self.build_num.as_deref().and_then(|n| n.parse().ok())
    }

    /// The tag of the preceding build, if the counter allows one.
    ///
    /// This only computes the name. Whether such a tag exists in a
    /// repository is up to the caller.
    pub fn previous(&self) -> Option<Self> {
        let build = self.build_num()?;
        if build == 0 {
            return None;
        }
        let separator = self.build_prefix.as_deref()?;
        let previous = build - 1;
        let formatted = if separator == "+" {
            previous.to_string()
        } else {
            format!("{previous:02}")
        };
        Self::create(&Tag::new(format!("{}{}{}", self.prefix, separator, formatted)))
    }
}

impl PartialOrd for OpenJdkTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordered by build number, then by name so the order is total.
impl Ord for OpenJdkTag {
    fn cmp(&self, other: &Self) -> Ordering {
        self.build_num()
            .cmp(&other.build_num())
            .then_with(|| self.tag.cmp(&other.tag))
    }
}
