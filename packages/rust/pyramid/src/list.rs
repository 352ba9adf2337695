//! Pyramid slab list files.
//!
//! A slab list records every slab of a pyramid: a header of `<index>=<root>`
//! lines (index 0 is the pyramid's own root), a `#` separator, then one
//! relative path per slab, prefixed by its root index and optionally
//! followed by an md5 checksum:
//!
//! ```text
//! 0=file:///data/pyramids/ortho
//! 1=file:///data/pyramids/older
//! #
//! 0/DATA/12/00/00/IH.tif
//! 1/DATA/11/00/00/AB.tif 9e107d9d372bb6826bd81d3542a419d6
//! ```

use std::collections::BTreeMap;

use pyramerge_shared::{PyramergeError, Result, SlabIdentity};
use pyramerge_storage::uri;

use crate::slab;

/// One slab recorded in a list.
#[derive(Debug, Clone)]
pub struct ListEntry {
    /// Parsed slab identity.
    pub identity: SlabIdentity,
    /// Root the relative path is anchored at (already resolved from the
    /// header index).
    pub root: String,
    /// Slab path relative to `root`.
    pub rel_path: String,
    /// True when the slab belongs to another pyramid (non-zero root index).
    pub is_link: bool,
    /// Checksum of the slab content, when the list records one.
    pub md5: Option<String>,
}

impl ListEntry {
    /// Absolute path of the slab.
    pub fn full_path(&self) -> String {
        uri::join(&self.root, &self.rel_path)
    }
}

/// A parsed slab list.
#[derive(Debug, Clone, Default)]
pub struct SlabList {
    /// Header roots by index.
    pub roots: BTreeMap<u32, String>,
    /// Entries in file order.
    pub entries: Vec<ListEntry>,
}

impl SlabList {
    /// Parse a slab list document.
    pub fn parse(text: &str) -> Result<Self> {
        let mut roots = BTreeMap::new();
        let mut entries = Vec::new();
        let mut in_header = true;

        for (number, line) in text.lines().enumerate() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }

            if in_header {
                if line == "#" {
                    in_header = false;
                    continue;
                }
                let (index, root) = line.split_once('=').ok_or_else(|| {
                    PyramergeError::pyramid(format!(
                        "slab list line {}: header line is not <index>=<root>: {line}",
                        number + 1
                    ))
                })?;
                let index: u32 = index.parse().map_err(|_| {
                    PyramergeError::pyramid(format!(
                        "slab list line {}: invalid root index: {line}",
                        number + 1
                    ))
                })?;
                roots.insert(index, root.to_string());
                continue;
            }

            let (path, md5) = match line.split_once(' ') {
                Some((path, md5)) => (path, Some(md5.to_string())),
                None => (line, None),
            };
            let (index, rel_path) = path.split_once('/').ok_or_else(|| {
                PyramergeError::pyramid(format!(
                    "slab list line {}: entry has no root index: {line}",
                    number + 1
                ))
            })?;
            let index: u32 = index.parse().map_err(|_| {
                PyramergeError::pyramid(format!(
                    "slab list line {}: invalid root index: {line}",
                    number + 1
                ))
            })?;
            let root = roots.get(&index).ok_or_else(|| {
                PyramergeError::pyramid(format!(
                    "slab list line {}: root index {index} not in header",
                    number + 1
                ))
            })?;

            entries.push(ListEntry {
                identity: slab::parse(rel_path)?,
                root: root.clone(),
                rel_path: rel_path.to_string(),
                is_link: index != 0,
                md5,
            });
        }

        if in_header {
            return Err(PyramergeError::pyramid(
                "slab list has no # separator".to_string(),
            ));
        }

        Ok(Self { roots, entries })
    }

    /// Entries of one level, in file order.
    pub fn level_entries(&self, level: u32) -> impl Iterator<Item = &ListEntry> {
        self.entries.iter().filter(move |e| e.identity.level == level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyramerge_shared::SlabKind;

    const SAMPLE: &str = "\
0=file:///data/pyramids/ortho
1=file:///data/pyramids/older
#
0/DATA/12/00/00/IH.tif
0/MASK/12/00/00/IH.tif
1/DATA/11/00/00/05.tif 9e107d9d372bb6826bd81d3542a419d6
";

    #[test]
    fn parses_header_entries_and_md5() {
        let list = SlabList::parse(SAMPLE).unwrap();
        assert_eq!(list.roots.len(), 2);
        assert_eq!(list.entries.len(), 3);

        let first = &list.entries[0];
        assert_eq!(first.identity.kind, SlabKind::Data);
        assert_eq!(first.identity.level, 12);
        assert!(!first.is_link);
        assert_eq!(
            first.full_path(),
            "file:///data/pyramids/ortho/DATA/12/00/00/IH.tif"
        );

        let link = &list.entries[2];
        assert!(link.is_link);
        assert_eq!(link.root, "file:///data/pyramids/older");
        assert_eq!(link.md5.as_deref(), Some("9e107d9d372bb6826bd81d3542a419d6"));
    }

    #[test]
    fn level_filter() {
        let list = SlabList::parse(SAMPLE).unwrap();
        assert_eq!(list.level_entries(12).count(), 2);
        assert_eq!(list.level_entries(11).count(), 1);
        assert_eq!(list.level_entries(6).count(), 0);
    }

    #[test]
    fn missing_separator_is_an_error() {
        let err = SlabList::parse("0=file:///root\n").unwrap_err();
        assert!(err.to_string().contains("no # separator"));
    }

    #[test]
    fn unknown_root_index_is_an_error() {
        let err = SlabList::parse("0=file:///root\n#\n7/DATA_6_1_2\n").unwrap_err();
        assert!(err.to_string().contains("root index 7"));
    }
}
