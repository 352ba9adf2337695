//! Slab path codec.
//!
//! Two layouts exist, selected by the pyramid's storage backend:
//! - file storage: `KIND/level/AB/CD/EF.tif` — column and row encoded in
//!   base 36, zero-padded to equal length, then interleaved one character of
//!   each per path component (two directory levels plus the file name);
//! - object storage: `KIND_level_col_row`, coordinates in decimal.

use std::sync::LazyLock;

use regex::Regex;

use pyramerge_shared::{PyramergeError, Result, SlabIdentity, SlabKind};

const B36_DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Minimum padded length of an encoded coordinate — two directory levels
/// plus the file name.
const MIN_COMPONENTS: usize = 3;

static FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(DATA|MASK)/(\d+)/((?:[0-9A-Z]{2}/)+[0-9A-Z]{2})\.tif$").unwrap()
});

static OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(DATA|MASK)_(\d+)_(\d+)_(\d+)$").unwrap());

fn b36_encode(mut value: u64) -> String {
    let mut digits = Vec::new();
    loop {
        digits.push(B36_DIGITS[(value % 36) as usize]);
        value /= 36;
        if value == 0 {
            break;
        }
    }
    digits.reverse();
    String::from_utf8(digits).unwrap()
}

fn b36_decode(text: &str) -> Result<u64> {
    let mut value: u64 = 0;
    for c in text.bytes() {
        let digit = match c {
            b'0'..=b'9' => (c - b'0') as u64,
            b'A'..=b'Z' => (c - b'A') as u64 + 10,
            _ => {
                return Err(PyramergeError::pyramid(format!(
                    "invalid base-36 digit in slab path: {}",
                    c as char
                )));
            }
        };
        value = value * 36 + digit;
    }
    Ok(value)
}

/// Encode a slab identity into the file-storage layout.
pub fn file_path(identity: &SlabIdentity) -> String {
    let col = b36_encode(identity.column);
    let row = b36_encode(identity.row);
    let width = col.len().max(row.len()).max(MIN_COMPONENTS);
    let col = format!("{col:0>width$}");
    let row = format!("{row:0>width$}");

    let components: Vec<String> = col
        .bytes()
        .zip(row.bytes())
        .map(|(c, r)| String::from_utf8(vec![c, r]).unwrap())
        .collect();

    format!(
        "{}/{}/{}.tif",
        identity.kind.as_str(),
        identity.level,
        components.join("/")
    )
}

/// Encode a slab identity into the object-storage layout.
pub fn object_path(identity: &SlabIdentity) -> String {
    format!(
        "{}_{}_{}_{}",
        identity.kind.as_str(),
        identity.level,
        identity.column,
        identity.row
    )
}

/// Parse a slab identity out of a path in either layout. The path may carry
/// any prefix (root, pyramid name); only the trailing slab part is read.
pub fn parse(path: &str) -> Result<SlabIdentity> {
    if let Some(caps) = FILE_RE.captures(path) {
        let kind: SlabKind = caps[1].parse()?;
        let level: u32 = caps[2]
            .parse()
            .map_err(|_| PyramergeError::pyramid(format!("invalid level in slab path: {path}")))?;

        let mut col = String::new();
        let mut row = String::new();
        for component in caps[3].split('/') {
            let mut chars = component.chars();
            col.push(chars.next().unwrap());
            row.push(chars.next().unwrap());
        }
        return Ok(SlabIdentity::new(
            kind,
            level,
            b36_decode(&col)?,
            b36_decode(&row)?,
        ));
    }

    if let Some(caps) = OBJECT_RE.captures(path) {
        let kind: SlabKind = caps[1].parse()?;
        let parse_num = |s: &str| {
            s.parse().map_err(|_| {
                PyramergeError::pyramid(format!("invalid coordinate in slab path: {path}"))
            })
        };
        return Ok(SlabIdentity::new(
            kind,
            parse_num(&caps[2])? as u32,
            parse_num(&caps[3])?,
            parse_num(&caps[4])?,
        ));
    }

    Err(PyramergeError::pyramid(format!(
        "not a slab path: {path}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_layout_interleaves_base36() {
        // col 18 = "I", row 17 = "H", both padded to "00I" / "00H"
        let id = SlabIdentity::new(SlabKind::Data, 12, 18, 17);
        assert_eq!(file_path(&id), "DATA/12/00/00/IH.tif");
        assert_eq!(parse("DATA/12/00/00/IH.tif").unwrap(), id);
    }

    #[test]
    fn file_layout_grows_past_three_components() {
        // 36^3 = 46656 needs four base-36 digits
        let id = SlabIdentity::new(SlabKind::Mask, 19, 46656, 1);
        let path = file_path(&id);
        assert_eq!(path, "MASK/19/10/00/00/01.tif");
        assert_eq!(parse(&path).unwrap(), id);
    }

    #[test]
    fn object_layout_roundtrip() {
        let id = SlabIdentity::new(SlabKind::Data, 6, 123, 456);
        assert_eq!(object_path(&id), "DATA_6_123_456");
        assert_eq!(parse("DATA_6_123_456").unwrap(), id);
    }

    #[test]
    fn parse_ignores_path_prefix() {
        let id = parse("file:///data/pyramids/ortho/DATA/12/00/00/IH.tif").unwrap();
        assert_eq!(id, SlabIdentity::new(SlabKind::Data, 12, 18, 17));

        let id = parse("s3://bucket/ortho/MASK_6_3_4").unwrap();
        assert_eq!(id, SlabIdentity::new(SlabKind::Mask, 6, 3, 4));
    }

    #[test]
    fn rejects_non_slab_paths() {
        assert!(parse("file:///data/pyramids/ortho.json").is_err());
        assert!(parse("DATA/12/zz.tif").is_err());
    }
}
