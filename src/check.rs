use indexmap::IndexMap;
use itertools::Itertools as _;
use memchr::memrchr;
use unicode_normalization::UnicodeNormalization as _;

use crate::git::TreeEntry;

pub struct CheckResult {
    pub errors: Vec<String>,
}

/// Check a flat tree listing for names that cannot be materialised
/// unambiguously on a case-insensitive or encoding-normalising filesystem
/// (e.g. the defaults on Windows and Mac).
///
/// Two passes. First each entry's basename must decode as valid UTF-8 and
/// already be in Normalisation Form C; anything else gets an error and takes
/// no further part (a name we can't even decode shouldn't also show up in
/// clash reports). Then the surviving basenames are grouped by their parent
/// directory (exact dirname bytes) and any two siblings that are equal after
/// lowercasing are reported as a clash.
///
/// This never fails: malformed input produces error strings, not errors.
pub fn check_tree_entries(entries: &[TreeEntry]) -> CheckResult {
    let mut errors = vec![];

    // Validated basenames keyed by raw dirname bytes, both in first-seen order.
    let mut names_by_parent: IndexMap<Vec<u8>, Vec<String>> = IndexMap::new();

    for entry in entries {
        let (dirname, raw_basename) = split_last_segment(&entry.name);

        // Ill-formed sequences decode to U+FFFD, which is how we detect them.
        // A name that genuinely contains U+FFFD is reported too; it is
        // indistinguishable from a mangled one and just as suspect.
        let basename = String::from_utf8_lossy(raw_basename);

        if basename.contains('\u{FFFD}') {
            errors.push(format!(
                "ERROR: invalid UTF-8 in name: {basename} ({})",
                hex(raw_basename)
            ));
        } else if basename.nfc().collect::<String>().as_bytes() != raw_basename {
            errors.push(format!(
                "ERROR: non-normalised UTF-8 encoding in name: {basename} ({})",
                hex(raw_basename)
            ));
        } else {
            names_by_parent
                .entry(dirname.to_vec())
                .or_default()
                .push(basename.into_owned());
        }
    }

    for (dirname, names) in &names_by_parent {
        // For display only; the dirname was already validated when its own
        // entry was checked (or it's the empty root).
        let parent = String::from_utf8_lossy(dirname);

        // Not full Unicode case folding (no ß → SS expansion), but it matches
        // what case-insensitive filesystems actually collapse much better
        // than ASCII lowercasing does.
        let mut names_by_lower: IndexMap<String, Vec<&String>> = IndexMap::new();
        for name in names {
            names_by_lower.entry(name.to_lowercase()).or_default().push(name);
        }

        for clashing_names in names_by_lower.values() {
            if clashing_names.len() == 1 {
                continue;
            }

            // Serialising plain strings can't fail.
            let listing = serde_json::to_string(clashing_names).unwrap_or_default();
            errors.push(format!("ERROR: case clash in {parent}: {listing}"));
        }
    }

    CheckResult { errors }
}

/// Split `name` around its last `/`: (dirname, basename). A name with no `/`
/// is a root entry with an empty dirname.
fn split_last_segment(name: &[u8]) -> (&[u8], &[u8]) {
    match memrchr(b'/', name) {
        Some(i) => (&name[..i], &name[i + 1..]),
        None => (&[], name),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .format_with("", |b, f| f(&format_args!("{b:02x}")))
        .to_string()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::git::EntryKind;

    fn entry(name: &[u8]) -> TreeEntry {
        TreeEntry {
            name: name.to_vec(),
            kind: EntryKind::File,
        }
    }

    fn errors(names: &[&[u8]]) -> Vec<String> {
        let entries: Vec<TreeEntry> = names.iter().map(|n| entry(n)).collect();
        check_tree_entries(&entries).errors
    }

    #[test]
    fn empty_listing() {
        assert!(errors(&[]).is_empty());
    }

    #[test]
    fn clean_listing() {
        assert!(errors(&[
            b"README.md",
            b"src",
            b"src/main.rs",
            b"src/check.rs",
            "docs/caf\u{e9}.md".as_bytes(),
        ])
        .is_empty());
    }

    #[test]
    fn invalid_utf8() {
        // 0xe9 is Latin-1 e-acute, not valid UTF-8.
        assert_eq!(
            errors(&[b"caf\xe9.txt"]),
            vec!["ERROR: invalid UTF-8 in name: caf\u{FFFD}.txt (636166e92e747874)"]
        );
    }

    #[test]
    fn non_normalised_utf8() {
        // e + combining acute (65 cc 81) instead of the composed U+00E9.
        assert_eq!(
            errors(&[b"e\xcc\x81"]),
            vec!["ERROR: non-normalised UTF-8 encoding in name: e\u{301} (65cc81)"]
        );
    }

    #[test]
    fn case_clash() {
        assert_eq!(
            errors(&[b"dir", b"dir/File.txt", b"dir/file.txt"]),
            vec![r#"ERROR: case clash in dir: ["File.txt","file.txt"]"#]
        );
    }

    #[test]
    fn case_clash_at_root() {
        assert_eq!(
            errors(&[b"File", b"file"]),
            vec![r#"ERROR: case clash in : ["File","file"]"#]
        );
    }

    #[test]
    fn unicode_case_clash() {
        assert_eq!(
            errors(&["dir/\u{c9}".as_bytes(), "dir/\u{e9}".as_bytes()]),
            vec!["ERROR: case clash in dir: [\"\u{c9}\",\"\u{e9}\"]"]
        );
    }

    /// `to_lowercase` does the Unicode lowercase mapping, not full case
    /// folding, so ß and SS are distinct.
    #[test]
    fn no_sharp_s_expansion() {
        assert!(errors(&["s/stra\u{df}e".as_bytes(), b"s/STRASSE"]).is_empty());
    }

    /// Two entries with byte-identical basenames are not deduplicated; each
    /// occurrence appears in the clash listing.
    #[test]
    fn duplicate_identical_basenames() {
        assert_eq!(
            errors(&[b"a/X", b"a/x", b"a/X"]),
            vec![r#"ERROR: case clash in a: ["X","x","X"]"#]
        );
    }

    #[test]
    fn no_clash_across_parents() {
        assert!(errors(&[b"a/File", b"b/file"]).is_empty());
    }

    /// An entry that failed an encoding check must not also show up in clash
    /// reports, even when its decoded form would collide with a sibling.
    #[test]
    fn defective_names_are_excluded_from_clash_detection() {
        assert_eq!(
            errors(&[b"dir/Cafe\xcc\x81", b"dir/cafe\xcc\x81"]),
            vec![
                "ERROR: non-normalised UTF-8 encoding in name: Cafe\u{301} (43616665cc81)",
                "ERROR: non-normalised UTF-8 encoding in name: cafe\u{301} (63616665cc81)",
            ]
        );
    }

    /// Encoding errors come first, in listing order; clashes follow in
    /// first-seen parent order.
    #[test]
    fn error_ordering() {
        assert_eq!(
            errors(&[
                b"Upper",
                b"zz/Name\xff",
                b"a/File",
                b"a/file",
                b"upper",
            ]),
            vec![
                "ERROR: invalid UTF-8 in name: Name\u{FFFD} (4e616d65ff)".to_owned(),
                r#"ERROR: case clash in : ["Upper","upper"]"#.to_owned(),
                r#"ERROR: case clash in a: ["File","file"]"#.to_owned(),
            ]
        );
    }

    /// Within one parent, clash groups come out in first-seen order of the
    /// folded key, and names within a group in first-seen order.
    #[test]
    fn clash_group_ordering() {
        assert_eq!(
            errors(&[b"d/BB", b"d/aa", b"d/bb", b"d/AA"]),
            vec![
                r#"ERROR: case clash in d: ["BB","bb"]"#,
                r#"ERROR: case clash in d: ["aa","AA"]"#,
            ]
        );
    }

    #[test]
    fn idempotent() {
        let entries: Vec<TreeEntry> = [
            &b"a/File"[..],
            b"a/file",
            b"bad\xff",
            b"e\xcc\x81",
            b"ok.txt",
        ]
        .iter()
        .map(|n| entry(n))
        .collect();

        let first = check_tree_entries(&entries).errors;
        let second = check_tree_entries(&entries).errors;
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn split_last_segment_cases() {
        assert_eq!(split_last_segment(b"a/b/c"), (&b"a/b"[..], &b"c"[..]));
        assert_eq!(split_last_segment(b"top"), (&b""[..], &b"top"[..]));
        assert_eq!(split_last_segment(b""), (&b""[..], &b""[..]));
        assert_eq!(split_last_segment(b"dir/"), (&b"dir"[..], &b""[..]));
    }

    #[test]
    fn hex_is_lowercase_unseparated() {
        assert_eq!(hex(b"\x00\xab\xff"), "00abff");
        assert_eq!(hex(b""), "");
    }
}
