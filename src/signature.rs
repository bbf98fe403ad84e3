//! The DBus signature mini-language, parsed and validated in one place.
//!
//! A signature is a sequence of single complete types: a basic type
//! code, `a` followed by a single complete type, `(...)` around one or
//! more single complete types, `{kv}` with a basic key and a single
//! complete value (only as an array element), or `v`.

/// Wire format limits.
pub(crate) const MAX_SIGNATURE_LEN: usize = 255;
const MAX_NESTING_DEPTH: usize = 32;

pub(crate) fn is_basic(code: u8) -> bool {
    matches!(
        code,
        b'y' | b'b' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'd' | b's' | b'o' | b'g'
    )
}

/// Byte length of the first single complete type in `sig`, or `None`
/// if `sig` does not start with one.
fn single_len(sig: &[u8], depth: usize) -> Option<usize> {
    if depth > MAX_NESTING_DEPTH {
        return None;
    }
    match sig.first()? {
        code if is_basic(*code) => Some(1),
        b'v' => Some(1),
        // Dict entries are only reachable through their array.
        b'a' if sig.get(1) == Some(&b'{') => {
            Some(1 + dict_entry_len(&sig[1..], depth + 1)?)
        }
        b'a' => Some(1 + single_len(&sig[1..], depth + 1)?),
        b'(' => {
            let mut ix = 1;
            if sig.get(ix) == Some(&b')') {
                // Empty structs are not representable on the wire.
                return None;
            }
            while sig.get(ix) != Some(&b')') {
                ix += single_len(&sig[ix..], depth + 1)?;
            }
            Some(ix + 1)
        }
        _ => None,
    }
}

/// Byte length of a braced `{kv}` dict entry starting at `sig[0]`.
fn dict_entry_len(sig: &[u8], depth: usize) -> Option<usize> {
    if depth > MAX_NESTING_DEPTH || sig.first() != Some(&b'{') {
        return None;
    }
    let key = *sig.get(1)?;
    if !is_basic(key) {
        return None;
    }
    let value_len = single_len(&sig[2..], depth + 1)?;
    if sig.get(2 + value_len) != Some(&b'}') {
        return None;
    }
    Some(3 + value_len)
}

/// Splits off the first single complete type, returning it and the rest.
pub(crate) fn split_first(sig: &str) -> Option<(&str, &str)> {
    let len = single_len(sig.as_bytes(), 0)?;
    Some(sig.split_at(len))
}

/// True if `sig` is exactly one single complete type.
pub(crate) fn is_single(sig: &str) -> bool {
    matches!(split_first(sig), Some((_, rest)) if rest.is_empty())
}

/// True if `sig` is a (possibly empty) sequence of single complete types.
pub(crate) fn is_valid(sig: &str) -> bool {
    if sig.len() > MAX_SIGNATURE_LEN || !sig.is_ascii() {
        return false;
    }
    let mut rest = sig;
    while !rest.is_empty() {
        match split_first(rest) {
            Some((_, tail)) => rest = tail,
            None => return false,
        }
    }
    true
}

/// True if `contents` can be the element type of an array: a single
/// complete type, or a braced `{kv}` dict entry.
pub(crate) fn is_array_element(contents: &str) -> bool {
    if is_single(contents) {
        return true;
    }
    matches!(
        dict_entry_len(contents.as_bytes(), 0),
        Some(len) if len == contents.len()
    )
}

/// True if `contents` is a valid dictionary entry body: a basic key
/// followed by exactly one single complete value type.
pub(crate) fn is_valid_dict_entry(contents: &str) -> bool {
    let bytes = contents.as_bytes();
    match bytes.first() {
        Some(key) if is_basic(*key) => is_single(&contents[1..]),
        _ => false,
    }
}

/// Alignment of the first type in `sig`. Containers align to the
/// boundary of their framing, not of their contents.
pub(crate) fn alignment_of(sig: &str) -> usize {
    match sig.as_bytes().first() {
        Some(b'y') | Some(b'g') | Some(b'v') => 1,
        Some(b'n') | Some(b'q') => 2,
        Some(b'b') | Some(b'i') | Some(b'u') | Some(b's') | Some(b'o') | Some(b'a') => 4,
        Some(b'x') | Some(b't') | Some(b'd') | Some(b'(') | Some(b'{') => 8,
        _ => 1,
    }
}

/// Validates a hierarchical object path: `/` or `/`-separated
/// non-empty segments of `[A-Za-z0-9_]`.
pub(crate) fn is_valid_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    if !path.starts_with('/') || path.ends_with('/') {
        return false;
    }
    path[1..]
        .split('/')
        .all(|seg| !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_signatures() {
        for sig in &["i", "s", "y", "b", "n", "q", "u", "x", "t", "d", "o", "g", "v"] {
            assert!(is_single(sig), "{} should be a single complete type", sig);
        }
        assert!(is_valid(""));
        assert!(is_valid("isd"));
        assert!(!is_single("isd"));
    }

    #[test]
    fn container_signatures() {
        assert!(is_single("ai"));
        assert!(is_single("aai"));
        assert!(is_single("(isd)"));
        assert!(is_single("(i(sd))"));
        assert!(is_single("a{sv}"));
        assert!(is_single("a{s(id)}"));
        assert!(is_valid("a{sv}i(sd)"));
    }

    #[test]
    fn array_elements() {
        assert!(is_array_element("i"));
        assert!(is_array_element("(sd)"));
        assert!(is_array_element("{sv}"));
        assert!(!is_array_element("{sv}i"));
        assert!(!is_array_element("{vs}"));
        assert!(!is_single("{sv}"));
    }

    #[test]
    fn rejected_signatures() {
        assert!(!is_valid("z"));
        assert!(!is_valid("a"));
        assert!(!is_valid("()"));
        assert!(!is_valid("(i"));
        assert!(!is_valid("{sv}i")); // dict entry key position only after 'a'
        assert!(!is_valid("a{vs}")); // key must be basic
        assert!(!is_valid("a{si s}"));
        assert!(!is_valid("a{s}"));
    }

    #[test]
    fn nesting_limit() {
        let deep: String = "a".repeat(40) + "i";
        assert!(!is_valid(&deep));
        let ok: String = "a".repeat(10) + "i";
        assert!(is_valid(&ok));
    }

    #[test]
    fn split() {
        assert_eq!(split_first("ia{sv}"), Some(("i", "a{sv}")));
        assert_eq!(split_first("a{sv}i"), Some(("a{sv}", "i")));
        assert_eq!(split_first("(is)d"), Some(("(is)", "d")));
        assert_eq!(split_first(""), None);
    }

    #[test]
    fn alignments() {
        assert_eq!(alignment_of("y"), 1);
        assert_eq!(alignment_of("n"), 2);
        assert_eq!(alignment_of("i"), 4);
        assert_eq!(alignment_of("ai"), 4);
        assert_eq!(alignment_of("t"), 8);
        assert_eq!(alignment_of("(yy)"), 8);
        assert_eq!(alignment_of("{sv}"), 8);
        assert_eq!(alignment_of("v"), 1);
    }

    #[test]
    fn object_paths() {
        assert!(is_valid_object_path("/"));
        assert!(is_valid_object_path("/org/example/Object_1"));
        assert!(!is_valid_object_path(""));
        assert!(!is_valid_object_path("org/example"));
        assert!(!is_valid_object_path("/org//example"));
        assert!(!is_valid_object_path("/org/example/"));
        assert!(!is_valid_object_path("/org/exa-mple"));
    }
}
