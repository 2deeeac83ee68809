//! Equivalence between membership items.
//!
//! Items have no identity beyond this relation: two references are "the same
//! member" when the remote service would treat them as the same attachment.

use serde_json::Value;

use crate::types::PolicyReference;

/// Equivalence used by the differ when no custom relation is supplied.
pub trait Equivalent {
    /// Whether `self` and `other` denote the same member.
    fn equivalent(&self, other: &Self) -> bool;
}

impl Equivalent for String {
    fn equivalent(&self, other: &Self) -> bool {
        self == other
    }
}

impl Equivalent for PolicyReference {
    fn equivalent(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Managed { arn: a }, Self::Managed { arn: b }) => a == b,
            (
                Self::CustomerManaged { name: a, path: pa },
                Self::CustomerManaged { name: b, path: pb },
            ) => a == b && normalize_path(pa) == normalize_path(pb),
            (Self::Inline { document: a }, Self::Inline { document: b }) => {
                documents_equivalent(a, b)
            }
            _ => false,
        }
    }
}

/// Normalize a policy path so `""`, `"/"`, `"/a"`, `"a/"` and `"/a/"` compare
/// the way the remote service stores them.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}

/// Compare two JSON policy documents structurally.
///
/// Whitespace and key order are ignored. Documents that do not parse are
/// compared as trimmed strings.
pub fn documents_equivalent(a: &str, b: &str) -> bool {
    match (
        serde_json::from_str::<Value>(a),
        serde_json::from_str::<Value>(b),
    ) {
        (Ok(va), Ok(vb)) => va == vb,
        _ => a.trim() == b.trim(),
    }
}
