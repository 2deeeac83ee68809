//! Composite identifiers.
//!
//! Fields are joined with `,`. A `\` or `,` inside a field is escaped with a
//! backslash, so any field content survives a round trip.

use std::fmt;
use std::str::FromStr;

use crate::equivalence::normalize_path;
use crate::error::{Error, Result};
use crate::types::{ParentKey, PolicyKind, PolicyReference};

const DELIMITER: char = ',';
const ESCAPE: char = '\\';

fn escape_into(out: &mut String, field: &str) {
    for c in field.chars() {
        if c == DELIMITER || c == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}

/// Join `fields` into one escaped identifier.
pub fn encode_fields<'a>(fields: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(DELIMITER);
        }
        escape_into(&mut out, field);
    }
    out
}

/// Split an identifier produced by [`encode_fields`] into exactly
/// `expected` fields.
pub fn decode_fields(id: &str, expected: usize) -> Result<Vec<String>> {
    let mut fields = Vec::with_capacity(expected);
    let mut current = String::new();
    let mut chars = id.chars();

    while let Some(c) = chars.next() {
        match c {
            ESCAPE => match chars.next() {
                Some(next) if next == DELIMITER || next == ESCAPE => current.push(next),
                Some(next) => {
                    return Err(Error::invalid_id(id, format!("invalid escape '\\{next}'")));
                }
                None => return Err(Error::invalid_id(id, "dangling escape at end")),
            },
            DELIMITER => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);

    if fields.len() != expected {
        return Err(Error::invalid_id(
            id,
            format!("expected {expected} fields, found {}", fields.len()),
        ));
    }
    Ok(fields)
}

impl ParentKey {
    /// Encode as `instance,parent`.
    pub fn encode(&self) -> String {
        encode_fields([self.instance.as_str(), self.parent.as_str()])
    }

    /// Decode an identifier produced by [`ParentKey::encode`].
    pub fn decode(id: &str) -> Result<Self> {
        let mut fields = decode_fields(id, 2)?.into_iter();
        match (fields.next(), fields.next()) {
            (Some(instance), Some(parent)) => Ok(Self::new(instance, parent)),
            _ => Err(Error::invalid_id(id, "expected 2 fields")),
        }
    }
}

impl PolicyReference {
    /// Key identifying this reference within its kind.
    ///
    /// Inline documents occupy the parent's single slot and have an empty key.
    pub fn key(&self) -> String {
        match self {
            Self::Managed { arn } => arn.clone(),
            Self::CustomerManaged { name, path } => format!("{}{name}", normalize_path(path)),
            Self::Inline { .. } => String::new(),
        }
    }
}

/// Identifier of one membership: a policy of some kind attached to a parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttachmentId {
    pub parent: ParentKey,
    pub kind: PolicyKind,
    /// Per-kind item key (see [`PolicyReference::key`]).
    pub item: String,
}

impl AttachmentId {
    /// Create a new attachment id.
    pub fn new(parent: ParentKey, kind: PolicyKind, item: impl Into<String>) -> Self {
        Self {
            parent,
            kind,
            item: item.into(),
        }
    }

    /// Identify `reference` attached to `parent`.
    pub fn for_reference(parent: &ParentKey, reference: &PolicyReference) -> Self {
        Self::new(parent.clone(), reference.kind(), reference.key())
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_fields([
            self.parent.instance.as_str(),
            self.parent.parent.as_str(),
            self.kind.as_str(),
            self.item.as_str(),
        ]))
    }
}

impl FromStr for AttachmentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut fields = decode_fields(s, 4)?.into_iter();
        match (fields.next(), fields.next(), fields.next(), fields.next()) {
            (Some(instance), Some(parent), Some(kind), Some(item)) => Ok(Self::new(
                ParentKey::new(instance, parent),
                kind.parse()?,
                item,
            )),
            _ => Err(Error::invalid_id(s, "expected 4 fields")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_fields_are_joined_verbatim() {
        let id = AttachmentId::new(
            ParentKey::new("arn:instance/ins-1", "arn:ps/ps-1"),
            PolicyKind::Managed,
            "arn:aws:iam::aws:policy/ReadOnlyAccess",
        );
        assert_eq!(
            id.to_string(),
            "arn:instance/ins-1,arn:ps/ps-1,managed,arn:aws:iam::aws:policy/ReadOnlyAccess"
        );
    }

    #[test]
    fn test_delimiters_and_escapes_round_trip() -> Result<()> {
        let id = AttachmentId::new(
            ParentKey::new("a,b", r"c\d"),
            PolicyKind::CustomerManaged,
            r"/x,\/name",
        );
        let encoded = id.to_string();
        assert_eq!(encoded, r"a\,b,c\\d,customer-managed,/x\,\\/name");
        assert_eq!(encoded.parse::<AttachmentId>()?, id);
        Ok(())
    }

    #[test]
    fn test_empty_fields_survive() -> Result<()> {
        let parent = ParentKey::new("ins", "ps");
        let id = AttachmentId::for_reference(&parent, &PolicyReference::inline("{}"));
        assert_eq!(id.to_string(), "ins,ps,inline,");
        assert_eq!(id.to_string().parse::<AttachmentId>()?, id);
        Ok(())
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(
            "a,b,managed".parse::<AttachmentId>(),
            Err(Error::InvalidId { .. })
        ));
        assert!(matches!(
            r"a,b,managed,x\".parse::<AttachmentId>(),
            Err(Error::InvalidId { .. })
        ));
        assert!(matches!(
            r"a,b,managed,\x".parse::<AttachmentId>(),
            Err(Error::InvalidId { .. })
        ));
        assert!("a,b,bogus,x".parse::<AttachmentId>().is_err());
    }

    #[test]
    fn test_parent_key_encoding() -> Result<()> {
        let key = ParentKey::new("ins,1", "ps");
        assert_eq!(key.encode(), r"ins\,1,ps");
        assert_eq!(ParentKey::decode(&key.encode())?, key);
        assert!(ParentKey::decode("only-one").is_err());
        Ok(())
    }

    #[test]
    fn test_customer_managed_key_normalizes_path() {
        let reference = PolicyReference::customer_managed("Deploy", "ops");
        assert_eq!(reference.key(), "/ops/Deploy");
    }
}
