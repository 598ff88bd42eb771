//! Codec for the `POST /api/anchors` body.
//!
//! The body is `"{anchor_id}|{grouping_key}"`: exactly one pipe, no escaping.
//! Neither field may be empty and neither may itself contain a pipe, so
//! encoding refuses such values instead of producing a body the server would
//! split differently.

use thiserror::Error;

/// Separator between the anchor id and the grouping key.
pub const FIELD_SEPARATOR: char = '|';

/// Malformed anchor POST body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireFormatError {
    #[error("request body is empty")]
    EmptyBody,

    #[error("expected 2 pipe-delimited fields, found {found}")]
    FieldCount { found: usize },

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("{field} must not contain '|': {value:?}")]
    ReservedCharacter { field: &'static str, value: String },
}

/// A parsed `(anchor_id, grouping_key)` pair as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorPost {
    pub anchor_id: String,
    pub grouping_key: String,
}

impl AnchorPost {
    /// Validate both fields so the pair can be encoded losslessly.
    pub fn new(
        anchor_id: impl Into<String>,
        grouping_key: impl Into<String>,
    ) -> Result<Self, WireFormatError> {
        let post = Self {
            anchor_id: anchor_id.into(),
            grouping_key: grouping_key.into(),
        };
        check_field("anchor_id", &post.anchor_id)?;
        check_field("grouping_key", &post.grouping_key)?;
        Ok(post)
    }

    /// Parse a request body. Blank bodies, a field count other than two, and
    /// empty fields are all rejected.
    pub fn parse(body: &str) -> Result<Self, WireFormatError> {
        if body.trim().is_empty() {
            return Err(WireFormatError::EmptyBody);
        }

        let fields: Vec<&str> = body.split(FIELD_SEPARATOR).collect();
        let [anchor_id, grouping_key] = fields.as_slice() else {
            return Err(WireFormatError::FieldCount {
                found: fields.len(),
            });
        };

        if anchor_id.is_empty() {
            return Err(WireFormatError::EmptyField { field: "anchor_id" });
        }
        if grouping_key.is_empty() {
            return Err(WireFormatError::EmptyField {
                field: "grouping_key",
            });
        }

        Ok(Self {
            anchor_id: (*anchor_id).to_string(),
            grouping_key: (*grouping_key).to_string(),
        })
    }

    /// Encode as a request body.
    pub fn encode(&self) -> String {
        format!(
            "{}{FIELD_SEPARATOR}{}",
            self.anchor_id, self.grouping_key
        )
    }
}

/// Check that `grouping_key` can be carried in an anchor POST body.
pub fn validate_grouping_key(grouping_key: &str) -> Result<(), WireFormatError> {
    check_field("grouping_key", grouping_key)
}

fn check_field(field: &'static str, value: &str) -> Result<(), WireFormatError> {
    if value.is_empty() {
        return Err(WireFormatError::EmptyField { field });
    }
    if value.contains(FIELD_SEPARATOR) {
        return Err(WireFormatError::ReservedCharacter {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_two_fields() {
        let post = AnchorPost::parse("abc|xyz").unwrap();
        assert_eq!(post.anchor_id, "abc");
        assert_eq!(post.grouping_key, "xyz");
    }

    #[test]
    fn keeps_surrounding_whitespace_inside_fields() {
        let post = AnchorPost::parse(" abc|xyz ").unwrap();
        assert_eq!(post.anchor_id, " abc");
        assert_eq!(post.grouping_key, "xyz ");
    }

    #[test]
    fn rejects_missing_pipe() {
        assert_eq!(
            AnchorPost::parse("abc"),
            Err(WireFormatError::FieldCount { found: 1 })
        );
    }

    #[test]
    fn rejects_blank_body() {
        assert_eq!(AnchorPost::parse(""), Err(WireFormatError::EmptyBody));
        assert_eq!(AnchorPost::parse("  \n"), Err(WireFormatError::EmptyBody));
    }

    #[test]
    fn rejects_extra_fields() {
        assert_eq!(
            AnchorPost::parse("a|b|c"),
            Err(WireFormatError::FieldCount { found: 3 })
        );
    }

    #[test]
    fn rejects_empty_fields() {
        assert_eq!(
            AnchorPost::parse("|xyz"),
            Err(WireFormatError::EmptyField { field: "anchor_id" })
        );
        assert_eq!(
            AnchorPost::parse("abc|"),
            Err(WireFormatError::EmptyField {
                field: "grouping_key"
            })
        );
    }

    #[test]
    fn encode_matches_what_parse_accepts() {
        let post = AnchorPost::new("6f1c-22", "helloworld").unwrap();
        assert_eq!(post.encode(), "6f1c-22|helloworld");
        assert_eq!(AnchorPost::parse(&post.encode()).unwrap(), post);
    }

    #[test]
    fn new_refuses_pipe_in_grouping_key() {
        let err = AnchorPost::new("abc", "team|a").unwrap_err();
        assert_eq!(
            err,
            WireFormatError::ReservedCharacter {
                field: "grouping_key",
                value: "team|a".to_string(),
            }
        );
    }
}
