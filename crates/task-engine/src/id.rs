//! The externally-exposed task id: a URN of the form
//! `background-task:entity-storage:<32-hex-char id>`.

use thiserror::Error;
use uuid::Uuid;

/// The stable namespace segment of every task URN.
pub const NAMESPACE: &str = "background-task:entity-storage";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("namespace mismatch: expected `{expected}`, found `{found}`")]
    NamespaceMismatch { expected: String, found: String },
    #[error("malformed task id `{0}`")]
    Malformed(String),
}

/// Format an internal [`Uuid`] as the external URN.
pub fn format_urn(id: Uuid) -> String {
    format!("{NAMESPACE}:{}", id.simple())
}

/// Parse a URN, enforcing the namespace and the 32-hex-character shape.
pub fn parse_urn(urn: &str) -> Result<Uuid, IdError> {
    let (namespace, hex) = urn
        .rsplit_once(':')
        .ok_or_else(|| IdError::Malformed(urn.to_owned()))?;

    if namespace != NAMESPACE {
        return Err(IdError::NamespaceMismatch {
            expected: NAMESPACE.to_owned(),
            found: namespace.to_owned(),
        });
    }

    if hex.len() != 32 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(IdError::Malformed(urn.to_owned()));
    }

    Uuid::parse_str(hex).map_err(|_| IdError::Malformed(urn.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_then_parse_roundtrips() {
        let id = Uuid::new_v4();
        let urn = format_urn(id);
        assert_eq!(parse_urn(&urn).unwrap(), id);
    }

    #[test]
    fn rejects_foreign_namespace() {
        let id = Uuid::new_v4();
        let foreign = format!("some-other-connector:{}", id.simple());
        match parse_urn(&foreign) {
            Err(IdError::NamespaceMismatch { found, .. }) => {
                assert_eq!(found, "some-other-connector")
            }
            other => panic!("expected NamespaceMismatch, got {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_hex() {
        let bogus = format!("{NAMESPACE}:not-hex-at-all");
        assert!(matches!(parse_urn(&bogus), Err(IdError::Malformed(_))));
    }

    #[test]
    fn rejects_missing_colon() {
        assert!(matches!(parse_urn("nocolonhere"), Err(IdError::Malformed(_))));
    }
}
