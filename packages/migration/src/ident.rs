//! Validated SQL identifiers.
//!
//! DDL cannot bind table, column or constraint names as parameters, so every
//! name a plan embeds in a statement goes through [`Ident`] first. Names read
//! back from the catalog are quoted with [`quote_ident`] instead.

use std::fmt;

use lazy_regex::regex_is_match;
use sea_orm_migration::sea_query::Alias;
use thiserror::Error;

/// PostgreSQL truncates identifiers longer than this (NAMEDATALEN - 1).
pub const MAX_IDENT_LEN: usize = 63;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentError {
    #[error("identifier is empty")]
    Empty,
    #[error("identifier '{0}' is longer than {MAX_IDENT_LEN} bytes")]
    TooLong(String),
    #[error("identifier '{0}' must match [a-z_][a-z0-9_]*")]
    Disallowed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(String);

impl Ident {
    pub fn new(raw: impl Into<String>) -> Result<Self, IdentError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(IdentError::Empty);
        }
        if raw.len() > MAX_IDENT_LEN {
            return Err(IdentError::TooLong(raw));
        }
        if !regex_is_match!(r"^[a-z_][a-z0-9_]*$", &raw) {
            return Err(IdentError::Disallowed(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for hand-rendered statements.
    pub fn quoted(&self) -> String {
        quote_ident(&self.0)
    }

    pub fn alias(&self) -> Alias {
        Alias::new(self.0.clone())
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Ident {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Ident {
    type Error = IdentError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ident::new(value)
    }
}

impl PartialEq<str> for Ident {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Ident {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Quote an arbitrary name the PostgreSQL way: wrap in double quotes and
/// double any embedded quote.
pub fn quote_ident(raw: &str) -> String {
    format!("\"{}\"", raw.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn accepts_lower_snake_case() {
        let ident = Ident::new("forum_email_verified_at").unwrap();
        assert_eq!(ident.as_str(), "forum_email_verified_at");
        assert_eq!(ident.quoted(), "\"forum_email_verified_at\"");
    }

    #[test]
    fn rejects_injection_attempts() {
        for raw in ["users; drop table users", "users\"", "Users", "1users", "a-b", "a b"] {
            assert!(
                matches!(Ident::new(raw), Err(IdentError::Disallowed(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_empty_and_overlong() {
        assert_eq!(Ident::new(""), Err(IdentError::Empty));
        let long = "a".repeat(MAX_IDENT_LEN + 1);
        assert!(matches!(Ident::new(long), Err(IdentError::TooLong(_))));
        assert!(Ident::new("a".repeat(MAX_IDENT_LEN)).is_ok());
    }

    #[test]
    fn quote_ident_doubles_embedded_quotes() {
        assert_eq!(quote_ident("Books"), "\"Books\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    proptest! {
        #[test]
        fn valid_identifiers_round_trip(raw in "[a-z_][a-z0-9_]{0,62}") {
            let ident = Ident::new(raw.clone()).unwrap();
            prop_assert_eq!(ident.as_str(), raw.as_str());
        }

        #[test]
        fn quoted_output_never_has_a_lone_quote(raw in "\\PC{0,40}") {
            let quoted = quote_ident(&raw);
            let inner = &quoted[1..quoted.len() - 1];
            prop_assert_eq!(inner.replace("\"\"", "").contains('"'), false);
        }
    }
}
