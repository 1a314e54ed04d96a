use std::fmt;

/// Referential action as stored in `pg_constraint.confdeltype` /
/// `confupdtype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FkAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl FkAction {
    pub fn from_pg_code(code: &str) -> Option<Self> {
        match code {
            "a" => Some(Self::NoAction),
            "r" => Some(Self::Restrict),
            "c" => Some(Self::Cascade),
            "n" => Some(Self::SetNull),
            "d" => Some(Self::SetDefault),
            _ => None,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

/// A foreign key as read from the live catalog.
///
/// Names here come from the catalog rather than from a plan, so they are kept
/// as plain strings and quoted when rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDescriptor {
    pub constraint_name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: FkAction,
    pub on_update: FkAction,
}

impl ForeignKeyDescriptor {
    pub fn references(&self, table: &str) -> bool {
        self.referenced_table == table
    }
}

impl fmt::Display for ForeignKeyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}.{} -> {}.{})",
            self.constraint_name,
            self.table,
            self.columns.join(","),
            self.referenced_table,
            self.referenced_columns.join(",")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pg_action_codes_map_to_sql() {
        assert_eq!(FkAction::from_pg_code("c"), Some(FkAction::Cascade));
        assert_eq!(FkAction::from_pg_code("n").map(FkAction::as_sql), Some("SET NULL"));
        assert_eq!(FkAction::from_pg_code("a"), Some(FkAction::NoAction));
        assert_eq!(FkAction::from_pg_code("x"), None);
    }
}
