//! Sort-order vocabulary for list queries.

use serde::{Deserialize, Serialize};

/// Sort direction for one ordering term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    /// SQL keyword for this direction.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// One ordering term: a column and the direction to sort it in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder {
    pub column: String,
    pub direction: Direction,
}

impl SortOrder {
    pub fn ascending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn descending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Descending,
        }
    }

    /// Renders this term as an `ORDER BY` fragment, e.g. `age DESC`.
    pub fn clause(&self) -> String {
        format!("{} {}", self.column, self.direction.keyword())
    }
}
