use chrono::{DateTime, Utc};

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Parse an RFC 3339 timestamp column.
pub fn parse_timestamp(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid timestamp: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundtable_core::AgentStatus;

    #[test]
    fn parse_enum_success() {
        let result: Result<AgentStatus, _> = parse_enum("dead", "agents", "status");
        assert!(matches!(result, Ok(AgentStatus::Dead)));
    }

    #[test]
    fn parse_enum_failure() {
        let result: Result<AgentStatus, _> = parse_enum("INVALID", "agents", "status");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow {
                table: "agents",
                column: "status",
                ..
            })
        ));
    }

    #[test]
    fn parse_timestamp_success() {
        let stamp = Utc::now().to_rfc3339();
        let parsed = parse_timestamp(&stamp, "messages", "timestamp").unwrap();
        assert_eq!(parsed.to_rfc3339(), stamp);
    }

    #[test]
    fn parse_timestamp_failure() {
        let result = parse_timestamp("yesterday", "messages", "timestamp");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow {
                table: "messages",
                column: "timestamp",
                ..
            })
        ));
    }
}
