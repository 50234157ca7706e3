//! Append-only audit trail kept in `system_logs`
//!
//! Writing never fails from the caller's point of view: a persistence error
//! is reported through `tracing` and swallowed, so the request being observed
//! always gets its own response.

use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow, types::Json};
use std::{collections::BTreeMap, fmt, str::FromStr};
use tracing::error;
use uuid::Uuid;

use crate::repositories::like_pattern;

/// Maximum number of entries a listing returns
pub const LOG_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Error => "ERROR",
        }
    }
}

/// `fact` marks a durable business fact (a registration, a new tenant)
/// as opposed to an ordinary request event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Event,
    Fact,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Event => "event",
            LogKind::Fact => "fact",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(LogLevel::Info),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

impl FromStr for LogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(LogKind::Event),
            "fact" => Ok(LogKind::Fact),
            other => Err(format!("unknown log kind '{}'", other)),
        }
    }
}

/// Structured context attached to an entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// HTTP status the request ended with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(
        default,
        rename = "extra_info",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub extra: BTreeMap<String, String>,
}

impl LogMetadata {
    pub fn new(action: &str) -> Self {
        Self {
            action: Some(action.to_string()),
            ..Self::default()
        }
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn ip(mut self, ip: Option<String>) -> Self {
        self.ip = ip;
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = Some(status.as_u16());
        self
    }

    pub fn extra(mut self, key: &str, value: impl ToString) -> Self {
        self.extra.insert(key.to_string(), value.to_string());
        self
    }
}

/// A stored entry
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub level: String,
    pub kind: String,
    pub component: String,
    pub message: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl LogEntry {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let metadata: Json<serde_json::Value> = row.try_get("metadata")?;
        Ok(LogEntry {
            id: row.try_get("id")?,
            level: row.try_get("level")?,
            kind: row.try_get("kind")?,
            component: row.try_get("component")?,
            message: row.try_get("message")?,
            metadata: metadata.0,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Query-string form of the listing filters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogQuery {
    pub level: Option<String>,
    pub component: Option<String>,
    #[serde(alias = "startDate")]
    pub start_date: Option<String>,
    #[serde(alias = "endDate")]
    pub end_date: Option<String>,
    pub keyword: Option<String>,
}

/// Validated listing filters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogFilter {
    pub level: Option<LogLevel>,
    pub kind: Option<LogKind>,
    pub component: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub keyword: Option<String>,
}

impl TryFrom<LogQuery> for LogFilter {
    type Error = String;

    fn try_from(query: LogQuery) -> Result<Self, Self::Error> {
        let mut filter = LogFilter {
            component: non_empty(query.component),
            keyword: non_empty(query.keyword),
            ..LogFilter::default()
        };

        if let Some(level) = non_empty(query.level) {
            let level = level.to_ascii_uppercase();
            if level == "DB" {
                // Legacy level for business facts
                filter.level = Some(LogLevel::Info);
                filter.kind = Some(LogKind::Fact);
            } else {
                filter.level = Some(level.parse()?);
            }
        }

        if let Some(start) = non_empty(query.start_date) {
            filter.start = Some(parse_bound(&start, false)?);
        }
        if let Some(end) = non_empty(query.end_date) {
            filter.end = Some(parse_bound(&end, true)?);
        }

        if let (Some(start), Some(end)) = (filter.start, filter.end) {
            if start > end {
                return Err("start_date must not be after end_date".to_string());
            }
        }

        Ok(filter)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an RFC 3339 timestamp or a `YYYY-MM-DD` date. A bare end date
/// covers the whole day.
fn parse_bound(value: &str, end_of_day: bool) -> Result<DateTime<Utc>, String> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{}': expected RFC 3339 or YYYY-MM-DD", value))?;
    let time = if end_of_day {
        NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or_else(|| format!("invalid date '{}'", value))?;

    Ok(Utc.from_utc_datetime(&date.and_time(time)))
}

fn list_query(filter: &LogFilter) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new(
        "SELECT id, level, kind, component, message, metadata, created_at \
         FROM system_logs WHERE 1=1",
    );

    if let Some(level) = filter.level {
        query.push(" AND level = ").push_bind(level.as_str());
    }
    if let Some(kind) = filter.kind {
        query.push(" AND kind = ").push_bind(kind.as_str());
    }
    if let Some(component) = &filter.component {
        query.push(" AND component = ").push_bind(component.clone());
    }
    if let Some(start) = filter.start {
        query.push(" AND created_at >= ").push_bind(start);
    }
    if let Some(end) = filter.end {
        query.push(" AND created_at <= ").push_bind(end);
    }
    if let Some(keyword) = &filter.keyword {
        let pattern = like_pattern(keyword);
        query
            .push(" AND (message ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR metadata::text ILIKE ")
            .push_bind(pattern)
            .push(")");
    }

    query
        .push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push(LOG_PAGE_SIZE);
    query
}

/// Audit logger
#[derive(Clone)]
pub struct AuditLogger {
    pool: PgPool,
}

impl AuditLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one entry. Never fails.
    pub async fn record(
        &self,
        level: LogLevel,
        kind: LogKind,
        component: &str,
        message: &str,
        metadata: LogMetadata,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO system_logs (level, kind, component, message, metadata)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(level.as_str())
        .bind(kind.as_str())
        .bind(component)
        .bind(message)
        .bind(Json(metadata))
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            error!(
                "Failed to write audit entry [{} {}] {}: {}",
                level, component, message, e
            );
        }
    }

    pub async fn info(&self, component: &str, message: &str, metadata: LogMetadata) {
        self.record(LogLevel::Info, LogKind::Event, component, message, metadata)
            .await
    }

    pub async fn error(&self, component: &str, message: &str, metadata: LogMetadata) {
        self.record(LogLevel::Error, LogKind::Event, component, message, metadata)
            .await
    }

    /// Record a durable business fact
    pub async fn fact(&self, component: &str, message: &str, metadata: LogMetadata) {
        self.record(LogLevel::Info, LogKind::Fact, component, message, metadata)
            .await
    }

    /// Newest-first entries matching `filter`, at most [`LOG_PAGE_SIZE`]
    pub async fn list(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, sqlx::Error> {
        let mut query = list_query(filter);
        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(LogEntry::from_row).collect()
    }

    pub async fn get(&self, id: i64) -> Result<Option<LogEntry>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, level, kind, component, message, metadata, created_at
            FROM system_logs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(LogEntry::from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn query(pairs: &[(&str, &str)]) -> LogQuery {
        let mut query = LogQuery::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "level" => query.level = value,
                "component" => query.component = value,
                "start_date" => query.start_date = value,
                "end_date" => query.end_date = value,
                "keyword" => query.keyword = value,
                _ => unreachable!(),
            }
        }
        query
    }

    #[test]
    fn test_unfiltered_listing_is_newest_first_and_capped() {
        let sql = list_query(&LogFilter::default()).sql().to_string();
        assert_eq!(
            sql,
            "SELECT id, level, kind, component, message, metadata, created_at \
             FROM system_logs WHERE 1=1 ORDER BY created_at DESC, id DESC LIMIT 100"
        );
    }

    #[test]
    fn test_level_and_keyword_filter() {
        let filter =
            LogFilter::try_from(query(&[("level", "ERROR"), ("keyword", "login")])).unwrap();
        assert_eq!(filter.level, Some(LogLevel::Error));
        assert_eq!(filter.keyword.as_deref(), Some("login"));

        let sql = list_query(&filter).sql().to_string();
        assert!(sql.contains(" AND level = $1"));
        assert!(sql.contains(" AND (message ILIKE $2 OR metadata::text ILIKE $3)"));
        assert!(sql.ends_with("ORDER BY created_at DESC, id DESC LIMIT 100"));
    }

    #[test]
    fn test_legacy_db_level_maps_to_facts() {
        let filter = LogFilter::try_from(query(&[("level", "db")])).unwrap();
        assert_eq!(filter.level, Some(LogLevel::Info));
        assert_eq!(filter.kind, Some(LogKind::Fact));

        let sql = list_query(&filter).sql().to_string();
        assert!(sql.contains(" AND level = $1 AND kind = $2"));
    }

    #[test]
    fn test_unknown_level_is_rejected() {
        assert!(LogFilter::try_from(query(&[("level", "DEBUG")])).is_err());
    }

    #[test]
    fn test_blank_parameters_are_ignored() {
        let filter = LogFilter::try_from(query(&[("level", ""), ("keyword", "  ")])).unwrap();
        assert_eq!(filter, LogFilter::default());
    }

    #[test]
    fn test_date_bounds() {
        let filter = LogFilter::try_from(query(&[
            ("start_date", "2024-03-01"),
            ("end_date", "2024-03-01"),
        ]))
        .unwrap();

        let start = filter.start.unwrap();
        let end = filter.end.unwrap();
        assert_eq!(start.to_rfc3339(), "2024-03-01T00:00:00+00:00");
        assert_eq!((end.hour(), end.minute(), end.second()), (23, 59, 59));
        assert!(end > start);

        let filter = LogFilter::try_from(query(&[("start_date", "2024-03-01T12:30:00+02:00")]))
            .unwrap();
        assert_eq!(filter.start.unwrap().hour(), 10);

        assert!(LogFilter::try_from(query(&[("start_date", "yesterday")])).is_err());
        assert!(LogFilter::try_from(query(&[
            ("start_date", "2024-03-02"),
            ("end_date", "2024-03-01"),
        ]))
        .is_err());
    }

    #[test]
    fn test_metadata_serializes_compactly() {
        let metadata = LogMetadata::new("login")
            .status(StatusCode::UNAUTHORIZED)
            .ip(Some("10.0.0.1".to_string()))
            .extra("username", "alice");
        let json = serde_json::to_value(&metadata).unwrap();

        assert_eq!(json["action"], "login");
        assert_eq!(json["status"], 401);
        assert_eq!(json["ip"], "10.0.0.1");
        assert_eq!(json["extra_info"]["username"], "alice");
        assert!(json.get("user_id").is_none());
    }
}
