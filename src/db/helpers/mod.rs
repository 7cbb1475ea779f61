use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::models::InspectionId;

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_inspection_id(origin: &str, token: String) -> Result<InspectionId> {
    InspectionId::from_parts(origin, token)
        .ok_or_else(|| anyhow!("unknown inspection id origin {origin}"))
}
