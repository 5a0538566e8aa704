use crate::execution::alpaca_client::{ListOrdersQuery, OrderQueryStatus};
use crate::models::order::Order;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use chrono_tz::America::New_York;
use serde_json::Value;
use std::fs::OpenOptions;
use std::path::Path;

/// The most orders the broker returns for one request.
pub const MAX_ORDERS: u32 = 500;

fn ny_midnight(date: NaiveDate) -> Result<DateTime<Utc>> {
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .context("invalid midnight")?;
    let local = New_York
        .from_local_datetime(&midnight)
        .earliest()
        .with_context(|| format!("{date} has no midnight in America/New_York"))?;
    Ok(local.with_timezone(&Utc))
}

/// Start and end of `date` on the New York exchange calendar.
pub fn day_window(date: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let next = date
        .checked_add_days(Days::new(1))
        .context("date out of range")?;
    Ok((ny_midnight(date)?, ny_midnight(next)?))
}

/// Every order of any status created on `date`.
pub fn orders_query(date: NaiveDate) -> Result<ListOrdersQuery> {
    let (after, until) = day_window(date)?;
    Ok(ListOrdersQuery {
        status: OrderQueryStatus::All,
        limit: MAX_ORDERS,
        after: Some(after),
        until: Some(until),
    })
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Header of an existing, non-empty CSV file.
fn existing_columns(path: &Path) -> Result<Option<Vec<String>>> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => {}
        _ => return Ok(None),
    }
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?;
    Ok(Some(headers.iter().map(str::to_string).collect()))
}

/// Append `orders` to a CSV file.
///
/// A new file gets a header made of the first order's fields. An existing
/// file keeps its header: fields an order lacks are left empty, and an order
/// with a field outside the header is an error, with nothing written.
/// Returns rows written.
pub fn append_csv(path: &Path, orders: &[Order]) -> Result<usize> {
    let rows = orders
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<Value>, _>>()?;
    let Some(Value::Object(first)) = rows.first() else {
        return Ok(0);
    };

    let existing = existing_columns(path)?;
    let add_header = existing.is_none();
    let columns = existing.unwrap_or_else(|| first.keys().cloned().collect());

    for row in &rows {
        let Value::Object(fields) = row else {
            bail!("order did not serialize to an object");
        };
        if let Some(extra) = fields.keys().find(|k| !columns.contains(k)) {
            bail!(
                "order {} has field `{extra}` not in the header of {}",
                cell(fields.get("id")),
                path.display()
            );
        }
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    if add_header {
        writer.write_record(&columns)?;
    }
    for row in &rows {
        writer.write_record(columns.iter().map(|c| cell(row.get(c))))?;
    }
    writer.flush()?;
    Ok(rows.len())
}
