//! Cost totals per substance and currency.

use crate::journal::Journal;
use crate::logs::log_from_row;
use crate::store::{collect_rows, log_columns_sql, LOG_TABLE};
use crate::types::{CostEntry, LogRow};
use crate::{Context, Error, Result};
use rusqlite::params;
use std::collections::HashMap;

fn key(drug: &str, currency: &str) -> (String, String) {
    (drug.to_lowercase(), currency.to_lowercase())
}

/// Fold `rows` into one entry per (drug, currency) pair.
///
/// Every pair starts at zero so the result is the full cross product;
/// [`CostEntry::is_displayable`] filters the empty ones for display.
pub fn fold_costs(drugs: &[String], currencies: &[String], rows: &[LogRow]) -> Vec<CostEntry> {
    let mut entries = Vec::with_capacity(drugs.len() * currencies.len());
    let mut index = HashMap::new();
    for drug in drugs {
        for currency in currencies {
            index.insert(key(drug, currency), entries.len());
            entries.push(CostEntry {
                substance: drug.clone(),
                currency: currency.clone(),
                total: 0.0,
            });
        }
    }
    for row in rows {
        match index.get(&key(&row.drug_name, &row.cost_currency)) {
            Some(&i) => entries[i].total += row.cost,
            None => tracing::debug!(
                "Skipping cost of {} in {:?}, not in the selection",
                row.drug_name,
                row.cost_currency
            ),
        }
    }
    entries
}

impl Journal {
    /// Total spent by `username` per substance and currency
    pub fn costs(&self, ctx: &Context, username: &str) -> Result<Vec<CostEntry>> {
        let drugs_sql = format!(
            "SELECT DISTINCT drugName FROM {LOG_TABLE} WHERE username = ?1 ORDER BY drugName"
        );
        let currencies_sql = format!(
            "SELECT DISTINCT costCurrency FROM {LOG_TABLE} WHERE username = ?1 ORDER BY costCurrency"
        );
        let rows_sql = format!(
            "SELECT {} FROM {LOG_TABLE} WHERE username = ?1 AND drugName = ?2",
            log_columns_sql()
        );

        let (drugs, currencies, rows) = self.store().read(ctx, "costs", |conn| {
            let drugs: Vec<String> =
                collect_rows(conn, &drugs_sql, params![username], |r| r.get(0))?;
            let currencies: Vec<String> =
                collect_rows(conn, &currencies_sql, params![username], |r| r.get(0))?;
            let mut rows = Vec::new();
            for drug in &drugs {
                rows.extend(collect_rows(conn, &rows_sql, params![username, drug], log_from_row)?);
            }
            Ok((drugs, currencies, rows))
        })?;

        if drugs.is_empty() {
            return Err(Error::NoLogs(username.to_string()));
        }
        Ok(fold_costs(&drugs, &currencies, &rows))
    }
}
