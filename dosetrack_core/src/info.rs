//! The info table: dosing and timing data per (drug, route).
//!
//! One table per source, named after the source. Rows are written in bulk
//! after a fetch and read by the append gate and the progression engine.
//! A row whose dose or phase range has a minimum above its maximum is
//! rejected; a zero on either side means the bound is unknown.

use crate::names::Resolver;
use crate::store::{collect_rows, info_table_ddl, optional_row, DbDriver, Store};
use crate::types::{DoseBand, InfoRow, NameType, Phase};
use crate::{Context, Error, Result};
use rusqlite::{params, Row};

/// Info table columns in schema order
pub const INFO_COLUMNS: [&str; 26] = [
    "drugName",
    "drugRoute",
    "threshold",
    "lowDoseMin",
    "lowDoseMax",
    "mediumDoseMin",
    "mediumDoseMax",
    "highDoseMin",
    "highDoseMax",
    "doseUnits",
    "onsetMin",
    "onsetMax",
    "onsetUnits",
    "comeUpMin",
    "comeUpMax",
    "comeUpUnits",
    "peakMin",
    "peakMax",
    "peakUnits",
    "offsetMin",
    "offsetMax",
    "offsetUnits",
    "totalDurMin",
    "totalDurMax",
    "totalDurUnits",
    "timeOfFetch",
];

fn phase_from(row: &Row<'_>, start: usize) -> rusqlite::Result<Phase> {
    Ok(Phase {
        min: row.get(start)?,
        max: row.get(start + 1)?,
        units: row.get(start + 2)?,
    })
}

fn info_from_row(row: &Row<'_>) -> rusqlite::Result<InfoRow> {
    Ok(InfoRow {
        drug_name: row.get(0)?,
        drug_route: row.get(1)?,
        threshold: row.get(2)?,
        low_dose: DoseBand::new(row.get(3)?, row.get(4)?),
        medium_dose: DoseBand::new(row.get(5)?, row.get(6)?),
        high_dose: DoseBand::new(row.get(7)?, row.get(8)?),
        dose_units: row.get(9)?,
        onset: phase_from(row, 10)?,
        comeup: phase_from(row, 13)?,
        peak: phase_from(row, 16)?,
        offset: phase_from(row, 19)?,
        total: phase_from(row, 22)?,
        time_of_fetch: row.get(25)?,
    })
}

#[derive(Clone)]
pub struct InfoTable {
    store: Store,
    resolver: Resolver,
}

impl InfoTable {
    pub fn new(store: Store, resolver: Resolver) -> Self {
        Self { store, resolver }
    }

    fn table(&self) -> &str {
        self.store.info_table()
    }

    fn select_sql(&self, filter: &str) -> String {
        format!(
            "SELECT {} FROM {} {}",
            INFO_COLUMNS.join(", "),
            self.table(),
            filter
        )
    }

    /// Canonicalise the names and units of a fetched row
    fn normalize(&self, ctx: &Context, mut row: InfoRow) -> Result<InfoRow> {
        row.drug_name = self.resolver.match_name(ctx, &row.drug_name, NameType::Substance)?;
        row.drug_route = self.resolver.match_name(ctx, &row.drug_route, NameType::Route)?;
        row.dose_units = self.resolver.match_name(ctx, &row.dose_units, NameType::Units)?;
        for phase in row.phases_mut() {
            if !phase.units.is_empty() {
                phase.units = self.resolver.match_name(ctx, &phase.units, NameType::Units)?;
            }
        }
        if row.time_of_fetch == 0 {
            row.time_of_fetch = chrono::Utc::now().timestamp();
        }
        if let Some(band) = row.inverted_bands().first() {
            return Err(Error::InvalidValue {
                column: band.to_string(),
                value: format!("{} ({})", row.drug_name, row.drug_route),
            });
        }
        Ok(row)
    }

    /// Insert `rows` in one transaction after normalising them.
    /// A row for an existing (drug, route) replaces it.
    pub fn add_rows(&self, ctx: &Context, rows: Vec<InfoRow>) -> Result<usize> {
        if rows.is_empty() {
            return Err(Error::StructSliceEmpty);
        }
        let rows = rows
            .into_iter()
            .map(|row| self.normalize(ctx, row))
            .collect::<Result<Vec<_>>>()?;

        let verb = match self.store.driver() {
            DbDriver::Sqlite => "INSERT OR REPLACE INTO",
            DbDriver::Mysql => "REPLACE INTO",
        };
        let placeholders = (1..=INFO_COLUMNS.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "{verb} {} ({}) VALUES ({placeholders})",
            self.table(),
            INFO_COLUMNS.join(", ")
        );

        let inserted = self.store.write(ctx, "info", |tx| {
            tx.prepare(&sql)?;
            for r in &rows {
                tx.exec(
                    &sql,
                    params![
                        r.drug_name,
                        r.drug_route,
                        r.threshold,
                        r.low_dose.min,
                        r.low_dose.max,
                        r.medium_dose.min,
                        r.medium_dose.max,
                        r.high_dose.min,
                        r.high_dose.max,
                        r.dose_units,
                        r.onset.min,
                        r.onset.max,
                        r.onset.units,
                        r.comeup.min,
                        r.comeup.max,
                        r.comeup.units,
                        r.peak.min,
                        r.peak.max,
                        r.peak.units,
                        r.offset.min,
                        r.offset.max,
                        r.offset.units,
                        r.total.min,
                        r.total.max,
                        r.total.units,
                        r.time_of_fetch,
                    ],
                )?;
            }
            Ok(rows.len())
        })?;

        tracing::info!("Stored {} info rows in {}", inserted, self.table());
        Ok(inserted)
    }

    /// Whether any row exists for the canonical `drug`
    pub fn check_if_exists(&self, ctx: &Context, drug: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE drugName = ?1 LIMIT 1", self.table());
        let found = self.store.read(ctx, "info", |conn| {
            optional_row(conn, &sql, params![drug], |r| r.get::<_, i64>(0))
        })?;
        Ok(found.is_some())
    }

    /// Whether the canonical (drug, route, units) combination is known
    pub fn check_combo(&self, ctx: &Context, drug: &str, route: &str, units: &str) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE drugName = ?1 AND drugRoute = ?2 AND doseUnits = ?3 LIMIT 1",
            self.table()
        );
        let found = self.store.read(ctx, "info", |conn| {
            optional_row(conn, &sql, params![drug, route, units], |r| r.get::<_, i64>(0))
        })?;
        Ok(found.is_some())
    }

    /// Every route of the canonical `drug`
    pub fn get_drug_info(&self, ctx: &Context, drug: &str) -> Result<Vec<InfoRow>> {
        let sql = self.select_sql("WHERE drugName = ?1 ORDER BY drugRoute");
        let rows = self.store.read(ctx, "info", |conn| {
            collect_rows(conn, &sql, params![drug], info_from_row)
        })?;
        if rows.is_empty() {
            return Err(Error::NoDrugInfoTable(drug.to_string()));
        }
        Ok(rows)
    }

    /// Distinct drug names, sorted
    pub fn drug_names(&self, ctx: &Context) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT drugName FROM {} ORDER BY drugName",
            self.table()
        );
        let names = self
            .store
            .read(ctx, "info", |conn| collect_rows(conn, &sql, [], |r| r.get(0)))?;
        if names.is_empty() {
            return Err(Error::EmptyListDrugNames);
        }
        Ok(names)
    }

    /// Delete every route of the canonical `drug`
    pub fn remove_drug(&self, ctx: &Context, drug: &str) -> Result<usize> {
        let sql = format!("DELETE FROM {} WHERE drugName = ?1", self.table());
        let removed = self
            .store
            .write(ctx, "info", |tx| tx.exec(&sql, params![drug]))?;
        if removed == 0 {
            return Err(Error::NoDrugInfoTable(drug.to_string()));
        }
        tracing::info!("Removed {} info rows for {}", removed, drug);
        Ok(removed)
    }

    /// Drop the info table and create it empty
    pub fn recreate(&self, ctx: &Context) -> Result<()> {
        let drop = format!("DROP TABLE IF EXISTS {}", self.table());
        let create = info_table_ddl(self.store.driver(), self.table());
        self.store.write(ctx, "info", |tx| {
            tx.exec(&drop, [])?;
            tx.exec(&create, [])?;
            Ok(())
        })?;
        tracing::info!("Recreated info table {}", self.table());
        Ok(())
    }
}
