//! Per-user settings and the remember / recall / forget mechanism.

use crate::journal::Journal;
use crate::logs::NewDose;
use crate::store::{optional_row, LOG_TABLE, SETTINGS_TABLE};
use crate::types::{LogRow, Remembered, SettingColumn, UserSettings, FORGET_SENTINEL};
use crate::{Context, Error, Result};
use rusqlite::params;

impl Journal {
    /// Settings of `username`; users without a row get the defaults
    pub fn get_settings(&self, ctx: &Context, username: &str) -> Result<UserSettings> {
        let sql = format!("SELECT useIDForRemember FROM {SETTINGS_TABLE} WHERE username = ?1");
        let stored = self.store().read(ctx, "settings", |conn| {
            optional_row(conn, &sql, params![username], |r| r.get::<_, i64>(0))
        })?;
        Ok(UserSettings {
            username: username.to_string(),
            use_id_for_remember: Remembered::from_stored(stored.unwrap_or(FORGET_SENTINEL)),
        })
    }

    /// Store one setting, creating the user's row if needed. A remembered id
    /// must name an existing log of the user.
    pub fn set_setting(
        &self,
        ctx: &Context,
        username: &str,
        column: SettingColumn,
        value: i64,
    ) -> Result<()> {
        let sql = upsert_sql(column);
        let check_log = column == SettingColumn::UseIdForRemember && value != FORGET_SENTINEL;
        let exists_sql =
            format!("SELECT 1 FROM {LOG_TABLE} WHERE username = ?1 AND timeOfDoseStart = ?2");
        self.store().write(ctx, "settings", |tx| {
            if check_log
                && tx
                    .query_row(&exists_sql, params![username, value], |r| r.get::<_, i64>(0))?
                    .is_none()
            {
                return Err(Error::LogDoesntExist {
                    username: username.to_string(),
                    id: value,
                });
            }
            tx.exec(&sql, params![username, value])
        })?;
        tracing::debug!("Set {} = {} for {}", column.as_str(), value, username);
        Ok(())
    }

    /// Remember the log at `id` (0 for the newest) and return its start time
    pub fn remember(&self, ctx: &Context, username: &str, id: i64) -> Result<i64> {
        let id = if id == 0 {
            self.get_log(ctx, username, 0)?.start_time
        } else {
            id
        };
        self.set_setting(ctx, username, SettingColumn::UseIdForRemember, id)?;
        tracing::info!("Remembered log {} for {}", id, username);
        Ok(id)
    }

    pub fn forget(&self, ctx: &Context, username: &str) -> Result<()> {
        self.set_setting(ctx, username, SettingColumn::UseIdForRemember, FORGET_SENTINEL)?;
        tracing::info!("Forgot remembered log for {}", username);
        Ok(())
    }

    /// The remembered log of `username`
    pub fn recall(&self, ctx: &Context, username: &str) -> Result<LogRow> {
        match self.get_settings(ctx, username)?.use_id_for_remember {
            Remembered::Forgotten => Err(Error::NotRemembered(username.to_string())),
            Remembered::Log(id) => self.get_log(ctx, username, id),
        }
    }

    /// Log a new dose of the remembered drug, route and units
    pub fn log_remembered(&self, ctx: &Context, username: &str, dose: f64) -> Result<LogRow> {
        let remembered = self.recall(ctx, username)?;
        self.append(
            ctx,
            NewDose::new(
                username,
                remembered.drug_name,
                remembered.drug_route,
                dose,
                remembered.dose_units,
            ),
        )
    }
}

fn upsert_sql(column: SettingColumn) -> String {
    let column = column.as_str();
    format!(
        "INSERT INTO {SETTINGS_TABLE} (username, {column}) VALUES (?1, ?2) \
         ON CONFLICT(username) DO UPDATE SET {column} = excluded.{column}"
    )
}
