//! Log table operations: append, query, remove, change.

use crate::journal::Journal;
use crate::store::{collect_rows, log_columns_sql, optional_row, Tx, LOG_TABLE, SETTINGS_TABLE};
use crate::types::{LogColumn, LogRow, NameType, FORGET_SENTINEL};
use crate::{Action, Context, Error, ErrorKind, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Row};

/// A dose to append
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NewDose {
    pub username: String,
    pub drug: String,
    pub route: String,
    pub dose: f64,
    pub units: String,
    /// Purity in percent; nonzero asks for a unit conversion
    pub percent: f64,
    pub cost: f64,
    pub currency: String,
}

impl NewDose {
    pub fn new(
        username: impl Into<String>,
        drug: impl Into<String>,
        route: impl Into<String>,
        dose: f64,
        units: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            drug: drug.into(),
            route: route.into(),
            dose,
            units: units.into(),
            ..Self::default()
        }
    }

    pub fn with_percent(mut self, percent: f64) -> Self {
        self.percent = percent;
        self
    }

    pub fn with_cost(mut self, cost: f64, currency: impl Into<String>) -> Self {
        self.cost = cost;
        self.currency = currency.into();
        self
    }
}

/// Selects log rows of one user.
///
/// `limit` 0 means no limit. A nonzero `id` selects the single row with that
/// start time. `search` matches substrings of the searchable columns, or the
/// whole value of `exact_column` when one is given.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogQuery {
    pub username: String,
    pub limit: usize,
    pub id: i64,
    pub descending: bool,
    pub search: String,
    pub exact_column: String,
}

impl LogQuery {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    pub fn descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }

    pub fn exact(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.exact_column = column.into();
        self.search = value.into();
        self
    }
}

pub(crate) fn log_from_row(row: &Row<'_>) -> rusqlite::Result<LogRow> {
    Ok(LogRow {
        start_time: row.get(0)?,
        username: row.get(1)?,
        end_time: row.get(2)?,
        drug_name: row.get(3)?,
        dose: row.get(4)?,
        dose_units: row.get(5)?,
        drug_route: row.get(6)?,
        cost: row.get(7)?,
        cost_currency: row.get(8)?,
    })
}

/// Escape LIKE wildcards in `term` and wrap it for a substring match
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn name_type_of(column: LogColumn) -> Option<NameType> {
    match column {
        LogColumn::DrugName => Some(NameType::Substance),
        LogColumn::DrugRoute => Some(NameType::Route),
        LogColumn::DoseUnits => Some(NameType::Units),
        _ => None,
    }
}

fn parse_value(column: LogColumn, value: &str) -> Result<Value> {
    let invalid = || Error::InvalidValue {
        column: column.to_string(),
        value: value.to_string(),
    };
    let trimmed = value.trim();
    match column {
        LogColumn::StartTime | LogColumn::EndTime => {
            let v: i64 = trimmed.parse().map_err(|_| invalid())?;
            if v < 0 {
                return Err(invalid());
            }
            Ok(Value::Integer(v))
        }
        LogColumn::Dose | LogColumn::Cost => {
            let v: f64 = trimmed.parse().map_err(|_| invalid())?;
            if !v.is_finite() || v < 0.0 {
                return Err(invalid());
            }
            Ok(Value::Real(v))
        }
        _ => Ok(Value::Text(trimmed.to_string())),
    }
}

/// Reset a remembered id that points at `start_time`, inside `tx`
fn forget_if_remembered(tx: &mut Tx<'_>, username: &str, start_time: i64) -> Result<()> {
    tx.exec(
        &format!(
            "UPDATE {SETTINGS_TABLE} SET useIDForRemember = ?1 \
             WHERE username = ?2 AND useIDForRemember = ?3"
        ),
        params![FORGET_SENTINEL, username, start_time],
    )?;
    Ok(())
}

impl Journal {
    /// Append a dose and return the stored row.
    pub fn append(&self, ctx: &Context, new: NewDose) -> Result<LogRow> {
        let resolver = self.resolver();
        let drug = resolver.match_name(ctx, &new.drug, NameType::Substance)?;
        let route = resolver.match_name(ctx, &new.route, NameType::Route)?;
        let mut units = resolver.match_name(ctx, &new.units, NameType::Units)?;
        let mut dose = new.dose;

        if new.percent != 0.0 {
            let converted = self
                .converter()
                .convert(ctx, &drug, &[dose, new.percent])
                .map_err(|err| Error::in_action(Action::Append, err))?;
            dose = converted.amount;
            units = converted.units;
        }

        if !self.combo_known(ctx, &drug, &route, &units)? {
            return Err(Error::ComboInputError { drug, route, units });
        }

        let max = self.config().max_logs_per_user;
        let count = self.count(ctx, &new.username)?;
        if count >= i64::from(max) {
            if !self.config().auto_remove {
                return Err(Error::MaxLogsPerUser {
                    username: new.username,
                    max,
                });
            }
            let excess = (count - i64::from(max) + 1) as usize;
            let query = LogQuery::new(new.username.as_str()).limit(excess);
            let evicted = self.remove(ctx, &query)?;
            tracing::info!("Evicted {} oldest logs of {}", evicted, new.username);
        }

        let currency = if new.currency.trim().is_empty() && new.cost != 0.0 {
            self.config().cost_currency.clone()
        } else {
            new.currency.trim().to_string()
        };

        let mut last = self
            .last_append
            .lock()
            .map_err(|_| Error::Other("append coordinator mutex poisoned".into()))?;
        let now = chrono::Utc::now().timestamp();
        let mut row = LogRow {
            start_time: last.next_start_time(&new.username, now),
            username: new.username,
            end_time: 0,
            drug_name: drug,
            dose,
            dose_units: units,
            drug_route: route,
            cost: new.cost,
            cost_currency: currency,
        };

        let newest_sql =
            format!("SELECT MAX(timeOfDoseStart) FROM {LOG_TABLE} WHERE username = ?1");
        let insert_sql = format!(
            "INSERT INTO {LOG_TABLE} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            log_columns_sql()
        );
        let start_time = self.store().write(ctx, "logs", |tx| {
            let mut start_time = row.start_time;
            // Another process may have appended for this user since
            let newest = tx
                .query_row(&newest_sql, params![row.username], |r| r.get::<_, Option<i64>>(0))?
                .flatten();
            if let Some(newest) = newest {
                if newest >= start_time {
                    start_time = newest + 1;
                }
            }
            tx.exec(
                &insert_sql,
                params![
                    start_time,
                    row.username,
                    row.end_time,
                    row.drug_name,
                    row.dose,
                    row.dose_units,
                    row.drug_route,
                    row.cost,
                    row.cost_currency,
                ],
            )?;
            Ok(start_time)
        })?;
        row.start_time = start_time;
        last.start_time = start_time;
        last.username = row.username.clone();
        drop(last);

        tracing::info!(
            "Logged {} {} {} ({}) for {} at {}",
            row.dose,
            row.dose_units,
            row.drug_name,
            row.drug_route,
            row.username,
            row.start_time
        );
        Ok(row)
    }

    /// Gate for appends; fetches the drug once when allowed to
    fn combo_known(&self, ctx: &Context, drug: &str, route: &str, units: &str) -> Result<bool> {
        if self.info().check_combo(ctx, drug, route, units)? {
            return Ok(true);
        }
        if !self.config().auto_fetch || self.source().is_none() {
            return Ok(false);
        }
        if self.info().check_if_exists(ctx, drug)? {
            return Ok(false);
        }
        match self.fetch_and_store(ctx, drug) {
            Ok(outcome) => tracing::debug!("Fetch for {} on append: {:?}", drug, outcome),
            Err(err) if err.kind() == ErrorKind::Fetch => {
                tracing::debug!("Fetch for {} on append failed: {}", drug, err);
                return Ok(false);
            }
            Err(err) => return Err(Error::in_action(Action::Fetch, err)),
        }
        self.info().check_combo(ctx, drug, route, units)
    }

    /// Number of logs of `username`
    pub fn count(&self, ctx: &Context, username: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {LOG_TABLE} WHERE username = ?1");
        self.store().read(ctx, "logs", |conn| {
            conn.query_row(&sql, params![username], |r| r.get(0))
        })
    }

    /// Rows of one user selected by `query`
    pub fn get_logs(&self, ctx: &Context, query: &LogQuery) -> Result<Vec<LogRow>> {
        let mut sql = format!(
            "SELECT {} FROM {LOG_TABLE} WHERE username = ?1",
            log_columns_sql()
        );
        let mut values = vec![Value::Text(query.username.clone())];

        if query.id != 0 {
            sql.push_str(" AND timeOfDoseStart = ?2");
            values.push(Value::Integer(query.id));
            let id = query.id;
            let row = self.store().read(ctx, "logs", |conn| {
                optional_row(conn, &sql, params_from_iter(values.iter()), log_from_row)
            })?;
            return row.map(|r| vec![r]).ok_or_else(|| Error::LogDoesntExist {
                username: query.username.clone(),
                id,
            });
        }

        let search = query.search.trim();
        let exact = query.exact_column.trim();
        if !exact.is_empty() {
            let column: LogColumn = exact.parse()?;
            if !search.is_empty() {
                let value = match name_type_of(column) {
                    Some(name_type) => {
                        Value::Text(self.resolver().match_name(ctx, search, name_type)?)
                    }
                    None => parse_value(column, search)?,
                };
                sql.push_str(&format!(" AND {} = ?2", column.as_str()));
                values.push(value);
            }
        } else if !search.is_empty() {
            let normalized = self.resolver().resolve_any(ctx, search)?;
            let clauses = LogColumn::SEARCHABLE
                .iter()
                .map(|c| {
                    if c.is_numeric() {
                        format!("CAST({} AS TEXT) LIKE ?2 ESCAPE '\\'", c.as_str())
                    } else {
                        format!("{} LIKE ?2 ESCAPE '\\'", c.as_str())
                    }
                })
                .collect::<Vec<_>>()
                .join(" OR ");
            sql.push_str(&format!(" AND ({clauses})"));
            values.push(Value::Text(like_pattern(&normalized)));
        }

        let order = if query.descending { "DESC" } else { "ASC" };
        let limit = if query.limit == 0 { -1 } else { query.limit as i64 };
        sql.push_str(&format!(
            " ORDER BY timeOfDoseStart {order} LIMIT {limit}"
        ));

        let rows = self.store().read(ctx, "logs", |conn| {
            collect_rows(conn, &sql, params_from_iter(values.iter()), log_from_row)
        })?;
        if rows.is_empty() {
            return Err(Error::NoLogs(query.username.clone()));
        }
        tracing::debug!("Got {} logs for {}", rows.len(), query.username);
        Ok(rows)
    }

    /// The newest log of `username`, or the one at `id` when nonzero
    pub fn get_log(&self, ctx: &Context, username: &str, id: i64) -> Result<LogRow> {
        let query = LogQuery::new(username).id(id).limit(1).descending(true);
        let mut rows = self.get_logs(ctx, &query)?;
        rows.pop().ok_or_else(|| Error::NoLogs(username.to_string()))
    }

    /// Delete logs and return how many went.
    ///
    /// A nonzero id without a search deletes that one row. Otherwise the rows
    /// `get_logs` would return for the query are deleted; `limit` is the
    /// amount and `descending` removes from the newest end.
    pub fn remove(&self, ctx: &Context, query: &LogQuery) -> Result<usize> {
        let delete_sql =
            format!("DELETE FROM {LOG_TABLE} WHERE username = ?1 AND timeOfDoseStart = ?2");
        let username = query.username.as_str();

        if query.id != 0 && query.search.trim().is_empty() {
            let id = query.id;
            self.store().write(ctx, "logs", |tx| {
                if tx.exec(&delete_sql, params![username, id])? == 0 {
                    return Err(Error::LogDoesntExist {
                        username: username.to_string(),
                        id,
                    });
                }
                forget_if_remembered(tx, username, id)
            })?;
            tracing::info!("Removed log {} of {}", id, username);
            return Ok(1);
        }

        let selection = LogQuery {
            id: 0,
            ..query.clone()
        };
        let ids: Vec<i64> = self
            .get_logs(ctx, &selection)?
            .iter()
            .map(|r| r.start_time)
            .collect();
        let removed = self.store().write(ctx, "logs", |tx| {
            tx.prepare(&delete_sql)?;
            let mut removed = 0;
            for id in &ids {
                removed += tx.exec(&delete_sql, params![username, id])?;
                forget_if_remembered(tx, username, *id)?;
            }
            Ok(removed)
        })?;
        tracing::info!("Removed {} logs of {}", removed, username);
        Ok(removed)
    }

    /// Delete every log of `username`
    pub fn clean(&self, ctx: &Context, username: &str) -> Result<usize> {
        let removed = self.store().write(ctx, "logs", |tx| {
            let removed = tx.exec(
                &format!("DELETE FROM {LOG_TABLE} WHERE username = ?1"),
                params![username],
            )?;
            tx.exec(
                &format!("UPDATE {SETTINGS_TABLE} SET useIDForRemember = ?1 WHERE username = ?2"),
                params![FORGET_SENTINEL, username],
            )?;
            Ok(removed)
        })?;
        if removed == 0 {
            return Err(Error::NoLogs(username.to_string()));
        }
        tracing::info!("Cleaned {} logs of {}", removed, username);
        Ok(removed)
    }

    /// Every user with at least one log
    pub fn users(&self, ctx: &Context) -> Result<Vec<String>> {
        let sql = format!("SELECT DISTINCT username FROM {LOG_TABLE} ORDER BY username");
        let users = self
            .store()
            .read(ctx, "logs", |conn| collect_rows(conn, &sql, [], |r| r.get(0)))?;
        if users.is_empty() {
            return Err(Error::NoUsersReturned);
        }
        Ok(users)
    }

    /// Set one column of one log. Id 0 means the newest log.
    pub fn change(
        &self,
        ctx: &Context,
        username: &str,
        id: i64,
        column: &str,
        value: &str,
    ) -> Result<LogRow> {
        let column: LogColumn = column.parse()?;
        if column == LogColumn::Username {
            return Err(Error::InvalidColInput(column.to_string()));
        }
        let id = if id == 0 {
            self.get_log(ctx, username, 0)?.start_time
        } else {
            id
        };
        let new_value = match name_type_of(column) {
            Some(name_type) => Value::Text(self.resolver().match_name(ctx, value.trim(), name_type)?),
            None => parse_value(column, value)?,
        };

        let select_sql = format!(
            "SELECT {} FROM {LOG_TABLE} WHERE username = ?1 AND timeOfDoseStart = ?2",
            log_columns_sql()
        );
        let update_sql = format!(
            "UPDATE {LOG_TABLE} SET {} = ?1 WHERE username = ?2 AND timeOfDoseStart = ?3",
            column.as_str()
        );
        let remember_sql = format!(
            "UPDATE {SETTINGS_TABLE} SET useIDForRemember = ?1 \
             WHERE username = ?2 AND useIDForRemember = ?3"
        );

        let updated = self.store().write(ctx, "logs", |tx| {
            let current = tx
                .query_row(&select_sql, params![username, id], log_from_row)?
                .ok_or_else(|| Error::LogDoesntExist {
                    username: username.to_string(),
                    id,
                })?;

            let (start, end) = match (column, &new_value) {
                (LogColumn::StartTime, Value::Integer(v)) => (*v, current.end_time),
                (LogColumn::EndTime, Value::Integer(v)) => (current.start_time, *v),
                _ => (current.start_time, current.end_time),
            };
            if end != 0 && end < start {
                return Err(Error::InvalidValue {
                    column: column.to_string(),
                    value: value.to_string(),
                });
            }

            tx.exec(&update_sql, params![new_value, username, id])?;
            if column == LogColumn::StartTime && start != id {
                tx.exec(&remember_sql, params![start, username, id])?;
            }
            tx.query_row(&select_sql, params![username, start], log_from_row)?
                .ok_or_else(|| Error::LogDoesntExist {
                    username: username.to_string(),
                    id: start,
                })
        })?;

        tracing::info!("Changed {} of log {} for {}", column, id, username);
        Ok(updated)
    }
}
