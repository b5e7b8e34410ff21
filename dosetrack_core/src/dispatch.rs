//! Tagged requests run concurrently against one journal.
//!
//! Each [`Request`] produces exactly one [`Response`] carrying the request's
//! action, username and position, with failures in-band as `Err`.

use crate::fetch::FetchOutcome;
use crate::journal::Journal;
use crate::logs::{LogQuery, NewDose};
use crate::types::{CostEntry, LogRow, SettingColumn, TimeTill};
use crate::{Action, Context, Error, Result};
use std::sync::mpsc;
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Append(NewDose),
    Get(LogQuery),
    Remove(LogQuery),
    Change {
        username: String,
        id: i64,
        column: String,
        value: String,
    },
    Times {
        username: String,
        id: i64,
    },
    Costs {
        username: String,
    },
    Remember {
        username: String,
        id: i64,
    },
    Recall {
        username: String,
    },
    Forget {
        username: String,
    },
    SetSettings {
        username: String,
        column: SettingColumn,
        value: i64,
    },
    Fetch {
        drug: String,
    },
}

impl Request {
    pub fn action(&self) -> Action {
        match self {
            Request::Append(_) => Action::Append,
            Request::Get(_) => Action::Get,
            Request::Remove(_) => Action::Remove,
            Request::Change { .. } => Action::Change,
            Request::Times { .. } => Action::Times,
            Request::Costs { .. } => Action::Costs,
            Request::Remember { .. } => Action::Remember,
            Request::Recall { .. } => Action::Recall,
            Request::Forget { .. } => Action::Forget,
            Request::SetSettings { .. } => Action::SetSettings,
            Request::Fetch { .. } => Action::Fetch,
        }
    }

    /// User the request acts for; empty for fetches
    pub fn username(&self) -> &str {
        match self {
            Request::Append(dose) => dose.username.as_str(),
            Request::Get(query) | Request::Remove(query) => query.username.as_str(),
            Request::Change { username, .. }
            | Request::Times { username, .. }
            | Request::Costs { username }
            | Request::Remember { username, .. }
            | Request::Recall { username }
            | Request::Forget { username }
            | Request::SetSettings { username, .. } => username.as_str(),
            Request::Fetch { .. } => "",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Appended(LogRow),
    Logs(Vec<LogRow>),
    Removed(usize),
    Changed(LogRow),
    Times(TimeTill),
    Costs(Vec<CostEntry>),
    Remembered(i64),
    Recalled(LogRow),
    Forgotten,
    SettingsSet,
    Fetched(FetchOutcome),
}

#[derive(Debug)]
pub struct Response {
    /// Position of the request in the submitted batch
    pub index: usize,
    pub action: Action,
    pub username: String,
    pub result: Result<Outcome>,
}

impl Journal {
    /// Run one request; errors come back tagged with the request's action
    pub fn handle(&self, ctx: &Context, request: Request) -> Result<Outcome> {
        let action = request.action();
        let outcome = match request {
            Request::Append(dose) => self.append(ctx, dose).map(Outcome::Appended),
            Request::Get(query) => self.get_logs(ctx, &query).map(Outcome::Logs),
            Request::Remove(query) => self.remove(ctx, &query).map(Outcome::Removed),
            Request::Change {
                username,
                id,
                column,
                value,
            } => self
                .change(ctx, &username, id, &column, &value)
                .map(Outcome::Changed),
            Request::Times { username, id } => self.times(ctx, &username, id).map(Outcome::Times),
            Request::Costs { username } => self.costs(ctx, &username).map(Outcome::Costs),
            Request::Remember { username, id } => {
                self.remember(ctx, &username, id).map(Outcome::Remembered)
            }
            Request::Recall { username } => self.recall(ctx, &username).map(Outcome::Recalled),
            Request::Forget { username } => self.forget(ctx, &username).map(|_| Outcome::Forgotten),
            Request::SetSettings {
                username,
                column,
                value,
            } => self
                .set_setting(ctx, &username, column, value)
                .map(|_| Outcome::SettingsSet),
            Request::Fetch { drug } => self.fetch_and_store(ctx, &drug).map(Outcome::Fetched),
        };
        outcome.map_err(|err| match err.action() {
            Some(_) => err,
            None => Error::in_action(action, err),
        })
    }
}

/// Run `requests` on up to `workers` threads and return one response per
/// request, in submission order.
pub fn submit(
    journal: &Journal,
    ctx: &Context,
    requests: Vec<Request>,
    workers: usize,
) -> Vec<Response> {
    let total = requests.len();
    if total == 0 {
        return Vec::new();
    }
    let workers = workers.clamp(1, total);
    let queue = Mutex::new(requests.into_iter().enumerate());
    let (tx, rx) = mpsc::sync_channel::<Response>(workers);

    let mut responses = std::thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let queue = &queue;
            scope.spawn(move || loop {
                let next = match queue.lock() {
                    Ok(mut queue) => queue.next(),
                    Err(_) => None,
                };
                let Some((index, request)) = next else {
                    break;
                };
                let action = request.action();
                let username = request.username().to_string();
                let result = journal.handle(ctx, request);
                if tx
                    .send(Response {
                        index,
                        action,
                        username,
                        result,
                    })
                    .is_err()
                {
                    break;
                }
            });
        }
        drop(tx);
        rx.iter().collect::<Vec<_>>()
    });

    if responses.len() != total {
        tracing::warn!(
            "Expected {} responses, collected {}",
            total,
            responses.len()
        );
    }
    responses.sort_by_key(|r| r.index);
    responses
}
