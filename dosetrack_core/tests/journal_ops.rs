//! Journal operations beyond the basic append/read/remove cycle.

mod common;

use common::*;
use dosetrack_core::{
    submit, Action, Config, Error, ErrorKind, FetchOutcome, JsonDirSource, LogQuery, NewDose,
    Outcome, Remembered, Request, SettingColumn,
};
use std::sync::Arc;

fn dose(amount: f64) -> NewDose {
    NewDose::new(USER, DRUG, ROUTE, amount, UNITS)
}

#[test]
fn test_max_logs_without_auto_remove() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        max_logs_per_user: 2,
        auto_remove: false,
        ..test_config(&dir)
    };
    let journal = open_journal(config);
    let ctx = journal.context();
    journal.info().add_rows(&ctx, vec![test_info_row()]).unwrap();

    journal.append(&ctx, dose(1.0)).unwrap();
    journal.append(&ctx, dose(2.0)).unwrap();
    let err = journal.append(&ctx, dose(3.0)).unwrap_err();
    assert!(matches!(err, Error::MaxLogsPerUser { max: 2, .. }));
    assert_eq!(err.kind(), ErrorKind::ResourceLimit);
    assert_eq!(journal.count(&ctx, USER).unwrap(), 2);
}

#[test]
fn test_auto_remove_evicts_oldest() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        max_logs_per_user: 3,
        auto_remove: true,
        ..test_config(&dir)
    };
    let journal = open_journal(config);
    let ctx = journal.context();
    journal.info().add_rows(&ctx, vec![test_info_row()]).unwrap();

    for amount in [1.0, 2.0, 3.0, 4.0, 5.0] {
        journal.append(&ctx, dose(amount)).unwrap();
    }
    assert_eq!(journal.count(&ctx, USER).unwrap(), 3);
    let doses: Vec<f64> = journal
        .get_logs(&ctx, &LogQuery::new(USER))
        .unwrap()
        .iter()
        .map(|r| r.dose)
        .collect();
    assert_eq!(doses, vec![3.0, 4.0, 5.0]);
}

#[test]
fn test_cost_currency_defaults_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        cost_currency: "EUR".into(),
        ..test_config(&dir)
    };
    let journal = open_journal(config);
    let ctx = journal.context();
    journal.info().add_rows(&ctx, vec![test_info_row()]).unwrap();

    let paid = journal.append(&ctx, dose(1.0).with_cost(4.5, "")).unwrap();
    assert_eq!(paid.cost_currency, "EUR");
    let explicit = journal.append(&ctx, dose(1.0).with_cost(2.0, "USD")).unwrap();
    assert_eq!(explicit.cost_currency, "USD");
    let free = journal.append(&ctx, dose(1.0)).unwrap();
    assert_eq!(free.cost_currency, "");
}

#[test]
fn test_append_resolves_names_and_converts() {
    let dir = tempfile::tempdir().unwrap();
    let journal = open_journal(test_config(&dir));
    let ctx = journal.context();
    add_info(&journal, "alcohol", "oral", "g");

    let row = journal
        .append(
            &ctx,
            NewDose::new(USER, "booze", "swallowed", 100.0, "ml").with_percent(40.0),
        )
        .unwrap();
    assert_eq!(row.drug_name, "alcohol");
    assert_eq!(row.drug_route, "oral");
    assert_eq!(row.dose_units, "g");
    assert!((row.dose - 31.56).abs() < 1e-9);
}

#[test]
fn test_converter_failure_is_tagged_with_append() {
    let dir = tempfile::tempdir().unwrap();
    let journal = seeded_journal(&dir);
    let ctx = journal.context();
    let err = journal.append(&ctx, dose(10.0).with_percent(50.0)).unwrap_err();
    assert_eq!(err.action(), Some(Action::Append));
    assert!(matches!(err.root(), Error::NoNamesReturned { .. }));
}

#[test]
fn test_search_normalizes_alt_names() {
    let dir = tempfile::tempdir().unwrap();
    let journal = open_journal(test_config(&dir));
    let ctx = journal.context();
    add_info(&journal, "cannabis", "smoked", "mg");
    add_info(&journal, "caffeine", "oral", "mg");

    journal
        .append(&ctx, NewDose::new(USER, "weed", "smoked", 20.0, "mg"))
        .unwrap();
    journal
        .append(&ctx, NewDose::new(USER, "coffee", "oral", 95.0, "mg"))
        .unwrap();

    let found = journal
        .get_logs(&ctx, &LogQuery::new(USER).search("WEED"))
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].drug_name, "cannabis");

    let by_dose = journal.get_logs(&ctx, &LogQuery::new(USER).search("95")).unwrap();
    assert_eq!(by_dose[0].drug_name, "caffeine");

    let exact = journal
        .get_logs(&ctx, &LogQuery::new(USER).exact("drugname", "marijuana"))
        .unwrap();
    assert_eq!(exact.len(), 1);

    assert!(matches!(
        journal.get_logs(&ctx, &LogQuery::new(USER).exact("colour", "red")),
        Err(Error::InvalidColInput(_))
    ));
    assert!(matches!(
        journal.get_logs(&ctx, &LogQuery::new(USER).search("ketamine")),
        Err(Error::NoLogs(_))
    ));

    // Mass removal composes with search
    let removed = journal
        .remove(&ctx, &LogQuery::new(USER).search("weed"))
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(journal.count(&ctx, USER).unwrap(), 1);
}

#[test]
fn test_change_columns() {
    let dir = tempfile::tempdir().unwrap();
    let journal = seeded_journal(&dir);
    let ctx = journal.context();
    let row = journal.append(&ctx, dose(1.0)).unwrap();

    let changed = journal.change(&ctx, USER, 0, "dose", "2.5").unwrap();
    assert_eq!(changed.dose, 2.5);

    let end = (row.start_time + 60).to_string();
    let changed = journal
        .change(&ctx, USER, row.start_time, "timeOfDoseEnd", &end)
        .unwrap();
    assert_eq!(changed.end_time, row.start_time + 60);

    let too_early = (row.start_time - 60).to_string();
    assert!(matches!(
        journal.change(&ctx, USER, row.start_time, "timeOfDoseEnd", &too_early),
        Err(Error::InvalidValue { .. })
    ));
    assert!(matches!(
        journal.change(&ctx, USER, row.start_time, "username", "other"),
        Err(Error::InvalidColInput(_))
    ));
    assert!(matches!(
        journal.change(&ctx, USER, row.start_time, "dose", "lots"),
        Err(Error::InvalidValue { .. })
    ));
    assert!(matches!(
        journal.change(&ctx, USER, 12345, "dose", "1"),
        Err(Error::LogDoesntExist { .. })
    ));
}

#[test]
fn test_remember_recall_forget() {
    let dir = tempfile::tempdir().unwrap();
    let journal = seeded_journal(&dir);
    let ctx = journal.context();

    assert!(matches!(
        journal.recall(&ctx, USER),
        Err(Error::NotRemembered(_))
    ));
    let first = journal.append(&ctx, dose(1.0)).unwrap();
    assert_eq!(journal.remember(&ctx, USER, 0).unwrap(), first.start_time);
    assert_eq!(journal.recall(&ctx, USER).unwrap(), first);

    let again = journal.log_remembered(&ctx, USER, 7.0).unwrap();
    assert_eq!(again.drug_name, DRUG);
    assert_eq!(again.dose, 7.0);
    assert_eq!(journal.count(&ctx, USER).unwrap(), 2);

    journal.forget(&ctx, USER).unwrap();
    assert_eq!(
        journal.get_settings(&ctx, USER).unwrap().use_id_for_remember,
        Remembered::Forgotten
    );

    assert!(matches!(
        journal.remember(&ctx, USER, 42),
        Err(Error::LogDoesntExist { .. })
    ));
}

#[test]
fn test_set_setting_rejects_missing_log() {
    let dir = tempfile::tempdir().unwrap();
    let journal = seeded_journal(&dir);
    let ctx = journal.context();

    assert!(matches!(
        journal.set_setting(&ctx, USER, SettingColumn::UseIdForRemember, 424242),
        Err(Error::LogDoesntExist { id: 424242, .. })
    ));
    assert_eq!(
        journal.get_settings(&ctx, USER).unwrap().use_id_for_remember,
        Remembered::Forgotten
    );

    let row = journal.append(&ctx, dose(1.0)).unwrap();
    journal
        .set_setting(&ctx, USER, SettingColumn::UseIdForRemember, row.start_time)
        .unwrap();
    assert_eq!(
        journal.get_settings(&ctx, USER).unwrap().use_id_for_remember,
        Remembered::Log(row.start_time)
    );

    // Through the request path the error carries the action
    let err = journal
        .handle(
            &ctx,
            Request::SetSettings {
                username: USER.into(),
                column: SettingColumn::UseIdForRemember,
                value: 7,
            },
        )
        .unwrap_err();
    assert_eq!(err.action(), Some(Action::SetSettings));
    assert!(matches!(err.root(), Error::LogDoesntExist { .. }));
    assert_eq!(
        journal.get_settings(&ctx, USER).unwrap().use_id_for_remember,
        Remembered::Log(row.start_time)
    );
}

#[test]
fn test_removing_remembered_log_forgets_it() {
    let dir = tempfile::tempdir().unwrap();
    let journal = seeded_journal(&dir);
    let ctx = journal.context();
    let row = journal.append(&ctx, dose(1.0)).unwrap();
    journal.remember(&ctx, USER, row.start_time).unwrap();

    journal
        .remove(&ctx, &LogQuery::new(USER).id(row.start_time))
        .unwrap();
    assert!(matches!(
        journal.recall(&ctx, USER),
        Err(Error::NotRemembered(_))
    ));
}

#[test]
fn test_rekeying_remembered_log_follows_it() {
    let dir = tempfile::tempdir().unwrap();
    let journal = seeded_journal(&dir);
    let ctx = journal.context();
    let row = journal.append(&ctx, dose(1.0)).unwrap();
    journal.remember(&ctx, USER, row.start_time).unwrap();

    let moved = (row.start_time - 3600).to_string();
    journal
        .change(&ctx, USER, row.start_time, "timeOfDoseStart", &moved)
        .unwrap();
    assert_eq!(journal.recall(&ctx, USER).unwrap().start_time, row.start_time - 3600);
}

#[test]
fn test_costs_sum_per_currency() {
    let dir = tempfile::tempdir().unwrap();
    let journal = seeded_journal(&dir);
    let ctx = journal.context();
    add_info(&journal, "caffeine", "oral", "mg");

    journal.append(&ctx, dose(1.0).with_cost(3.0, "EUR")).unwrap();
    journal.append(&ctx, dose(1.0).with_cost(4.5, "EUR")).unwrap();
    journal.append(&ctx, dose(1.0).with_cost(10.0, "USD")).unwrap();
    journal
        .append(
            &ctx,
            NewDose::new(USER, "caffeine", "oral", 80.0, "mg").with_cost(1.25, "EUR"),
        )
        .unwrap();

    let entries = journal.costs(&ctx, USER).unwrap();
    // 2 drugs x 2 currencies
    assert_eq!(entries.len(), 4);
    let eur: f64 = entries.iter().filter(|e| e.currency == "EUR").map(|e| e.total).sum();
    assert_eq!(eur, 3.0 + 4.5 + 1.25);
    let hidden = entries.iter().filter(|e| !e.is_displayable()).count();
    assert_eq!(hidden, 1);

    assert!(matches!(
        journal.costs(&ctx, "nobody"),
        Err(Error::NoLogs(_))
    ));
}

#[test]
fn test_users_and_clean() {
    let dir = tempfile::tempdir().unwrap();
    let journal = seeded_journal(&dir);
    let ctx = journal.context();
    assert!(matches!(journal.users(&ctx), Err(Error::NoUsersReturned)));

    journal.append(&ctx, dose(1.0)).unwrap();
    journal
        .append(&ctx, NewDose::new("other", DRUG, ROUTE, 1.0, UNITS))
        .unwrap();
    assert_eq!(journal.users(&ctx).unwrap(), vec!["other", USER]);

    assert_eq!(journal.clean(&ctx, "other").unwrap(), 1);
    assert_eq!(journal.users(&ctx).unwrap(), vec![USER]);
}

#[test]
fn test_submit_returns_one_response_per_request() {
    let dir = tempfile::tempdir().unwrap();
    let journal = seeded_journal(&dir);
    let ctx = journal.context();

    let mut requests: Vec<Request> = (0..5)
        .map(|i| Request::Append(NewDose::new(format!("user_{i}"), DRUG, ROUTE, 1.0, UNITS)))
        .collect();
    requests.push(Request::Append(NewDose::new("user_x", "nothing", "x", 1.0, "y")));
    requests.push(Request::Recall {
        username: "user_0".into(),
    });

    let responses = submit(&journal, &ctx, requests, 3);
    assert_eq!(responses.len(), 7);
    for (i, response) in responses.iter().enumerate() {
        assert_eq!(response.index, i);
    }
    assert!(responses[..5]
        .iter()
        .all(|r| matches!(r.result, Ok(Outcome::Appended(_)))));

    let bad = &responses[5];
    assert_eq!(bad.action, Action::Append);
    assert_eq!(bad.username, "user_x");
    let err = bad.result.as_ref().unwrap_err();
    assert_eq!(err.action(), Some(Action::Append));
    assert!(matches!(err.root(), Error::ComboInputError { .. }));

    let recall = responses[6].result.as_ref().unwrap_err();
    assert_eq!(recall.action(), Some(Action::Recall));
    assert_eq!(recall.kind(), ErrorKind::NotFound);
}

#[test]
fn test_auto_fetch_on_unknown_drug() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cache");
    std::fs::create_dir(&cache).unwrap();
    std::fs::write(
        cache.join("caffeine.json"),
        r#"{"data":{"substances":[{"name":"Caffeine","roas":[
            {"name":"oral","dose":{"units":"mg","threshold":10,
             "light":{"min":20,"max":50}}}]}]}}"#,
    )
    .unwrap();

    let journal = open_journal(test_config(&dir)).with_source(Arc::new(JsonDirSource::new(&cache)));
    let ctx = journal.context();
    let row = journal
        .append(&ctx, NewDose::new(USER, "coffee", "oral", 80.0, "milligrams"))
        .unwrap();
    assert_eq!(row.drug_name, "caffeine");
    assert_eq!(row.dose_units, "mg");
    assert_eq!(
        journal.fetch_and_store(&ctx, "caffeine").unwrap(),
        FetchOutcome::AlreadyPresent
    );

    // Nothing cached: the gate still reports the combination
    let err = journal
        .append(&ctx, NewDose::new(USER, "ketamine", "insufflated", 20.0, "mg"))
        .unwrap_err();
    assert!(matches!(err, Error::ComboInputError { .. }));
}

#[test]
fn test_auto_fetch_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cache");
    std::fs::create_dir(&cache).unwrap();
    std::fs::write(
        cache.join("caffeine.json"),
        r#"{"data":{"substances":[{"name":"Caffeine","roas":[{"name":"oral","dose":{"units":"mg"}}]}]}}"#,
    )
    .unwrap();
    let config = Config {
        auto_fetch: false,
        ..test_config(&dir)
    };
    let journal = open_journal(config).with_source(Arc::new(JsonDirSource::new(&cache)));
    let ctx = journal.context();
    let err = journal
        .append(&ctx, NewDose::new(USER, "caffeine", "oral", 80.0, "mg"))
        .unwrap_err();
    assert!(matches!(err, Error::ComboInputError { .. }));
}

#[test]
fn test_export_csv() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        timezone: "UTC".into(),
        ..test_config(&dir)
    };
    let journal = open_journal(config);
    let ctx = journal.context();
    journal.info().add_rows(&ctx, vec![test_info_row()]).unwrap();
    journal.append(&ctx, dose(1.0)).unwrap();
    journal.append(&ctx, dose(2.0)).unwrap();

    let path = dir.path().join("out").join("export.csv");
    assert_eq!(journal.export_csv(&ctx, USER, &path).unwrap(), 2);
    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 3);
    assert!(text.lines().nth(1).unwrap().contains("+00:00"));
}
