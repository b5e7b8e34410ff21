#![allow(dead_code)]

use dosetrack_core::{Config, InfoRow, Journal, NamesConfig, Phase};
use tempfile::TempDir;

pub const USER: &str = "test_user";
pub const DRUG: &str = "test_drug";
pub const ROUTE: &str = "test_route";
pub const UNITS: &str = "test_units";

pub fn test_config(dir: &TempDir) -> Config {
    Config {
        db_path: dir.path().join("journal.sqlite"),
        names_dir: dir.path().join("names"),
        info_cache_dir: dir.path().join("cache"),
        ..Config::default()
    }
}

/// Journal over a fresh store with built-in alt-names and no info source
pub fn open_journal(config: Config) -> Journal {
    Journal::open_with_names(config, NamesConfig::builtin().unwrap()).unwrap()
}

pub fn test_info_row() -> InfoRow {
    let mut row = InfoRow::new(DRUG, ROUTE, UNITS);
    row.onset = Phase::new(10.0, 20.0, "minutes");
    row.comeup = Phase::new(10.0, 20.0, "minutes");
    row.peak = Phase::new(1.0, 2.0, "hours");
    row.offset = Phase::new(1.0, 2.0, "hours");
    row.total = Phase::new(3.0, 5.0, "hours");
    row
}

/// Journal with the test drug in its info table
pub fn seeded_journal(dir: &TempDir) -> Journal {
    let journal = open_journal(test_config(dir));
    let ctx = journal.context();
    journal.info().add_rows(&ctx, vec![test_info_row()]).unwrap();
    journal
}

pub fn add_info(journal: &Journal, drug: &str, route: &str, units: &str) {
    let ctx = journal.context();
    journal
        .info()
        .add_rows(&ctx, vec![InfoRow::new(drug, route, units)])
        .unwrap();
}
