//! The journal: one handle over the store, the resolver, the info table and
//! the append coordinator.
//!
//! Cloning a [`Journal`] is cheap and every clone shares the same
//! connections and the same coordinator lock, so concurrent appenders in
//! one process should clone a single journal rather than open several.

use crate::convert::Converter;
use crate::fetch::{FetchOutcome, InfoSource, JsonDirSource};
use crate::info::InfoTable;
use crate::names::{NamesConfig, Resolver};
use crate::store::{Store, StoreLocation};
use crate::types::NameType;
use crate::{Config, Context, Error, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The most recent successful append in this process
#[derive(Clone, Debug, Default)]
pub(crate) struct LastAppend {
    pub(crate) start_time: i64,
    pub(crate) username: String,
}

impl LastAppend {
    /// Start time for a new append by `username` at wall-clock `now`
    pub(crate) fn next_start_time(&self, username: &str, now: i64) -> i64 {
        if self.username == username && self.start_time >= now {
            self.start_time + 1
        } else {
            now
        }
    }
}

#[derive(Clone)]
pub struct Journal {
    config: Arc<Config>,
    store: Store,
    resolver: Resolver,
    info: InfoTable,
    converter: Converter,
    pub(crate) last_append: Arc<Mutex<LastAppend>>,
    source: Option<Arc<dyn InfoSource>>,
    timeout: Duration,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("store", &self.store)
            .field("source", &self.source.as_ref().map(|s| s.name().to_string()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Journal {
    /// Open the journal described by `config`, loading alt-names from
    /// `NamesDir` and saved responses from `InfoCacheDir`.
    pub fn open(config: Config) -> Result<Self> {
        let names = NamesConfig::load_dir(&config.names_dir)?;
        let source = JsonDirSource::new(config.info_cache_dir.clone());
        Ok(Self::open_with_names(config, names)?.with_source(Arc::new(source)))
    }

    /// Open with an explicit alt-names configuration and no info source
    pub fn open_with_names(config: Config, names: NamesConfig) -> Result<Self> {
        config.validate()?;
        let timeout = config.timeout_duration()?;
        let location = StoreLocation::from_config(&config)?;
        let store = Store::open(&location, &config.use_source)?;
        let resolver = Resolver::new(store.clone(), Arc::new(names));
        let info = InfoTable::new(store.clone(), resolver.clone());
        let converter = Converter::new(resolver.clone());

        tracing::info!(
            "Opened journal at {:?} with source {}",
            store.path(),
            store.source()
        );
        Ok(Self {
            config: Arc::new(config),
            store,
            resolver,
            info,
            converter,
            last_append: Arc::new(Mutex::new(LastAppend::default())),
            source: None,
            timeout,
        })
    }

    pub fn with_source(mut self, source: Arc<dyn InfoSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn without_source(mut self) -> Self {
        self.source = None;
        self
    }

    /// A fresh context bounded by the configured `Timeout`
    pub fn context(&self) -> Context {
        Context::with_timeout(self.timeout)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn info(&self) -> &InfoTable {
        &self.info
    }

    pub fn converter(&self) -> &Converter {
        &self.converter
    }

    pub fn source(&self) -> Option<&Arc<dyn InfoSource>> {
        self.source.as_ref()
    }

    /// Fetch `drug` from the info source and store it, unless the info table
    /// already has it.
    pub fn fetch_and_store(&self, ctx: &Context, drug: &str) -> Result<FetchOutcome> {
        let canonical = self.resolver.match_name(ctx, drug, NameType::Substance)?;
        if self.info.check_if_exists(ctx, &canonical)? {
            tracing::debug!("{} already in the info table, skipping fetch", canonical);
            return Ok(FetchOutcome::AlreadyPresent);
        }
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| Error::Config("no info source configured".into()))?;
        let rows = source.fetch(ctx, &canonical)?;
        let stored = self.info.add_rows(ctx, rows)?;
        tracing::info!("Fetched {} routes for {} from {}", stored, canonical, source.name());
        Ok(FetchOutcome::Stored(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_start_time_bumps_same_user() {
        let last = LastAppend {
            start_time: 100,
            username: "a".into(),
        };
        assert_eq!(last.next_start_time("a", 100), 101);
        assert_eq!(last.next_start_time("a", 50), 101);
        assert_eq!(last.next_start_time("a", 200), 200);
        // Other users may share a start time
        assert_eq!(last.next_start_time("b", 100), 100);
    }

    #[test]
    fn test_fetch_and_store_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        std::fs::create_dir(&cache).unwrap();
        std::fs::write(
            cache.join("caffeine.json"),
            r#"{"data":{"substances":[{"name":"Caffeine","roas":[
                {"name":"oral","dose":{"units":"mg","threshold":10}}]}]}}"#,
        )
        .unwrap();

        let config = Config {
            db_path: dir.path().join("journal.sqlite"),
            names_dir: dir.path().join("names"),
            info_cache_dir: cache,
            ..Config::default()
        };
        let journal = Journal::open(config).unwrap();
        let ctx = journal.context();

        assert_eq!(
            journal.fetch_and_store(&ctx, "coffee").unwrap(),
            FetchOutcome::Stored(1)
        );
        assert_eq!(
            journal.fetch_and_store(&ctx, "Caffeine").unwrap(),
            FetchOutcome::AlreadyPresent
        );
        assert!(journal.info().check_combo(&ctx, "caffeine", "oral", "mg").unwrap());
    }

    #[test]
    fn test_fetch_without_source() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            db_path: dir.path().join("journal.sqlite"),
            ..Config::default()
        };
        let journal = Journal::open_with_names(config, NamesConfig::builtin().unwrap()).unwrap();
        let err = journal
            .fetch_and_store(&journal.context(), "lsd")
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
