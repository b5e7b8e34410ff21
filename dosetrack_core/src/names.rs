//! Alternative-name resolution.
//!
//! Free-form drug, route and unit strings are mapped to one canonical
//! "local" name before they touch the info or log tables. Each name type has
//! a global table and an overlay table for the active source; both are seeded
//! once from the alt-names files and marked with a sentinel row.
//!
//! Lookup order for an input:
//! 1. global table, `localName` equal to the input (already canonical)
//! 2. global table, `alternativeName` equal to the input
//! 3. the same two steps on the overlay, starting from the result so far
//!
//! Matching is case-insensitive and exact.

use crate::store::{alt_names_ddl, collect_rows, optional_row, overlay_table, Store};
use crate::types::NameType;
use crate::{Context, Error, Result};
use rusqlite::params;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Value stored in both columns of the first row of a seeded table
pub const MAGIC_SENTINEL: &str = "__dosetrack_alt_names_seeded__";

/// Local name to its alternative names, as read from one file
pub type NameMap = BTreeMap<String, Vec<String>>;

const DEFAULT_SUBSTANCE_NAMES: &str = r#"
cannabis = ["weed", "marijuana", "pot", "thc"]
alcohol = ["ethanol", "booze", "etoh"]
caffeine = ["coffee"]
nicotine = ["tobacco"]
mdma = ["molly", "ecstasy", "xtc"]
lsd = ["acid", "lysergic acid diethylamide"]
psilocybin_mushrooms = ["shrooms", "magic mushrooms"]
ketamine = ["ket", "special k"]
"#;

const DEFAULT_ROUTE_NAMES: &str = r#"
oral = ["swallowed", "by mouth", "po"]
insufflated = ["snorted", "nasal", "intranasal"]
smoked = ["smoking"]
vaporized = ["vaped", "vaporised"]
sublingual = ["under tongue", "sl"]
buccal = ["cheek"]
intravenous = ["iv", "injected"]
intramuscular = ["im"]
rectal = ["boofed", "plugged"]
"#;

const DEFAULT_UNITS_NAMES: &str = r#"
mg = ["milligram", "milligrams"]
"µg" = ["ug", "mcg", "microgram", "micrograms"]
g = ["gram", "grams"]
ml = ["milliliter", "milliliters", "millilitre", "millilitres"]
hours = ["h", "hr", "hrs", "hour"]
minutes = ["min", "mins", "minute"]
seconds = ["s", "sec", "secs", "second"]
"#;

/// First entry names the conversion function, second the output unit
const DEFAULT_CONV_UNITS_NAMES: &str = r#"
alcohol = ["Convert-Milliliters-To-Grams", "g"]
"#;

/// Alt-names configuration for every name type, global and per source
#[derive(Clone, Debug, Default)]
pub struct NamesConfig {
    global: HashMap<NameType, NameMap>,
    overlays: HashMap<String, HashMap<NameType, NameMap>>,
}

impl NamesConfig {
    /// The defaults shipped with the crate
    pub fn builtin() -> Result<Self> {
        let mut config = Self::default();
        for name_type in NameType::ALL {
            config
                .global
                .insert(name_type, parse_names(builtin_names(name_type))?);
        }
        Ok(config)
    }

    /// File holding one name type's map
    pub fn file_name(name_type: NameType) -> &'static str {
        match name_type {
            NameType::Substance => "substance.toml",
            NameType::Route => "route.toml",
            NameType::Units => "units.toml",
            NameType::ConvUnits => "convUnits.toml",
        }
    }

    /// Load global files from `dir` and overlays from its subdirectories.
    ///
    /// A missing global file falls back to the built-in map for that type;
    /// a missing overlay file means an empty overlay.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut config = Self::default();
        for name_type in NameType::ALL {
            let path = dir.join(Self::file_name(name_type));
            let map = if path.exists() {
                parse_names(&std::fs::read_to_string(&path)?)?
            } else {
                parse_names(builtin_names(name_type))?
            };
            config.global.insert(name_type, map);
        }

        if dir.is_dir() {
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let source = entry.file_name().to_string_lossy().to_string();
                let mut overlay = HashMap::new();
                for name_type in NameType::ALL {
                    let path = entry.path().join(Self::file_name(name_type));
                    if path.exists() {
                        overlay.insert(name_type, parse_names(&std::fs::read_to_string(&path)?)?);
                    }
                }
                tracing::debug!("Loaded alt-names overlay for source {}", source);
                config.overlays.insert(source, overlay);
            }
        }

        tracing::info!("Loaded alt-names from {:?}", dir);
        Ok(config)
    }

    /// Replace the global map of one name type
    pub fn with_global(mut self, name_type: NameType, map: NameMap) -> Self {
        self.global.insert(name_type, map);
        self
    }

    /// Replace the overlay map of one name type for `source`
    pub fn with_overlay(mut self, source: &str, name_type: NameType, map: NameMap) -> Self {
        self.overlays
            .entry(source.to_string())
            .or_default()
            .insert(name_type, map);
        self
    }

    pub fn global(&self, name_type: NameType) -> Option<&NameMap> {
        self.global.get(&name_type)
    }

    pub fn overlay(&self, source: &str, name_type: NameType) -> Option<&NameMap> {
        self.overlays.get(source).and_then(|o| o.get(&name_type))
    }
}

fn builtin_names(name_type: NameType) -> &'static str {
    match name_type {
        NameType::Substance => DEFAULT_SUBSTANCE_NAMES,
        NameType::Route => DEFAULT_ROUTE_NAMES,
        NameType::Units => DEFAULT_UNITS_NAMES,
        NameType::ConvUnits => DEFAULT_CONV_UNITS_NAMES,
    }
}

/// Parse one alt-names file
pub fn parse_names(contents: &str) -> Result<NameMap> {
    Ok(toml::from_str(contents)?)
}

/// Which of the two tables of a name type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Global,
    Source,
}

/// Resolves names against the store's alt-names tables
#[derive(Clone)]
pub struct Resolver {
    store: Store,
    names: Arc<NamesConfig>,
    seeded: Arc<Mutex<HashSet<String>>>,
}

impl Resolver {
    pub fn new(store: Store, names: Arc<NamesConfig>) -> Self {
        Self {
            store,
            names,
            seeded: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn table(&self, name_type: NameType, scope: Scope) -> String {
        match scope {
            Scope::Global => name_type.table_name().to_string(),
            Scope::Source => overlay_table(name_type, self.store.source()),
        }
    }

    fn config_map(&self, name_type: NameType, scope: Scope) -> Option<&NameMap> {
        match scope {
            Scope::Global => self.names.global(name_type),
            Scope::Source => self.names.overlay(self.store.source(), name_type),
        }
    }

    fn is_cached(&self, table: &str) -> Result<bool> {
        let seeded = self
            .seeded
            .lock()
            .map_err(|_| Error::Other("alt-names cache mutex poisoned".into()))?;
        Ok(seeded.contains(table))
    }

    fn mark_cached(&self, table: String) -> Result<()> {
        self.seeded
            .lock()
            .map_err(|_| Error::Other("alt-names cache mutex poisoned".into()))?
            .insert(table);
        Ok(())
    }

    /// Seed one table from configuration unless its sentinel is present.
    ///
    /// Returns true when this call did the seeding.
    pub fn ensure_seeded(&self, ctx: &Context, name_type: NameType, scope: Scope) -> Result<bool> {
        let table = self.table(name_type, scope);
        if self.is_cached(&table)? {
            return Ok(false);
        }

        let sentinel_sql = format!(
            "SELECT 1 FROM {table} WHERE localName = ?1 AND alternativeName = ?1 LIMIT 1"
        );
        let present = self.store.read(ctx, "names", |conn| {
            optional_row(conn, &sentinel_sql, params![MAGIC_SENTINEL], |r| r.get::<_, i64>(0))
        })?;
        if present.is_some() {
            self.mark_cached(table)?;
            return Ok(false);
        }

        let insert_sql =
            format!("INSERT OR IGNORE INTO {table} (localName, alternativeName) VALUES (?1, ?2)");
        let pairs = self.seed_pairs(name_type, scope);
        let seeded = self.store.write(ctx, "names", |tx| {
            // Another writer may have seeded between the read and the lock
            if tx
                .query_row(&sentinel_sql, params![MAGIC_SENTINEL], |r| r.get::<_, i64>(0))?
                .is_some()
            {
                return Ok(false);
            }
            tx.prepare(&insert_sql)?;
            tx.exec(&insert_sql, params![MAGIC_SENTINEL, MAGIC_SENTINEL])?;
            for (local, alternative) in &pairs {
                tx.exec(&insert_sql, params![local, alternative])?;
            }
            Ok(true)
        })?;

        if seeded {
            tracing::info!("Seeded {} with {} alternative names", table, pairs.len());
        }
        self.mark_cached(table)?;
        Ok(seeded)
    }

    fn seed_pairs(&self, name_type: NameType, scope: Scope) -> Vec<(String, String)> {
        let Some(map) = self.config_map(name_type, scope) else {
            return Vec::new();
        };
        let mut pairs = Vec::new();
        for (local, alternatives) in map {
            let local = local.replace('_', " ");
            for alternative in alternatives {
                pairs.push((local.clone(), alternative.clone()));
            }
        }
        pairs
    }

    /// Seed every global and overlay table
    pub fn seed_all(&self, ctx: &Context) -> Result<()> {
        for name_type in NameType::ALL {
            self.ensure_seeded(ctx, name_type, Scope::Global)?;
            self.ensure_seeded(ctx, name_type, Scope::Source)?;
        }
        Ok(())
    }

    fn lookup(&self, ctx: &Context, name_type: NameType, scope: Scope, input: &str) -> Result<Option<String>> {
        self.ensure_seeded(ctx, name_type, scope)?;
        let table = self.table(name_type, scope);
        let by_local = format!(
            "SELECT localName FROM {table} WHERE localName = ?1 AND localName <> ?2 LIMIT 1"
        );
        let by_alternative = format!(
            "SELECT localName FROM {table} WHERE alternativeName = ?1 AND localName <> ?2 \
             ORDER BY id LIMIT 1"
        );
        self.store.read(ctx, "names", |conn| {
            let found = optional_row(conn, &by_local, params![input, MAGIC_SENTINEL], |r| {
                r.get::<_, String>(0)
            })?;
            match found {
                Some(local) => Ok(Some(local)),
                None => optional_row(conn, &by_alternative, params![input, MAGIC_SENTINEL], |r| {
                    r.get::<_, String>(0)
                }),
            }
        })
    }

    /// Canonical name of `input`, or `None` when no table knows it
    pub fn lookup_name(&self, ctx: &Context, input: &str, name_type: NameType) -> Result<Option<String>> {
        let global = self.lookup(ctx, name_type, Scope::Global, input)?;
        let current = global.as_deref().unwrap_or(input);
        let overlay = self.lookup(ctx, name_type, Scope::Source, current)?;
        Ok(overlay.or(global))
    }

    /// Canonical name of `input`; unknown names come back unchanged
    pub fn match_name(&self, ctx: &Context, input: &str, name_type: NameType) -> Result<String> {
        let resolved = self.lookup_name(ctx, input, name_type)?;
        if let Some(name) = &resolved {
            tracing::debug!("Resolved {} {:?} to {:?}", name_type, input, name);
        }
        Ok(resolved.unwrap_or_else(|| input.to_string()))
    }

    /// Normalise free text by trying each name type in order and stopping
    /// at the first one that substitutes the input. Identity matches (same
    /// text ignoring case) fall through to the next type.
    pub fn resolve_any(&self, ctx: &Context, input: &str) -> Result<String> {
        for name_type in NameType::ALL {
            match self.lookup_name(ctx, input, name_type)? {
                Some(name) if !name.eq_ignore_ascii_case(input) => return Ok(name),
                _ => {}
            }
        }
        Ok(input.to_string())
    }

    /// Every alternative name registered under `local`, in insertion order.
    /// The global table wins; the overlay is consulted when it has none.
    pub fn alt_names(&self, ctx: &Context, local: &str, name_type: NameType) -> Result<Vec<String>> {
        for scope in [Scope::Global, Scope::Source] {
            self.ensure_seeded(ctx, name_type, scope)?;
            let table = self.table(name_type, scope);
            let sql = format!(
                "SELECT alternativeName FROM {table} WHERE localName = ?1 AND localName <> ?2 \
                 ORDER BY id"
            );
            let names = self.store.read(ctx, "names", |conn| {
                collect_rows(conn, &sql, params![local, MAGIC_SENTINEL], |r| r.get(0))
            })?;
            if !names.is_empty() {
                return Ok(names);
            }
        }
        Err(Error::NoNamesReturned {
            name: local.to_string(),
            name_type: name_type.to_string(),
        })
    }

    /// Drop every alt-names table and seed them again from configuration
    pub fn overwrite(&self, ctx: &Context) -> Result<()> {
        let tables: Vec<String> = NameType::ALL
            .iter()
            .flat_map(|nt| [self.table(*nt, Scope::Global), self.table(*nt, Scope::Source)])
            .collect();
        let driver = self.store.driver();
        self.store.write(ctx, "names", |tx| {
            for table in &tables {
                tx.exec(&format!("DROP TABLE IF EXISTS {table}"), [])?;
                tx.exec(&alt_names_ddl(driver, table), [])?;
            }
            Ok(())
        })?;
        self.seeded
            .lock()
            .map_err(|_| Error::Other("alt-names cache mutex poisoned".into()))?
            .clear();
        tracing::info!("Dropped {} alt-names tables, reseeding", tables.len());
        self.seed_all(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreLocation;

    fn resolver_with(dir: &tempfile::TempDir, names: NamesConfig) -> Resolver {
        let store = Store::open(
            &StoreLocation::Embedded(dir.path().join("names.sqlite")),
            "testsrc",
        )
        .unwrap();
        Resolver::new(store, Arc::new(names))
    }

    fn map(entries: &[(&str, &[&str])]) -> NameMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_builtin_names_parse() {
        let names = NamesConfig::builtin().unwrap();
        assert!(names.global(NameType::Substance).unwrap().contains_key("cannabis"));
        assert_eq!(
            names.global(NameType::ConvUnits).unwrap()["alcohol"],
            vec!["Convert-Milliliters-To-Grams", "g"]
        );
    }

    #[test]
    fn test_identity_and_alternative_hits() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_with(&dir, NamesConfig::builtin().unwrap());
        let ctx = Context::background();

        assert_eq!(resolver.match_name(&ctx, "WEED", NameType::Substance).unwrap(), "cannabis");
        assert_eq!(resolver.match_name(&ctx, "Cannabis", NameType::Substance).unwrap(), "cannabis");
        assert_eq!(resolver.match_name(&ctx, "snorted", NameType::Route).unwrap(), "insufflated");
        assert_eq!(resolver.match_name(&ctx, "unheard of", NameType::Route).unwrap(), "unheard of");
    }

    #[test]
    fn test_underscores_in_keys_become_spaces() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_with(&dir, NamesConfig::builtin().unwrap());
        let ctx = Context::background();
        assert_eq!(
            resolver.match_name(&ctx, "shrooms", NameType::Substance).unwrap(),
            "psilocybin mushrooms"
        );
    }

    #[test]
    fn test_overlay_applies_after_global() {
        let dir = tempfile::tempdir().unwrap();
        let names = NamesConfig::default()
            .with_global(NameType::Route, map(&[("insufflated", &["snorted"])]))
            .with_overlay("testsrc", NameType::Route, map(&[("nasal", &["insufflated"])]));
        let resolver = resolver_with(&dir, names);
        let ctx = Context::background();

        assert_eq!(resolver.match_name(&ctx, "snorted", NameType::Route).unwrap(), "nasal");
        assert_eq!(resolver.match_name(&ctx, "nasal", NameType::Route).unwrap(), "nasal");
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_with(&dir, NamesConfig::builtin().unwrap());
        let ctx = Context::background();
        for name_type in NameType::ALL {
            for input in ["weed", "mcg", "iv", "alcohol", "nothing"] {
                let once = resolver.match_name(&ctx, input, name_type).unwrap();
                let twice = resolver.match_name(&ctx, &once, name_type).unwrap();
                assert_eq!(once, twice, "{} {}", name_type, input);
            }
        }
    }

    #[test]
    fn test_seed_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_with(&dir, NamesConfig::builtin().unwrap());
        let ctx = Context::background();
        assert!(resolver.ensure_seeded(&ctx, NameType::Units, Scope::Global).unwrap());
        assert!(!resolver.ensure_seeded(&ctx, NameType::Units, Scope::Global).unwrap());

        // A fresh resolver over the same store sees the sentinel
        let again = Resolver::new(resolver.store.clone(), Arc::new(NamesConfig::builtin().unwrap()));
        assert!(!again.ensure_seeded(&ctx, NameType::Units, Scope::Global).unwrap());
    }

    #[test]
    fn test_alt_names_keep_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_with(&dir, NamesConfig::builtin().unwrap());
        let ctx = Context::background();
        assert_eq!(
            resolver.alt_names(&ctx, "alcohol", NameType::ConvUnits).unwrap(),
            vec!["Convert-Milliliters-To-Grams", "g"]
        );
        assert!(matches!(
            resolver.alt_names(&ctx, "water", NameType::ConvUnits),
            Err(Error::NoNamesReturned { .. })
        ));
    }

    #[test]
    fn test_resolve_any_returns_first_substitution() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_with(&dir, NamesConfig::builtin().unwrap());
        let ctx = Context::background();
        assert_eq!(resolver.resolve_any(&ctx, "weed").unwrap(), "cannabis");
        assert_eq!(resolver.resolve_any(&ctx, "snorted").unwrap(), "insufflated");
        assert_eq!(resolver.resolve_any(&ctx, "mcg").unwrap(), "µg");
        // "g" maps to itself as a unit, then to alcohol as a conversion output
        assert_eq!(resolver.resolve_any(&ctx, "g").unwrap(), "alcohol");
        assert_eq!(resolver.resolve_any(&ctx, "tea").unwrap(), "tea");
        assert_eq!(resolver.resolve_any(&ctx, "Cannabis").unwrap(), "Cannabis");
    }

    #[test]
    fn test_overwrite_reseeds_from_new_config() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_with(&dir, NamesConfig::builtin().unwrap());
        let ctx = Context::background();
        assert_eq!(resolver.match_name(&ctx, "weed", NameType::Substance).unwrap(), "cannabis");

        let names = NamesConfig::default()
            .with_global(NameType::Substance, map(&[("hemp", &["weed"])]));
        let replaced = Resolver::new(resolver.store.clone(), Arc::new(names));
        replaced.overwrite(&ctx).unwrap();
        assert_eq!(replaced.match_name(&ctx, "weed", NameType::Substance).unwrap(), "hemp");
    }

    #[test]
    fn test_load_dir_with_overlay() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("route.toml"), "oral = [\"eaten\"]\n").unwrap();
        std::fs::create_dir(dir.path().join("testsrc")).unwrap();
        std::fs::write(
            dir.path().join("testsrc").join("units.toml"),
            "\"mg\" = [\"milligrammes\"]\n",
        )
        .unwrap();

        let names = NamesConfig::load_dir(dir.path()).unwrap();
        assert_eq!(names.global(NameType::Route).unwrap()["oral"], vec!["eaten"]);
        // Missing global files fall back to built-ins
        assert!(names.global(NameType::Substance).unwrap().contains_key("cannabis"));
        assert!(names.overlay("testsrc", NameType::Units).is_some());
        assert!(names.overlay("testsrc", NameType::Route).is_none());
    }
}
