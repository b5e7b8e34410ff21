//! Fetching dosing data from an external source.
//!
//! The default source is PsychonautWiki's GraphQL API. This module owns the
//! request body and the response model; moving the bytes is left to an
//! [`InfoSource`] implementation. [`JsonDirSource`] serves saved responses
//! from a directory, one `<drug>.json` file per substance.

use crate::types::{DoseBand, InfoRow, Phase};
use crate::{Context, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// PsychonautWiki GraphQL endpoint
pub const PSYCHONAUTWIKI_ENDPOINT: &str = "https://api.psychonautwiki.org";

const SUBSTANCE_QUERY: &str = "{
    substances(query: %NAME%) {
        name
        roas {
            name
            dose {
                units
                threshold
                light { min max }
                common { min max }
                strong { min max }
            }
            duration {
                onset { min max units }
                comeup { min max units }
                peak { min max units }
                offset { min max units }
                total { min max units }
            }
        }
    }
}";

// ============================================================================
// Response model
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<SubstancesData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubstancesData {
    #[serde(default)]
    pub substances: Option<Vec<Substance>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Substance {
    pub name: String,
    #[serde(default)]
    pub roas: Option<Vec<Roa>>,
}

/// One route of administration
#[derive(Debug, Default, Deserialize)]
pub struct Roa {
    pub name: String,
    #[serde(default)]
    pub dose: Option<RoaDose>,
    #[serde(default)]
    pub duration: Option<RoaDuration>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RoaDose {
    pub units: Option<String>,
    pub threshold: Option<f64>,
    pub light: Option<Range>,
    pub common: Option<Range>,
    pub strong: Option<Range>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Range {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DurationRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub units: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RoaDuration {
    pub onset: Option<DurationRange>,
    pub comeup: Option<DurationRange>,
    pub peak: Option<DurationRange>,
    pub offset: Option<DurationRange>,
    pub total: Option<DurationRange>,
}

fn band(range: &Option<Range>) -> DoseBand {
    range
        .as_ref()
        .map(|r| DoseBand::new(r.min.unwrap_or(0.0), r.max.unwrap_or(0.0)))
        .unwrap_or_default()
}

fn phase(range: &Option<DurationRange>) -> Phase {
    range
        .as_ref()
        .map(|r| {
            Phase::new(
                r.min.unwrap_or(0.0),
                r.max.unwrap_or(0.0),
                r.units.clone().unwrap_or_default(),
            )
        })
        .unwrap_or_default()
}

impl Roa {
    fn to_info_row(&self, drug: &str, fetched_at: i64) -> InfoRow {
        let mut row = InfoRow::new(drug, self.name.as_str(), "");
        if let Some(dose) = &self.dose {
            row.dose_units = dose.units.clone().unwrap_or_default();
            row.threshold = dose.threshold.unwrap_or(0.0);
            row.low_dose = band(&dose.light);
            row.medium_dose = band(&dose.common);
            row.high_dose = band(&dose.strong);
        }
        if let Some(duration) = &self.duration {
            row.onset = phase(&duration.onset);
            row.comeup = phase(&duration.comeup);
            row.peak = phase(&duration.peak);
            row.offset = phase(&duration.offset);
            row.total = phase(&duration.total);
        }
        row.time_of_fetch = fetched_at;
        row
    }
}

/// Turn a response body into info rows for `drug`.
///
/// Only the first returned substance is used.
pub fn parse_response(drug: &str, body: &str) -> Result<Vec<InfoRow>> {
    let response: GraphQlResponse = serde_json::from_str(body)?;
    let substance = response
        .data
        .and_then(|d| d.substances)
        .and_then(|s| s.into_iter().next())
        .ok_or_else(|| Error::PsychonautwikiEmptyResp(drug.to_string()))?;

    let roas = substance.roas.unwrap_or_default();
    if roas.is_empty() {
        return Err(Error::NoROAForSubs(substance.name));
    }

    let fetched_at = chrono::Utc::now().timestamp();
    let rows = roas
        .iter()
        .map(|roa| roa.to_info_row(&substance.name, fetched_at))
        .collect::<Vec<_>>();
    tracing::debug!("Parsed {} routes for {}", rows.len(), substance.name);
    Ok(rows)
}

// ============================================================================
// Requests
// ============================================================================

/// Everything an HTTP client needs to query the source for one drug
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FetchRequest {
    pub endpoint: String,
    /// Proxy to route the request through, if configured
    pub proxy: Option<String>,
    /// JSON request body
    pub body: String,
}

/// Build the GraphQL request for `drug`
pub fn build_request(drug: &str, proxy_url: &str) -> Result<FetchRequest> {
    // A JSON string literal is also a valid GraphQL string literal
    let quoted = serde_json::to_string(drug)?;
    let query = SUBSTANCE_QUERY.replace("%NAME%", &quoted);
    let body = serde_json::to_string(&serde_json::json!({ "query": query }))?;
    let proxy = Some(proxy_url.trim())
        .filter(|p| !p.is_empty())
        .map(str::to_string);
    Ok(FetchRequest {
        endpoint: PSYCHONAUTWIKI_ENDPOINT.to_string(),
        proxy,
        body,
    })
}

// ============================================================================
// Sources
// ============================================================================

/// Something that can produce info rows for a drug
pub trait InfoSource: Send + Sync {
    fn name(&self) -> &str;

    fn fetch(&self, ctx: &Context, drug: &str) -> Result<Vec<InfoRow>>;
}

/// Serves saved GraphQL responses from a directory
#[derive(Clone, Debug)]
pub struct JsonDirSource {
    dir: PathBuf,
}

impl JsonDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the response for `drug`
    pub fn path_for(&self, drug: &str) -> PathBuf {
        let stem: String = drug
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{stem}.json"))
    }
}

impl InfoSource for JsonDirSource {
    fn name(&self) -> &str {
        "json-dir"
    }

    fn fetch(&self, ctx: &Context, drug: &str) -> Result<Vec<InfoRow>> {
        ctx.check()?;
        let path = self.path_for(drug);
        let body = match std::fs::read_to_string(&path) {
            Ok(body) => body,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No saved response at {:?}", path);
                return Err(Error::PsychonautwikiEmptyResp(drug.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        parse_response(drug, &body)
    }
}

/// Result of a fetch-and-store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The drug was already in the info table; nothing was fetched
    AlreadyPresent,
    /// Number of rows stored
    Stored(usize),
}
