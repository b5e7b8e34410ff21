//! Core domain types for the dose journal.
//!
//! This module defines the rows the store persists and the small enums that
//! address them:
//! - Info table rows (dose bands and effect phases per drug and route)
//! - Log table rows (one administered dose)
//! - User settings
//! - Name types and log columns

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Info Table
// ============================================================================

/// A min/max dose band. Zero means unknown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DoseBand {
    pub min: f64,
    pub max: f64,
}

impl DoseBand {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn average(&self) -> f64 {
        average(self.min, self.max)
    }
}

/// One temporal phase of a dose's effect
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub min: f64,
    pub max: f64,
    pub units: String,
}

impl Phase {
    pub fn new(min: f64, max: f64, units: impl Into<String>) -> Self {
        Self {
            min,
            max,
            units: units.into(),
        }
    }
}

/// Dosing and timing information for one (drug, route) pair
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InfoRow {
    pub drug_name: String,
    pub drug_route: String,
    pub threshold: f64,
    pub low_dose: DoseBand,
    pub medium_dose: DoseBand,
    pub high_dose: DoseBand,
    pub dose_units: String,
    pub onset: Phase,
    pub comeup: Phase,
    pub peak: Phase,
    pub offset: Phase,
    pub total: Phase,
    /// Unix seconds
    pub time_of_fetch: i64,
}

impl InfoRow {
    /// A row with only its key and dose units set
    pub fn new(
        drug_name: impl Into<String>,
        drug_route: impl Into<String>,
        dose_units: impl Into<String>,
    ) -> Self {
        Self {
            drug_name: drug_name.into(),
            drug_route: drug_route.into(),
            dose_units: dose_units.into(),
            ..Self::default()
        }
    }

    pub fn phases(&self) -> [&Phase; 5] {
        [&self.onset, &self.comeup, &self.peak, &self.offset, &self.total]
    }

    pub fn phases_mut(&mut self) -> [&mut Phase; 5] {
        [
            &mut self.onset,
            &mut self.comeup,
            &mut self.peak,
            &mut self.offset,
            &mut self.total,
        ]
    }

    /// Bands with a nonzero min greater than a nonzero max
    pub fn inverted_bands(&self) -> Vec<&'static str> {
        let mut bad = Vec::new();
        let bands = [
            ("low", self.low_dose.min, self.low_dose.max),
            ("medium", self.medium_dose.min, self.medium_dose.max),
            ("high", self.high_dose.min, self.high_dose.max),
            ("onset", self.onset.min, self.onset.max),
            ("comeup", self.comeup.min, self.comeup.max),
            ("peak", self.peak.min, self.peak.max),
            ("offset", self.offset.min, self.offset.max),
            ("total", self.total.min, self.total.max),
        ];
        for (name, min, max) in bands {
            if min != 0.0 && max != 0.0 && min > max {
                bad.push(name);
            }
        }
        bad
    }
}

// ============================================================================
// Log Table
// ============================================================================

/// One logged dose. Keyed by (username, start_time).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LogRow {
    pub username: String,
    /// Unix seconds
    pub start_time: i64,
    /// Unix seconds, 0 while the dose is still being taken
    pub end_time: i64,
    pub drug_name: String,
    pub dose: f64,
    pub dose_units: String,
    pub drug_route: String,
    pub cost: f64,
    pub cost_currency: String,
}

/// Columns of the log table, in schema order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogColumn {
    StartTime,
    Username,
    EndTime,
    DrugName,
    Dose,
    DoseUnits,
    DrugRoute,
    Cost,
    CostCurrency,
}

impl LogColumn {
    pub const ALL: [LogColumn; 9] = [
        LogColumn::StartTime,
        LogColumn::Username,
        LogColumn::EndTime,
        LogColumn::DrugName,
        LogColumn::Dose,
        LogColumn::DoseUnits,
        LogColumn::DrugRoute,
        LogColumn::Cost,
        LogColumn::CostCurrency,
    ];

    /// Columns matched by a free-text search
    pub const SEARCHABLE: [LogColumn; 6] = [
        LogColumn::DrugName,
        LogColumn::Dose,
        LogColumn::DoseUnits,
        LogColumn::DrugRoute,
        LogColumn::Cost,
        LogColumn::CostCurrency,
    ];

    /// Column name in the store schema
    pub fn as_str(self) -> &'static str {
        match self {
            LogColumn::StartTime => "timeOfDoseStart",
            LogColumn::Username => "username",
            LogColumn::EndTime => "timeOfDoseEnd",
            LogColumn::DrugName => "drugName",
            LogColumn::Dose => "dose",
            LogColumn::DoseUnits => "doseUnits",
            LogColumn::DrugRoute => "drugRoute",
            LogColumn::Cost => "cost",
            LogColumn::CostCurrency => "costCurrency",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            LogColumn::StartTime | LogColumn::EndTime | LogColumn::Dose | LogColumn::Cost
        )
    }
}

impl fmt::Display for LogColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogColumn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        LogColumn::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::InvalidColInput(s.to_string()))
    }
}

// ============================================================================
// User Settings
// ============================================================================

/// Stored value of `useIDForRemember` meaning nothing is remembered
pub const FORGET_SENTINEL: i64 = 0;

/// The log a user asked to reuse for quick logging
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Remembered {
    #[default]
    Forgotten,
    Log(i64),
}

impl Remembered {
    pub fn from_stored(value: i64) -> Self {
        if value == FORGET_SENTINEL {
            Remembered::Forgotten
        } else {
            Remembered::Log(value)
        }
    }

    pub fn to_stored(self) -> i64 {
        match self {
            Remembered::Forgotten => FORGET_SENTINEL,
            Remembered::Log(id) => id,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub username: String,
    pub use_id_for_remember: Remembered,
}

/// Columns of the user settings table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingColumn {
    UseIdForRemember,
}

impl SettingColumn {
    pub fn as_str(self) -> &'static str {
        match self {
            SettingColumn::UseIdForRemember => "useIDForRemember",
        }
    }
}

impl FromStr for SettingColumn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("useIDForRemember") {
            Ok(SettingColumn::UseIdForRemember)
        } else {
            Err(Error::InvalidColInput(s.to_string()))
        }
    }
}

// ============================================================================
// Name Types
// ============================================================================

/// Kinds of names the resolver canonicalises
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NameType {
    Substance,
    Route,
    Units,
    ConvUnits,
}

impl NameType {
    /// Resolution order for free-text normalisation
    pub const ALL: [NameType; 4] = [
        NameType::Substance,
        NameType::Route,
        NameType::Units,
        NameType::ConvUnits,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NameType::Substance => "substance",
            NameType::Route => "route",
            NameType::Units => "units",
            NameType::ConvUnits => "convUnits",
        }
    }

    /// Global alt-names table for this type
    pub fn table_name(self) -> &'static str {
        match self {
            NameType::Substance => "substanceNames",
            NameType::Route => "routeNames",
            NameType::Units => "unitsNames",
            NameType::ConvUnits => "convUnitsNames",
        }
    }
}

impl fmt::Display for NameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NameType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "substance" | "drug" => Ok(NameType::Substance),
            "route" => Ok(NameType::Route),
            "units" | "unit" => Ok(NameType::Units),
            "convunits" | "conv_units" => Ok(NameType::ConvUnits),
            _ => Err(Error::NoNametype(s.to_string())),
        }
    }
}

// ============================================================================
// Derived Results
// ============================================================================

/// Time left until each phase boundary of a dose, plus overall completion
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TimeTill {
    /// Seconds until the onset ends
    pub onset: i64,
    pub comeup: i64,
    pub peak: i64,
    pub offset: i64,
    pub total: i64,
    /// Completion fraction against the longest total duration
    pub total_complete_min: f64,
    /// Completion fraction against the shortest total duration
    pub total_complete_max: f64,
    pub total_complete_avg: f64,
}

/// Summed cost of one substance in one currency
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CostEntry {
    pub substance: String,
    pub currency: String,
    pub total: f64,
}

impl CostEntry {
    /// Zero totals are kept in results but not shown
    pub fn is_displayable(&self) -> bool {
        self.total != 0.0
    }
}

/// Mean of two values, zero when both are zero
pub fn average(a: f64, b: f64) -> f64 {
    if a == 0.0 && b == 0.0 {
        return 0.0;
    }
    (a + b) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_column_parse_is_case_insensitive() {
        assert_eq!("drugname".parse::<LogColumn>().unwrap(), LogColumn::DrugName);
        assert_eq!(
            "timeOfDoseStart".parse::<LogColumn>().unwrap(),
            LogColumn::StartTime
        );
        assert!(matches!(
            "nonsense".parse::<LogColumn>(),
            Err(Error::InvalidColInput(_))
        ));
    }

    #[test]
    fn test_name_type_parse() {
        assert_eq!("convUnits".parse::<NameType>().unwrap(), NameType::ConvUnits);
        assert!(matches!("colour".parse::<NameType>(), Err(Error::NoNametype(_))));
    }

    #[test]
    fn test_remembered_sentinel() {
        assert_eq!(Remembered::from_stored(0), Remembered::Forgotten);
        assert_eq!(Remembered::from_stored(42), Remembered::Log(42));
        assert_eq!(Remembered::Log(42).to_stored(), 42);
    }

    #[test]
    fn test_inverted_bands() {
        let mut row = InfoRow::new("a", "oral", "mg");
        row.low_dose = DoseBand::new(10.0, 5.0);
        row.peak = Phase::new(2.0, 0.0, "hours");
        assert_eq!(row.inverted_bands(), vec!["low"]);
    }

    #[test]
    fn test_average_of_zeros() {
        assert_eq!(average(0.0, 0.0), 0.0);
        assert_eq!(average(1.0, 3.0), 2.0);
    }
}
