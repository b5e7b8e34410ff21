//! Unit conversion for doses logged as a solution or mixture.
//!
//! A convertible substance has exactly two alternative names registered
//! under the `convUnits` name type: the conversion function, then the
//! output unit.

use crate::names::Resolver;
use crate::types::NameType;
use crate::{Context, Error, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Densities in g/cm³, keyed by canonical substance name
static DENSITIES: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("alcohol", 0.789),
        ("ethanol", 0.789),
        ("gbl", 1.129),
        ("1,4-butanediol", 1.017),
        ("water", 1.0),
    ])
});

/// Density of `substance`, matched case-insensitively
pub fn density(substance: &str) -> Result<f64> {
    DENSITIES
        .get(substance.trim().to_lowercase().as_str())
        .copied()
        .ok_or_else(|| Error::NoDensitySubstance(substance.to_string()))
}

/// The closed set of conversion functions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversionFn {
    PercentToPure,
    MillilitersToGrams,
}

impl ConversionFn {
    pub fn name(self) -> &'static str {
        match self {
            ConversionFn::PercentToPure => "Convert-Percent-To-Pure",
            ConversionFn::MillilitersToGrams => "Convert-Milliliters-To-Grams",
        }
    }

    /// Number of inputs the function takes
    pub fn arity(self) -> usize {
        match self {
            ConversionFn::PercentToPure | ConversionFn::MillilitersToGrams => 2,
        }
    }

    /// Apply the function to `inputs` for `substance`
    pub fn apply(self, substance: &str, inputs: &[f64]) -> Result<f64> {
        if inputs.len() != self.arity() {
            return Err(Error::WrongAmountUnitInputs {
                function: self.name(),
                expected: self.arity(),
                found: inputs.len(),
            });
        }
        let pure = percent_to_pure(inputs[0], inputs[1]);
        match self {
            ConversionFn::PercentToPure => Ok(pure),
            ConversionFn::MillilitersToGrams => Ok(pure * density(substance)?),
        }
    }
}

impl fmt::Display for ConversionFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConversionFn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        [ConversionFn::PercentToPure, ConversionFn::MillilitersToGrams]
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownConversionFunction(s.to_string()))
    }
}

pub fn percent_to_pure(amount: f64, percent: f64) -> f64 {
    amount * percent / 100.0
}

/// A converted dose
#[derive(Clone, Debug, PartialEq)]
pub struct Converted {
    pub amount: f64,
    pub units: String,
}

/// Converts doses using the conversion names registered for a substance
#[derive(Clone)]
pub struct Converter {
    resolver: Resolver,
}

impl Converter {
    pub fn new(resolver: Resolver) -> Self {
        Self { resolver }
    }

    /// Convert `inputs` for the canonical `substance`
    pub fn convert(&self, ctx: &Context, substance: &str, inputs: &[f64]) -> Result<Converted> {
        let names = self.resolver.alt_names(ctx, substance, NameType::ConvUnits)?;
        if names.len() != 2 {
            return Err(Error::WrongAmountNames {
                substance: substance.to_string(),
                found: names.len(),
            });
        }

        let function: ConversionFn = names[0].parse()?;
        let amount = function.apply(substance, inputs)?;

        let output_unit = names[1].trim();
        if output_unit.is_empty() {
            return Err(Error::RetConvertUnitEmpty);
        }
        if amount == 0.0 {
            return Err(Error::ConvResultIsZero);
        }

        let units = self.resolver.match_name(ctx, output_unit, NameType::Units)?;
        tracing::debug!(
            "Converted {:?} of {} with {} to {} {}",
            inputs,
            substance,
            function,
            amount,
            units
        );
        Ok(Converted { amount, units })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::{NameMap, NamesConfig};
    use crate::store::{Store, StoreLocation};
    use std::sync::Arc;

    fn converter_with(dir: &tempfile::TempDir, conv: &[(&str, &[&str])]) -> Converter {
        let store = Store::open(
            &StoreLocation::Embedded(dir.path().join("convert.sqlite")),
            "testsrc",
        )
        .unwrap();
        let map: NameMap = conv
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect();
        let names = NamesConfig::builtin()
            .unwrap()
            .with_global(NameType::ConvUnits, map);
        Converter::new(Resolver::new(store, Arc::new(names)))
    }

    #[test]
    fn test_percent_to_pure_identity_at_100() {
        for amount in [0.5, 1.0, 12.25, 400.0] {
            assert_eq!(ConversionFn::PercentToPure.apply("x", &[amount, 100.0]).unwrap(), amount);
        }
    }

    #[test]
    fn test_wrong_arity() {
        let err = ConversionFn::PercentToPure.apply("x", &[1.0]).unwrap_err();
        assert!(matches!(
            err,
            Error::WrongAmountUnitInputs { expected: 2, found: 1, .. }
        ));
    }

    #[test]
    fn test_function_names_parse() {
        assert_eq!(
            "convert-milliliters-to-grams".parse::<ConversionFn>().unwrap(),
            ConversionFn::MillilitersToGrams
        );
        assert!(matches!(
            "Convert-Cups-To-Spoons".parse::<ConversionFn>(),
            Err(Error::UnknownConversionFunction(_))
        ));
    }

    #[test]
    fn test_milliliters_to_grams() {
        let dir = tempfile::tempdir().unwrap();
        let converter = converter_with(&dir, &[("alcohol", &["Convert-Milliliters-To-Grams", "grams"])]);
        let out = converter
            .convert(&Context::background(), "alcohol", &[100.0, 40.0])
            .unwrap();
        assert!((out.amount - 31.56).abs() < 1e-9);
        // Output unit goes through the units resolver
        assert_eq!(out.units, "g");
    }

    #[test]
    fn test_unknown_density() {
        let dir = tempfile::tempdir().unwrap();
        let converter = converter_with(&dir, &[("wine", &["Convert-Milliliters-To-Grams", "g"])]);
        let err = converter
            .convert(&Context::background(), "wine", &[150.0, 12.0])
            .unwrap_err();
        assert!(matches!(err, Error::NoDensitySubstance(_)));
    }

    #[test]
    fn test_wrong_amount_of_names() {
        let dir = tempfile::tempdir().unwrap();
        let converter = converter_with(&dir, &[("beer", &["Convert-Percent-To-Pure"])]);
        let err = converter
            .convert(&Context::background(), "beer", &[500.0, 5.0])
            .unwrap_err();
        assert!(matches!(err, Error::WrongAmountNames { found: 1, .. }));
    }

    #[test]
    fn test_zero_result() {
        let dir = tempfile::tempdir().unwrap();
        let converter = converter_with(&dir, &[("beer", &["Convert-Percent-To-Pure", "ml"])]);
        let err = converter
            .convert(&Context::background(), "beer", &[500.0, 0.0])
            .unwrap_err();
        assert!(matches!(err, Error::ConvResultIsZero));
    }

    #[test]
    fn test_empty_output_unit() {
        let dir = tempfile::tempdir().unwrap();
        let converter = converter_with(&dir, &[("beer", &["Convert-Percent-To-Pure", " "])]);
        let err = converter
            .convert(&Context::background(), "beer", &[500.0, 5.0])
            .unwrap_err();
        assert!(matches!(err, Error::RetConvertUnitEmpty));
    }
}
