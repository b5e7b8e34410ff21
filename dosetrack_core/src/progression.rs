//! Progression of a logged dose through its effect phases.
//!
//! Given a log and the info row for its drug and route, this module works
//! out how long until each phase boundary is reached and how much of the
//! total duration has passed:
//! 1. Phase ranges are normalised to seconds
//! 2. Boundaries are cumulative phase averages (onset, +comeup, +peak, +offset)
//! 3. Progress is measured from an effective start that accounts for doses
//!    taken over a period of time

use crate::journal::Journal;
use crate::types::{average, InfoRow, LogRow, Phase, TimeTill};
use crate::{Context, Error, Result};
use chrono::Utc;

/// Seconds per unit of a phase; unknown units are left as they are
pub fn unit_seconds(units: &str) -> f64 {
    match units.trim().to_lowercase().as_str() {
        "hours" | "hour" | "h" => 3600.0,
        "minutes" | "minute" | "min" => 60.0,
        "seconds" | "second" | "s" | "" => 1.0,
        other => {
            tracing::warn!("Unknown phase units {:?}, using values unchanged", other);
            1.0
        }
    }
}

/// Average of a phase range in seconds
pub fn phase_average_seconds(phase: &Phase) -> f64 {
    let factor = unit_seconds(&phase.units);
    average(phase.min * factor, phase.max * factor)
}

/// Point from which effect progress is measured.
///
/// A dose taken over a period counts from roughly when the intake reached a
/// noticeable amount, averaged with the end of intake.
pub fn effective_start(log: &LogRow, info: &InfoRow) -> f64 {
    let start = log.start_time as f64;
    if log.end_time == 0 || log.end_time <= log.start_time {
        return start;
    }
    let end = log.end_time as f64;
    let use_dose = if info.threshold != 0.0 {
        info.threshold
    } else {
        info.low_dose.average()
    };

    if log.dose > use_dose {
        let intake = end - start;
        let units_per_second = log.dose / intake;
        let till_light = use_dose / units_per_second;
        start + average(till_light, intake)
    } else {
        average(start, end)
    }
}

/// Share of `total` covered by `diff`; complete once `diff` reaches it,
/// which includes a zero total.
fn fraction(diff: f64, total: f64) -> f64 {
    if diff >= total {
        return 1.0;
    }
    if total <= 0.0 {
        return 0.0;
    }
    (diff / total).clamp(0.0, 1.0)
}

/// Time left until each phase boundary at `now` (unix seconds)
pub fn compute_time_till(log: &LogRow, info: &InfoRow, now: i64) -> Result<TimeTill> {
    if !info.drug_route.eq_ignore_ascii_case(&log.drug_route) {
        return Err(Error::LoggedRouteInfo {
            drug: log.drug_name.clone(),
            route: log.drug_route.clone(),
        });
    }
    if !info.dose_units.eq_ignore_ascii_case(&log.dose_units) {
        return Err(Error::LoggedUnitsInfo {
            drug: log.drug_name.clone(),
            logged: log.dose_units.clone(),
            expected: info.dose_units.clone(),
        });
    }
    if info.threshold != 0.0 && log.dose < info.threshold {
        return Err(Error::DoseBelowThreshold {
            dose: log.dose,
            threshold: info.threshold,
        });
    }

    let onset = phase_average_seconds(&info.onset);
    let comeup = phase_average_seconds(&info.comeup);
    let peak = phase_average_seconds(&info.peak);
    let offset = phase_average_seconds(&info.offset);
    let total = phase_average_seconds(&info.total);

    let total_factor = unit_seconds(&info.total.units);
    let total_min = info.total.min * total_factor;
    let total_max = info.total.max * total_factor;

    let diff = now as f64 - effective_start(log, info);
    let till = |boundary: f64| (boundary - diff).round().max(0.0) as i64;

    Ok(TimeTill {
        onset: till(onset),
        comeup: till(onset + comeup),
        peak: till(onset + comeup + peak),
        offset: till(onset + comeup + peak + offset),
        total: till(total),
        // The longest duration gives the lowest completion
        total_complete_min: fraction(diff, total_max),
        total_complete_max: fraction(diff, total_min),
        total_complete_avg: fraction(diff, total),
    })
}

impl Journal {
    /// Progression of the log at `id` (0 for the newest) of `username`
    pub fn times(&self, ctx: &Context, username: &str, id: i64) -> Result<TimeTill> {
        let log = self.get_log(ctx, username, id)?;
        let info = self
            .info()
            .get_drug_info(ctx, &log.drug_name)?
            .into_iter()
            .find(|row| row.drug_route.eq_ignore_ascii_case(&log.drug_route))
            .ok_or_else(|| Error::LoggedRouteInfo {
                drug: log.drug_name.clone(),
                route: log.drug_route.clone(),
            })?;
        compute_time_till(&log, &info, Utc::now().timestamp())
    }
}
