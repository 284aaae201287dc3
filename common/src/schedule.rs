// Cron schedule parsing and next-occurrence computation
//
// Automation schedules are classic 5-field cron expressions
// (minute, hour, day-of-month, month, day-of-week). All computation is in
// UTC; no per-business timezone conversion is applied.

use crate::errors::ScheduleError;
use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use std::collections::BTreeSet;
use std::str::FromStr;

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// A validated 5-field cron expression.
///
/// Two translations bridge the gap between classic cron and the underlying
/// engine: numeric day-of-week values (0-7, Sunday twice) are rewritten to
/// day names because the engine indexes Sunday as 1, and when both
/// day-of-month and day-of-week are restricted the expression is split into
/// two single-restriction variants whose earlier occurrence wins, which is
/// the standard cron union rule (the engine intersects the two fields).
#[derive(Debug, Clone)]
pub struct CronSpec {
    expression: String,
    candidates: Vec<CronSchedule>,
}

impl CronSpec {
    /// Parse and validate a 5-field cron expression.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::InvalidCronExpression {
                expression: expression.to_string(),
                reason: format!("expected 5 fields, found {}", fields.len()),
            });
        }

        let invalid = |reason: String| ScheduleError::InvalidCronExpression {
            expression: expression.to_string(),
            reason,
        };

        let day_of_week = normalize_day_of_week(fields[4]).map_err(&invalid)?;

        let day_of_month_restricted = !fields[2].starts_with('*');
        let day_of_week_restricted = !fields[4].starts_with('*');

        let variants: Vec<String> = if day_of_month_restricted && day_of_week_restricted {
            vec![
                with_seconds(&[fields[0], fields[1], fields[2], fields[3], "*"]),
                with_seconds(&[fields[0], fields[1], "*", fields[3], day_of_week.as_str()]),
            ]
        } else {
            vec![with_seconds(&[
                fields[0],
                fields[1],
                fields[2],
                fields[3],
                day_of_week.as_str(),
            ])]
        };

        let mut candidates = Vec::with_capacity(variants.len());
        for variant in &variants {
            let schedule =
                CronSchedule::from_str(variant).map_err(|e| invalid(e.to_string()))?;
            candidates.push(schedule);
        }

        Ok(Self {
            expression: expression.to_string(),
            candidates,
        })
    }

    /// The original expression as written.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The earliest occurrence strictly after `after`.
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        self.candidates
            .iter()
            .filter_map(|schedule| schedule.after(&after).next())
            .min()
            .ok_or_else(|| ScheduleError::NoNextOccurrence {
                expression: self.expression.clone(),
            })
    }
}

/// The task model is minute-granular; pin seconds to zero for the engine.
fn with_seconds(fields: &[&str]) -> String {
    format!("0 {}", fields.join(" "))
}

/// Rewrite numeric day-of-week tokens (0-7, where 0 and 7 are both Sunday)
/// to day names. Wildcard forms pass through unchanged; steps over ranges
/// and lists are expanded to an explicit name list.
fn normalize_day_of_week(field: &str) -> Result<String, String> {
    if field.starts_with('*') {
        return Ok(field.to_string());
    }

    let mut days: BTreeSet<u8> = BTreeSet::new();
    for element in field.split(',') {
        let (base, step) = match element.split_once('/') {
            Some((base, step)) => {
                let step: u8 = step
                    .parse()
                    .map_err(|_| format!("invalid day-of-week step '{step}'"))?;
                if step == 0 {
                    return Err("day-of-week step must be non-zero".to_string());
                }
                (base, step)
            }
            None => (element, 1),
        };

        let (start, end) = match base.split_once('-') {
            Some((lo, hi)) => (day_ordinal(lo)?, day_ordinal(hi)?),
            None if step > 1 => (day_ordinal(base)?, 6),
            None => {
                let day = day_ordinal(base)?;
                (day, day)
            }
        };

        if start <= end {
            days.extend((start..=end).step_by(step as usize));
        } else {
            // Wrapping range such as 5-1 (Fri through Mon).
            let sequence = (start..=6).chain(0..=end);
            days.extend(sequence.step_by(step as usize));
        }
    }

    if days.is_empty() {
        return Err(format!("empty day-of-week field '{field}'"));
    }

    Ok(days
        .into_iter()
        .map(|d| DAY_NAMES[d as usize])
        .collect::<Vec<_>>()
        .join(","))
}

/// A single day-of-week token: numeric 0-7 or a day name.
fn day_ordinal(token: &str) -> Result<u8, String> {
    if let Ok(n) = token.parse::<u8>() {
        if n <= 7 {
            return Ok(n % 7);
        }
        return Err(format!("day-of-week value {n} out of range 0-7"));
    }
    let prefix = token.get(..3).unwrap_or("");
    DAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(prefix))
        .map(|i| i as u8)
        .ok_or_else(|| format!("invalid day-of-week token '{token}'"))
}

/// Validate a cron expression without keeping the parsed form.
pub fn validate(expression: &str) -> Result<(), ScheduleError> {
    CronSpec::parse(expression).map(|_| ())
}

/// Compute the earliest occurrence of `expression` strictly after `after`.
pub fn next_occurrence(
    expression: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    CronSpec::parse(expression)?.next_occurrence(after)
}
