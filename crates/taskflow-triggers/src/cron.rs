//! From-scratch five-field, minute-resolution CRON matcher: `minute hour
//! dayOfMonth month dayOfWeek`. Supports `*`, a single integer, inclusive
//! ranges `a-b`, and comma lists `a,b,c`. Steps (`*/n`) are not implemented
//! (spec §4.4 / Open Questions).

use chrono::{DateTime, Datelike, Timelike, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    Any,
    Values(Vec<u32>),
}

impl Field {
    fn parse(raw: &str, min: u32, max: u32) -> Result<Self, String> {
        if raw == "*" {
            return Ok(Field::Any);
        }
        let mut values = Vec::new();
        for part in raw.split(',') {
            if let Some((lo, hi)) = part.split_once('-') {
                let lo: u32 = lo
                    .trim()
                    .parse()
                    .map_err(|_| format!("bad range start in '{part}'"))?;
                let hi: u32 = hi
                    .trim()
                    .parse()
                    .map_err(|_| format!("bad range end in '{part}'"))?;
                if lo > hi || lo < min || hi > max {
                    return Err(format!("range '{part}' out of bounds {min}-{max}"));
                }
                values.extend(lo..=hi);
            } else {
                let v: u32 = part
                    .trim()
                    .parse()
                    .map_err(|_| format!("bad value '{part}'"))?;
                if v < min || v > max {
                    return Err(format!("value {v} out of bounds {min}-{max}"));
                }
                values.push(v);
            }
        }
        if values.is_empty() {
            return Err(format!("empty field '{raw}'"));
        }
        Ok(Field::Values(values))
    }

    fn matches(&self, value: u32) -> bool {
        match self {
            Field::Any => true,
            Field::Values(vs) => vs.contains(&value),
        }
    }
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, String> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!(
                "expected 5 whitespace-separated fields, got {}",
                fields.len()
            ));
        }
        Ok(CronSchedule {
            minute: Field::parse(fields[0], 0, 59)?,
            hour: Field::parse(fields[1], 0, 23)?,
            day_of_month: Field::parse(fields[2], 1, 31)?,
            month: Field::parse(fields[3], 1, 12)?,
            day_of_week: Field::parse(fields[4], 0, 6)?,
        })
    }

    /// True when `at`'s wall-clock minute matches all five fields.
    /// Day-of-week: 0 = Sunday, matching the conventional CRON mapping.
    pub fn matches(&self, at: &DateTime<Utc>) -> bool {
        let dow = at.weekday().num_days_from_sunday();
        self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.day_of_month.matches(at.day())
            && self.month.matches(at.month())
            && self.day_of_week.matches(dow)
    }
}
