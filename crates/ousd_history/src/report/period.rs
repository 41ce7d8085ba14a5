//! Calendar periods a report covers and the block window each resolves to.

use crate::compute::aggregate::ReportWindow;
use crate::report::ReportError;
use crate::store::{block_number_for_time, LedgerStore, StoreError, TimeDirection};
use serde::{Deserialize, Serialize};
use std::fmt;
use time::macros::time;
use time::{Date, Duration, Month, OffsetDateTime, Time};

/// Week numbers are Monday-first: week 1 starts on the year's first Monday, days before it
/// are week 0. Months are 1 to 12.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReportPeriod {
    Week { year: i32, week: u8 },
    Month { year: i32, month: u8 },
}

const END_OF_DAY: Time = time!(23:59:59);

impl ReportPeriod {
    pub fn week(year: i32, week: u8) -> Result<Self, ReportError> {
        if week > 53 {
            return Err(ReportError::InvalidPeriod(format!("week {week} of {year}")));
        }
        Ok(Self::Week { year, week })
    }

    pub fn month(year: i32, month: u8) -> Result<Self, ReportError> {
        Month::try_from(month)
            .map_err(|_| ReportError::InvalidPeriod(format!("month {month} of {year}")))?;
        Ok(Self::Month { year, month })
    }

    /// The last period of this kind that ended before `now`.
    pub fn last_completed_week(now: OffsetDateTime) -> Self {
        let week = now.date().monday_based_week();
        Self::Week {
            year: now.year(),
            week,
        }
        .previous()
    }

    pub fn last_completed_month(now: OffsetDateTime) -> Self {
        Self::Month {
            year: now.year(),
            month: u8::from(now.month()),
        }
        .previous()
    }

    /// The period right before this one. Week 0 steps back to week 53 of the prior year.
    pub fn previous(self) -> Self {
        match self {
            Self::Week { year, week: 0 } => Self::Week {
                year: year - 1,
                week: 53,
            },
            Self::Week { year, week } => Self::Week {
                year,
                week: week - 1,
            },
            Self::Month { year, month: 1 } => Self::Month {
                year: year - 1,
                month: 12,
            },
            Self::Month { year, month } => Self::Month {
                year,
                month: month - 1,
            },
        }
    }

    /// First second of the period (UTC).
    pub fn start(self) -> Result<OffsetDateTime, ReportError> {
        Ok(self.first_day()?.midnight().assume_utc())
    }

    /// Last second of the period (UTC).
    pub fn end(self) -> Result<OffsetDateTime, ReportError> {
        let last_day = match self {
            Self::Week { .. } => self.first_day()? + Duration::days(6),
            Self::Month { year, month } => {
                let m = self.month_of(month)?;
                Date::from_calendar_date(year, m, time::util::days_in_year_month(year, m))
                    .map_err(|e| ReportError::InvalidPeriod(e.to_string()))?
            }
        };
        Ok(last_day.with_time(END_OF_DAY).assume_utc())
    }

    fn month_of(self, month: u8) -> Result<Month, ReportError> {
        Month::try_from(month).map_err(|_| ReportError::InvalidPeriod(self.to_string()))
    }

    fn first_day(self) -> Result<Date, ReportError> {
        match self {
            Self::Week { year, week } => {
                let jan1 = Date::from_ordinal_date(year, 1)
                    .map_err(|e| ReportError::InvalidPeriod(e.to_string()))?;
                let offset = i64::from(jan1.weekday().number_days_from_monday());
                let days = if week == 0 {
                    -offset
                } else {
                    (7 - offset) % 7 + 7 * (i64::from(week) - 1)
                };
                Ok(jan1 + Duration::days(days))
            }
            Self::Month { year, month } => {
                Date::from_calendar_date(year, self.month_of(month)?, 1)
                    .map_err(|e| ReportError::InvalidPeriod(e.to_string()))
            }
        }
    }
}

impl fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Week { year, week } => write!(f, "{year}-w{week:02}"),
            Self::Month { year, month } => write!(f, "{year}-m{month:02}"),
        }
    }
}

/// First block at or after the period start and last block at or before its end.
pub fn period_blocks<S: LedgerStore + ?Sized>(
    store: &S,
    period: ReportPeriod,
) -> Result<ReportWindow, ReportError> {
    let start = period.start()?;
    let end = period.end()?;
    let from_block = block_number_for_time(store, start, TimeDirection::AtOrAfter)?;
    let to_block = block_number_for_time(store, end, TimeDirection::AtOrBefore)?;
    if to_block < from_block {
        return Err(ReportError::Store(StoreError::MissingTimeBoundary {
            time: end,
            direction: TimeDirection::AtOrBefore,
        }));
    }
    Ok(ReportWindow {
        from_block,
        to_block,
        start,
        end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BlockRecord, SqliteLedger};
    use time::macros::datetime;

    #[test]
    fn monday_first_weeks() {
        // 2021-01-01 is a Friday; the first Monday is Jan 4
        let w1 = ReportPeriod::week(2021, 1).unwrap();
        assert_eq!(w1.start().unwrap(), datetime!(2021-01-04 00:00 UTC));
        assert_eq!(w1.end().unwrap(), datetime!(2021-01-10 23:59:59 UTC));

        let w0 = ReportPeriod::week(2021, 0).unwrap();
        assert_eq!(w0.start().unwrap(), datetime!(2020-12-28 00:00 UTC));

        let w14 = ReportPeriod::week(2021, 14).unwrap();
        assert_eq!(w14.start().unwrap(), datetime!(2021-04-05 00:00 UTC));

        // a year starting on Monday has an empty week 0
        let w1_2024 = ReportPeriod::week(2024, 1).unwrap();
        assert_eq!(w1_2024.start().unwrap(), datetime!(2024-01-01 00:00 UTC));
    }

    #[test]
    fn month_bounds() {
        let feb = ReportPeriod::month(2024, 2).unwrap();
        assert_eq!(feb.start().unwrap(), datetime!(2024-02-01 00:00 UTC));
        assert_eq!(feb.end().unwrap(), datetime!(2024-02-29 23:59:59 UTC));
        assert!(ReportPeriod::month(2024, 13).is_err());
        assert!(ReportPeriod::week(2024, 54).is_err());
    }

    #[test]
    fn previous_periods_wrap() {
        assert_eq!(
            ReportPeriod::Month { year: 2021, month: 1 }.previous(),
            ReportPeriod::Month { year: 2020, month: 12 }
        );
        assert_eq!(
            ReportPeriod::Week { year: 2021, week: 0 }.previous(),
            ReportPeriod::Week { year: 2020, week: 53 }
        );
        assert_eq!(
            ReportPeriod::last_completed_week(datetime!(2021-04-14 09:00 UTC)),
            ReportPeriod::Week { year: 2021, week: 14 }
        );
        assert_eq!(
            ReportPeriod::last_completed_month(datetime!(2021-05-02 09:00 UTC)),
            ReportPeriod::Month { year: 2021, month: 4 }
        );
        assert_eq!(ReportPeriod::Week { year: 2021, week: 3 }.to_string(), "2021-w03");
    }

    #[test]
    fn blocks_for_period() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        ledger
            .import_blocks(&[
                BlockRecord {
                    block_number: 10,
                    block_time: datetime!(2021-04-04 23:59:50 UTC),
                },
                BlockRecord {
                    block_number: 11,
                    block_time: datetime!(2021-04-05 00:00:05 UTC),
                },
                BlockRecord {
                    block_number: 20,
                    block_time: datetime!(2021-04-11 23:59:58 UTC),
                },
                BlockRecord {
                    block_number: 21,
                    block_time: datetime!(2021-04-12 00:00:03 UTC),
                },
            ])
            .unwrap();
        let w = period_blocks(&ledger, ReportPeriod::week(2021, 14).unwrap()).unwrap();
        assert_eq!((w.from_block, w.to_block), (11, 20));

        let err = period_blocks(&ledger, ReportPeriod::week(2021, 30).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            ReportError::Store(StoreError::MissingTimeBoundary { .. })
        ));
    }
}
