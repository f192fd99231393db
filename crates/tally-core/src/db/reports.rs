//! Wealth reports

use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveDate};
use rusqlite::params;

use super::Database;
use crate::error::{Error, Result};
use crate::models::{
    parse_transaction_date, AccountType, TransactionType, WealthDataPoint, WealthInterval,
    WealthReport,
};

/// Most points a wealth chart returns
pub const MAX_WEALTH_PERIODS: u32 = 366;

/// First day of the month `delta` months away from `date`'s month
fn shift_month(date: NaiveDate, delta: i32) -> Option<NaiveDate> {
    let total = date.year() * 12 + date.month0() as i32 + delta;
    NaiveDate::from_ymd_opt(total.div_euclid(12), total.rem_euclid(12) as u32 + 1, 1)
}

/// Last day of each period, oldest first, with the current period ending today
fn period_ends(interval: WealthInterval, periods: u32, today: NaiveDate) -> Result<Vec<NaiveDate>> {
    let invalid = || Error::InvalidData("Date out of range".into());
    let mut ends = Vec::with_capacity(periods as usize);

    for back in (0..periods).rev() {
        let end = match interval {
            WealthInterval::Day => today - Duration::days(back as i64),
            WealthInterval::Month => {
                shift_month(today, 1 - back as i32).ok_or_else(invalid)? - Duration::days(1)
            }
            WealthInterval::Year => {
                NaiveDate::from_ymd_opt(today.year() - back as i32, 12, 31).ok_or_else(invalid)?
            }
        };
        ends.push(end.min(today));
    }

    Ok(ends)
}

/// A ledger row reduced to its effect on balances
struct Movement {
    account_id: String,
    target_account_id: Option<String>,
    transaction_type: TransactionType,
    amount: f64,
    date: NaiveDate,
}

impl Movement {
    /// Apply the reverse of this movement to `balances`
    fn undo(&self, balances: &mut HashMap<String, f64>) {
        match self.transaction_type {
            TransactionType::Income => {
                *balances.entry(self.account_id.clone()).or_default() -= self.amount;
            }
            TransactionType::Expense => {
                *balances.entry(self.account_id.clone()).or_default() += self.amount;
            }
            TransactionType::Transfer => {
                *balances.entry(self.account_id.clone()).or_default() += self.amount;
                if let Some(ref target) = self.target_account_id {
                    *balances.entry(target.clone()).or_default() -= self.amount;
                }
            }
        }
    }
}

impl Database {
    /// Net worth over time
    ///
    /// Balances at each period end are reconstructed by undoing, from the
    /// current balances, every transaction dated after that day. Liabilities
    /// are reported as the positive amount owed.
    pub fn wealth_chart(
        &self,
        user_id: &str,
        interval: WealthInterval,
        periods: Option<u32>,
        today: NaiveDate,
    ) -> Result<WealthReport> {
        let periods = periods
            .unwrap_or_else(|| interval.default_periods())
            .clamp(1, MAX_WEALTH_PERIODS);
        let ends = period_ends(interval, periods, today)?;
        let earliest = match ends.first() {
            Some(first) => *first,
            None => return Ok(WealthReport { data_points: Vec::new() }),
        };

        let conn = self.conn()?;

        let accounts: Vec<(String, AccountType, f64)> = {
            let mut stmt = conn.prepare(
                "SELECT id, account_type, current_balance FROM accounts WHERE user_id = ?",
            )?;
            let rows = stmt
                .query_map(params![user_id], |row| {
                    let account_type: String = row.get(1)?;
                    Ok((
                        row.get(0)?,
                        account_type.parse().unwrap_or(AccountType::Asset),
                        row.get(2)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        // Only rows after the earliest period end can affect any point
        let movements: Vec<Movement> = {
            let mut stmt = conn.prepare(
                r#"
                SELECT account_id, target_account_id, transaction_type, amount, transaction_date
                FROM transactions
                WHERE user_id = ? AND transaction_date > ?
                "#,
            )?;
            let rows = stmt
                .query_map(params![user_id, format!("{}T23:59:59", earliest)], |row| {
                    let transaction_type: String = row.get(2)?;
                    let date: String = row.get(4)?;
                    Ok(Movement {
                        account_id: row.get(0)?,
                        target_account_id: row.get(1)?,
                        transaction_type: transaction_type.parse().unwrap_or_default(),
                        amount: row.get(3)?,
                        date: parse_transaction_date(&date)
                            .map(|d| d.date())
                            .unwrap_or(earliest),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let data_points = ends
            .iter()
            .map(|end| {
                let mut balances: HashMap<String, f64> = accounts
                    .iter()
                    .map(|(id, _, balance)| (id.clone(), *balance))
                    .collect();
                for movement in movements.iter().filter(|m| m.date > *end) {
                    movement.undo(&mut balances);
                }

                let mut assets = 0.0;
                let mut owed = 0.0;
                for (id, account_type, _) in &accounts {
                    let balance = balances.get(id).copied().unwrap_or_default();
                    match account_type {
                        AccountType::Asset => assets += balance,
                        AccountType::Liability => owed += balance,
                    }
                }
                let liabilities = 0.0 - owed;

                WealthDataPoint {
                    date: end.format("%Y-%m-%d").to_string(),
                    assets: round_cents(assets),
                    liabilities: round_cents(liabilities),
                    net_worth: round_cents(assets - liabilities),
                }
            })
            .collect();

        Ok(WealthReport { data_points })
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
