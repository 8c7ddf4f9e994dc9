//! Negative-control injection.
//!
//! A fraction of records get their answer swapped for one drawn from the
//! whole pool, independent of the record's own question. Raters cannot learn
//! these, so their verdicts estimate the attentiveness floor.

use rand::Rng;

use crate::record::{ComparisonRecord, Operator};

/// Redraws allowed when the pool returns the record's own answer.
const MAX_REDRAWS: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("corruption rate {0} is outside [0, 1]")]
    InvalidRate(f64),
}

/// Corrupt each record independently with probability `rate`.
///
/// Corrupted records keep `id`, `context` and `question`, take operator
/// `random` and lose their discriminator.
pub fn inject_controls<R: Rng + ?Sized>(
    records: Vec<ComparisonRecord>,
    rate: f64,
    rng: &mut R,
) -> Result<Vec<ComparisonRecord>, ControlError> {
    if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
        return Err(ControlError::InvalidRate(rate));
    }
    let pool: Vec<String> = records.iter().map(|r| r.answer.clone()).collect();
    if pool.is_empty() {
        return Ok(records);
    }

    let out = records
        .into_iter()
        .map(|record| {
            if !rng.gen_bool(rate) {
                return record;
            }
            let mut answer = &pool[rng.gen_range(0..pool.len())];
            for _ in 0..MAX_REDRAWS {
                if *answer != record.answer {
                    break;
                }
                answer = &pool[rng.gen_range(0..pool.len())];
            }
            ComparisonRecord {
                answer: answer.clone(),
                operator: Operator::Random,
                discriminator: None,
                ..record
            }
        })
        .collect();
    Ok(out)
}
