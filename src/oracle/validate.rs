use std::collections::HashSet;

use serde_json::Value;

use super::OracleError;
use crate::models::{ActiveDriver, NewRankingProposal, RankingEntry};

const RESULTS_KEY: &str = "ranking_results";
const REQUIRED_FIELDS: [&str; 3] = ["driver_id", "rank", "tag"];

/// Integers may arrive as JSON numbers or numeric strings.
fn coerce_int(value: &Value) -> Option<i32> {
    let wide = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    i32::try_from(wide).ok()
}

/// Tags are free text; non-string values keep their JSON rendering.
fn coerce_tag(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parses an oracle payload and accepts it only if it ranks every active
/// driver exactly once. Any violation rejects the whole payload.
pub fn validate_proposal(
    raw: &str,
    active_drivers: &[ActiveDriver],
) -> Result<NewRankingProposal, OracleError> {
    let payload: Value = serde_json::from_str(raw)?;
    let object = payload.as_object().ok_or(OracleError::NotAnObject)?;

    let results = match object.get(RESULTS_KEY) {
        None | Some(Value::Null) => return Err(OracleError::MissingRankingResults),
        Some(results) => results,
    };
    if object.len() != 1 {
        let extra = object
            .keys()
            .filter(|key| key.as_str() != RESULTS_KEY)
            .cloned()
            .collect();
        return Err(OracleError::UnexpectedTopLevelKeys(extra));
    }
    let results = results.as_array().ok_or(OracleError::NotAnArray)?;

    let active: HashSet<i32> = active_drivers.iter().map(|d| d.id).collect();
    let mut seen_ranks = HashSet::new();
    let mut seen_drivers = HashSet::new();
    let mut entries = Vec::with_capacity(results.len());

    for (index, result) in results.iter().enumerate() {
        let fields = result.as_object();
        for field in REQUIRED_FIELDS {
            let present = fields
                .and_then(|f| f.get(field))
                .is_some_and(|value| !value.is_null());
            if !present {
                return Err(OracleError::MissingField { index, field });
            }
        }
        let fields = fields.ok_or(OracleError::MissingField {
            index,
            field: REQUIRED_FIELDS[0],
        })?;
        if fields.len() != REQUIRED_FIELDS.len() {
            return Err(OracleError::UnexpectedFields { index });
        }

        let driver_id = coerce_int(&fields["driver_id"])
            .ok_or_else(|| OracleError::InvalidDriverId(fields["driver_id"].clone()))?;
        let rank = coerce_int(&fields["rank"])
            .filter(|rank| *rank > 0)
            .ok_or_else(|| OracleError::InvalidRank(fields["rank"].clone()))?;
        let tag = coerce_tag(&fields["tag"]);

        if !seen_ranks.insert(rank) {
            return Err(OracleError::DuplicateRank(rank));
        }
        if !seen_drivers.insert(driver_id) {
            return Err(OracleError::DuplicateDriver(driver_id));
        }
        if !active.contains(&driver_id) {
            return Err(OracleError::InactiveDriver(driver_id));
        }

        entries.push(RankingEntry {
            driver_id,
            rank,
            tag,
        });
    }

    if seen_drivers.len() != active.len() {
        return Err(OracleError::UnrankedDrivers {
            ranked: seen_drivers.len(),
            active: active.len(),
        });
    }

    Ok(NewRankingProposal { entries })
}
