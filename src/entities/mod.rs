// Entity Models - players, team leaders and sale records
//
// Each entity has:
// - Stable identity (UUID) that NEVER changes
// - A sequential, human-facing number (serial no / team number) for display
// - Wire names in camelCase, ids serialized as `_id` for existing clients

pub mod leader;
pub mod player;
pub mod sale;

pub use leader::{Leader, LeaderUpdate, NewLeader, RegistrationPath, RosterEntry};
pub use player::{
    BattingStyle, BowlingStyle, EconomicallyWeaker, NewPlayer, Player, PlayerCategory,
    PlayerStatus, PlayerUpdate,
};
pub use sale::{
    LeaderSnapshot, PlayerSnapshot, SaleDetails, SaleRecord, SaleRequest, TeamSnapshot, ValidSale,
};

use crate::error::{AuctionError, Result};
use std::collections::HashMap;

/// Text fields of a submitted form (multipart or urlencoded)
pub type FormFields = HashMap<String, String>;

/// Read an amount that may arrive as a JSON number or a numeric string.
pub fn parse_amount(value: &serde_json::Value) -> Option<f64> {
    let amount = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    amount.is_finite().then_some(amount)
}

/// Value of a field that was provided and is not blank
pub(crate) fn non_empty(fields: &FormFields, key: &str) -> Option<String> {
    fields
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

/// Tri-state read for partial updates:
/// None = absent, Some(None) = provided but blank, Some(Some(v)) = value.
pub(crate) fn provided(fields: &FormFields, key: &str) -> Option<Option<String>> {
    fields.get(key).map(|v| {
        let v = v.trim();
        if v.is_empty() {
            None
        } else {
            Some(v.to_string())
        }
    })
}

/// Parse an optional field with `parse`, reporting the field name on failure.
pub(crate) fn parse_field<T, F>(value: Option<String>, field: &str, parse: F) -> Result<Option<T>>
where
    F: FnOnce(&str) -> Option<T>,
{
    match value {
        None => Ok(None),
        Some(raw) => parse(&raw)
            .map(Some)
            .ok_or_else(|| AuctionError::validation(format!("Invalid {}: {}", field, raw))),
    }
}
