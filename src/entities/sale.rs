// 🧾 Sale Record - immutable ledger entry
//
// Snapshots are copied at sale time. Renaming a team or player later does
// not rewrite history.

use super::parse_amount;
use crate::error::{AuctionError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub base_price: f64,
    #[serde(default)]
    pub profile_photo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSnapshot {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub logo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderSnapshot {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleDetails {
    pub amount: f64,
    pub date: DateTime<Utc>,
}

/// One completed sale. Never mutated, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub player: PlayerSnapshot,
    pub team: TeamSnapshot,
    pub leader: LeaderSnapshot,
    pub sale_details: SaleDetails,
}

impl SaleRecord {
    pub fn new(
        player: PlayerSnapshot,
        team: TeamSnapshot,
        leader: LeaderSnapshot,
        amount: f64,
    ) -> Self {
        SaleRecord {
            id: uuid::Uuid::new_v4().to_string(),
            player,
            team,
            leader,
            sale_details: SaleDetails {
                amount,
                date: Utc::now(),
            },
        }
    }

    pub fn amount(&self) -> f64 {
        self.sale_details.amount
    }
}

// ============================================================================
// SALE SUBMISSION (wire shape of POST /api/soldplayers)
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SaleDetailsInput {
    #[serde(default)]
    pub amount: Option<serde_json::Value>,
}

/// Everything is optional on the wire so that missing pieces surface as a
/// validation error instead of a body rejection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRequest {
    #[serde(default)]
    pub player: Option<PlayerSnapshot>,
    #[serde(default)]
    pub team: Option<TeamSnapshot>,
    #[serde(default)]
    pub leader: Option<LeaderSnapshot>,
    #[serde(default)]
    pub sale_details: Option<SaleDetailsInput>,
}

/// A request that passed the presence and amount checks
#[derive(Debug, Clone)]
pub struct ValidSale {
    pub player: PlayerSnapshot,
    pub team: TeamSnapshot,
    pub leader: LeaderSnapshot,
    pub amount: f64,
}

impl SaleRequest {
    pub fn new(player: PlayerSnapshot, team: TeamSnapshot, leader: &str, amount: f64) -> Self {
        SaleRequest {
            player: Some(player),
            team: Some(team),
            leader: Some(LeaderSnapshot {
                name: leader.to_string(),
            }),
            sale_details: Some(SaleDetailsInput {
                amount: Some(serde_json::json!(amount)),
            }),
        }
    }

    pub fn validate(self) -> Result<ValidSale> {
        let (player, team, leader, details) =
            match (self.player, self.team, self.leader, self.sale_details) {
                (Some(p), Some(t), Some(l), Some(d)) => (p, t, l, d),
                _ => return Err(AuctionError::validation("Missing required fields")),
            };

        if player.id.trim().is_empty() || team.id.trim().is_empty() {
            return Err(AuctionError::validation("Missing required fields"));
        }

        let amount = details
            .amount
            .as_ref()
            .and_then(parse_amount)
            .ok_or_else(|| AuctionError::validation("Missing required fields"))?;
        if amount <= 0.0 {
            return Err(AuctionError::validation(
                "Sale amount must be a positive number",
            ));
        }

        Ok(ValidSale {
            player,
            team,
            leader,
            amount,
        })
    }
}
