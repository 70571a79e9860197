// 🛡️ Leader Entity - a team and the person who bids for it
//
// One leader owns exactly one team. The roster is a cache of the ledger:
// every entry must have a sale pointing back at this team.

use super::{non_empty, provided, FormFields};
use crate::error::{AuctionError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which route a registration came through. The duplicate rules differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationPath {
    /// Organisers: one team per leader name
    Admin,
    /// Self-service: mobile number and team name (case-insensitive) must be free
    Public,
}

/// One sold player as seen from the team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub player_id: String,
    pub player_name: String,
    pub sold_amount: f64,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leader {
    /// Stable identity (UUID) - NEVER changes
    #[serde(rename = "_id")]
    pub id: String,

    pub team_name: String,

    /// Sequential, unique, assigned at creation
    pub team_number: i64,

    pub team_logo: Option<String>,
    pub leader_name: String,
    pub leader_village: Option<String>,
    pub leader_mobile_no: Option<String>,
    pub icon_player: Option<String>,
    pub icon_player_mobile_no: Option<String>,

    /// Budget ceiling set by the organisers (0 = not set yet)
    pub max_amount: f64,

    #[serde(rename = "players")]
    pub roster: Vec<RosterEntry>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Leader {
    /// Remaining budget given what the ledger says this team has spent,
    /// or None when no ceiling is set
    pub fn remaining_budget(&self, spent: f64) -> Option<f64> {
        if self.max_amount > 0.0 {
            Some(self.max_amount - spent)
        } else {
            None
        }
    }
}

// ============================================================================
// REGISTRATION INPUT
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct NewLeader {
    pub leader_name: Option<String>,
    pub team_name: Option<String>,
    pub leader_village: Option<String>,
    pub leader_mobile_no: Option<String>,
    pub icon_player: Option<String>,
    pub icon_player_mobile_no: Option<String>,
    /// Checked for presence on public registration, never persisted
    pub password: Option<String>,
}

impl NewLeader {
    pub fn new(leader_name: &str, team_name: &str) -> Self {
        NewLeader {
            leader_name: Some(leader_name.to_string()),
            team_name: Some(team_name.to_string()),
            ..Default::default()
        }
    }

    /// The public form names a few fields differently (`village`,
    /// `iconPlayerName`); both spellings are accepted.
    pub fn from_form(fields: &FormFields) -> Self {
        NewLeader {
            leader_name: non_empty(fields, "leaderName"),
            team_name: non_empty(fields, "teamName"),
            leader_village: non_empty(fields, "leaderVillage")
                .or_else(|| non_empty(fields, "village")),
            leader_mobile_no: non_empty(fields, "leaderMobileNo"),
            icon_player: non_empty(fields, "iconPlayer")
                .or_else(|| non_empty(fields, "iconPlayerName")),
            icon_player_mobile_no: non_empty(fields, "iconPlayerMobileNo"),
            password: non_empty(fields, "password"),
        }
    }

    pub fn validate(&self, path: RegistrationPath) -> Result<()> {
        if self.leader_name.is_none() || self.team_name.is_none() {
            return Err(AuctionError::validation(
                "Leader Name and Team Name are required",
            ));
        }
        if path == RegistrationPath::Public {
            if self.leader_village.is_none() {
                return Err(AuctionError::validation(
                    "Village is required for public registration",
                ));
            }
            if self.password.is_none() {
                return Err(AuctionError::validation(
                    "Password is required for public registration",
                ));
            }
        }
        Ok(())
    }

    pub fn into_leader(self, team_number: i64, team_logo: Option<String>) -> Result<Leader> {
        let (leader_name, team_name) = match (self.leader_name, self.team_name) {
            (Some(l), Some(t)) => (l, t),
            _ => {
                return Err(AuctionError::validation(
                    "Leader Name and Team Name are required",
                ))
            }
        };
        let now = Utc::now();

        Ok(Leader {
            id: uuid::Uuid::new_v4().to_string(),
            team_name,
            team_number,
            team_logo,
            leader_name,
            leader_village: self.leader_village,
            leader_mobile_no: self.leader_mobile_no,
            icon_player: self.icon_player,
            icon_player_mobile_no: self.icon_player_mobile_no,
            max_amount: 0.0,
            roster: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }
}

// ============================================================================
// PARTIAL UPDATE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeaderUpdate {
    pub leader_name: Option<String>,
    pub team_name: Option<String>,
    pub leader_village: Option<Option<String>>,
    pub leader_mobile_no: Option<Option<String>>,
    pub icon_player: Option<Option<String>>,
    pub icon_player_mobile_no: Option<Option<String>>,
}

impl LeaderUpdate {
    pub fn from_form(fields: &FormFields) -> Result<Self> {
        let required = |key: &str, label: &str| match provided(fields, key) {
            Some(None) => Err(AuctionError::validation(format!("{} cannot be empty", label))),
            other => Ok(other.flatten()),
        };

        Ok(LeaderUpdate {
            leader_name: required("leaderName", "Leader Name")?,
            team_name: required("teamName", "Team Name")?,
            leader_village: provided(fields, "leaderVillage"),
            leader_mobile_no: provided(fields, "leaderMobileNo"),
            icon_player: provided(fields, "iconPlayer"),
            icon_player_mobile_no: provided(fields, "iconPlayerMobileNo"),
        })
    }

    pub fn apply(self, leader: &mut Leader) {
        if let Some(v) = self.leader_name {
            leader.leader_name = v;
        }
        if let Some(v) = self.team_name {
            leader.team_name = v;
        }
        if let Some(v) = self.leader_village {
            leader.leader_village = v;
        }
        if let Some(v) = self.leader_mobile_no {
            leader.leader_mobile_no = v;
        }
        if let Some(v) = self.icon_player {
            leader.icon_player = v;
        }
        if let Some(v) = self.icon_player_mobile_no {
            leader.icon_player_mobile_no = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, amount: f64) -> RosterEntry {
        RosterEntry {
            player_id: id.to_string(),
            player_name: format!("Player {}", id),
            sold_amount: amount,
            category: Some("Batsman".to_string()),
        }
    }

    #[test]
    fn test_budget_unlimited_until_max_set() {
        let mut leader = NewLeader::new("L", "Lions").into_leader(1, None).unwrap();
        assert_eq!(leader.remaining_budget(1500.0), None);

        leader.max_amount = 5000.0;
        assert_eq!(leader.remaining_budget(1500.0), Some(3500.0));
        assert_eq!(leader.remaining_budget(5000.0), Some(0.0));
    }

    #[test]
    fn test_public_validation() {
        let mut nl = NewLeader::new("L", "Lions");
        assert!(nl.validate(RegistrationPath::Admin).is_ok());
        assert!(nl.validate(RegistrationPath::Public).is_err());

        nl.leader_village = Some("V".to_string());
        nl.password = Some("pw".to_string());
        assert!(nl.validate(RegistrationPath::Public).is_ok());

        assert!(NewLeader::default().validate(RegistrationPath::Admin).is_err());
    }

    #[test]
    fn test_from_form_accepts_public_field_names() {
        let fields: FormFields = [
            ("leaderName", "L"),
            ("teamName", "Lions"),
            ("village", "V"),
            ("iconPlayerName", "Star"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let nl = NewLeader::from_form(&fields);
        assert_eq!(nl.leader_village.as_deref(), Some("V"));
        assert_eq!(nl.icon_player.as_deref(), Some("Star"));
    }

    #[test]
    fn test_roster_serializes_as_players() {
        let mut nl = NewLeader::new("L", "Lions");
        nl.password = Some("secret".to_string());
        let mut leader = nl.into_leader(3, None).unwrap();
        leader.roster.push(entry("p1", 100.0));
        let json = serde_json::to_value(&leader).unwrap();

        assert_eq!(json["teamNumber"], 3);
        assert_eq!(json["players"][0]["playerId"], "p1");
        assert!(json.get("password").is_none());
    }
}
