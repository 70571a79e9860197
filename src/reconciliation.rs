// ⚖️ Reconciliation Engine - rebuild the sale cache from the ledger
//
// The Sale Ledger is the truth. Player sale fields and team rosters are
// copies of it, written after the ledger commit. If that second write is
// lost, the copies drift; this pass finds the drift and (unless dry run)
// puts the copies back in line with the ledger:
//
//   ledger entry, player not marked     -> MissingSaleFields   -> mark sold
//   player marked, no ledger entry      -> StaleSoldStatus     -> clear
//   ledger entry, no roster entry       -> MissingRosterEntry  -> add entry
//   roster entry, no matching ledger    -> OrphanRosterEntry   -> drop entry

use crate::db::{record_event, AuditEvent, Database};
use crate::entities::{Leader, Player, PlayerStatus, RosterEntry, SaleRecord};
use crate::error::Result;
use crate::identity::{
    all_leaders, all_players, clear_player_sale, delete_roster_entry, upsert_roster_entry,
    mark_player_sold,
};
use crate::ledger::all_sales;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// RECONCILIATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconciliationResult {
    /// Every cached field matches the ledger
    Consistent,

    /// Drift found and left in place (dry run)
    DiscrepanciesFound { count: usize },

    /// Drift found and repaired
    Repaired { count: usize },
}

impl ReconciliationResult {
    pub fn is_consistent(&self) -> bool {
        matches!(self, ReconciliationResult::Consistent)
    }
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub result: ReconciliationResult,
    pub dry_run: bool,
    pub sales_checked: usize,
    pub players_checked: usize,
    pub teams_checked: usize,
    pub discrepancies: Vec<Discrepancy>,
    pub reconciled_at: chrono::DateTime<chrono::Utc>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.result.is_consistent()
    }

    pub fn count(&self, category: DiscrepancyCategory) -> usize {
        self.discrepancies
            .iter()
            .filter(|d| d.category == category)
            .count()
    }

    pub fn summary(&self) -> String {
        let outcome = match &self.result {
            ReconciliationResult::Consistent => "consistent".to_string(),
            ReconciliationResult::DiscrepanciesFound { count } => {
                format!("{} discrepancies found (dry run)", count)
            }
            ReconciliationResult::Repaired { count } => format!("{} discrepancies repaired", count),
        };
        format!(
            "Reconciliation: {} sales, {} players, {} teams checked; {} \
             [missing sale fields: {}, stale sold: {}, missing roster: {}, orphan roster: {}]",
            self.sales_checked,
            self.players_checked,
            self.teams_checked,
            outcome,
            self.count(DiscrepancyCategory::MissingSaleFields),
            self.count(DiscrepancyCategory::StaleSoldStatus),
            self.count(DiscrepancyCategory::MissingRosterEntry),
            self.count(DiscrepancyCategory::OrphanRosterEntry),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discrepancy {
    pub category: DiscrepancyCategory,
    pub player_id: String,
    pub team_id: Option<String>,
    pub amount: f64,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscrepancyCategory {
    MissingSaleFields,
    StaleSoldStatus,
    MissingRosterEntry,
    OrphanRosterEntry,
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    db: Database,

    /// Tolerance for amount comparisons (default: 0.01)
    pub tolerance: f64,
}

impl ReconciliationEngine {
    pub fn new(db: Database) -> Self {
        ReconciliationEngine {
            db,
            tolerance: 0.01,
        }
    }

    /// Compare every cached sale field with the ledger. Reads and repairs
    /// happen in one transaction, so the report matches what was fixed.
    pub fn reconcile(&self, dry_run: bool) -> Result<ReconciliationReport> {
        let report = self.db.with_transaction(|tx| {
            let sales = all_sales(tx)?;
            let players = all_players(tx)?;
            let teams = all_leaders(tx)?;

            let discrepancies = self.detect_discrepancies(&sales, &players, &teams);

            let result = if discrepancies.is_empty() {
                ReconciliationResult::Consistent
            } else if dry_run {
                ReconciliationResult::DiscrepanciesFound {
                    count: discrepancies.len(),
                }
            } else {
                let by_player: HashMap<&str, &SaleRecord> =
                    sales.iter().map(|s| (s.player.id.as_str(), s)).collect();
                let team_names: HashMap<&str, &str> = teams
                    .iter()
                    .map(|t| (t.id.as_str(), t.team_name.as_str()))
                    .collect();

                // Orphans go first: roster player_id is unique
                let mut ordered: Vec<&Discrepancy> = discrepancies.iter().collect();
                ordered.sort_by_key(|d| repair_order(d.category));

                for d in ordered {
                    repair(tx, d, &by_player, &team_names)?;
                }
                ReconciliationResult::Repaired {
                    count: discrepancies.len(),
                }
            };

            Ok(ReconciliationReport {
                result,
                dry_run,
                sales_checked: sales.len(),
                players_checked: players.len(),
                teams_checked: teams.len(),
                discrepancies,
                reconciled_at: chrono::Utc::now(),
            })
        })?;

        if report.is_consistent() {
            tracing::info!("{}", report.summary());
        } else {
            tracing::warn!("{}", report.summary());
        }
        Ok(report)
    }

    /// Pure comparison of ledger against cached copies
    pub fn detect_discrepancies(
        &self,
        sales: &[SaleRecord],
        players: &[Player],
        teams: &[Leader],
    ) -> Vec<Discrepancy> {
        let mut found = Vec::new();
        let sales_by_player: HashMap<&str, &SaleRecord> =
            sales.iter().map(|s| (s.player.id.as_str(), s)).collect();
        let players_by_id: HashMap<&str, &Player> =
            players.iter().map(|p| (p.id.as_str(), p)).collect();
        let teams_by_id: HashMap<&str, &Leader> =
            teams.iter().map(|t| (t.id.as_str(), t)).collect();

        for sale in sales {
            if let Some(player) = players_by_id.get(sale.player.id.as_str()) {
                let marked = player.status == PlayerStatus::Sold
                    && player.sold_to.as_deref() == Some(sale.team.id.as_str())
                    && player
                        .sold_price
                        .map(|p| self.amounts_match(p, sale.amount()))
                        .unwrap_or(false);
                if !marked {
                    found.push(Discrepancy {
                        category: DiscrepancyCategory::MissingSaleFields,
                        player_id: sale.player.id.clone(),
                        team_id: Some(sale.team.id.clone()),
                        amount: sale.amount(),
                        description: format!(
                            "Player '{}' sold to {} for {:.2} but not marked as sold",
                            sale.player.name, sale.team.name, sale.amount()
                        ),
                    });
                }
            }

            if let Some(team) = teams_by_id.get(sale.team.id.as_str()) {
                let listed = team.roster.iter().any(|e| self.entry_matches(e, sale));
                if !listed {
                    found.push(Discrepancy {
                        category: DiscrepancyCategory::MissingRosterEntry,
                        player_id: sale.player.id.clone(),
                        team_id: Some(team.id.clone()),
                        amount: sale.amount(),
                        description: format!(
                            "Player '{}' missing from roster of {}",
                            sale.player.name, team.team_name
                        ),
                    });
                }
            }
        }

        for player in players {
            if player.status == PlayerStatus::Sold
                && !sales_by_player.contains_key(player.id.as_str())
            {
                found.push(Discrepancy {
                    category: DiscrepancyCategory::StaleSoldStatus,
                    player_id: player.id.clone(),
                    team_id: player.sold_to.clone(),
                    amount: player.sold_price.unwrap_or(0.0),
                    description: format!("Player '{}' marked sold with no sale on record", player.name),
                });
            }
        }

        for team in teams {
            for entry in &team.roster {
                let backed = sales_by_player
                    .get(entry.player_id.as_str())
                    .map(|sale| sale.team.id == team.id && self.entry_matches(entry, sale))
                    .unwrap_or(false);
                if !backed {
                    found.push(Discrepancy {
                        category: DiscrepancyCategory::OrphanRosterEntry,
                        player_id: entry.player_id.clone(),
                        team_id: Some(team.id.clone()),
                        amount: entry.sold_amount,
                        description: format!(
                            "Roster of {} lists '{}' without a matching sale",
                            team.team_name, entry.player_name
                        ),
                    });
                }
            }
        }

        found
    }

    fn amounts_match(&self, a: f64, b: f64) -> bool {
        (a - b).abs() < self.tolerance
    }

    fn entry_matches(&self, entry: &RosterEntry, sale: &SaleRecord) -> bool {
        entry.player_id == sale.player.id && self.amounts_match(entry.sold_amount, sale.amount())
    }
}

fn repair_order(category: DiscrepancyCategory) -> u8 {
    match category {
        DiscrepancyCategory::OrphanRosterEntry => 0,
        DiscrepancyCategory::StaleSoldStatus => 1,
        DiscrepancyCategory::MissingSaleFields => 2,
        DiscrepancyCategory::MissingRosterEntry => 3,
    }
}

fn repair(
    conn: &rusqlite::Connection,
    d: &Discrepancy,
    sales: &HashMap<&str, &SaleRecord>,
    team_names: &HashMap<&str, &str>,
) -> Result<()> {
    match d.category {
        DiscrepancyCategory::OrphanRosterEntry => {
            delete_roster_entry(conn, &d.player_id)?;
        }
        DiscrepancyCategory::StaleSoldStatus => {
            clear_player_sale(conn, &d.player_id)?;
        }
        DiscrepancyCategory::MissingSaleFields => {
            if let Some(sale) = sales.get(d.player_id.as_str()) {
                let team_name = team_names
                    .get(sale.team.id.as_str())
                    .copied()
                    .unwrap_or(sale.team.name.as_str());
                mark_player_sold(
                    conn,
                    &sale.player.id,
                    &sale.team.id,
                    team_name,
                    sale.amount(),
                    sale.sale_details.date,
                )?;
            }
        }
        DiscrepancyCategory::MissingRosterEntry => {
            if let Some(sale) = sales.get(d.player_id.as_str()) {
                upsert_roster_entry(
                    conn,
                    &sale.team.id,
                    &RosterEntry {
                        player_id: sale.player.id.clone(),
                        player_name: sale.player.name.clone(),
                        sold_amount: sale.amount(),
                        category: sale.player.category.clone(),
                    },
                )?;
            }
        }
    }

    record_event(
        conn,
        AuditEvent::new(
            "cache_repaired",
            "player",
            &d.player_id,
            serde_json::json!({ "category": d.category, "description": d.description }),
            "reconciliation",
        ),
    );
    Ok(())
}
