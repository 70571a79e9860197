// 🔨 Auction Coordinator - settling a sale
//
// Order of a settlement:
//   1. validate the request shape
//   2. take the per-player lock (held until the end)
//   3. existence / status / budget checks  \  one transaction,
//   4. append to the Sale Ledger           /   the commit point
//   5. player sale fields + roster entry    <- cache, one transaction
//   6. broadcast `playerSold`
//
// Team spend is read from the ledger inside the commit transaction, so two
// sales of different players to one team cannot both pass the budget check.
// If step 5 fails the ledger still says "sold"; reconciliation rebuilds the
// cache from the ledger. Step 5 is an upsert and may race with it.

use crate::db::{record_event, AuditEvent, Database};
use crate::entities::{parse_amount, PlayerStatus, RosterEntry, SaleRecord, SaleRequest, ValidSale};
use crate::error::{AuctionError, Result};
use crate::identity::{find_leader, find_player, upsert_roster_entry, mark_player_sold, IdentityStore};
use crate::ledger::{find_sale_by_player, record_sale_in, team_spend, SaleLedger};
use crate::notifier::{EventNotifier, PLAYER_SOLD};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct AuctionCoordinator {
    identity: IdentityStore,
    ledger: SaleLedger,
    notifier: EventNotifier,
    player_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// What the pre-checks learned about the team
struct SaleTarget {
    team_id: String,
    team_name: String,
    roster_entry: RosterEntry,
}

impl AuctionCoordinator {
    pub fn new(identity: IdentityStore, ledger: SaleLedger, notifier: EventNotifier) -> Self {
        AuctionCoordinator {
            identity,
            ledger,
            notifier,
            player_locks: Arc::new(DashMap::new()),
        }
    }

    fn db(&self) -> &Database {
        self.identity.database()
    }

    fn lock_for(&self, player_id: &str) -> Arc<Mutex<()>> {
        self.player_locks
            .entry(player_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Settle one sale. At most one settlement per player ever succeeds.
    pub async fn settle_sale(&self, request: SaleRequest) -> Result<SaleRecord> {
        let sale = request.validate()?;
        let player_id = sale.player.id.clone();

        let lock = self.lock_for(&player_id);
        let guard = lock.lock().await;
        let result = self.settle_locked(&sale);
        drop(guard);
        drop(lock);

        // Nobody else is waiting on this player: forget the lock
        self.player_locks
            .remove_if(&player_id, |_, l| Arc::strong_count(l) == 1);

        let record = result?;
        self.notifier.publish_entity(PLAYER_SOLD, &record);
        Ok(record)
    }

    fn settle_locked(&self, sale: &ValidSale) -> Result<SaleRecord> {
        let (record, target) = self.commit_sale(sale)?;

        if let Err(e) = self.write_sale_cache(&record, &target) {
            tracing::error!(
                sale_id = %record.id,
                player_id = %record.player.id,
                error = %e,
                "Sale recorded but player/team update failed; run reconciliation"
            );
            return Err(e);
        }

        tracing::info!(
            player_id = %record.player.id,
            team = %target.team_name,
            amount = record.amount(),
            "Player sold"
        );
        Ok(record)
    }

    /// Checks and ledger append under one transaction.
    fn commit_sale(&self, sale: &ValidSale) -> Result<(SaleRecord, SaleTarget)> {
        self.db().with_transaction(|tx| {
            let player = find_player(tx, &sale.player.id)?
                .ok_or_else(|| AuctionError::not_found("Player", &sale.player.id))?;

            // The ledger answers "already sold" before anything else
            if find_sale_by_player(tx, &player.id)?.is_some() {
                return Err(AuctionError::AlreadySold {
                    player_id: player.id,
                });
            }
            if player.status == PlayerStatus::Unknown {
                return Err(AuctionError::validation(
                    "Player is not available for auction",
                ));
            }

            let team = find_leader(tx, &sale.team.id)?
                .ok_or_else(|| AuctionError::not_found("Team", &sale.team.id))?;

            if let Some(remaining) = team.remaining_budget(team_spend(tx, &team.id)?) {
                if sale.amount > remaining {
                    return Err(AuctionError::BudgetExceeded {
                        team_id: team.id,
                        amount: sale.amount,
                        remaining,
                    });
                }
            }

            let record = record_sale_in(tx, sale)?;
            let target = SaleTarget {
                team_id: team.id,
                team_name: team.team_name,
                roster_entry: RosterEntry {
                    player_id: player.id,
                    player_name: player.name,
                    sold_amount: sale.amount,
                    category: player
                        .category
                        .map(|c| c.as_str().to_string())
                        .or_else(|| sale.player.category.clone()),
                },
            };
            Ok((record, target))
        })
    }

    /// Player sale fields and roster entry. Safe to repeat after
    /// reconciliation has already rebuilt them.
    fn write_sale_cache(&self, record: &SaleRecord, target: &SaleTarget) -> Result<()> {
        self.db().with_transaction(|tx| {
            let updated = mark_player_sold(
                tx,
                &record.player.id,
                &target.team_id,
                &target.team_name,
                record.amount(),
                record.sale_details.date,
            )?;
            if updated == 0 {
                tracing::warn!(player_id = %record.player.id, "Sold player vanished before cache update");
            }
            upsert_roster_entry(tx, &target.team_id, &target.roster_entry)?;

            record_event(
                tx,
                AuditEvent::new(
                    "player_sold",
                    "player",
                    &record.player.id,
                    serde_json::json!({
                        "saleId": record.id,
                        "teamId": target.team_id,
                        "amount": record.amount(),
                    }),
                    "auction",
                ),
            );
            Ok(())
        })
    }

    /// Apply one budget ceiling to every team. Returns teams updated.
    pub fn set_max_amount_for_all_teams(&self, amount: &serde_json::Value) -> Result<usize> {
        let amount = parse_amount(amount)
            .filter(|a| *a >= 0.0)
            .ok_or_else(|| AuctionError::validation("Max amount must be a non-negative number"))?;

        let updated = self.identity.set_max_amount_all(amount)?;
        tracing::info!(max_amount = amount, teams = updated, "Max amount set for all teams");
        Ok(updated)
    }

    pub fn ledger(&self) -> &SaleLedger {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{NewLeader, NewPlayer, PlayerSnapshot, RegistrationPath, TeamSnapshot};
    use crate::object_store::testing::RecordingObjectStore;
    use crate::reconciliation::ReconciliationEngine;
    use serde_json::json;

    struct Fixture {
        identity: IdentityStore,
        coordinator: AuctionCoordinator,
        notifier: EventNotifier,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let notifier = EventNotifier::new(64);
        let identity = IdentityStore::new(
            db.clone(),
            Arc::new(RecordingObjectStore::new()),
            notifier.clone(),
        );
        let coordinator =
            AuctionCoordinator::new(identity.clone(), SaleLedger::new(db), notifier.clone());
        Fixture {
            identity,
            coordinator,
            notifier,
        }
    }

    async fn player(f: &Fixture, name: &str) -> crate::entities::Player {
        f.identity
            .create_player(NewPlayer::named(name), None, RegistrationPath::Admin)
            .await
            .unwrap()
    }

    async fn team(f: &Fixture, leader: &str, name: &str) -> crate::entities::Leader {
        f.identity
            .create_leader(NewLeader::new(leader, name), None, RegistrationPath::Admin)
            .await
            .unwrap()
    }

    fn request(player_id: &str, team_id: &str, amount: f64) -> SaleRequest {
        SaleRequest::new(
            PlayerSnapshot {
                id: player_id.to_string(),
                name: "X".to_string(),
                category: None,
                base_price: 0.0,
                profile_photo: None,
            },
            TeamSnapshot {
                id: team_id.to_string(),
                name: "T".to_string(),
                logo: None,
            },
            "L",
            amount,
        )
    }

    #[tokio::test]
    async fn test_settle_sale_updates_player_team_and_ledger() {
        let f = fixture();
        let x = player(&f, "X").await;
        let t = team(&f, "L", "T").await;
        let mut rx = f.notifier.subscribe();

        let record = f
            .coordinator
            .settle_sale(request(&x.id, &t.id, 1500.0))
            .await
            .unwrap();
        assert_eq!(record.amount(), 1500.0);

        let sold = f.identity.get_player(&x.id).unwrap();
        assert_eq!(sold.status, PlayerStatus::Sold);
        assert_eq!(sold.sold_to.as_deref(), Some(t.id.as_str()));
        assert_eq!(sold.sold_price, Some(1500.0));
        assert_eq!(sold.team_name.as_deref(), Some("T"));
        assert!(sold.is_sold());

        let team = f.identity.get_leader(&t.id).unwrap();
        assert_eq!(team.roster.len(), 1);
        assert_eq!(team.roster[0].player_id, x.id);
        assert_eq!(team.roster[0].sold_amount, 1500.0);

        assert_eq!(f.coordinator.ledger().count().unwrap(), 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event, PLAYER_SOLD);
        assert_eq!(event.payload["player"]["_id"], x.id);
    }

    #[tokio::test]
    async fn test_second_settlement_is_already_sold_and_changes_nothing() {
        let f = fixture();
        let x = player(&f, "X").await;
        let t1 = team(&f, "L1", "T1").await;
        let t2 = team(&f, "L2", "T2").await;

        f.coordinator
            .settle_sale(request(&x.id, &t1.id, 1500.0))
            .await
            .unwrap();
        let before = f.identity.get_player(&x.id).unwrap();

        let err = f
            .coordinator
            .settle_sale(request(&x.id, &t2.id, 3000.0))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Player is already sold");

        assert_eq!(f.identity.get_player(&x.id).unwrap(), before);
        assert!(f.identity.get_leader(&t2.id).unwrap().roster.is_empty());
        assert_eq!(f.coordinator.ledger().count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_settlements_exactly_one_wins() {
        let f = fixture();
        let x = player(&f, "X").await;
        let mut teams = Vec::new();
        for i in 0..6 {
            teams.push(team(&f, &format!("L{}", i), &format!("T{}", i)).await);
        }

        let handles: Vec<_> = teams
            .iter()
            .map(|t| {
                let coordinator = f.coordinator.clone();
                let req = request(&x.id, &t.id, 1000.0);
                tokio::spawn(async move { coordinator.settle_sale(req).await })
            })
            .collect();

        let mut wins = 0;
        let mut already_sold = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => wins += 1,
                Err(AuctionError::AlreadySold { .. }) => already_sold += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(already_sold, 5);
        assert_eq!(f.coordinator.ledger().count().unwrap(), 1);

        let rostered: usize = f
            .identity
            .all_leaders()
            .unwrap()
            .iter()
            .map(|l| l.roster.len())
            .sum();
        assert_eq!(rostered, 1);
        assert!(f.coordinator.player_locks.is_empty());
    }

    #[tokio::test]
    async fn test_budget_ceiling_rejects_without_ledger_entry() {
        let f = fixture();
        let a = player(&f, "A").await;
        let b = player(&f, "B").await;
        let t = team(&f, "L", "T").await;
        f.coordinator
            .set_max_amount_for_all_teams(&json!(2000))
            .unwrap();

        f.coordinator
            .settle_sale(request(&a.id, &t.id, 1500.0))
            .await
            .unwrap();
        let err = f
            .coordinator
            .settle_sale(request(&b.id, &t.id, 600.0))
            .await
            .unwrap_err();

        assert!(matches!(err, AuctionError::BudgetExceeded { remaining, .. } if remaining == 500.0));
        assert!(f.coordinator.ledger().find_by_player(&b.id).unwrap().is_none());
        assert_eq!(
            f.identity.get_player(&b.id).unwrap().status,
            PlayerStatus::Available
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sales_to_one_team_respect_budget() {
        let f = fixture();
        let t = team(&f, "L", "T").await;
        f.coordinator
            .set_max_amount_for_all_teams(&json!(1000))
            .unwrap();
        let mut players = Vec::new();
        for i in 0..8 {
            players.push(player(&f, &format!("P{}", i)).await);
        }

        let handles: Vec<_> = players
            .iter()
            .map(|p| {
                let coordinator = f.coordinator.clone();
                let req = request(&p.id, &t.id, 600.0);
                tokio::spawn(async move { coordinator.settle_sale(req).await })
            })
            .collect();

        let mut wins = 0;
        let mut over_budget = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => wins += 1,
                Err(AuctionError::BudgetExceeded { .. }) => over_budget += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(over_budget, 7);

        let spent: f64 = f
            .coordinator
            .ledger()
            .list_sales()
            .unwrap()
            .iter()
            .map(|s| s.amount())
            .sum();
        assert_eq!(spent, 600.0);
        assert_eq!(f.identity.get_leader(&t.id).unwrap().roster.len(), 1);
    }

    #[tokio::test]
    async fn test_budget_counts_ledger_sales_missing_from_roster() {
        let f = fixture();
        let a = player(&f, "A").await;
        let b = player(&f, "B").await;
        let t = team(&f, "L", "T").await;
        f.coordinator
            .set_max_amount_for_all_teams(&json!(1000))
            .unwrap();

        // Committed to the ledger, cache never written
        let sale = request(&a.id, &t.id, 800.0).validate().unwrap();
        f.coordinator.commit_sale(&sale).unwrap();
        assert!(f.identity.get_leader(&t.id).unwrap().roster.is_empty());

        let err = f
            .coordinator
            .settle_sale(request(&b.id, &t.id, 300.0))
            .await
            .unwrap_err();
        assert!(matches!(err, AuctionError::BudgetExceeded { remaining, .. } if remaining == 200.0));
    }

    #[tokio::test]
    async fn test_cache_write_after_reconciliation_succeeds() {
        let f = fixture();
        let x = player(&f, "X").await;
        let t = team(&f, "L", "T").await;
        let engine = ReconciliationEngine::new(f.identity.database().clone());

        let sale = request(&x.id, &t.id, 1500.0).validate().unwrap();
        let (record, target) = f.coordinator.commit_sale(&sale).unwrap();

        // Reconciliation lands between the ledger commit and the cache write
        assert!(!engine.reconcile(false).unwrap().is_consistent());
        f.coordinator.write_sale_cache(&record, &target).unwrap();

        let roster = f.identity.get_leader(&t.id).unwrap().roster;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].player_id, x.id);
        assert_eq!(roster[0].sold_amount, 1500.0);
        assert_eq!(f.identity.get_player(&x.id).unwrap().status, PlayerStatus::Sold);
        assert!(engine.reconcile(true).unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_missing_fields_and_bad_amounts() {
        let f = fixture();
        let x = player(&f, "X").await;
        let t = team(&f, "L", "T").await;

        let mut missing = request(&x.id, &t.id, 100.0);
        missing.leader = None;
        assert!(matches!(
            f.coordinator.settle_sale(missing).await,
            Err(AuctionError::Validation(_))
        ));
        assert!(matches!(
            f.coordinator.settle_sale(request(&x.id, &t.id, -5.0)).await,
            Err(AuctionError::Validation(_))
        ));
        assert_eq!(f.coordinator.ledger().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_references_and_unknown_status() {
        let f = fixture();
        let x = player(&f, "X").await;
        let t = team(&f, "L", "T").await;

        assert!(matches!(
            f.coordinator.settle_sale(request("nope", &t.id, 100.0)).await,
            Err(AuctionError::NotFound { entity: "Player", .. })
        ));
        assert!(matches!(
            f.coordinator.settle_sale(request(&x.id, "nope", 100.0)).await,
            Err(AuctionError::NotFound { entity: "Team", .. })
        ));

        f.identity
            .database()
            .with_conn(|conn| {
                conn.execute("UPDATE players SET status = 'Unknown' WHERE id = ?1", [&x.id])?;
                Ok(())
            })
            .unwrap();
        assert!(matches!(
            f.coordinator.settle_sale(request(&x.id, &t.id, 100.0)).await,
            Err(AuctionError::Validation(_))
        ));
        assert_eq!(f.coordinator.ledger().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_max_amount_validation_leaves_teams_untouched() {
        let f = fixture();
        team(&f, "A", "Lions").await;
        team(&f, "B", "Tigers").await;
        f.coordinator
            .set_max_amount_for_all_teams(&json!("5000"))
            .unwrap();

        for bad in [json!(-5), json!("abc"), json!(null)] {
            assert!(matches!(
                f.coordinator.set_max_amount_for_all_teams(&bad),
                Err(AuctionError::Validation(_))
            ));
        }
        assert!(f
            .identity
            .all_leaders()
            .unwrap()
            .iter()
            .all(|l| l.max_amount == 5000.0));

        assert_eq!(f.coordinator.set_max_amount_for_all_teams(&json!(0)).unwrap(), 2);
    }
}
