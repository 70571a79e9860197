// 📒 Sale Ledger - append-only record of completed sales
//
// "Is this player sold?" is answered here and nowhere else.
// One row per player: an existence pre-check gives the friendly error,
// the UNIQUE(player_id) constraint makes insert-if-absent atomic.

use crate::db::{parse_timestamp, record_event, AuditEvent, Database};
use crate::entities::{LeaderSnapshot, PlayerSnapshot, SaleDetails, SaleRecord, TeamSnapshot, ValidSale};
use crate::error::{is_constraint_violation, AuctionError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

#[derive(Clone)]
pub struct SaleLedger {
    db: Database,
}

impl SaleLedger {
    pub fn new(db: Database) -> Self {
        SaleLedger { db }
    }

    /// Append a sale. Fails with `AlreadySold` if the player already has one;
    /// nothing is written in that case.
    pub fn record_sale(&self, sale: &ValidSale) -> Result<SaleRecord> {
        self.db.with_transaction(|tx| record_sale_in(tx, sale))
    }

    /// Every sale, oldest first. Ties keep insertion order.
    pub fn list_sales(&self) -> Result<Vec<SaleRecord>> {
        self.db.with_conn(all_sales)
    }

    pub fn find_by_player(&self, player_id: &str) -> Result<Option<SaleRecord>> {
        self.db.with_conn(|conn| find_sale_by_player(conn, player_id))
    }

    pub fn count(&self) -> Result<i64> {
        self.db.with_conn(|conn| crate::db::count_rows(conn, "sales"))
    }
}

/// Append a sale on a connection the caller already holds, so the caller's
/// own checks and this insert commit or roll back together.
pub(crate) fn record_sale_in(conn: &Connection, sale: &ValidSale) -> Result<SaleRecord> {
    let record = SaleRecord::new(
        sale.player.clone(),
        sale.team.clone(),
        sale.leader.clone(),
        sale.amount,
    );

    if sale_exists(conn, &record.player.id)? {
        return Err(AuctionError::AlreadySold {
            player_id: record.player.id,
        });
    }

    match insert_sale(conn, &record) {
        Ok(()) => {}
        Err(e) if is_constraint_violation(&e) => {
            return Err(AuctionError::AlreadySold {
                player_id: record.player.id,
            })
        }
        Err(e) => return Err(e.into()),
    }

    record_event(
        conn,
        AuditEvent::new(
            "sale_recorded",
            "sale",
            &record.id,
            serde_json::json!({
                "playerId": record.player.id,
                "teamId": record.team.id,
                "amount": record.amount(),
            }),
            "auction",
        ),
    );

    tracing::info!(
        sale_id = %record.id,
        player_id = %record.player.id,
        team_id = %record.team.id,
        amount = record.amount(),
        "Sale recorded"
    );
    Ok(record)
}

/// Sum of every ledger amount charged to a team
pub(crate) fn team_spend(conn: &Connection, team_id: &str) -> Result<f64> {
    let spent: f64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0.0) FROM sales WHERE team_id = ?1",
        [team_id],
        |row| row.get(0),
    )?;
    Ok(spent)
}

const SALE_COLUMNS: &str = "sale_id, player_id, player_name, player_category, player_base_price,
    player_photo, team_id, team_name, team_logo, leader_name, amount, sold_at";

fn sale_from_row(row: &Row<'_>) -> rusqlite::Result<SaleRecord> {
    let sold_at: String = row.get(11)?;

    Ok(SaleRecord {
        id: row.get(0)?,
        player: PlayerSnapshot {
            id: row.get(1)?,
            name: row.get(2)?,
            category: row.get(3)?,
            base_price: row.get(4)?,
            profile_photo: row.get(5)?,
        },
        team: TeamSnapshot {
            id: row.get(6)?,
            name: row.get(7)?,
            logo: row.get(8)?,
        },
        leader: LeaderSnapshot { name: row.get(9)? },
        sale_details: SaleDetails {
            amount: row.get(10)?,
            date: parse_timestamp(11, &sold_at)?,
        },
    })
}

fn insert_sale(conn: &Connection, record: &SaleRecord) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO sales ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            SALE_COLUMNS
        ),
        params![
            record.id,
            record.player.id,
            record.player.name,
            record.player.category,
            record.player.base_price,
            record.player.profile_photo,
            record.team.id,
            record.team.name,
            record.team.logo,
            record.leader.name,
            record.sale_details.amount,
            record.sale_details.date.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn sale_exists(conn: &Connection, player_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT seq FROM sales WHERE player_id = ?1",
            [player_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn find_sale_by_player(conn: &Connection, player_id: &str) -> Result<Option<SaleRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {} FROM sales WHERE player_id = ?1", SALE_COLUMNS),
            [player_id],
            sale_from_row,
        )
        .optional()?;
    Ok(record)
}

pub(crate) fn all_sales(conn: &Connection) -> Result<Vec<SaleRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM sales ORDER BY sold_at ASC, seq ASC",
        SALE_COLUMNS
    ))?;
    let sales = stmt
        .query_map([], sale_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(sales)
}
