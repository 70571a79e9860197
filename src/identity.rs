// 🪪 Identity Store - players and team leaders
//
// Owns Player and Leader records. Serial numbers and team numbers are
// assigned inside the same transaction as the insert, under the single
// database writer; UNIQUE columns reject anything that slips past.
//
// Photos live in the object store. A replaced or deleted photo is released
// best-effort: the record change is authoritative even if cleanup lags.

use crate::db::{self, parse_optional_timestamp, parse_timestamp, record_event, AuditEvent, Database};
use crate::entities::{
    BattingStyle, BowlingStyle, EconomicallyWeaker, Leader, LeaderUpdate, NewLeader, NewPlayer,
    Player, PlayerCategory, PlayerStatus, PlayerUpdate, RegistrationPath, RosterEntry,
};
use crate::error::{is_constraint_violation, AuctionError, Result};
use crate::notifier::{EventNotifier, NEW_LEADER, NEW_PLAYER};
use crate::object_store::{release, SharedObjectStore, Upload};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

pub const PLAYER_FOLDER: &str = "players";
pub const LEADER_FOLDER: &str = "leaders";
pub const DEFAULT_PLAYER_PAGE_SIZE: u32 = 20;
pub const DEFAULT_LEADER_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;

// ============================================================================
// PAGINATION
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    fn new(items: Vec<T>, page: u32, page_size: u32, total: i64) -> Self {
        let size = i64::from(page_size);
        Page {
            items,
            page,
            page_size,
            total,
            total_pages: (total + size - 1) / size,
        }
    }
}

/// Clamp client-supplied paging to sane values (1-based pages)
fn normalize_paging(page: Option<u32>, page_size: Option<u32>, default_size: u32) -> (u32, u32) {
    let page = page.unwrap_or(1).max(1);
    let size = page_size.unwrap_or(default_size).clamp(1, MAX_PAGE_SIZE);
    (page, size)
}

/// Row offset of a page; widened so the largest `u32` page cannot overflow
fn page_offset(page: u32, page_size: u32) -> i64 {
    i64::from(page - 1) * i64::from(page_size)
}

// ============================================================================
// IDENTITY STORE
// ============================================================================

#[derive(Clone)]
pub struct IdentityStore {
    db: Database,
    objects: SharedObjectStore,
    notifier: EventNotifier,
}

impl IdentityStore {
    pub fn new(db: Database, objects: SharedObjectStore, notifier: EventNotifier) -> Self {
        IdentityStore {
            db,
            objects,
            notifier,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ------------------------------------------------------------------------
    // Players
    // ------------------------------------------------------------------------

    /// Register a player. Public registrations are broadcast as `newPlayer`.
    pub async fn create_player(
        &self,
        new_player: NewPlayer,
        photo: Option<Upload>,
        path: RegistrationPath,
    ) -> Result<Player> {
        let new_player = match path {
            RegistrationPath::Public => {
                new_player.for_public_registration(Utc::now().date_naive())?
            }
            RegistrationPath::Admin => new_player,
        };
        if new_player.name.is_none() {
            return Err(AuctionError::validation("Name is required"));
        }

        let photo_url = match &photo {
            Some(upload) => Some(self.objects.store(upload, PLAYER_FOLDER).await?),
            None => None,
        };

        let result = self.db.with_transaction(|tx| {
            let serial_no = match new_player.serial_no {
                Some(n) => {
                    if serial_taken(tx, n, None)? {
                        return Err(AuctionError::duplicate(format!(
                            "Serial number {} is already in use",
                            n
                        )));
                    }
                    n
                }
                None => db::next_number(tx, "players", "serial_no")?,
            };

            let player = new_player.into_player(serial_no, photo_url.clone())?;
            match insert_player(tx, &player) {
                Ok(()) => {}
                Err(e) if is_constraint_violation(&e) => {
                    return Err(AuctionError::duplicate(format!(
                        "Serial number {} is already in use",
                        serial_no
                    )))
                }
                Err(e) => return Err(e.into()),
            }

            record_event(
                tx,
                AuditEvent::new(
                    "player_registered",
                    "player",
                    &player.id,
                    serde_json::json!({ "serialNo": player.serial_no, "name": player.name }),
                    actor(path),
                ),
            );
            Ok(player)
        });

        let player = match result {
            Ok(player) => player,
            Err(e) => {
                // The record never landed; do not leave the photo behind
                release(self.objects.as_ref(), photo_url.as_deref()).await;
                return Err(e);
            }
        };

        tracing::info!(
            player_id = %player.id,
            serial_no = player.serial_no,
            path = ?path,
            "Player registered"
        );
        if path == RegistrationPath::Public {
            self.notifier.publish_entity(NEW_PLAYER, &player);
        }
        Ok(player)
    }

    pub fn get_player(&self, id: &str) -> Result<Player> {
        self.db
            .with_conn(|conn| find_player(conn, id))?
            .ok_or_else(|| AuctionError::not_found("Player", id))
    }

    /// Players ordered by serial number
    pub fn list_players(&self, page: Option<u32>, page_size: Option<u32>) -> Result<Page<Player>> {
        let (page, size) = normalize_paging(page, page_size, DEFAULT_PLAYER_PAGE_SIZE);
        self.db.with_conn(|conn| {
            let total = db::count_rows(conn, "players")?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM players ORDER BY serial_no ASC LIMIT ?1 OFFSET ?2",
                PLAYER_COLUMNS
            ))?;
            let items = stmt
                .query_map(params![size, page_offset(page, size)], player_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(Page::new(items, page, size, total))
        })
    }

    /// Partial update. A new photo replaces the old one, which is released
    /// only after the record points at the new URL.
    pub async fn update_player(
        &self,
        id: &str,
        update: PlayerUpdate,
        photo: Option<Upload>,
    ) -> Result<Player> {
        let existing = self.get_player(id)?;

        let new_photo = match &photo {
            Some(upload) => Some(self.objects.store(upload, PLAYER_FOLDER).await?),
            None => None,
        };

        let result = self.db.with_transaction(|tx| {
            let mut player =
                find_player(tx, id)?.ok_or_else(|| AuctionError::not_found("Player", id))?;

            if let Some(serial_no) = update.serial_no {
                if serial_taken(tx, serial_no, Some(id))? {
                    return Err(AuctionError::duplicate(format!(
                        "Serial number {} is already in use",
                        serial_no
                    )));
                }
            }

            update.apply(&mut player);
            if let Some(url) = &new_photo {
                player.profile_photo = Some(url.clone());
            }
            player.updated_at = Utc::now();

            match update_player_profile(tx, &player) {
                Ok(_) => {}
                Err(e) if is_constraint_violation(&e) => {
                    return Err(AuctionError::duplicate("Serial number is already in use"))
                }
                Err(e) => return Err(e.into()),
            }

            record_event(
                tx,
                AuditEvent::new(
                    "player_updated",
                    "player",
                    id,
                    serde_json::json!({ "photoReplaced": new_photo.is_some() }),
                    "admin",
                ),
            );
            Ok(player)
        });

        match result {
            Ok(player) => {
                if new_photo.is_some() {
                    release(self.objects.as_ref(), existing.profile_photo.as_deref()).await;
                }
                tracing::info!(player_id = %id, "Player updated");
                Ok(player)
            }
            Err(e) => {
                release(self.objects.as_ref(), new_photo.as_deref()).await;
                Err(e)
            }
        }
    }

    /// Delete a player, releasing the photo first (best-effort).
    pub async fn delete_player(&self, id: &str) -> Result<()> {
        let player = self.get_player(id)?;

        release(self.objects.as_ref(), player.profile_photo.as_deref()).await;

        self.db.with_transaction(|tx| {
            let removed = tx.execute("DELETE FROM players WHERE id = ?1", [id])?;
            if removed == 0 {
                return Err(AuctionError::not_found("Player", id));
            }
            record_event(
                tx,
                AuditEvent::new(
                    "player_deleted",
                    "player",
                    id,
                    serde_json::json!({ "serialNo": player.serial_no }),
                    "admin",
                ),
            );
            Ok(())
        })?;

        tracing::info!(player_id = %id, "Player deleted");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Leaders / Teams
    // ------------------------------------------------------------------------

    /// Register a team leader. Public registrations are broadcast as `newLeader`.
    pub async fn create_leader(
        &self,
        new_leader: NewLeader,
        logo: Option<Upload>,
        path: RegistrationPath,
    ) -> Result<Leader> {
        new_leader.validate(path)?;
        self.db
            .with_conn(|conn| ensure_leader_is_new(conn, &new_leader, path))?;

        let logo_url = match &logo {
            Some(upload) => Some(self.objects.store(upload, LEADER_FOLDER).await?),
            None => None,
        };

        let result = self.db.with_transaction(|tx| {
            // Checked again: another registration may have landed meanwhile
            ensure_leader_is_new(tx, &new_leader, path)?;

            let team_number = db::next_number(tx, "leaders", "team_number")?;
            let leader = new_leader.clone().into_leader(team_number, logo_url.clone())?;
            match insert_leader(tx, &leader) {
                Ok(()) => {}
                Err(e) if is_constraint_violation(&e) => {
                    return Err(AuctionError::duplicate(format!(
                        "Team number {} is already in use",
                        team_number
                    )))
                }
                Err(e) => return Err(e.into()),
            }

            record_event(
                tx,
                AuditEvent::new(
                    "leader_registered",
                    "leader",
                    &leader.id,
                    serde_json::json!({ "teamNumber": team_number, "teamName": leader.team_name }),
                    actor(path),
                ),
            );
            Ok(leader)
        });

        let leader = match result {
            Ok(leader) => leader,
            Err(e) => {
                release(self.objects.as_ref(), logo_url.as_deref()).await;
                return Err(e);
            }
        };

        tracing::info!(
            leader_id = %leader.id,
            team_number = leader.team_number,
            team = %leader.team_name,
            "Leader registered"
        );
        if path == RegistrationPath::Public {
            self.notifier.publish_entity(NEW_LEADER, &leader);
        }
        Ok(leader)
    }

    pub fn get_leader(&self, id: &str) -> Result<Leader> {
        self.db
            .with_conn(|conn| find_leader(conn, id))?
            .ok_or_else(|| AuctionError::not_found("Leader", id))
    }

    /// Teams ordered by team number, rosters included
    pub fn list_leaders(&self, page: Option<u32>, page_size: Option<u32>) -> Result<Page<Leader>> {
        let (page, size) = normalize_paging(page, page_size, DEFAULT_LEADER_PAGE_SIZE);
        self.db.with_conn(|conn| {
            let total = db::count_rows(conn, "leaders")?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM leaders ORDER BY team_number ASC LIMIT ?1 OFFSET ?2",
                LEADER_COLUMNS
            ))?;
            let mut items = stmt
                .query_map(params![size, page_offset(page, size)], leader_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for leader in &mut items {
                leader.roster = load_roster(conn, &leader.id)?;
            }
            Ok(Page::new(items, page, size, total))
        })
    }

    /// Every team, unpaged (reconciliation and bulk operations)
    pub fn all_leaders(&self) -> Result<Vec<Leader>> {
        self.db.with_conn(all_leaders)
    }

    pub async fn update_leader(
        &self,
        id: &str,
        update: LeaderUpdate,
        logo: Option<Upload>,
    ) -> Result<Leader> {
        let existing = self.get_leader(id)?;

        let new_logo = match &logo {
            Some(upload) => Some(self.objects.store(upload, LEADER_FOLDER).await?),
            None => None,
        };

        let result = self.db.with_transaction(|tx| {
            let mut leader =
                find_leader(tx, id)?.ok_or_else(|| AuctionError::not_found("Leader", id))?;
            update.apply(&mut leader);
            if let Some(url) = &new_logo {
                leader.team_logo = Some(url.clone());
            }
            leader.updated_at = Utc::now();
            update_leader_profile(tx, &leader)?;

            record_event(
                tx,
                AuditEvent::new(
                    "leader_updated",
                    "leader",
                    id,
                    serde_json::json!({ "logoReplaced": new_logo.is_some() }),
                    "admin",
                ),
            );
            Ok(leader)
        });

        match result {
            Ok(leader) => {
                if new_logo.is_some() {
                    release(self.objects.as_ref(), existing.team_logo.as_deref()).await;
                }
                tracing::info!(leader_id = %id, "Leader updated");
                Ok(leader)
            }
            Err(e) => {
                release(self.objects.as_ref(), new_logo.as_deref()).await;
                Err(e)
            }
        }
    }

    pub async fn delete_leader(&self, id: &str) -> Result<()> {
        let leader = self.get_leader(id)?;

        release(self.objects.as_ref(), leader.team_logo.as_deref()).await;

        self.db.with_transaction(|tx| {
            let removed = tx.execute("DELETE FROM leaders WHERE id = ?1", [id])?;
            if removed == 0 {
                return Err(AuctionError::not_found("Leader", id));
            }
            record_event(
                tx,
                AuditEvent::new(
                    "leader_deleted",
                    "leader",
                    id,
                    serde_json::json!({ "teamNumber": leader.team_number }),
                    "admin",
                ),
            );
            Ok(())
        })?;

        tracing::info!(leader_id = %id, "Leader deleted");
        Ok(())
    }

    /// Set the same max amount on every team. Returns teams updated.
    pub fn set_max_amount_all(&self, amount: f64) -> Result<usize> {
        self.db.with_transaction(|tx| {
            let updated = tx.execute(
                "UPDATE leaders SET max_amount = ?1, updated_at = ?2",
                params![amount, Utc::now().to_rfc3339()],
            )?;
            record_event(
                tx,
                AuditEvent::new(
                    "max_amount_set",
                    "leader",
                    "*",
                    serde_json::json!({ "maxAmount": amount, "teams": updated }),
                    "admin",
                ),
            );
            Ok(updated)
        })
    }
}

fn actor(path: RegistrationPath) -> &'static str {
    match path {
        RegistrationPath::Admin => "admin",
        RegistrationPath::Public => "public",
    }
}

// ============================================================================
// PLAYER ROWS
// ============================================================================

const PLAYER_COLUMNS: &str = "id, serial_no, name, dob, age, category, village, mobile_no,
    batting_style, bowling_style, economically_weaker, base_price, profile_photo, status,
    sold_to, sold_price, sold_at, team_name, created_at, updated_at";

fn player_from_row(row: &Row<'_>) -> rusqlite::Result<Player> {
    let dob: Option<String> = row.get(3)?;
    let category: Option<String> = row.get(5)?;
    let batting: Option<String> = row.get(8)?;
    let bowling: Option<String> = row.get(9)?;
    let ew: String = row.get(10)?;
    let status: String = row.get(13)?;
    let created_at: String = row.get(18)?;
    let updated_at: String = row.get(19)?;

    Ok(Player {
        id: row.get(0)?,
        serial_no: row.get(1)?,
        name: row.get(2)?,
        dob: dob.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        age: row.get(4)?,
        category: category.as_deref().and_then(PlayerCategory::parse),
        village: row.get(6)?,
        mobile_no: row.get(7)?,
        batting_style: batting.as_deref().and_then(BattingStyle::parse),
        bowling_style: bowling.as_deref().and_then(BowlingStyle::parse),
        economically_weaker: EconomicallyWeaker::parse(&ew).unwrap_or_default(),
        base_price: row.get(11)?,
        profile_photo: row.get(12)?,
        status: PlayerStatus::parse(&status).unwrap_or(PlayerStatus::Unknown),
        sold_to: row.get(14)?,
        sold_price: row.get(15)?,
        sold_at: parse_optional_timestamp(16, row.get(16)?)?,
        team_name: row.get(17)?,
        created_at: parse_timestamp(18, &created_at)?,
        updated_at: parse_timestamp(19, &updated_at)?,
    })
}

fn format_dob(dob: Option<NaiveDate>) -> Option<String> {
    dob.map(|d| d.format("%Y-%m-%d").to_string())
}

fn insert_player(conn: &Connection, p: &Player) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO players ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
             ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
            PLAYER_COLUMNS
        ),
        params![
            p.id,
            p.serial_no,
            p.name,
            format_dob(p.dob),
            p.age,
            p.category.map(|c| c.as_str()),
            p.village,
            p.mobile_no,
            p.batting_style.map(|s| s.as_str()),
            p.bowling_style.map(|s| s.as_str()),
            p.economically_weaker.as_str(),
            p.base_price,
            p.profile_photo,
            p.status.as_str(),
            p.sold_to,
            p.sold_price,
            p.sold_at.map(|t| t.to_rfc3339()),
            p.team_name,
            p.created_at.to_rfc3339(),
            p.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Writes profile columns only; the sale cache is owned by the coordinator.
fn update_player_profile(conn: &Connection, p: &Player) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE players SET serial_no = ?2, name = ?3, dob = ?4, age = ?5, category = ?6,
            village = ?7, mobile_no = ?8, batting_style = ?9, bowling_style = ?10,
            economically_weaker = ?11, base_price = ?12, profile_photo = ?13,
            updated_at = ?14
         WHERE id = ?1",
        params![
            p.id,
            p.serial_no,
            p.name,
            format_dob(p.dob),
            p.age,
            p.category.map(|c| c.as_str()),
            p.village,
            p.mobile_no,
            p.batting_style.map(|s| s.as_str()),
            p.bowling_style.map(|s| s.as_str()),
            p.economically_weaker.as_str(),
            p.base_price,
            p.profile_photo,
            p.updated_at.to_rfc3339(),
        ],
    )
}

pub(crate) fn find_player(conn: &Connection, id: &str) -> Result<Option<Player>> {
    let player = conn
        .query_row(
            &format!("SELECT {} FROM players WHERE id = ?1", PLAYER_COLUMNS),
            [id],
            player_from_row,
        )
        .optional()?;
    Ok(player)
}

pub(crate) fn all_players(conn: &Connection) -> Result<Vec<Player>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM players ORDER BY serial_no ASC",
        PLAYER_COLUMNS
    ))?;
    let players = stmt
        .query_map([], player_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(players)
}

fn serial_taken(conn: &Connection, serial_no: i64, except_id: Option<&str>) -> Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM players WHERE serial_no = ?1",
            [serial_no],
            |row| row.get(0),
        )
        .optional()?;
    Ok(match found {
        Some(owner) => except_id != Some(owner.as_str()),
        None => false,
    })
}

/// Write the sale cache onto a player and flip it to Sold.
pub(crate) fn mark_player_sold(
    conn: &Connection,
    player_id: &str,
    team_id: &str,
    team_name: &str,
    amount: f64,
    sold_at: DateTime<Utc>,
) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE players SET status = 'Sold', sold_to = ?2, sold_price = ?3, sold_at = ?4,
            team_name = ?5, updated_at = ?6
         WHERE id = ?1",
        params![
            player_id,
            team_id,
            amount,
            sold_at.to_rfc3339(),
            team_name,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(updated)
}

/// Drop a sale cache that has no ledger entry behind it.
pub(crate) fn clear_player_sale(conn: &Connection, player_id: &str) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE players SET status = 'Available', sold_to = NULL, sold_price = NULL,
            sold_at = NULL, team_name = NULL, updated_at = ?2
         WHERE id = ?1",
        params![player_id, Utc::now().to_rfc3339()],
    )?;
    Ok(updated)
}

// ============================================================================
// LEADER ROWS
// ============================================================================

const LEADER_COLUMNS: &str = "id, team_name, team_number, team_logo, leader_name,
    leader_village, leader_mobile_no, icon_player, icon_player_mobile_no, max_amount,
    created_at, updated_at";

fn leader_from_row(row: &Row<'_>) -> rusqlite::Result<Leader> {
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(Leader {
        id: row.get(0)?,
        team_name: row.get(1)?,
        team_number: row.get(2)?,
        team_logo: row.get(3)?,
        leader_name: row.get(4)?,
        leader_village: row.get(5)?,
        leader_mobile_no: row.get(6)?,
        icon_player: row.get(7)?,
        icon_player_mobile_no: row.get(8)?,
        max_amount: row.get(9)?,
        roster: Vec::new(),
        created_at: parse_timestamp(10, &created_at)?,
        updated_at: parse_timestamp(11, &updated_at)?,
    })
}

fn insert_leader(conn: &Connection, l: &Leader) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO leaders ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            LEADER_COLUMNS
        ),
        params![
            l.id,
            l.team_name,
            l.team_number,
            l.team_logo,
            l.leader_name,
            l.leader_village,
            l.leader_mobile_no,
            l.icon_player,
            l.icon_player_mobile_no,
            l.max_amount,
            l.created_at.to_rfc3339(),
            l.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn update_leader_profile(conn: &Connection, l: &Leader) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE leaders SET team_name = ?2, team_logo = ?3, leader_name = ?4,
            leader_village = ?5, leader_mobile_no = ?6, icon_player = ?7,
            icon_player_mobile_no = ?8, updated_at = ?9
         WHERE id = ?1",
        params![
            l.id,
            l.team_name,
            l.team_logo,
            l.leader_name,
            l.leader_village,
            l.leader_mobile_no,
            l.icon_player,
            l.icon_player_mobile_no,
            l.updated_at.to_rfc3339(),
        ],
    )
}

pub(crate) fn find_leader(conn: &Connection, id: &str) -> Result<Option<Leader>> {
    let leader = conn
        .query_row(
            &format!("SELECT {} FROM leaders WHERE id = ?1", LEADER_COLUMNS),
            [id],
            leader_from_row,
        )
        .optional()?;

    match leader {
        Some(mut leader) => {
            leader.roster = load_roster(conn, &leader.id)?;
            Ok(Some(leader))
        }
        None => Ok(None),
    }
}

pub(crate) fn all_leaders(conn: &Connection) -> Result<Vec<Leader>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM leaders ORDER BY team_number ASC",
        LEADER_COLUMNS
    ))?;
    let mut leaders = stmt
        .query_map([], leader_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for leader in &mut leaders {
        leader.roster = load_roster(conn, &leader.id)?;
    }
    Ok(leaders)
}

/// Duplicate rules: admin path keys on leader name, public path on mobile
/// number or team name (case-insensitive).
fn ensure_leader_is_new(conn: &Connection, new: &NewLeader, path: RegistrationPath) -> Result<()> {
    let existing: Option<String> = match path {
        RegistrationPath::Admin => conn
            .query_row(
                "SELECT id FROM leaders WHERE leader_name = ?1 LIMIT 1",
                params![new.leader_name],
                |row| row.get(0),
            )
            .optional()?,
        RegistrationPath::Public => conn
            .query_row(
                "SELECT id FROM leaders
                 WHERE (?1 IS NOT NULL AND leader_mobile_no = ?1)
                    OR lower(team_name) = lower(?2)
                 LIMIT 1",
                params![new.leader_mobile_no, new.team_name],
                |row| row.get(0),
            )
            .optional()?,
    };

    match (existing, path) {
        (None, _) => Ok(()),
        (Some(_), RegistrationPath::Admin) => Err(AuctionError::duplicate(
            "This leader already has a team! One leader cannot have multiple teams.",
        )),
        (Some(_), RegistrationPath::Public) => Err(AuctionError::duplicate(
            "A leader with this mobile number or team name already exists",
        )),
    }
}

// ============================================================================
// ROSTER ROWS
// ============================================================================

pub(crate) fn load_roster(conn: &Connection, leader_id: &str) -> Result<Vec<RosterEntry>> {
    let mut stmt = conn.prepare(
        "SELECT player_id, player_name, sold_amount, category
         FROM roster_entries WHERE leader_id = ?1 ORDER BY id ASC",
    )?;
    let roster = stmt
        .query_map([leader_id], |row| {
            Ok(RosterEntry {
                player_id: row.get(0)?,
                player_name: row.get(1)?,
                sold_amount: row.get(2)?,
                category: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(roster)
}

pub(crate) fn upsert_roster_entry(
    conn: &Connection,
    leader_id: &str,
    entry: &RosterEntry,
) -> Result<()> {
    conn.execute(
        "INSERT INTO roster_entries (leader_id, player_id, player_name, sold_amount, category, added_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(player_id) DO UPDATE SET
            leader_id = excluded.leader_id,
            player_name = excluded.player_name,
            sold_amount = excluded.sold_amount,
            category = excluded.category",
        params![
            leader_id,
            entry.player_id,
            entry.player_name,
            entry.sold_amount,
            entry.category,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_roster_entry(conn: &Connection, player_id: &str) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM roster_entries WHERE player_id = ?1",
        [player_id],
    )?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::testing::RecordingObjectStore;
    use std::sync::Arc;

    fn store_with(objects: Arc<RecordingObjectStore>) -> IdentityStore {
        let db = Database::open_in_memory().unwrap();
        IdentityStore::new(db, objects, EventNotifier::new(16))
    }

    fn photo() -> Upload {
        Upload::new(b"img".to_vec(), "image/png", "face.png")
    }

    #[tokio::test]
    async fn test_create_player_roundtrip_defaults() {
        let store = store_with(Arc::new(RecordingObjectStore::new()));
        let mut np = NewPlayer::named("A");
        np.village = Some("V".to_string());
        np.category = Some(PlayerCategory::Batsman);

        let created = store
            .create_player(np, None, RegistrationPath::Admin)
            .await
            .unwrap();
        let fetched = store.get_player(&created.id).unwrap();

        assert_eq!(fetched.status, PlayerStatus::Available);
        assert_eq!(fetched.economically_weaker, EconomicallyWeaker::No);
        assert_eq!(fetched.village.as_deref(), Some("V"));
        assert_eq!(fetched.category, Some(PlayerCategory::Batsman));
        assert_eq!(fetched.serial_no, 1);
    }

    #[tokio::test]
    async fn test_create_player_without_name_fails() {
        let store = store_with(Arc::new(RecordingObjectStore::new()));
        let err = store
            .create_player(NewPlayer::default(), None, RegistrationPath::Admin)
            .await
            .unwrap_err();
        assert!(matches!(err, AuctionError::Validation(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_serial_numbers_are_sequential_and_distinct() {
        let store = store_with(Arc::new(RecordingObjectStore::new()));

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create_player(NewPlayer::named(&format!("P{}", i)), None, RegistrationPath::Admin)
                    .await
                    .unwrap()
                    .serial_no
            }));
        }

        let mut serials = Vec::new();
        for h in handles {
            serials.push(h.await.unwrap());
        }
        serials.sort();
        assert_eq!(serials, (1..=20).collect::<Vec<i64>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_team_numbers_are_sequential_and_distinct() {
        let store = store_with(Arc::new(RecordingObjectStore::new()));

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create_leader(
                        NewLeader::new(&format!("L{}", i), &format!("Team {}", i)),
                        None,
                        RegistrationPath::Admin,
                    )
                    .await
                    .unwrap()
                    .team_number
            }));
        }

        let mut numbers = Vec::new();
        for h in handles {
            numbers.push(h.await.unwrap());
        }
        numbers.sort();
        assert_eq!(numbers, (1..=16).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_photo_store_failure_creates_nothing() {
        let objects = Arc::new(RecordingObjectStore::failing_stores());
        let store = store_with(objects.clone());

        let err = store
            .create_player(NewPlayer::named("A"), Some(photo()), RegistrationPath::Admin)
            .await
            .unwrap_err();
        assert!(matches!(err, AuctionError::Storage(_)));
        assert!(err.is_retryable());

        let err = store
            .create_leader(NewLeader::new("L", "Lions"), Some(photo()), RegistrationPath::Admin)
            .await
            .unwrap_err();
        assert!(matches!(err, AuctionError::Storage(_)));

        assert_eq!(store.list_players(None, None).unwrap().total, 0);
        assert_eq!(store.list_leaders(None, None).unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_explicit_duplicate_serial_rejected_and_photo_released() {
        let objects = Arc::new(RecordingObjectStore::new());
        let store = store_with(objects.clone());
        store
            .create_player(NewPlayer::named("A"), None, RegistrationPath::Admin)
            .await
            .unwrap();

        let mut np = NewPlayer::named("B");
        np.serial_no = Some(1);
        let err = store
            .create_player(np, Some(photo()), RegistrationPath::Admin)
            .await
            .unwrap_err();

        assert!(matches!(err, AuctionError::Duplicate(_)));
        assert_eq!(objects.deleted(), objects.stored());
    }

    #[tokio::test]
    async fn test_public_player_registration_is_broadcast() {
        let db = Database::open_in_memory().unwrap();
        let notifier = EventNotifier::new(16);
        let mut rx = notifier.subscribe();
        let store = IdentityStore::new(db, Arc::new(RecordingObjectStore::new()), notifier);

        let mut np = NewPlayer::named("A");
        np.village = Some("V".to_string());
        np.password = Some("pw".to_string());
        let player = store
            .create_player(np, None, RegistrationPath::Public)
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event, NEW_PLAYER);
        assert_eq!(event.payload["_id"], player.id);
    }

    #[tokio::test]
    async fn test_update_without_photo_never_touches_object_store() {
        let objects = Arc::new(RecordingObjectStore::new());
        let store = store_with(objects.clone());
        let created = store
            .create_player(NewPlayer::named("A"), Some(photo()), RegistrationPath::Admin)
            .await
            .unwrap();

        let update = PlayerUpdate {
            name: Some("A".to_string()),
            ..Default::default()
        };
        let updated = store.update_player(&created.id, update, None).await.unwrap();

        assert_eq!(updated.profile_photo, created.profile_photo);
        assert!(objects.deleted().is_empty());
        assert_eq!(objects.stored().len(), 1);
    }

    #[tokio::test]
    async fn test_photo_replacement_releases_old_photo() {
        let objects = Arc::new(RecordingObjectStore::new());
        let store = store_with(objects.clone());
        let created = store
            .create_player(NewPlayer::named("A"), Some(photo()), RegistrationPath::Admin)
            .await
            .unwrap();
        let old = created.profile_photo.clone().unwrap();

        let updated = store
            .update_player(&created.id, PlayerUpdate::default(), Some(photo()))
            .await
            .unwrap();

        assert_ne!(updated.profile_photo.as_deref(), Some(old.as_str()));
        assert_eq!(objects.deleted(), vec![old]);
    }

    #[tokio::test]
    async fn test_photo_replacement_survives_failed_cleanup() {
        let objects = Arc::new(RecordingObjectStore::failing_deletes());
        let store = store_with(objects.clone());
        let created = store
            .create_player(NewPlayer::named("A"), Some(photo()), RegistrationPath::Admin)
            .await
            .unwrap();

        let updated = store
            .update_player(&created.id, PlayerUpdate::default(), Some(photo()))
            .await
            .unwrap();

        assert_eq!(objects.deleted().len(), 1);
        assert_eq!(
            store.get_player(&created.id).unwrap().profile_photo,
            updated.profile_photo
        );
    }

    #[tokio::test]
    async fn test_update_unknown_player_is_not_found() {
        let store = store_with(Arc::new(RecordingObjectStore::new()));
        let err = store
            .update_player("missing", PlayerUpdate::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuctionError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_player_without_photo_skips_object_store() {
        let objects = Arc::new(RecordingObjectStore::new());
        let store = store_with(objects.clone());
        let created = store
            .create_player(NewPlayer::named("A"), None, RegistrationPath::Admin)
            .await
            .unwrap();

        store.delete_player(&created.id).await.unwrap();

        assert!(objects.deleted().is_empty());
        assert!(matches!(
            store.get_player(&created.id),
            Err(AuctionError::NotFound { .. })
        ));
        assert!(matches!(
            store.delete_player(&created.id).await,
            Err(AuctionError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_player_releases_photo() {
        let objects = Arc::new(RecordingObjectStore::new());
        let store = store_with(objects.clone());
        let created = store
            .create_player(NewPlayer::named("A"), Some(photo()), RegistrationPath::Admin)
            .await
            .unwrap();

        store.delete_player(&created.id).await.unwrap();
        assert_eq!(objects.deleted(), vec![created.profile_photo.unwrap()]);
    }

    #[tokio::test]
    async fn test_list_players_paginates_by_serial() {
        let store = store_with(Arc::new(RecordingObjectStore::new()));
        for i in 0..5 {
            store
                .create_player(NewPlayer::named(&format!("P{}", i)), None, RegistrationPath::Admin)
                .await
                .unwrap();
        }

        let page = store.list_players(Some(2), Some(2)).unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);
        let serials: Vec<i64> = page.items.iter().map(|p| p.serial_no).collect();
        assert_eq!(serials, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_listing_far_past_the_last_page_is_empty() {
        let store = store_with(Arc::new(RecordingObjectStore::new()));
        store
            .create_player(NewPlayer::named("A"), None, RegistrationPath::Admin)
            .await
            .unwrap();
        store
            .create_leader(NewLeader::new("L", "Lions"), None, RegistrationPath::Admin)
            .await
            .unwrap();

        let players = store.list_players(Some(u32::MAX), Some(100)).unwrap();
        assert!(players.items.is_empty());
        assert_eq!(players.page, u32::MAX);
        assert_eq!(players.total, 1);

        let leaders = store.list_leaders(Some(u32::MAX), Some(u32::MAX)).unwrap();
        assert!(leaders.items.is_empty());
        assert_eq!(leaders.page_size, 100);
    }

    #[tokio::test]
    async fn test_admin_leader_duplicate_by_name() {
        let store = store_with(Arc::new(RecordingObjectStore::new()));
        let first = store
            .create_leader(NewLeader::new("L", "Lions"), None, RegistrationPath::Admin)
            .await
            .unwrap();
        assert_eq!(first.team_number, 1);

        let err = store
            .create_leader(NewLeader::new("L", "Tigers"), None, RegistrationPath::Admin)
            .await
            .unwrap_err();
        assert!(matches!(err, AuctionError::Duplicate(_)));

        let second = store
            .create_leader(NewLeader::new("M", "Tigers"), None, RegistrationPath::Admin)
            .await
            .unwrap();
        assert_eq!(second.team_number, 2);
    }

    #[tokio::test]
    async fn test_public_leader_duplicate_team_name_case_insensitive() {
        let store = store_with(Arc::new(RecordingObjectStore::new()));
        let mut first = NewLeader::new("L", "Lions");
        first.leader_village = Some("V".to_string());
        first.password = Some("pw".to_string());
        first.leader_mobile_no = Some("999".to_string());
        store
            .create_leader(first, None, RegistrationPath::Public)
            .await
            .unwrap();

        let mut same_team = NewLeader::new("M", "LIONS");
        same_team.leader_village = Some("V".to_string());
        same_team.password = Some("pw".to_string());
        let err = store
            .create_leader(same_team, None, RegistrationPath::Public)
            .await
            .unwrap_err();
        assert!(matches!(err, AuctionError::Duplicate(_)));

        let mut same_mobile = NewLeader::new("N", "Eagles");
        same_mobile.leader_village = Some("V".to_string());
        same_mobile.password = Some("pw".to_string());
        same_mobile.leader_mobile_no = Some("999".to_string());
        let err = store
            .create_leader(same_mobile, None, RegistrationPath::Public)
            .await
            .unwrap_err();
        assert!(matches!(err, AuctionError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_leader_logo_replacement_and_delete() {
        let objects = Arc::new(RecordingObjectStore::new());
        let store = store_with(objects.clone());
        let leader = store
            .create_leader(NewLeader::new("L", "Lions"), Some(photo()), RegistrationPath::Admin)
            .await
            .unwrap();
        let old_logo = leader.team_logo.clone().unwrap();

        let update = LeaderUpdate {
            team_name: Some("Lions XI".to_string()),
            ..Default::default()
        };
        let updated = store
            .update_leader(&leader.id, update, Some(photo()))
            .await
            .unwrap();
        assert_eq!(updated.team_name, "Lions XI");
        assert_eq!(objects.deleted(), vec![old_logo]);

        store.delete_leader(&leader.id).await.unwrap();
        assert_eq!(objects.deleted().len(), 2);
        assert!(matches!(
            store.get_leader(&leader.id),
            Err(AuctionError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_set_max_amount_all_updates_every_team() {
        let store = store_with(Arc::new(RecordingObjectStore::new()));
        for (l, t) in [("A", "Lions"), ("B", "Tigers"), ("C", "Eagles")] {
            store
                .create_leader(NewLeader::new(l, t), None, RegistrationPath::Admin)
                .await
                .unwrap();
        }

        assert_eq!(store.set_max_amount_all(10_000.0).unwrap(), 3);
        assert!(store
            .all_leaders()
            .unwrap()
            .iter()
            .all(|l| l.max_amount == 10_000.0));
    }
}
