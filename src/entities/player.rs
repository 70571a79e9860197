// 🏏 Player Entity - registered tournament player
//
// "Serial number is for the auction board, UUID is IDENTITY"
//
// The sale fields (sold_to, sold_price, sold_at, team_name) are a display
// cache of the Sale Ledger. The ledger decides whether a player is sold.

use super::{non_empty, parse_field, provided, FormFields};
use crate::error::{AuctionError, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// PLAYER ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerCategory {
    Batsman,
    Bowler,
    #[serde(rename = "All-Rounder", alias = "All Rounder")]
    AllRounder,
}

impl PlayerCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerCategory::Batsman => "Batsman",
            PlayerCategory::Bowler => "Bowler",
            PlayerCategory::AllRounder => "All-Rounder",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "batsman" => Some(PlayerCategory::Batsman),
            "bowler" => Some(PlayerCategory::Bowler),
            "all-rounder" | "all rounder" | "allrounder" => Some(PlayerCategory::AllRounder),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BattingStyle {
    #[serde(rename = "Right-Handed")]
    RightHanded,
    #[serde(rename = "Left-Handed")]
    LeftHanded,
}

impl BattingStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BattingStyle::RightHanded => "Right-Handed",
            BattingStyle::LeftHanded => "Left-Handed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "Right-Handed" => Some(BattingStyle::RightHanded),
            "Left-Handed" => Some(BattingStyle::LeftHanded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BowlingStyle {
    #[serde(rename = "Right-Arm Fast")]
    RightArmFast,
    #[serde(rename = "Right-Arm Medium")]
    RightArmMedium,
    #[serde(rename = "Right-Arm Spin")]
    RightArmSpin,
    #[serde(rename = "Left-Arm Fast")]
    LeftArmFast,
    #[serde(rename = "Left-Arm Medium")]
    LeftArmMedium,
    #[serde(rename = "Left-Arm Spin")]
    LeftArmSpin,
}

impl BowlingStyle {
    const ALL: [BowlingStyle; 6] = [
        BowlingStyle::RightArmFast,
        BowlingStyle::RightArmMedium,
        BowlingStyle::RightArmSpin,
        BowlingStyle::LeftArmFast,
        BowlingStyle::LeftArmMedium,
        BowlingStyle::LeftArmSpin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BowlingStyle::RightArmFast => "Right-Arm Fast",
            BowlingStyle::RightArmMedium => "Right-Arm Medium",
            BowlingStyle::RightArmSpin => "Right-Arm Spin",
            BowlingStyle::LeftArmFast => "Left-Arm Fast",
            BowlingStyle::LeftArmMedium => "Left-Arm Medium",
            BowlingStyle::LeftArmSpin => "Left-Arm Spin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL.into_iter().find(|style| style.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EconomicallyWeaker {
    Yes,
    #[default]
    No,
}

impl EconomicallyWeaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            EconomicallyWeaker::Yes => "Yes",
            EconomicallyWeaker::No => "No",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "yes" => Some(EconomicallyWeaker::Yes),
            "no" => Some(EconomicallyWeaker::No),
            _ => None,
        }
    }
}

/// Auction state of a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayerStatus {
    /// Registered, can be put up for sale
    #[default]
    Available,

    /// A ledger entry exists
    Sold,

    /// Withdrawn or unverified; cannot be sold
    Unknown,
}

impl PlayerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerStatus::Available => "Available",
            PlayerStatus::Sold => "Sold",
            PlayerStatus::Unknown => "Unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "Available" => Some(PlayerStatus::Available),
            "Sold" => Some(PlayerStatus::Sold),
            "Unknown" => Some(PlayerStatus::Unknown),
            _ => None,
        }
    }
}

// ============================================================================
// PLAYER ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Stable identity (UUID) - NEVER changes
    #[serde(rename = "_id")]
    pub id: String,

    /// Auction board number, unique, assigned at registration
    pub serial_no: i64,

    pub name: String,
    pub dob: Option<NaiveDate>,
    pub age: Option<u32>,
    pub category: Option<PlayerCategory>,
    pub village: Option<String>,
    pub mobile_no: Option<String>,
    pub batting_style: Option<BattingStyle>,
    pub bowling_style: Option<BowlingStyle>,
    pub economically_weaker: EconomicallyWeaker,
    pub base_price: f64,
    pub profile_photo: Option<String>,
    pub status: PlayerStatus,

    // ========================================================================
    // SALE CACHE (rebuilt from the ledger by reconciliation)
    // ========================================================================
    pub sold_to: Option<String>,
    pub sold_price: Option<f64>,
    pub sold_at: Option<DateTime<Utc>>,
    pub team_name: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Player {
    pub fn is_sold(&self) -> bool {
        self.status == PlayerStatus::Sold && self.sold_to.is_some()
    }
}

/// Age in whole years on `today`, counting a birthday only once it has passed.
pub fn age_on(dob: NaiveDate, today: NaiveDate) -> u32 {
    let mut age = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }
    age.max(0) as u32
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
}

fn parse_money(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

// ============================================================================
// REGISTRATION INPUT
// ============================================================================

/// Fields accepted when registering a player
#[derive(Debug, Clone, Default)]
pub struct NewPlayer {
    pub name: Option<String>,
    pub dob: Option<NaiveDate>,
    pub age: Option<u32>,
    pub category: Option<PlayerCategory>,
    /// Admin may pin a serial number; otherwise the next one is assigned
    pub serial_no: Option<i64>,
    pub village: Option<String>,
    pub mobile_no: Option<String>,
    pub batting_style: Option<BattingStyle>,
    pub bowling_style: Option<BowlingStyle>,
    pub economically_weaker: Option<EconomicallyWeaker>,
    pub base_price: Option<f64>,
    /// Checked for presence on public registration, never persisted
    pub password: Option<String>,
}

impl NewPlayer {
    pub fn named(name: &str) -> Self {
        NewPlayer {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    /// Build from submitted form text fields. Blank values count as absent.
    pub fn from_form(fields: &FormFields) -> Result<Self> {
        Ok(NewPlayer {
            name: non_empty(fields, "name"),
            dob: parse_field(non_empty(fields, "dob"), "dob", parse_date)?,
            age: parse_field(non_empty(fields, "age"), "age", |s| s.parse().ok())?,
            category: parse_field(
                non_empty(fields, "category"),
                "category",
                PlayerCategory::parse,
            )?,
            serial_no: parse_field(non_empty(fields, "serialNo"), "serialNo", |s| {
                s.parse().ok().filter(|n: &i64| *n > 0)
            })?,
            village: non_empty(fields, "village"),
            mobile_no: non_empty(fields, "mobileNo"),
            batting_style: parse_field(
                non_empty(fields, "battingStyle"),
                "battingStyle",
                BattingStyle::parse,
            )?,
            bowling_style: parse_field(
                non_empty(fields, "bowlingStyle"),
                "bowlingStyle",
                BowlingStyle::parse,
            )?,
            economically_weaker: parse_field(
                non_empty(fields, "economicallyWeaker"),
                "economicallyWeaker",
                EconomicallyWeaker::parse,
            )?,
            base_price: parse_field(non_empty(fields, "basePrice"), "basePrice", parse_money)?,
            password: non_empty(fields, "password"),
        })
    }

    /// Public self-registration needs name, village and password,
    /// and derives age from the date of birth.
    pub fn for_public_registration(mut self, today: NaiveDate) -> Result<Self> {
        if self.name.is_none() || self.village.is_none() || self.password.is_none() {
            return Err(AuctionError::validation(
                "Name, Village, and Password are required",
            ));
        }
        // Public path never pins serial numbers
        self.serial_no = None;
        self.age = self.dob.map(|dob| age_on(dob, today));
        Ok(self)
    }

    /// Materialize the record. `serial_no` is decided by the store.
    pub fn into_player(self, serial_no: i64, profile_photo: Option<String>) -> Result<Player> {
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| AuctionError::validation("Name is required"))?;
        let now = Utc::now();

        Ok(Player {
            id: uuid::Uuid::new_v4().to_string(),
            serial_no,
            name,
            dob: self.dob,
            age: self.age,
            category: self.category,
            village: self.village,
            mobile_no: self.mobile_no,
            batting_style: self.batting_style,
            bowling_style: self.bowling_style,
            economically_weaker: self.economically_weaker.unwrap_or_default(),
            base_price: self.base_price.unwrap_or(0.0),
            profile_photo,
            status: PlayerStatus::Available,
            sold_to: None,
            sold_price: None,
            sold_at: None,
            team_name: None,
            created_at: now,
            updated_at: now,
        })
    }
}

// ============================================================================
// PARTIAL UPDATE
// ============================================================================

/// Only `Some` fields are applied. For nullable fields `Some(None)` clears.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerUpdate {
    pub name: Option<String>,
    pub dob: Option<Option<NaiveDate>>,
    pub age: Option<Option<u32>>,
    pub category: Option<Option<PlayerCategory>>,
    pub serial_no: Option<i64>,
    pub village: Option<Option<String>>,
    pub mobile_no: Option<Option<String>>,
    pub economically_weaker: Option<EconomicallyWeaker>,
    pub batting_style: Option<Option<BattingStyle>>,
    pub bowling_style: Option<Option<BowlingStyle>>,
    pub base_price: Option<f64>,
}

impl PlayerUpdate {
    pub fn from_form(fields: &FormFields) -> Result<Self> {
        let name = match provided(fields, "name") {
            Some(None) => return Err(AuctionError::validation("Name cannot be empty")),
            other => other.flatten(),
        };

        Ok(PlayerUpdate {
            name,
            dob: clearable(provided(fields, "dob"), "dob", parse_date)?,
            age: clearable(provided(fields, "age"), "age", |s| s.parse().ok())?,
            category: clearable(provided(fields, "category"), "category", PlayerCategory::parse)?,
            serial_no: parse_field(provided(fields, "serialNo").flatten(), "serialNo", |s| {
                s.parse().ok().filter(|n: &i64| *n > 0)
            })?,
            village: provided(fields, "village"),
            mobile_no: provided(fields, "mobileNo"),
            economically_weaker: parse_field(
                provided(fields, "economicallyWeaker").flatten(),
                "economicallyWeaker",
                EconomicallyWeaker::parse,
            )?,
            batting_style: clearable(
                provided(fields, "battingStyle"),
                "battingStyle",
                BattingStyle::parse,
            )?,
            bowling_style: clearable(
                provided(fields, "bowlingStyle"),
                "bowlingStyle",
                BowlingStyle::parse,
            )?,
            base_price: parse_field(
                provided(fields, "basePrice").flatten(),
                "basePrice",
                parse_money,
            )?,
        })
    }

    /// Apply onto an existing record. Photo changes are handled by the store.
    pub fn apply(self, player: &mut Player) {
        if let Some(name) = self.name {
            player.name = name;
        }
        if let Some(dob) = self.dob {
            player.dob = dob;
        }
        if let Some(age) = self.age {
            player.age = age;
        }
        if let Some(category) = self.category {
            player.category = category;
        }
        if let Some(serial_no) = self.serial_no {
            player.serial_no = serial_no;
        }
        if let Some(village) = self.village {
            player.village = village;
        }
        if let Some(mobile_no) = self.mobile_no {
            player.mobile_no = mobile_no;
        }
        if let Some(ew) = self.economically_weaker {
            player.economically_weaker = ew;
        }
        if let Some(style) = self.batting_style {
            player.batting_style = style;
        }
        if let Some(style) = self.bowling_style {
            player.bowling_style = style;
        }
        if let Some(price) = self.base_price {
            player.base_price = price;
        }
    }
}

fn clearable<T, F>(value: Option<Option<String>>, field: &str, parse: F) -> Result<Option<Option<T>>>
where
    F: FnOnce(&str) -> Option<T>,
{
    match value {
        None => Ok(None),
        Some(None) => Ok(Some(None)),
        Some(raw) => parse_field(raw, field, parse).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(pairs: &[(&str, &str)]) -> FormFields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_new_player_defaults() {
        let player = NewPlayer::named("A").into_player(1, None).unwrap();

        assert_eq!(player.status, PlayerStatus::Available);
        assert_eq!(player.economically_weaker, EconomicallyWeaker::No);
        assert_eq!(player.base_price, 0.0);
        assert!(player.sold_to.is_none());
        assert!(!player.is_sold());
    }

    #[test]
    fn test_new_player_requires_name() {
        let err = NewPlayer::default().into_player(1, None).unwrap_err();
        assert!(matches!(err, AuctionError::Validation(_)));
    }

    #[test]
    fn test_category_accepts_both_spellings() {
        assert_eq!(PlayerCategory::parse("All Rounder"), Some(PlayerCategory::AllRounder));
        assert_eq!(PlayerCategory::parse("All-Rounder"), Some(PlayerCategory::AllRounder));
        assert_eq!(PlayerCategory::parse("Keeper"), None);

        let json = serde_json::to_string(&PlayerCategory::AllRounder).unwrap();
        assert_eq!(json, "\"All-Rounder\"");
        let back: PlayerCategory = serde_json::from_str("\"All Rounder\"").unwrap();
        assert_eq!(back, PlayerCategory::AllRounder);
    }

    #[test]
    fn test_age_counts_birthday_only_after_it_passes() {
        let dob = NaiveDate::from_ymd_opt(2000, 6, 15).unwrap();
        assert_eq!(age_on(dob, NaiveDate::from_ymd_opt(2024, 6, 14).unwrap()), 23);
        assert_eq!(age_on(dob, NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()), 24);
    }

    #[test]
    fn test_public_registration_requires_village_and_password() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let err = NewPlayer::named("A").for_public_registration(today).unwrap_err();
        assert!(matches!(err, AuctionError::Validation(_)));

        let fields = form(&[
            ("name", "A"),
            ("village", "V"),
            ("password", "pw"),
            ("dob", "2000-06-15"),
            ("serialNo", "99"),
        ]);
        let np = NewPlayer::from_form(&fields)
            .unwrap()
            .for_public_registration(today)
            .unwrap();
        assert_eq!(np.age, Some(23));
        assert_eq!(np.serial_no, None);
    }

    #[test]
    fn test_from_form_rejects_bad_enum() {
        let fields = form(&[("name", "A"), ("bowlingStyle", "Underarm")]);
        let err = NewPlayer::from_form(&fields).unwrap_err();
        assert!(err.to_string().contains("bowlingStyle"));
    }

    #[test]
    fn test_password_is_never_serialized() {
        let mut np = NewPlayer::named("A");
        np.password = Some("secret".to_string());
        let player = np.into_player(1, None).unwrap();

        let json = serde_json::to_value(&player).unwrap();
        assert!(json.get("password").is_none());
        assert!(json.get("passwordHash").is_none());
        assert_eq!(json["_id"], player.id);
        assert_eq!(json["serialNo"], 1);
        assert_eq!(json["status"], "Available");
        assert_eq!(json["economicallyWeaker"], "No");
    }

    #[test]
    fn test_update_applies_only_present_fields() {
        let mut player = NewPlayer::named("A").into_player(1, None).unwrap();
        player.village = Some("V".to_string());
        player.category = Some(PlayerCategory::Bowler);

        let update = PlayerUpdate::from_form(&form(&[("name", "B"), ("category", "")])).unwrap();
        update.apply(&mut player);

        assert_eq!(player.name, "B");
        assert_eq!(player.village.as_deref(), Some("V"));
        assert_eq!(player.category, None);
    }

    #[test]
    fn test_update_rejects_blank_name() {
        let err = PlayerUpdate::from_form(&form(&[("name", " ")])).unwrap_err();
        assert!(matches!(err, AuctionError::Validation(_)));
        assert_eq!(
            PlayerUpdate::from_form(&form(&[])).unwrap(),
            PlayerUpdate::default()
        );
    }
}
