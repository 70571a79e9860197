// Cricket Auction - Core Library
// Exposes all modules for use in the admin CLI, API server, and tests

pub mod config;
pub mod coordinator;    // Auction Coordinator - at-most-once settlement
pub mod db;
pub mod entities;       // Player, Leader, SaleRecord
pub mod error;
pub mod identity;       // Identity Store - players and team leaders
pub mod ledger;         // Sale Ledger - source of truth for "sold"
pub mod notifier;       // Event Notifier - real-time fan-out
pub mod object_store;   // Photos and logos
pub mod reconciliation; // Rebuilds the sale cache from the ledger

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::AuctionCoordinator;
pub use db::{get_events_for_entity, insert_event, setup_database, AuditEvent, Database};
pub use entities::{
    Leader, LeaderUpdate, NewLeader, NewPlayer, Player, PlayerStatus, PlayerUpdate,
    RegistrationPath, RosterEntry, SaleRecord, SaleRequest,
};
pub use error::{AuctionError, Result};
pub use identity::{IdentityStore, Page};
pub use ledger::SaleLedger;
pub use notifier::{EventNotifier, NotifierEvent, NEW_LEADER, NEW_PLAYER, PLAYER_SOLD};
pub use object_store::{LocalObjectStore, ObjectStore, SharedObjectStore, Upload};
pub use reconciliation::{
    Discrepancy, DiscrepancyCategory, ReconciliationEngine, ReconciliationReport,
    ReconciliationResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
