//! Network compensation engine: sponsor/placement graph, BV roll-up,
//! binary matching, rank and club qualification, bonanza campaigns.

pub mod bonanza_subsystem;
pub mod clock;
pub mod club_subsystem;
pub mod command;
pub mod config;
pub mod engine;
pub mod enumerator;
pub mod error;
pub mod event;
pub mod graph;
pub mod matching_subsystem;
pub mod period;
pub mod population;
pub mod rank_subsystem;
pub mod rng;
pub mod store;
pub mod subsystem;
pub mod tree_view;
pub mod types;
pub mod volume;
