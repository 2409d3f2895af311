pub mod api;
pub mod clock;
pub mod config;
pub mod handlers;
pub mod humanize;
pub mod ledger;
pub mod observability;
pub mod projects;
pub mod provider;
pub mod queue;
pub mod storage;
pub mod worker;
