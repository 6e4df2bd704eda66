pub mod commands;
pub mod config;
pub mod engine;
pub mod indicators;
pub mod market_data;
pub mod models;
pub mod optimizer;
pub mod optimizer_status;
pub mod param_utils;
pub mod performance;
pub mod position_book;
pub mod report;
pub mod search;
pub mod strategy;
pub mod trading_rules;
