//! Multi-tenant WhatsApp automation core: webhook ingestion, keyword
//! chatbots and a node-graph flow engine over an external gateway.

pub mod ai;
pub mod config;
pub mod dispatch;
pub mod flows;
pub mod gateway;
pub mod store;
