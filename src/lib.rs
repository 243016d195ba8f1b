//! feedcast: post fresh feed entries to Telegram channels.
//!
//! One invocation fetches every configured feed, keeps the entries whose
//! effective timestamp falls inside a trailing time window, formats them and
//! delivers them to each category's channel. Scheduling is left to cron or a
//! systemd timer.

pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod feed;
pub mod format;
pub mod pipeline;
pub mod retry;
pub mod util;
pub mod window;
