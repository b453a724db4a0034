//! Usage counters
//!
//! In-memory process statistics for the stats endpoint: commands
//! served since startup, process uptime, and the live guild count
//! (read from the session registry at snapshot time). Counters reset
//! on restart.

use crate::registry::SessionRegistry;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct BotStats {
    started_at: Instant,
    commands_used: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub commands_used: u64,
    pub uptime_secs: u64,
    pub active_guilds: usize,
}

impl BotStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            commands_used: AtomicU64::new(0),
        }
    }

    /// Count one served command. Called once per accepted request,
    /// including ones that end in a domain error.
    pub fn record_command(&self) {
        self.commands_used.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn snapshot(&self, registry: &SessionRegistry) -> StatsSnapshot {
        StatsSnapshot {
            commands_used: self.commands_used.load(Ordering::Relaxed),
            uptime_secs: self.started_at.elapsed().as_secs(),
            active_guilds: registry.guild_count().await,
        }
    }
}

impl Default for BotStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jockey_common::GuildId;

    #[tokio::test]
    async fn test_counts_commands_and_guilds() {
        let stats = BotStats::new();
        let registry = SessionRegistry::new();

        stats.record_command();
        stats.record_command();
        registry.get_or_create(GuildId(1)).await;

        let snap = stats.snapshot(&registry).await;
        assert_eq!(snap.commands_used, 2);
        assert_eq!(snap.active_guilds, 1);
    }
}
