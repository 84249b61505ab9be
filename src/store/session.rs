use chrono::{DateTime, Local};

use super::ordered::OrderedMap;
use super::plugin::Plugin;

/// One engine-reported unit of work, mirrored locally.
///
/// Engine ids are small integers and can be reused after an engine restart,
/// so identity is the `unique_key` derived from the id and the local
/// creation time. The key is fixed at construction and never recomputed; a
/// later session reusing the id gets a different key.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: i32,
    pub started_at: DateTime<Local>,
    pub active: bool,
    pub plugins: OrderedMap<Plugin>,
    unique_key: String,
}

impl Session {
    pub fn new(id: i32) -> Self {
        Self::started(id, Local::now())
    }

    pub fn started(id: i32, started_at: DateTime<Local>) -> Self {
        let unique_key = format!("{id}-{}", started_at.timestamp_millis());
        Self {
            id,
            started_at,
            active: true,
            plugins: OrderedMap::new(),
            unique_key,
        }
    }

    pub fn unique_key(&self) -> &str {
        &self.unique_key
    }

    pub fn display_name(&self) -> String {
        let status = if self.active { "" } else { "Inactive, " };
        format!(
            "Session {} - ({status}Started {})",
            self.id,
            self.started_at.format("%H:%M:%S")
        )
    }

    pub fn short_name(&self) -> String {
        format!("Session {}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn unique_key_combines_id_and_start_time() {
        let start = Local.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let session = Session::started(7, start);
        assert_eq!(session.unique_key(), "7-1700000000123");
        assert!(session.active);
        assert!(session.plugins.is_empty());
    }

    #[test]
    fn reused_id_yields_distinct_keys() {
        let first = Session::started(4, Local.timestamp_millis_opt(1_000).unwrap());
        let second = Session::started(4, Local.timestamp_millis_opt(2_000).unwrap());
        assert_ne!(first.unique_key(), second.unique_key());
    }

    #[test]
    fn display_name_reflects_active_flag() {
        let mut session = Session::new(2);
        assert!(session.display_name().starts_with("Session 2 - (Started"));
        session.active = false;
        assert!(session.display_name().contains("Inactive,"));
        assert_eq!(session.short_name(), "Session 2");
    }
}
