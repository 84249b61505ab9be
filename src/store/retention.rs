//! Retention policy over the session map.

use super::ordered::OrderedMap;
use super::session::Session;

/// Discard inactive sessions beyond the retention count.
///
/// `keep < 0` retains everything, `keep == 0` discards every inactive
/// session, `keep > 0` retains the `keep` most recently inserted inactive
/// sessions and discards the oldest overflow. Insertion order is the only
/// recency signal — engine ids repeat and cannot be used. Active sessions
/// are never discarded. Only map entries are deleted here; credential
/// cleanup is the caller's job before invoking this.
pub fn prune_inactive(sessions: &mut OrderedMap<Session>, keep: i64) -> Vec<String> {
    if keep < 0 {
        return Vec::new();
    }
    let inactive: Vec<String> = sessions
        .iter()
        .filter(|(_, session)| !session.active)
        .map(|(key, _)| key.clone())
        .collect();

    let keep = keep as usize;
    if inactive.len() <= keep {
        return Vec::new();
    }

    let overflow = inactive.len() - keep;
    let doomed: Vec<String> = inactive.into_iter().take(overflow).collect();
    for key in &doomed {
        sessions.remove(key);
        tracing::info!(session = %key, "pruned inactive session");
    }
    doomed
}

#[cfg(test)]
mod tests {
    use chrono::{Local, TimeZone};

    use super::*;

    fn map_with(descr: &[(i32, bool)]) -> OrderedMap<Session> {
        let mut map = OrderedMap::new();
        for (i, &(id, active)) in descr.iter().enumerate() {
            let mut session =
                Session::started(id, Local.timestamp_millis_opt(1_000 + i as i64).unwrap());
            session.active = active;
            map.insert(session.unique_key().to_string(), session);
        }
        map
    }

    fn ids(map: &OrderedMap<Session>) -> Vec<i32> {
        map.values().map(|s| s.id).collect()
    }

    #[test]
    fn discards_oldest_inactive_beyond_count() {
        // S1..S3 inactive, S4 active, keep 2 -> S1 goes
        let mut map = map_with(&[(1, false), (2, false), (3, false), (4, true)]);
        let doomed = prune_inactive(&mut map, 2);

        assert_eq!(doomed.len(), 1);
        assert_eq!(ids(&map), [2, 3, 4]);
    }

    #[test]
    fn negative_count_keeps_everything() {
        let mut map = map_with(&[(1, false), (2, false), (3, false)]);
        let doomed = prune_inactive(&mut map, -1);
        assert!(doomed.is_empty());
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn zero_count_discards_all_inactive() {
        let mut map = map_with(&[(1, false), (2, true), (3, false)]);
        prune_inactive(&mut map, 0);
        assert_eq!(ids(&map), [2]);
    }

    #[test]
    fn active_sessions_survive_any_count() {
        let mut map = map_with(&[(1, true), (2, true), (3, true)]);
        let doomed = prune_inactive(&mut map, 0);
        assert!(doomed.is_empty());
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn under_count_leaves_map_untouched() {
        let mut map = map_with(&[(1, false), (2, false)]);
        let doomed = prune_inactive(&mut map, 2);
        assert!(doomed.is_empty());
        assert_eq!(map.len(), 2);
    }
}
