use crate::store::Store;
use chrono::{DateTime, Utc};

/// Decide whether a flow may fire for this contact. Zero or negative
/// cooldown always allows; a lookup failure fails open -- availability
/// is preferred over strict throttling.
pub fn allow(
    store: &Store,
    flow_id: i64,
    contact_id: i64,
    cooldown_hours: i64,
    now: DateTime<Utc>,
) -> bool {
    if cooldown_hours <= 0 {
        return true;
    }
    let last = match store.get_cooldown(flow_id, contact_id) {
        Ok(last) => last,
        Err(e) => {
            tracing::warn!(flow_id, contact_id, error = %e, "cooldown lookup failed, allowing");
            return true;
        }
    };
    let Some(last) = last else {
        return true;
    };
    let Ok(last) = DateTime::parse_from_rfc3339(&last) else {
        tracing::warn!(flow_id, contact_id, "unparseable cooldown timestamp, allowing");
        return true;
    };
    let elapsed_hours = (now - last.with_timezone(&Utc)).num_hours();
    elapsed_hours >= cooldown_hours
}

/// Upsert the last-trigger timestamp once a run is allowed to start.
pub fn record_trigger(store: &Store, flow_id: i64, contact_id: i64, now: DateTime<Utc>) {
    if let Err(e) = store.record_cooldown(flow_id, contact_id, &now.to_rfc3339()) {
        tracing::warn!(flow_id, contact_id, error = %e, "failed to record flow trigger");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn zero_cooldown_always_allows() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        record_trigger(&store, 1, 1, now);
        assert!(allow(&store, 1, 1, 0, now));
        assert!(allow(&store, 1, 1, -1, now));
    }

    #[test]
    fn no_prior_record_allows() {
        let store = Store::open_in_memory().unwrap();
        assert!(allow(&store, 1, 1, 6, Utc::now()));
    }

    #[test]
    fn blocks_within_window_allows_after() {
        let store = Store::open_in_memory().unwrap();
        let start = Utc::now();
        record_trigger(&store, 1, 9, start);

        assert!(!allow(&store, 1, 9, 6, start + Duration::hours(1)));
        assert!(!allow(&store, 1, 9, 6, start + Duration::hours(5)));
        assert!(allow(&store, 1, 9, 6, start + Duration::hours(6)));
    }

    #[test]
    fn unparseable_timestamp_fails_open() {
        let store = Store::open_in_memory().unwrap();
        store.record_cooldown(1, 9, "not-a-timestamp").unwrap();
        assert!(allow(&store, 1, 9, 6, Utc::now()));
    }

    #[test]
    fn record_overwrites_previous() {
        let store = Store::open_in_memory().unwrap();
        let start = Utc::now();
        record_trigger(&store, 1, 9, start - Duration::hours(10));
        assert!(allow(&store, 1, 9, 6, start));
        record_trigger(&store, 1, 9, start);
        assert!(!allow(&store, 1, 9, 6, start + Duration::hours(1)));
    }
}
