//! Expanding-radius search for nearby helpers.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use lifeline_shared::models::{HelperCandidate, Location, UserPresence};
use lifeline_shared::types::UserId;
use lifeline_store::DocumentStore;

use crate::clock::Clock;
use crate::config::SearchRadii;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discovery {
    /// Online helpers first, then by ascending distance.
    pub helpers: Vec<HelperCandidate>,
    /// Radius of the step that produced `helpers` (the ceiling when empty).
    pub radius_km: f64,
}

pub struct HelperDiscovery {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    radii: SearchRadii,
    online_window: chrono::Duration,
}

impl HelperDiscovery {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        radii: SearchRadii,
        online_window: chrono::Duration,
    ) -> Self {
        Self {
            store,
            clock,
            radii,
            online_window,
        }
    }

    /// Find located users near `origin`, never including `exclude`.
    pub async fn find_helpers(&self, origin: &Location, exclude: &UserId) -> Result<Discovery> {
        let presences = self
            .store
            .list_located_presence()
            .await
            .map_err(EngineError::Discovery)?;
        let found = rank(
            &presences,
            origin,
            exclude,
            &self.radii,
            self.clock.now(),
            self.online_window,
        );
        debug!(
            "Discovery around ({:.4}, {:.4}): {} helper(s) within {} km",
            origin.latitude,
            origin.longitude,
            found.helpers.len(),
            found.radius_km
        );
        Ok(found)
    }
}

/// Pick the helpers of the first non-empty radius step.
pub fn rank(
    presences: &[UserPresence],
    origin: &Location,
    exclude: &UserId,
    radii: &SearchRadii,
    now: DateTime<Utc>,
    online_window: chrono::Duration,
) -> Discovery {
    let candidates: Vec<HelperCandidate> = presences
        .iter()
        .filter(|p| &p.user_id != exclude)
        .filter_map(|p| {
            let location = p.location?;
            Some(HelperCandidate {
                user_id: p.user_id.clone(),
                display_name: p.display_name.clone(),
                contact_info: p
                    .phone
                    .clone()
                    .filter(|s| !s.trim().is_empty())
                    .or_else(|| p.email.clone().filter(|s| !s.trim().is_empty())),
                location,
                distance_km: origin.distance_km(&location),
                is_online: p.is_online || now - p.last_active <= online_window,
            })
        })
        .collect();
    let steps = radii.steps();
    for radius in &steps {
        let mut within: Vec<HelperCandidate> = candidates
            .iter()
            .filter(|c| c.distance_km <= *radius)
            .cloned()
            .collect();
        if !within.is_empty() {
            within.sort_by(by_online_then_distance);
            return Discovery {
                helpers: within,
                radius_km: *radius,
            };
        }
    }

    Discovery {
        helpers: Vec::new(),
        radius_km: steps.last().copied().unwrap_or(radii.max_km),
    }
}

fn by_online_then_distance(a: &HelperCandidate, b: &HelperCandidate) -> Ordering {
    b.is_online.cmp(&a.is_online).then_with(|| {
        a.distance_km
            .partial_cmp(&b.distance_km)
            .unwrap_or(Ordering::Equal)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use lifeline_shared::geo::offset_north;
    use lifeline_store::SqliteStore;

    use crate::clock::SystemClock;

    const ORIGIN: (f64, f64) = (45.0, 7.0);

    fn origin() -> Location {
        Location::new(ORIGIN.0, ORIGIN.1, 5.0, Utc::now())
    }

    fn presence_at(uid: &str, km_north: f64, last_active: DateTime<Utc>) -> UserPresence {
        let (lat, lng) = offset_north(ORIGIN.0, ORIGIN.1, km_north);
        UserPresence {
            user_id: UserId::new(uid),
            display_name: uid.to_uppercase(),
            phone: None,
            email: Some(format!("{uid}@example.org")),
            location: Some(Location::new(lat, lng, 10.0, last_active)),
            is_online: false,
            last_active,
        }
    }

    fn run(presences: &[UserPresence], exclude: &str) -> Discovery {
        rank(
            presences,
            &origin(),
            &UserId::new(exclude),
            &SearchRadii::default(),
            Utc::now(),
            Duration::minutes(5),
        )
    }

    #[test]
    fn test_first_non_empty_radius_wins() {
        let now = Utc::now();
        let presences = vec![
            presence_at("far", 12.0, now),
            presence_at("farther", 14.0, now),
            presence_at("outside", 40.0, now),
        ];
        let found = run(&presences, "victim");
        assert_eq!(found.radius_km, 15.0);
        let ids: Vec<_> = found.helpers.iter().map(|c| c.user_id.as_str()).collect();
        assert_eq!(ids, vec!["far", "farther"]);
    }

    #[test]
    fn test_close_helpers_stop_the_expansion() {
        let now = Utc::now();
        let presences = vec![presence_at("near", 3.0, now), presence_at("mid", 8.0, now)];
        let found = run(&presences, "victim");
        assert_eq!(found.radius_km, 5.0);
        assert_eq!(found.helpers.len(), 1);
        assert_eq!(found.helpers[0].user_id.as_str(), "near");
        assert_eq!(found.helpers[0].contact_info.as_deref(), Some("near@example.org"));
    }

    #[test]
    fn test_victim_is_never_a_candidate() {
        let now = Utc::now();
        let presences = vec![presence_at("victim", 0.0, now), presence_at("h", 1.0, now)];
        let found = run(&presences, "victim");
        assert!(found.helpers.iter().all(|c| c.user_id.as_str() != "victim"));
        assert_eq!(found.helpers.len(), 1);
    }

    #[test]
    fn test_nobody_in_range() {
        let presences = vec![presence_at("x", 50.0, Utc::now())];
        let found = run(&presences, "victim");
        assert!(found.helpers.is_empty());
        assert_eq!(found.radius_km, 20.0);
    }

    #[test]
    fn test_found_at_ceiling_online_first() {
        let now = Utc::now();
        let presences = vec![
            presence_at("stale", 17.0, now - Duration::minutes(30)),
            presence_at("recent", 18.0, now - Duration::minutes(2)),
            UserPresence {
                is_online: true,
                ..presence_at("flagged", 19.0, now - Duration::hours(3))
            },
        ];
        let found = run(&presences, "victim");
        assert_eq!(found.radius_km, 20.0);
        let ids: Vec<_> = found.helpers.iter().map(|c| c.user_id.as_str()).collect();
        assert_eq!(ids, vec!["recent", "flagged", "stale"]);
        assert!(found.helpers[0].is_online);
        assert!(found.helpers[1].is_online);
        assert!(!found.helpers[2].is_online);
    }

    #[tokio::test]
    async fn test_find_helpers_reads_presence() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let now = Utc::now();
        store
            .upsert_presence(&presence_at("h1", 2.0, now))
            .await
            .unwrap();
        store
            .upsert_presence(&UserPresence {
                location: None,
                ..presence_at("nowhere", 0.0, now)
            })
            .await
            .unwrap();

        let discovery = HelperDiscovery::new(
            store,
            Arc::new(SystemClock),
            SearchRadii::default(),
            Duration::minutes(5),
        );
        let found = discovery
            .find_helpers(&origin(), &UserId::new("victim"))
            .await
            .unwrap();
        assert_eq!(found.helpers.len(), 1);
        assert_eq!(found.helpers[0].user_id.as_str(), "h1");
    }
}
