//! Mock resolution: pick the single best-matching definition for a
//! requested identity and optional scenario.

use super::store::{MockStore, StoredMock};
use crate::matcher;
use tracing::{debug, warn};

/// Resolve a requested identity (+ optional scenario) against the store.
///
/// Definitions are considered in the store's stable enumeration order, so
/// ties between overlapping match rules resolve deterministically.
///
/// Scenario selection is strict: a requested scenario only ever resolves
/// to a definition carrying the same scenario (no scenario-less fallback),
/// and a request without a scenario only ever resolves to a scenario-less
/// definition.
pub fn resolve(
    identity: &str,
    scenario: Option<&str>,
    store: &dyn MockStore,
) -> Option<StoredMock> {
    let mut candidates = store
        .list_all()
        .into_iter()
        .filter(|stored| {
            matcher::matches(&stored.definition.url, identity, &stored.definition.policy())
        })
        .filter(|stored| match stored.definition.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Ignoring invalid mock {}/{}: {}",
                    stored.domain, stored.file_id, e
                );
                false
            }
        });

    let resolved = match scenario {
        Some(requested) => {
            candidates.find(|stored| stored.definition.scenario.as_deref() == Some(requested))
        }
        None => candidates.find(|stored| stored.definition.scenario.is_none()),
    };

    match &resolved {
        Some(stored) => debug!(
            "Resolved identity {:?} (scenario {:?}) to mock {}/{}",
            identity, scenario, stored.domain, stored.file_id
        ),
        None => debug!("No mock found for identity {:?} (scenario {:?})", identity, scenario),
    }
    resolved
}
