use tracing::debug;

use crate::types::{CharacteristicNode, CharacteristicRef, DiscoveredTopology};

/// Locate the target characteristic in a discovered topology
///
/// Services and their characteristics are walked in discovery order and the
/// first node whose parent service and identifier both match wins, so a peer
/// exposing the pair twice resolves deterministically. Absence is not an
/// error; callers skip read/subscribe instead.
#[must_use]
pub fn resolve<'a>(
    topology: &'a DiscoveredTopology,
    target: &CharacteristicRef,
) -> Option<&'a CharacteristicNode> {
    let found = topology
        .services()
        .iter()
        .flat_map(|service| service.characteristics.iter())
        .find(|node| {
            node.parent_service_id == target.service_id
                && node.characteristic_id == target.characteristic_id
        });

    if found.is_none() {
        debug!(
            "Target {} not present among {} service(s)",
            target,
            topology.services().len()
        );
    }

    found
}
