//! Fan-out target resolution.
//!
//! The same binary and config run as hub or spoke: the moment the connected
//! node's address matches a configured peer, the station broadcasts to every
//! *other* configured peer; otherwise it sends point-to-point to the
//! operator-selected target. No mode flag to misconfigure.

use log::info;

use crate::peers::{PeerRegistry, RegistryError};

/// Compute the target set for one outgoing reading, in configured order.
///
/// `self_name` is the resolved identity of the connected node (if it is a
/// configured peer); `selected` is the operator-chosen fallback target.
pub fn resolve_targets<'a>(
    registry: &'a PeerRegistry,
    self_name: Option<&str>,
    selected: &'a str,
) -> Result<Vec<(&'a str, u32)>, RegistryError> {
    if let Some(name) = self_name {
        if registry.lookup(name).is_ok() {
            let targets = registry.targets_excluding(name);
            info!(
                "connected node is configured peer '{}'; fanning out to {} other peer(s)",
                name,
                targets.len()
            );
            return Ok(targets);
        }
    }
    let address = registry.lookup(selected)?;
    let name = registry
        .peers()
        .iter()
        .find(|p| p.address == address)
        .map(|p| p.name.as_str())
        .unwrap_or(selected);
    Ok(vec![(name, address)])
}
