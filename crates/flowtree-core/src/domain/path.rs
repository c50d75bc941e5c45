//! Materialized path helpers
//!
//! A path is the ordered list of identifiers from a tree's root down to a
//! node, inclusive of the node. Durable stores encode it as the identifiers
//! joined by [`PATH_SEPARATOR`] with a trailing separator, so that the
//! encoded prefix of `a` (`"a/"`) never matches the encoded path of `ab`.

use super::flow_node::FlowId;

/// Separator used in encoded paths; never valid inside an identifier
pub const PATH_SEPARATOR: char = '/';

/// Encode a path as `id/id/.../`
pub fn encode(path: &[FlowId]) -> String {
    let mut encoded = String::with_capacity(path.iter().map(|id| id.0.len() + 1).sum());
    for id in path {
        encoded.push_str(&id.0);
        encoded.push(PATH_SEPARATOR);
    }
    encoded
}

/// Decode a path produced by [`encode`]
pub fn decode(encoded: &str) -> Vec<FlowId> {
    encoded
        .split(PATH_SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .map(|segment| FlowId(segment.to_string()))
        .collect()
}

/// Smallest string strictly greater than every string starting with `encoded_prefix`.
///
/// The encoded prefix always ends in the separator, so bumping that last
/// character yields an exclusive upper bound for an ordered range scan.
pub fn prefix_upper_bound(encoded_prefix: &str) -> String {
    let mut upper = encoded_prefix.to_string();
    if upper.ends_with(PATH_SEPARATOR) {
        upper.pop();
    }
    upper.push((PATH_SEPARATOR as u8 + 1) as char);
    upper
}

/// Whether `path` begins with `prefix` (equal paths included)
pub fn starts_with(path: &[FlowId], prefix: &[FlowId]) -> bool {
    path.len() >= prefix.len() && path[..prefix.len()] == *prefix
}

/// Whether `path` begins with `prefix` and is longer than it
pub fn is_strict_extension(path: &[FlowId], prefix: &[FlowId]) -> bool {
    path.len() > prefix.len() && starts_with(path, prefix)
}

/// Replace `old_prefix` at the head of `path` with `new_prefix`.
///
/// Returns `None` when `path` does not start with `old_prefix`.
pub fn rebase(path: &[FlowId], old_prefix: &[FlowId], new_prefix: &[FlowId]) -> Option<Vec<FlowId>> {
    if !starts_with(path, old_prefix) {
        return None;
    }
    let mut rebased = Vec::with_capacity(new_prefix.len() + path.len() - old_prefix.len());
    rebased.extend_from_slice(new_prefix);
    rebased.extend_from_slice(&path[old_prefix.len()..]);
    Some(rebased)
}
