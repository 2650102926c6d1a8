//! Unit type definitions
//!
//! A unit is either a [`ServiceUnit`] that owns processes or a [`GroupUnit`]
//! that aggregates other units.

mod group;
mod service;
mod unit;

pub use group::GroupUnit;
pub use service::{ServiceUnit, FORCE_STOP_GRACE};
pub use unit::{Unit, UnitId, UnitKind};

/// Separates a container name from a sub-process suffix (`dst/Master`)
pub const SHARD_SEPARATOR: char = '/';

/// Turn a unit name into a usable container name
///
/// Every character outside `[A-Za-z0-9_ -]` becomes `_`.
pub fn sanitize_container_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Container name for one part of a multi-process service
pub fn shard_container_name(container: &str, shard: &str) -> String {
    format!(
        "{}{}{}",
        container,
        SHARD_SEPARATOR,
        sanitize_container_name(shard)
    )
}

/// Container name a process name is attributed under
///
/// Shard containers (`dst/Master`) belong to the container before the last
/// separator; everything else is its own base.
pub fn base_container_name(process_name: &str) -> &str {
    process_name
        .rsplit_once(SHARD_SEPARATOR)
        .map_or(process_name, |(base, _)| base)
}
