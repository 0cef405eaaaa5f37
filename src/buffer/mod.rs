//! Buffers: named, process-local registries of units.
//!
//! An [`OutputBuffer`] originates and owns units and broadcasts their
//! mutations; an [`InputBuffer`] mirrors remote units matching its
//! category interests and delivers change notifications. A unit is owned
//! by exactly one output buffer for its entire lifetime; input buffers
//! never own, only mirror.

mod input;
mod output;

pub use input::InputBuffer;
pub use output::OutputBuffer;

/// Allocate a process-unique buffer name.
///
/// The component name is what the application chose; the uuid fragment
/// keeps two buffers of the same component apart, and the role suffix
/// tells output and input buffers apart in logs and writer attributions.
pub(crate) fn allocate_unique_name(component: &str, role: &str) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{component}/{}/{role}", &uuid[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_names_differ() {
        let a = allocate_unique_name("comp", "OB");
        let b = allocate_unique_name("comp", "OB");
        assert_ne!(a, b);
        assert!(a.starts_with("comp/"));
        assert!(a.ends_with("/OB"));
    }
}
