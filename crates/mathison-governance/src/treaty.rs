// treaty.rs - Treaty-level hard denials.
//
// These actions merge, sync, clone, or pool agent identity. They are denied
// no matter what a policy capsule's allow lists say. A capsule's treaty
// section may add more prohibited actions but cannot remove any of these.

/// Identity-merge ("hive") actions that are never permitted.
pub const HIVE_ACTIONS: &[&str] = &[
    "merge_agent_state",
    "sync_agent_state",
    "merge_identity",
    "share_identity",
    "clone_self",
    "spawn_hive",
    "join_hive",
];

pub fn is_hive_action(action: &str) -> bool {
    HIVE_ACTIONS.contains(&action)
}

/// The denial reason if `action` is prohibited, considering both the
/// built-in set and `extra` prohibitions from the capsule treaty.
pub fn treaty_denial(action: &str, treaty_id: Option<&str>, extra: &[String]) -> Option<String> {
    if is_hive_action(action) {
        return Some(format!(
            "Action '{}' is a hive action prohibited by treaty: agent identity may not be merged, synced, or cloned",
            action
        ));
    }
    if extra.iter().any(|a| a == action) {
        return Some(format!(
            "Action '{}' is prohibited by treaty '{}'",
            action,
            treaty_id.unwrap_or("unknown")
        ));
    }
    None
}
