//! Resolves the configured conflict strategy string into a `Resolution`.

use syncdrive_core::domain::conflict::Resolution;

/// Parses a `conflicts.default_strategy` config value.
///
/// Returns `None` for anything unrecognized; callers should have already
/// validated the string against `Config::validate()` before this runs.
pub fn parse_strategy(s: &str) -> Option<Resolution> {
    match s {
        "keep_local" => Some(Resolution::KeepLocal),
        "keep_remote" => Some(Resolution::KeepRemote),
        "keep_both" => Some(Resolution::KeepBoth),
        "manual" => Some(Resolution::Unresolved),
        _ => None,
    }
}
