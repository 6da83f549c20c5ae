//! Conflict copy naming for keep-both resolution.
//!
//! Given `<stem>.<ext>`, produces `<stem>.conflict-YYYYMMDD-HHMMSS<.ext>` in
//! UTC. A dotfile whose only dot is the leading one (`.bashrc`) has no
//! extension to preserve, so the suffix appends to the whole name instead of
//! splitting it in two.

use chrono::{DateTime, Utc};

/// Generates conflict copy file names.
pub struct ConflictNamer;

impl ConflictNamer {
    /// Generates the conflict copy name for `original_name` at `detected_at`.
    ///
    /// `"a.txt"` -> `"a.conflict-20260207-153045.txt"`.
    /// `".bashrc"` -> `".bashrc.conflict-20260207-153045"` (not split on the
    /// leading dot).
    pub fn generate(original_name: &str, detected_at: DateTime<Utc>) -> String {
        let stamp = detected_at.format("%Y%m%d-%H%M%S");
        let (stem, ext) = split_stem_ext(original_name);
        match ext {
            Some(ext) => format!("{stem}.conflict-{stamp}{ext}"),
            None => format!("{stem}.conflict-{stamp}"),
        }
    }

    /// Splits `name` into a stem and an extension (including the leading
    /// dot), treating a name whose only dot is the leading one as having no
    /// extension.
    pub fn split_stem_ext(name: &str) -> (&str, Option<&str>) {
        split_stem_ext(name)
    }

    /// Finds a conflict copy name for `original_name` that doesn't collide,
    /// per `exists`. Tries the bare timestamped name first, then appends
    /// `-1`, `-2`, ... up to 1000 attempts; beyond that falls back to the
    /// base timestamped name and lets the caller's rename overwrite
    /// (a best-effort last resort rather than looping forever).
    pub fn generate_unique<F>(original_name: &str, detected_at: DateTime<Utc>, mut exists: F) -> String
    where
        F: FnMut(&str) -> bool,
    {
        let base = Self::generate(original_name, detected_at);
        if !exists(&base) {
            return base;
        }

        let (stem, ext) = split_stem_ext(original_name);
        let stamp = detected_at.format("%Y%m%d-%H%M%S");
        for n in 1..=1000 {
            let candidate = match ext {
                Some(ext) => format!("{stem}.conflict-{stamp}-{n}{ext}"),
                None => format!("{stem}.conflict-{stamp}-{n}"),
            };
            if !exists(&candidate) {
                return candidate;
            }
        }

        base
    }
}

fn split_stem_ext(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(0) => (name, None),
        Some(pos) => (&name[..pos], Some(&name[pos..])),
        None => (name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 7, 15, 30, 45).unwrap()
    }

    #[test]
    fn generate_with_extension() {
        let name = ConflictNamer::generate("a.txt", ts());
        assert_eq!(name, "a.conflict-20260207-153045.txt");
    }

    #[test]
    fn generate_with_multiple_dots_splits_on_last() {
        let name = ConflictNamer::generate("archive.tar.gz", ts());
        assert_eq!(name, "archive.tar.conflict-20260207-153045.gz");
    }

    #[test]
    fn generate_dotfile_has_no_extension() {
        let name = ConflictNamer::generate(".bashrc", ts());
        assert_eq!(name, ".bashrc.conflict-20260207-153045");
        assert!(!name.ends_with(".bashrc"));
    }

    #[test]
    fn generate_without_extension() {
        let name = ConflictNamer::generate("Makefile", ts());
        assert_eq!(name, "Makefile.conflict-20260207-153045");
    }

    #[test]
    fn generate_unique_no_collision_returns_base_name() {
        let name = ConflictNamer::generate_unique("test.txt", ts(), |_| false);
        assert_eq!(name, "test.conflict-20260207-153045.txt");
    }

    #[test]
    fn generate_unique_appends_numeric_suffix_on_collision() {
        let name = ConflictNamer::generate_unique("test.txt", ts(), |n| {
            n == "test.conflict-20260207-153045.txt"
        });
        assert_eq!(name, "test.conflict-20260207-153045-1.txt");
    }

    #[test]
    fn generate_unique_falls_back_to_base_name_past_the_attempt_cap() {
        let name = ConflictNamer::generate_unique("test.txt", ts(), |_| true);
        assert_eq!(name, "test.conflict-20260207-153045.txt");
    }
}
