// ABOUTME: Waiting and conflict queues for deferred package installation
// ABOUTME: One live entry per identity; conflicting re-adds divert to the conflict list

use std::collections::VecDeque;

use tracing::debug;

use crate::request::PackageRequest;

/// What happened to an `add` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// New identity, enqueued at the back.
    Queued,
    /// Same identity and same constraint already waiting; nothing changed.
    Duplicate,
    /// Same identity with a different constraint; the attempt was recorded
    /// in the conflict list and the waiting entry left untouched.
    Conflict,
}

/// FIFO queue of pending installs, at most one entry per (name, tool).
#[derive(Debug, Default, Clone)]
pub struct WaitingList {
    entries: VecDeque<PackageRequest>,
}

impl WaitingList {
    pub fn pop_front(&mut self) -> Option<PackageRequest> {
        self.entries.pop_front()
    }

    /// Requeue a retried request at the back, preserving FIFO rotation.
    pub fn push_back(&mut self, request: PackageRequest) {
        self.entries.push_back(request);
    }

    pub fn find_mut(&mut self, name: &str, tool: &str) -> Option<&mut PackageRequest> {
        self.entries
            .iter_mut()
            .find(|entry| entry.identity() == (name, tool))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageRequest> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Conflicting add attempts awaiting a resolution policy.
#[derive(Debug, Default, Clone)]
pub struct ConflictList {
    entries: Vec<PackageRequest>,
}

impl ConflictList {
    pub fn push(&mut self, request: PackageRequest) {
        self.entries.push(request);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageRequest> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn drain_entries(&mut self) -> Vec<PackageRequest> {
        std::mem::take(&mut self.entries)
    }
}

/// How to resolve the conflict list against the waiting list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvePolicy {
    /// Install latest: remove the constraint from each conflicted entry.
    DropConstraints,
    /// Keep the waiting list as it is and discard the conflicting requests.
    KeepOriginal,
    /// Rewrite each conflicted entry's constraint to this one.
    SetConstraint(String),
}

/// The deferred-install ledger: waiting queue plus conflict queue.
///
/// Lives for the whole multi-turn interaction and is mutated only between
/// completed driver turns, so it needs no interior locking.
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    pub waiting: WaitingList,
    pub conflicts: ConflictList,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a package request, diverting constraint clashes to the
    /// conflict list. Returns the outcome and the reply text.
    pub fn add(
        &mut self,
        name: &str,
        constraint: Option<String>,
        tool: &str,
    ) -> (AddOutcome, String) {
        if let Some(existing) = self.waiting.find_mut(name, tool) {
            // Only a differing, non-null constraint is a conflict. A bare
            // re-add accepts any version, so a pinned entry already covers it.
            if existing.constraint == constraint || constraint.is_none() {
                debug!(name, tool, "duplicate waiting-list add ignored");
                let message = format!(
                    "\"{}\" (using tool {}) is already in the waiting list.",
                    existing.display_name(),
                    tool
                );
                return (AddOutcome::Duplicate, message);
            }
            let previous = existing.display_name();
            let attempt = PackageRequest::new(name, constraint, tool);
            let message = format!(
                "Conflict detected: \"{}\" (using tool {}) is already in the waiting list as \"{}\". \
                 The new request \"{}\" has been moved into the conflict list. \
                 Use `conflictlist solve` to resolve it before calling `download`.",
                name,
                tool,
                previous,
                attempt.display_name()
            );
            debug!(name, tool, "conflicting constraint diverted to conflict list");
            self.conflicts.push(attempt);
            return (AddOutcome::Conflict, message);
        }

        let request = PackageRequest::new(name, constraint, tool);
        let message = format!(
            "\"{}\" (using tool {}) has been added into the waiting list.",
            request.display_name(),
            tool
        );
        debug!(name, tool, "queued package request");
        self.waiting.push_back(request);
        (AddOutcome::Queued, message)
    }

    /// Queue every package named in a requirements-style listing, one per
    /// non-empty line, installed with apt. Returns the combined reply.
    pub fn add_from_listing(&mut self, listing: &str) -> String {
        let mut replies = Vec::new();
        for line in listing.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, constraint) = split_listing_line(line);
            let (_, message) = self.add(name, constraint, "apt");
            replies.push(message);
        }
        if replies.is_empty() {
            "No package names found in the file.".to_string()
        } else {
            replies.join("\n")
        }
    }

    /// Apply a resolution policy and clear the conflict list.
    pub fn resolve(&mut self, policy: ResolvePolicy) -> String {
        let mut replies = Vec::new();
        for conflict in self.conflicts.drain_entries() {
            let entry = self.waiting.find_mut(&conflict.name, &conflict.tool);
            match (&policy, entry) {
                (ResolvePolicy::DropConstraints, Some(entry)) => {
                    entry.constraint = None;
                    replies.push(format!(
                        "The version constraint of \"{}\" in the waiting list has been removed.",
                        entry.name
                    ));
                }
                (ResolvePolicy::KeepOriginal, Some(entry)) => {
                    replies.push(format!(
                        "The conflicting request for \"{}\" has been dropped; the waiting list keeps \"{}\".",
                        conflict.name,
                        entry.display_name()
                    ));
                }
                (ResolvePolicy::SetConstraint(constraint), Some(entry)) => {
                    entry.constraint = Some(constraint.clone());
                    replies.push(format!(
                        "The version constraint of \"{}\" in the waiting list has been updated to \"{}\".",
                        entry.name, constraint
                    ));
                }
                // The waiting entry can be gone if it was cleared after the
                // conflict was recorded; dropping the attempt is all that is
                // left to do.
                (_, None) => {
                    replies.push(format!(
                        "The conflicting request for \"{}\" has been dropped.",
                        conflict.display_name()
                    ));
                }
            }
        }
        replies.push("The conflict list has been cleared.".to_string());
        replies.join("\n")
    }

    pub fn clear_waiting(&mut self) -> String {
        self.waiting.clear();
        "The waiting list has been cleared.".to_string()
    }

    pub fn clear_conflicts(&mut self) -> String {
        self.conflicts.clear();
        "The conflict list has been cleared.".to_string()
    }

    pub fn show_waiting(&self) -> String {
        if self.waiting.is_empty() {
            return "The waiting list is empty.".to_string();
        }
        let mut lines = vec![format!(
            "The waiting list contains {} package(s):",
            self.waiting.len()
        )];
        for (index, entry) in self.waiting.iter().enumerate() {
            lines.push(format!(
                "{}. {} (using tool {})",
                index + 1,
                entry.display_name(),
                entry.tool
            ));
        }
        lines.join("\n")
    }

    pub fn show_conflicts(&self) -> String {
        if self.conflicts.is_empty() {
            return "The conflict list is empty.".to_string();
        }
        let mut lines = vec![format!(
            "The conflict list contains {} request(s):",
            self.conflicts.len()
        )];
        for (index, entry) in self.conflicts.iter().enumerate() {
            let waiting = self
                .waiting
                .iter()
                .find(|candidate| candidate.same_identity(entry))
                .map(|candidate| candidate.display_name());
            match waiting {
                Some(original) => lines.push(format!(
                    "{}. {} (using tool {}), conflicting with \"{}\" in the waiting list",
                    index + 1,
                    entry.display_name(),
                    entry.tool,
                    original
                )),
                None => lines.push(format!(
                    "{}. {} (using tool {})",
                    index + 1,
                    entry.display_name(),
                    entry.tool
                )),
            }
        }
        lines.join("\n")
    }
}

/// Split a requirements-style line into name and optional constraint.
fn split_listing_line(line: &str) -> (&str, Option<String>) {
    match line.find(&['=', '<', '>', '!', '~'][..]) {
        Some(at) if at > 0 => (line[..at].trim_end(), Some(line[at..].trim().to_string())),
        _ => (line, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn add_queues_new_identities_in_order() {
        let mut ledger = Ledger::new();
        let (outcome, _) = ledger.add("zlib1g-dev", None, "apt");
        assert_eq!(outcome, AddOutcome::Queued);
        ledger.add("libssl-dev", None, "apt");

        let names: Vec<&str> = ledger.waiting.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["zlib1g-dev", "libssl-dev"]);
    }

    #[test]
    fn same_constraint_re_add_is_idempotent() {
        let mut ledger = Ledger::new();
        ledger.add("zlib1g-dev", None, "apt");
        let (outcome, message) = ledger.add("zlib1g-dev", None, "apt");
        assert_eq!(outcome, AddOutcome::Duplicate);
        assert!(message.contains("already in the waiting list"));
        assert_eq!(ledger.waiting.len(), 1);
        assert!(ledger.conflicts.is_empty());
    }

    #[test]
    fn unconstrained_re_add_against_a_pinned_entry_is_a_duplicate() {
        let mut ledger = Ledger::new();
        ledger.add("zlib1g-dev", Some("==1.2.11".into()), "apt");
        let (outcome, message) = ledger.add("zlib1g-dev", None, "apt");

        assert_eq!(outcome, AddOutcome::Duplicate);
        assert!(message.contains("already in the waiting list"));
        assert!(ledger.conflicts.is_empty());
        // The pin survives.
        let entry = ledger.waiting.iter().next().unwrap();
        assert_eq!(entry.constraint.as_deref(), Some("==1.2.11"));
    }

    #[test]
    fn differing_constraint_creates_exactly_one_conflict_entry() {
        let mut ledger = Ledger::new();
        ledger.add("zlib1g-dev", None, "apt");
        let (outcome, _) = ledger.add("zlib1g-dev", Some(">=1.2".into()), "apt");
        assert_eq!(outcome, AddOutcome::Conflict);

        assert_eq!(ledger.conflicts.len(), 1);
        // The waiting entry is untouched.
        assert_eq!(ledger.waiting.len(), 1);
        let original = ledger.waiting.iter().next().unwrap();
        assert_eq!(original.constraint, None);
    }

    #[test]
    fn same_name_different_tool_is_not_a_conflict() {
        let mut ledger = Ledger::new();
        ledger.add("protobuf", None, "apt");
        let (outcome, _) = ledger.add("protobuf", Some("==3.20".into()), "pip");
        assert_eq!(outcome, AddOutcome::Queued);
        assert_eq!(ledger.waiting.len(), 2);
    }

    #[test]
    fn resolve_drop_constraints_unpins_waiting_entry() {
        let mut ledger = Ledger::new();
        ledger.add("zlib1g-dev", Some("==1.0".into()), "apt");
        ledger.add("zlib1g-dev", Some(">=1.2".into()), "apt");

        let message = ledger.resolve(ResolvePolicy::DropConstraints);
        assert!(message.contains("has been removed"));
        assert!(ledger.conflicts.is_empty());
        let entry = ledger.waiting.iter().next().unwrap();
        assert_eq!(entry.constraint, None);
    }

    #[test]
    fn resolve_keep_original_preserves_waiting_constraint() {
        let mut ledger = Ledger::new();
        ledger.add("zlib1g-dev", None, "apt");
        ledger.add("zlib1g-dev", Some(">=1.2".into()), "apt");

        ledger.resolve(ResolvePolicy::KeepOriginal);
        assert!(ledger.conflicts.is_empty());
        let entry = ledger.waiting.iter().next().unwrap();
        assert_eq!(entry.constraint, None);
    }

    #[test]
    fn resolve_set_constraint_rewrites_waiting_entry() {
        let mut ledger = Ledger::new();
        ledger.add("libcurl4", Some("==7.0".into()), "apt");
        ledger.add("libcurl4", Some("==8.0".into()), "apt");

        ledger.resolve(ResolvePolicy::SetConstraint(">=7.5".into()));
        let entry = ledger.waiting.iter().next().unwrap();
        assert_eq!(entry.constraint.as_deref(), Some(">=7.5"));
    }

    #[test]
    fn add_from_listing_defaults_to_apt() {
        let mut ledger = Ledger::new();
        let message = ledger.add_from_listing("zlib1g-dev\nlibssl-dev>=1.1\n\n# comment\n");
        assert_eq!(ledger.waiting.len(), 2);
        assert!(message.contains("zlib1g-dev"));

        let pinned = ledger.waiting.find_mut("libssl-dev", "apt").unwrap();
        assert_eq!(pinned.constraint.as_deref(), Some(">=1.1"));
    }

    #[test]
    fn show_waiting_lists_entries_in_order() {
        let mut ledger = Ledger::new();
        assert_eq!(ledger.show_waiting(), "The waiting list is empty.");

        ledger.add("zlib1g-dev", None, "apt");
        ledger.add("cmake", Some(">=3.16".into()), "apt");
        let shown = ledger.show_waiting();
        assert!(shown.starts_with("The waiting list contains 2 package(s):"));
        assert!(shown.contains("1. zlib1g-dev (using tool apt)"));
        assert!(shown.contains("2. cmake>=3.16 (using tool apt)"));
    }

    #[test]
    fn show_conflicts_names_the_waiting_side() {
        let mut ledger = Ledger::new();
        ledger.add("zlib1g-dev", None, "apt");
        ledger.add("zlib1g-dev", Some(">=1.2".into()), "apt");
        let shown = ledger.show_conflicts();
        assert!(shown.contains("zlib1g-dev>=1.2 (using tool apt)"));
        assert!(shown.contains("conflicting with \"zlib1g-dev\" in the waiting list"));
    }

    #[test]
    fn listing_lines_split_on_first_operator() {
        assert_eq!(split_listing_line("zlib1g-dev"), ("zlib1g-dev", None));
        assert_eq!(
            split_listing_line("libssl-dev>=1.1"),
            ("libssl-dev", Some(">=1.1".to_string()))
        );
        assert_eq!(
            split_listing_line("pkg ==2.0"),
            ("pkg", Some("==2.0".to_string()))
        );
    }
}
