//! Module completeness decision table.
//!
//! The audit gathers [`AuditFacts`] from the page; classification is a pure
//! function of those facts, applied in a fixed order:
//!
//! 1. no navigation element and no container -> `NavigationMissing`
//! 2. navigation but no container -> `ModuleNotBuilt`
//! 3. container not visible after navigating -> `BrokenInteraction`
//! 4. real content, no interactive descendants -> `ContentOnly`
//! 5. real content and interactive descendants -> `Complete`
//! 6. anything else -> `Incomplete`

use crate::core::types::AuditStatus;

/// Minimum non-placeholder text length that counts as real content.
pub const MIN_CONTENT_CHARS: usize = 100;

/// Observations about one module, gathered on a scratch copy of the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuditFacts {
    pub has_navigation: bool,
    pub has_container: bool,
    /// Visible after the navigation click (or already visible when the
    /// container is mounted without navigation).
    pub visible: bool,
    pub content_chars: usize,
    pub has_placeholder: bool,
    pub interactive_count: usize,
}

impl AuditFacts {
    pub fn has_real_content(&self) -> bool {
        self.content_chars >= MIN_CONTENT_CHARS && !self.has_placeholder
    }
}

/// Checks run in order and the first match wins. A container without
/// navigation is judged on its content, so `NavigationMissing` needs both absent.
pub fn classify(facts: &AuditFacts) -> AuditStatus {
    if !facts.has_navigation && !facts.has_container {
        return AuditStatus::NavigationMissing;
    }
    if !facts.has_container {
        return AuditStatus::ModuleNotBuilt;
    }
    if !facts.visible {
        return AuditStatus::BrokenInteraction;
    }
    match (facts.has_real_content(), facts.interactive_count) {
        (true, 0) => AuditStatus::ContentOnly,
        (true, _) => AuditStatus::Complete,
        (false, _) => AuditStatus::Incomplete,
    }
}

/// Remediation hints for a classified module, most actionable first.
pub fn suggestions_for(module_id: &str, status: AuditStatus, facts: &AuditFacts) -> Vec<String> {
    match status {
        AuditStatus::NavigationMissing => vec![
            format!("Add a navigation entry for {module_id} module"),
            format!("Build {module_id} module view"),
        ],
        AuditStatus::ModuleNotBuilt => vec![format!("Build {module_id} module view")],
        AuditStatus::BrokenInteraction => vec![format!("Fix navigation for {module_id} module")],
        AuditStatus::ContentOnly => {
            vec![format!("Add interactive elements to {module_id} module")]
        }
        AuditStatus::Incomplete => {
            let mut suggestions = Vec::new();
            if facts.has_placeholder {
                suggestions.push(format!(
                    "Replace placeholder content in {module_id} module"
                ));
            } else {
                suggestions.push(format!("Add real content to {module_id} module"));
            }
            if facts.interactive_count == 0 {
                suggestions.push(format!("Add interactive elements to {module_id} module"));
            }
            suggestions
        }
        AuditStatus::Complete => Vec::new(),
    }
}
