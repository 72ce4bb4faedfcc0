//! Self-QA audit: classify how complete each module is.
//!
//! Facts are gathered on a scratch copy of the page after a simulated
//! navigation click, then classified by [`crate::core::decision::classify`].

use tracing::{debug, info, instrument};

use crate::context::HarnessContext;
use crate::core::decision::{AuditFacts, classify, suggestions_for};
use crate::core::selector::Selector;
use crate::core::types::{AuditOutcome, AuditStatus, QaSummary, ValidationStatus};
use crate::dom::{Document, ElementId, EventKind, dispatch};

const PLACEHOLDER_MARKERS: [&str; 2] = ["placeholder", "coming soon"];

#[derive(Debug, Clone, Copy, Default)]
struct Presence {
    navigation: Option<ElementId>,
    container: Option<ElementId>,
}

fn content_facts(doc: &Document, container: ElementId, facts: &mut AuditFacts) {
    let text = doc.text_content(container);
    let lowered = text.to_lowercase();
    facts.visible = doc.is_visible(container);
    facts.content_chars = text.chars().count();
    facts.has_placeholder = PLACEHOLDER_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker));
    facts.interactive_count = doc.interactive_count(container);
}

/// Observe `module_id` on a fork of the page.
pub fn gather_facts(ctx: &HarnessContext<'_>, module_id: &str) -> (AuditFacts, Vec<String>) {
    let scratch = ctx.fork();
    let presence = ctx.guard.query(|| {
        let doc = scratch.page.doc();
        Presence {
            navigation: doc.navigation_for(module_id),
            container: doc.module_container(module_id),
        }
    });
    let mut facts = AuditFacts {
        has_navigation: presence.navigation.is_some(),
        has_container: presence.container.is_some(),
        ..AuditFacts::default()
    };
    let Some(container) = presence.container else {
        return (facts, Vec::new());
    };

    if let Some(nav) = presence.navigation {
        let mark = ctx.guard.timer_mark();
        dispatch(&scratch.page, ctx.guard, nav, EventKind::Click);
        scratch.wait_until(|| scratch.page.doc().is_visible(container).then_some(()));
        ctx.guard.clear_timers_since(mark);
    }

    let probes = ctx.guard.query(|| {
        let doc = scratch.page.doc();
        content_facts(&doc, container, &mut facts);
        feature_probes(&doc, module_id, container)
    });
    (facts, probes)
}

/// Classify one module. Pure with respect to `ctx.page`.
pub fn audit_module(ctx: &HarnessContext<'_>, module_id: &str) -> AuditOutcome {
    let (facts, probes) = gather_facts(ctx, module_id);
    let status = classify(&facts);
    let mut suggestions = suggestions_for(module_id, status, &facts);
    if !matches!(
        status,
        AuditStatus::NavigationMissing | AuditStatus::ModuleNotBuilt
    ) {
        for probe in probes {
            if !suggestions.contains(&probe) {
                suggestions.push(probe);
            }
        }
    }
    debug!(module = module_id, status = status.as_str(), ?facts, "audited");
    AuditOutcome {
        module_id: module_id.to_string(),
        status,
        suggestions,
    }
}

/// Audit each module in order. Items not reached before cancellation are
/// left out.
#[instrument(skip_all, fields(modules = module_ids.len()))]
pub fn audit_all(ctx: &HarnessContext<'_>, module_ids: &[String]) -> Vec<AuditOutcome> {
    let total = module_ids.len();
    ctx.overlay.set_progress(0, total);
    let mut outcomes = Vec::with_capacity(total);
    for (index, id) in module_ids.iter().enumerate() {
        if ctx.is_cancelled() {
            ctx.note(&format!("audit cancelled after {index} of {total} modules"));
            break;
        }
        let outcome = audit_module(ctx, id);
        let status = if outcome.status.is_failing() {
            ValidationStatus::Invalid
        } else {
            ValidationStatus::Valid
        };
        ctx.overlay.set_item(id, status, outcome.status.as_str());
        ctx.overlay.set_progress(index + 1, total);
        outcomes.push(outcome);
        ctx.throttle();
    }
    let summary = QaSummary::from_outcomes(&outcomes);
    info!(
        audited = summary.total,
        failing = summary.failing(),
        suggestions = summary.suggestions,
        "audit finished"
    );
    ctx.overlay.set_qa(summary);
    outcomes
}

fn any_within(doc: &Document, scope: ElementId, selectors: &[Selector]) -> bool {
    selectors
        .iter()
        .any(|selector| !doc.select_within(scope, selector).is_empty())
}

fn onclick_contains(doc: &Document, scope: ElementId, needles: &[&str], tag: Option<&str>) -> bool {
    doc.descendants(scope).into_iter().any(|id| {
        let element = doc.element(id);
        tag.is_none_or(|tag| element.tag == tag)
            && element
                .attr("onclick")
                .is_some_and(|onclick| needles.iter().any(|needle| onclick.contains(needle)))
    })
}

fn class(name: &str) -> Selector {
    Selector::Class(name.to_string())
}

fn tag(name: &str) -> Selector {
    Selector::Tag(name.to_string())
}

/// Module-specific feature checks. Returns suggestions for missing features.
pub fn feature_probes(doc: &Document, module_id: &str, container: ElementId) -> Vec<String> {
    let mut out = Vec::new();
    if module_id == "qnis" {
        let map = doc
            .select_within(container, &Selector::Id("qnis-map".to_string()))
            .into_iter()
            .next();
        match map {
            Some(map) if !doc.element(map).children.is_empty() => {
                let has_markers = onclick_contains(doc, map, &["showLeadDetails"], None)
                    || any_within(doc, map, &[class("lead-marker")]);
                if !has_markers {
                    out.push("QNIS map needs lead markers".to_string());
                }
                if !any_within(doc, map, &[tag("button")]) {
                    out.push("QNIS map needs zoom controls".to_string());
                }
            }
            _ => out.push("QNIS map container is empty".to_string()),
        }
    } else if module_id.starts_with("business") {
        if !any_within(
            doc,
            container,
            &[tag("form"), tag("input"), tag("select"), tag("textarea")],
        ) {
            out.push("Business Suite needs interactive forms".to_string());
        }
    } else if module_id.contains("watson") {
        let chat = any_within(
            doc,
            container,
            &[
                class("chat-interface"),
                class("watson-chat"),
                Selector::Id("watson-chat".to_string()),
            ],
        );
        if !chat {
            out.push("Watson module needs chat interface".to_string());
        }
        if !onclick_contains(doc, container, &["voice", "Voice"], None) {
            out.push("Watson module needs voice controls".to_string());
        }
    } else if module_id.starts_with("trading") {
        if !any_within(doc, container, &[tag("canvas"), tag("svg"), class("chart")]) {
            out.push("Trading Bot needs charts/visualizations".to_string());
        }
        if !onclick_contains(doc, container, &["trading", "bot"], Some("button")) {
            out.push("Trading Bot needs control buttons".to_string());
        }
    } else if doc.interactive_count(container) == 0 {
        out.push("Module needs interactive elements".to_string());
    }

    for form in doc.select_within(container, &tag("form")) {
        let has_submit = doc.descendants(form).into_iter().any(|id| {
            let element = doc.element(id);
            matches!(element.tag.as_str(), "button" | "input")
                && element.attr("type") == Some("submit")
        });
        if !has_submit {
            let name = doc
                .element(form)
                .id
                .clone()
                .unwrap_or_else(|| "form".to_string());
            out.push(format!("Add submit button to {name}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::dom::{Action, ElementSpec, Page};
    use crate::guard::{Guard, GuardLimits};
    use crate::overlay::Overlay;

    const LONG_TEXT: &str = "Quantum neural intelligence surfaces qualified leads across every \
        region with live scoring, enrichment and routing for the whole sales team.";

    fn audit(page: Page, module_id: &str) -> AuditOutcome {
        let guard = Guard::manual(GuardLimits::default());
        let overlay = Overlay::new(CancelToken::new());
        let ctx = HarnessContext::new(&guard, page, &overlay);
        audit_module(&ctx, module_id)
    }

    fn page_with(specs: Vec<ElementSpec>) -> Page {
        let mut doc = Document::new();
        let body = doc.body();
        for spec in &specs {
            doc.insert(body, spec);
        }
        Page::new(doc)
    }

    fn nav(module_id: &str) -> ElementSpec {
        ElementSpec::new("div").attr("onclick", &format!("showModule('{module_id}')"))
    }

    #[test]
    fn missing_everything_is_navigation_missing() {
        let outcome = audit(page_with(Vec::new()), "legal");
        assert_eq!(outcome.status, AuditStatus::NavigationMissing);
        assert_eq!(
            outcome.suggestions,
            vec![
                "Add a navigation entry for legal module".to_string(),
                "Build legal module view".to_string(),
            ]
        );
    }

    #[test]
    fn navigation_without_view_is_not_built() {
        let outcome = audit(page_with(vec![nav("legal")]), "legal");
        assert_eq!(outcome.status, AuditStatus::ModuleNotBuilt);
    }

    #[test]
    fn unbound_navigation_is_broken_interaction() {
        let outcome = audit(
            page_with(vec![
                nav("legal").unbound(),
                ElementSpec::new("div").id("legal-module").hidden().text(LONG_TEXT),
            ]),
            "legal",
        );
        assert_eq!(outcome.status, AuditStatus::BrokenInteraction);
        assert_eq!(outcome.suggestions[0], "Fix navigation for legal module");
    }

    #[test]
    fn navigation_click_reveals_complete_module() {
        let page = page_with(vec![
            nav("legal"),
            ElementSpec::new("div")
                .id("legal-module")
                .hidden()
                .text(LONG_TEXT)
                .child(ElementSpec::new("button").text("Draft contract")),
        ]);
        let outcome = audit(page.clone(), "legal");
        assert_eq!(outcome.status, AuditStatus::Complete);
        assert!(outcome.suggestions.is_empty());
        // The click ran on a fork.
        let container = page.doc().by_id("legal-module").expect("container");
        assert!(!page.doc().is_visible(container));
    }

    #[test]
    fn deferred_navigation_is_waited_for() {
        let page = page_with(vec![
            nav("legal").unbound().on(
                EventKind::Click,
                Action::Deferred {
                    delay_ms: 100,
                    action: Box::new(Action::show_module("legal")),
                },
            ),
            ElementSpec::new("div")
                .id("legal-module")
                .hidden()
                .text(LONG_TEXT),
        ]);
        let outcome = audit(page, "legal");
        assert_eq!(outcome.status, AuditStatus::ContentOnly);
    }

    #[test]
    fn placeholder_text_is_incomplete() {
        let outcome = audit(
            page_with(vec![
                ElementSpec::new("div")
                    .id("tax-module")
                    .text(&format!("{LONG_TEXT} Coming soon.")),
            ]),
            "tax",
        );
        assert_eq!(outcome.status, AuditStatus::Incomplete);
        assert_eq!(outcome.suggestions[0], "Replace placeholder content in tax module");
    }

    #[test]
    fn qnis_probes_report_map_features() {
        let outcome = audit(
            page_with(vec![
                ElementSpec::new("div")
                    .id("qnis-module")
                    .text(LONG_TEXT)
                    .child(ElementSpec::new("div").id("qnis-map").child(ElementSpec::new("canvas"))),
            ]),
            "qnis",
        );
        assert_eq!(outcome.status, AuditStatus::ContentOnly);
        assert!(outcome.suggestions.contains(&"QNIS map needs lead markers".to_string()));
        assert!(outcome.suggestions.contains(&"QNIS map needs zoom controls".to_string()));
    }

    #[test]
    fn trading_probe_wants_charts_and_controls() {
        let outcome = audit(
            page_with(vec![
                ElementSpec::new("div")
                    .id("tradingbot-module")
                    .text(LONG_TEXT)
                    .child(ElementSpec::new("canvas"))
                    .child(ElementSpec::new("button").attr("onclick", "toggle_trading_bot()")),
            ]),
            "tradingbot",
        );
        assert_eq!(outcome.status, AuditStatus::Complete);
        assert!(
            !outcome
                .suggestions
                .iter()
                .any(|s| s.starts_with("Trading Bot"))
        );
    }

    #[test]
    fn audit_all_publishes_summary() {
        let guard = Guard::manual(GuardLimits::default());
        let overlay = Overlay::new(CancelToken::new());
        let page = page_with(vec![nav("legal")]);
        let ctx = HarnessContext::new(&guard, page, &overlay);
        let outcomes = audit_all(&ctx, &["legal".to_string(), "tax".to_string()]);
        assert_eq!(outcomes.len(), 2);
        let qa = overlay.snapshot().qa.expect("qa summary");
        assert_eq!(qa.failing(), 2);
        assert_eq!(qa.count(AuditStatus::ModuleNotBuilt), 1);
    }
}
