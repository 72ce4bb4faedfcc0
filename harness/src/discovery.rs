//! Component discovery: resolve each catalog entry against the page.

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::context::HarnessContext;
use crate::core::selector::Selector;
use crate::core::types::{ComponentDescriptor, ComponentKind, ValidationResults, ValidationStatus};
use crate::dom::{Document, ElementId};

/// How a component was located, in the order strategies are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    ModuleId,
    Navigation,
    DataModule,
    ToolId,
    DataTool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub strategy: Strategy,
    pub element: ElementId,
    pub has_content: bool,
}

impl Located {
    pub fn detail(&self, id: &str) -> String {
        let how = match self.strategy {
            Strategy::ModuleId => format!("found via #{id}-module"),
            Strategy::Navigation => format!("found via navigation showModule('{id}')"),
            Strategy::DataModule => format!("found via [data-module=\"{id}\"]"),
            Strategy::ToolId => format!("found via #{id}"),
            Strategy::DataTool => format!("found via [data-tool=\"{id}\"]"),
        };
        if self.has_content {
            format!("{how} with content")
        } else {
            how
        }
    }
}

const HEADER_SELECTORS: [&str; 4] = ["module-header", "card-title", "h2", "h3"];

fn has_header(doc: &Document, element: ElementId) -> bool {
    HEADER_SELECTORS.iter().any(|name| {
        let selector = match *name {
            "h2" | "h3" => Selector::Tag((*name).to_string()),
            class => Selector::Class(class.to_string()),
        };
        !doc.select_within(element, &selector).is_empty()
    })
}

/// First matching strategy for `descriptor` on `doc`. Endpoints never match.
pub fn locate_in(doc: &Document, descriptor: &ComponentDescriptor) -> Option<Located> {
    let id = descriptor.id.as_str();
    let found = match descriptor.kind {
        ComponentKind::Endpoint => None,
        ComponentKind::Module => doc
            .by_id(&format!("{id}-module"))
            .map(|el| (Strategy::ModuleId, el))
            .or_else(|| doc.navigation_for(id).map(|el| (Strategy::Navigation, el)))
            .or_else(|| {
                doc.select_first(&Selector::attr("data-module", id))
                    .map(|el| (Strategy::DataModule, el))
            }),
        ComponentKind::Tool => doc
            .by_id(&format!("{id}-module"))
            .map(|el| (Strategy::ModuleId, el))
            .or_else(|| doc.by_id(id).map(|el| (Strategy::ToolId, el)))
            .or_else(|| {
                doc.select_first(&Selector::attr("data-tool", id))
                    .map(|el| (Strategy::DataTool, el))
            }),
    };
    found.map(|(strategy, element)| {
        // A navigation hit has content when the module it opens does.
        let scope = match strategy {
            Strategy::Navigation => doc.module_container(id).unwrap_or(element),
            _ => element,
        };
        Located {
            strategy,
            element,
            has_content: has_header(doc, scope),
        }
    })
}

/// One guarded lookup for `descriptor`.
pub fn locate(ctx: &HarnessContext<'_>, descriptor: &ComponentDescriptor) -> Option<Located> {
    ctx.guard
        .query(|| locate_in(&ctx.page.doc(), descriptor))
}

/// Resolve every catalog entry, in catalog order.
///
/// Each entry goes `Pending -> Active -> Valid|Invalid`. Cancellation stops
/// the walk between entries and leaves the rest `Pending`.
#[instrument(skip_all, fields(components = catalog.len()))]
pub fn enumerate(ctx: &HarnessContext<'_>, catalog: &[ComponentDescriptor]) -> ValidationResults {
    let mut results = ValidationResults::pending(catalog, ctx.now_ms());
    let total = catalog.len();
    ctx.overlay.set_progress(0, total);

    for (index, descriptor) in catalog.iter().enumerate() {
        if ctx.is_cancelled() {
            ctx.note(&format!(
                "discovery cancelled after {index} of {total} components"
            ));
            break;
        }
        let id = descriptor.id.as_str();
        results.set(id, ValidationStatus::Active, "checking", ctx.now_ms());
        ctx.overlay.set_item(id, ValidationStatus::Active, "checking");

        let (status, detail) = match descriptor.kind {
            ComponentKind::Endpoint => (
                ValidationStatus::Invalid,
                "endpoint checked by readiness".to_string(),
            ),
            _ => match locate(ctx, descriptor) {
                Some(located) => (ValidationStatus::Valid, located.detail(id)),
                None => (ValidationStatus::Invalid, "missing".to_string()),
            },
        };
        debug!(component = id, status = status.as_str(), %detail, "enumerated");
        results.set(id, status, &detail, ctx.now_ms());
        ctx.overlay.set_item(id, status, &detail);
        ctx.overlay.set_progress(index + 1, total);
        ctx.throttle();
    }

    info!(
        valid = results.count(ValidationStatus::Valid),
        invalid = results.count(ValidationStatus::Invalid),
        pending = results.count(ValidationStatus::Pending),
        "discovery finished"
    );
    results
}
