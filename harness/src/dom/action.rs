//! Typed event handlers and their dispatch.
//!
//! Handlers are data, never code: inline `onclick` text is only recognized
//! when it is a plain `showModule('id')` call; anything else stays an inert
//! attribute.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::selector::Selector;
use crate::dom::{Element, ElementId, EventKind, Page};
use crate::guard::Guard;

static SHOW_MODULE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*showModule\(\s*['"]([A-Za-z0-9_-]+)['"]\s*\)\s*;?\s*$"#).unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Hide every module view, then show and activate the module's container.
    ShowModule { module: String },
    ToggleClass {
        class: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    SetAttribute {
        name: String,
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    /// On resize: add `class` when the viewport is at most `max_width` wide,
    /// remove it otherwise.
    Responsive { max_width: u32, class: String },
    MarkSubmitted,
    Deferred { delay_ms: u64, action: Box<Action> },
}

impl Action {
    pub fn show_module(module_id: &str) -> Self {
        Action::ShowModule {
            module: module_id.to_string(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::ShowModule { .. } => "show_module",
            Action::ToggleClass { .. } => "toggle_class",
            Action::SetAttribute { .. } => "set_attribute",
            Action::Responsive { .. } => "responsive",
            Action::MarkSubmitted => "mark_submitted",
            Action::Deferred { .. } => "deferred",
        }
    }

    /// Apply against `page` with `origin` as the event target.
    pub fn apply(&self, page: &Page, guard: &Guard, origin: ElementId) -> Result<()> {
        match self {
            Action::ShowModule { module } => show_module(page, module),
            Action::ToggleClass { class, target } => {
                let el = resolve_target(page, guard, origin, target.as_deref())?;
                page.doc_mut().toggle_class(el, class);
                Ok(())
            }
            Action::SetAttribute {
                name,
                value,
                target,
            } => {
                let el = resolve_target(page, guard, origin, target.as_deref())?;
                page.doc_mut().set_attr(el, name, value);
                Ok(())
            }
            Action::Responsive { max_width, class } => {
                let mut doc = page.doc_mut();
                if doc.viewport().width <= *max_width {
                    doc.add_class(origin, class);
                } else {
                    doc.remove_class(origin, class);
                }
                Ok(())
            }
            Action::MarkSubmitted => {
                page.doc_mut().set_attr(origin, "data-submitted", "true");
                Ok(())
            }
            Action::Deferred { delay_ms, action } => {
                let page = page.clone();
                let inner = (**action).clone();
                let scheduled = guard.schedule_timeout(
                    Duration::from_millis(*delay_ms),
                    Box::new(move |guard: &Guard| inner.apply(&page, guard, origin)),
                );
                if scheduled.is_none() {
                    bail!("deferred {} not scheduled", action.name());
                }
                Ok(())
            }
        }
    }
}

/// Parse inline handler text. Returns `None` for anything but `showModule('id')`.
pub fn parse_inline_handler(source: &str) -> Option<Action> {
    SHOW_MODULE_RE
        .captures(source)
        .map(|caps| Action::show_module(&caps[1]))
}

/// Module a navigation element points at, from a bound click handler or an
/// inline `onclick` attribute.
pub fn navigation_target(element: &Element) -> Option<String> {
    element
        .listeners()
        .iter()
        .find_map(|listener| match (&listener.event, &listener.action) {
            (EventKind::Click, Action::ShowModule { module }) => Some(module.clone()),
            _ => None,
        })
        .or_else(|| {
            element
                .attr("onclick")
                .and_then(parse_inline_handler)
                .and_then(|action| match action {
                    Action::ShowModule { module } => Some(module),
                    _ => None,
                })
        })
}

/// Fire `event` on `element`. Each handler runs under the guard's depth
/// check; failures are logged by the guard and do not stop later handlers.
/// Returns the number of handlers that completed. A throttled listener
/// lookup fires nothing.
pub fn dispatch(page: &Page, guard: &Guard, element: ElementId, event: EventKind) -> usize {
    let actions = guard.query(|| page.doc().listeners_for(element, event));
    let name = format!("dispatch:{}", event.as_str());
    actions
        .iter()
        .filter_map(|action| guard.with_depth_guard(&name, || action.apply(page, guard, element)))
        .count()
}

/// Fire `resize` on every element listening for it.
pub fn dispatch_resize(page: &Page, guard: &Guard) -> usize {
    let listening: Vec<ElementId> = guard.query(|| {
        let doc = page.doc();
        doc.all()
            .into_iter()
            .filter(|id| {
                doc.element(*id)
                    .listeners()
                    .iter()
                    .any(|l| l.event == EventKind::Resize)
            })
            .collect()
    });
    listening
        .into_iter()
        .map(|id| dispatch(page, guard, id, EventKind::Resize))
        .sum()
}

fn resolve_target(
    page: &Page,
    guard: &Guard,
    origin: ElementId,
    target: Option<&str>,
) -> Result<ElementId> {
    let Some(target) = target else {
        return Ok(origin);
    };
    let selector = Selector::parse(target).with_context(|| format!("handler target '{target}'"))?;
    guard
        .try_query(|| page.doc().select_first(&selector))
        .with_context(|| format!("handler target '{target}' lookup throttled"))?
        .ok_or_else(|| anyhow!("handler target '{target}' not found"))
}

fn show_module(page: &Page, module_id: &str) -> Result<()> {
    let mut doc = page.doc_mut();
    let container = doc
        .module_container(module_id)
        .ok_or_else(|| anyhow!("no container for module '{module_id}'"))?;
    let views: Vec<ElementId> = doc
        .all()
        .into_iter()
        .filter(|id| {
            let element = doc.element(*id);
            element.has_class("module-view")
                || element
                    .id
                    .as_deref()
                    .is_some_and(|dom_id| dom_id.ends_with("-module"))
        })
        .collect();
    for view in views {
        doc.set_hidden(view, true);
        doc.remove_class(view, "active");
    }
    doc.set_hidden(container, false);
    doc.add_class(container, "active");
    Ok(())
}
