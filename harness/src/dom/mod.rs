//! In-memory page model the harness inspects and drives.
//!
//! A [`Document`] is an arena of [`Element`]s rooted at `html` with `head` and
//! `body` children. Elements detached from the tree stay in the arena but are
//! invisible to every query. [`Page`] is the shared single-threaded handle the
//! phases pass around; [`Page::fork`] gives simulations a scratch copy.

pub mod action;
pub mod snapshot;

use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::core::selector::Selector;

pub use action::{Action, dispatch, navigation_target, parse_inline_handler};
pub use snapshot::{ElementSpec, ListenerSpec, PageSpec, load_page, parse_page};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ElementId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Click,
    Submit,
    Resize,
    Input,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Click => "click",
            EventKind::Submit => "submit",
            EventKind::Resize => "resize",
            EventKind::Input => "input",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Listener {
    pub event: EventKind,
    pub action: Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: BTreeMap<String, String>,
    pub text: String,
    /// `display: none` on this element.
    pub hidden: bool,
    pub children: Vec<ElementId>,
    pub parent: Option<ElementId>,
    pub(crate) listeners: Vec<Listener>,
}

impl Element {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            id: None,
            classes: Vec::new(),
            attrs: BTreeMap::new(),
            text: String::new(),
            hidden: false,
            children: Vec::new(),
            parent: None,
            listeners: Vec::new(),
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    fn matches(&self, selector: &Selector) -> bool {
        match selector {
            Selector::Id(id) => self.id.as_deref() == Some(id.as_str()),
            Selector::Class(class) => self.has_class(class),
            Selector::Tag(tag) => self.tag == *tag,
            Selector::Attr { name, value } => match (name.as_str(), value) {
                ("id", Some(value)) => self.id.as_deref() == Some(value.as_str()),
                ("id", None) => self.id.is_some(),
                ("class", Some(value)) => self.has_class(value),
                (name, Some(value)) => self.attr(name) == Some(value.as_str()),
                (name, None) => self.attrs.contains_key(name),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    elements: Vec<Element>,
    root: ElementId,
    head: ElementId,
    body: ElementId,
    viewport: Viewport,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut doc = Self {
            elements: vec![Element::new("html")],
            root: ElementId(0),
            head: ElementId(0),
            body: ElementId(0),
            viewport: Viewport::default(),
        };
        doc.head = doc.create("head");
        doc.body = doc.create("body");
        doc.append(doc.root, doc.head);
        doc.append(doc.root, doc.body);
        doc
    }

    pub fn head(&self) -> ElementId {
        self.head
    }

    pub fn body(&self) -> ElementId {
        self.body
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn element(&self, id: ElementId) -> &Element {
        &self.elements[id.0]
    }

    pub fn element_mut(&mut self, id: ElementId) -> &mut Element {
        &mut self.elements[id.0]
    }

    /// New detached element.
    pub fn create(&mut self, tag: &str) -> ElementId {
        self.elements.push(Element::new(tag));
        ElementId(self.elements.len() - 1)
    }

    pub fn append(&mut self, parent: ElementId, child: ElementId) {
        self.detach(child);
        self.elements[child.0].parent = Some(parent);
        self.elements[parent.0].children.push(child);
    }

    pub fn detach(&mut self, child: ElementId) {
        if let Some(parent) = self.elements[child.0].parent.take() {
            self.elements[parent.0].children.retain(|c| *c != child);
        }
    }

    /// Attached elements in document order, root first.
    pub fn all(&self) -> Vec<ElementId> {
        let mut out = vec![self.root];
        out.extend(self.descendants(self.root));
        out
    }

    /// Attached descendants of `scope` in document order, excluding `scope`.
    pub fn descendants(&self, scope: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut stack: Vec<ElementId> = self.elements[scope.0].children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.elements[next.0].children.iter().rev().copied());
        }
        out
    }

    pub fn element_count(&self) -> usize {
        self.all().len()
    }

    pub fn by_id(&self, id: &str) -> Option<ElementId> {
        self.select_first(&Selector::Id(id.to_string()))
    }

    pub fn select(&self, selector: &Selector) -> Vec<ElementId> {
        self.all()
            .into_iter()
            .filter(|id| self.elements[id.0].matches(selector))
            .collect()
    }

    pub fn select_first(&self, selector: &Selector) -> Option<ElementId> {
        self.all()
            .into_iter()
            .find(|id| self.elements[id.0].matches(selector))
    }

    pub fn select_within(&self, scope: ElementId, selector: &Selector) -> Vec<ElementId> {
        self.descendants(scope)
            .into_iter()
            .filter(|id| self.elements[id.0].matches(selector))
            .collect()
    }

    pub fn matches(&self, id: ElementId, selector: &Selector) -> bool {
        self.elements[id.0].matches(selector)
    }

    /// Element whose click handler (bound or inline) shows `module_id`.
    pub fn navigation_for(&self, module_id: &str) -> Option<ElementId> {
        self.all()
            .into_iter()
            .find(|id| navigation_target(&self.elements[id.0]).as_deref() == Some(module_id))
    }

    /// Container for a module: `#{id}-module`, else a non-navigation
    /// `[data-module="{id}"]` element.
    pub fn module_container(&self, module_id: &str) -> Option<ElementId> {
        if let Some(found) = self.by_id(&format!("{module_id}-module")) {
            return Some(found);
        }
        self.select(&Selector::attr("data-module", module_id))
            .into_iter()
            .find(|id| navigation_target(&self.elements[id.0]).is_none())
    }

    /// Whitespace-normalized text of the element and its descendants.
    pub fn text_content(&self, id: ElementId) -> String {
        std::iter::once(id)
            .chain(self.descendants(id))
            .flat_map(|el| self.elements[el.0].text.split_whitespace())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Attached, and neither the element nor any ancestor is hidden.
    pub fn is_visible(&self, id: ElementId) -> bool {
        let mut current = Some(id);
        while let Some(el) = current {
            let element = &self.elements[el.0];
            if element.hidden {
                return false;
            }
            if el == self.root {
                return true;
            }
            current = element.parent;
        }
        false
    }

    pub fn is_interactive(&self, id: ElementId) -> bool {
        let element = &self.elements[id.0];
        matches!(
            element.tag.as_str(),
            "button" | "input" | "select" | "textarea"
        ) || (element.tag == "a" && element.attrs.contains_key("href"))
            || element.attrs.contains_key("onclick")
            || element
                .listeners
                .iter()
                .any(|l| l.event == EventKind::Click)
    }

    pub fn interactive_count(&self, scope: ElementId) -> usize {
        self.descendants(scope)
            .into_iter()
            .filter(|id| self.is_interactive(*id))
            .count()
    }

    pub fn add_class(&mut self, id: ElementId, class: &str) {
        let element = &mut self.elements[id.0];
        if !element.has_class(class) {
            element.classes.push(class.to_string());
        }
    }

    pub fn remove_class(&mut self, id: ElementId, class: &str) {
        self.elements[id.0].classes.retain(|c| c != class);
    }

    pub fn toggle_class(&mut self, id: ElementId, class: &str) {
        if self.elements[id.0].has_class(class) {
            self.remove_class(id, class);
        } else {
            self.add_class(id, class);
        }
    }

    pub fn set_attr(&mut self, id: ElementId, name: &str, value: &str) {
        self.elements[id.0]
            .attrs
            .insert(name.to_string(), value.to_string());
    }

    pub fn set_hidden(&mut self, id: ElementId, hidden: bool) {
        self.elements[id.0].hidden = hidden;
    }

    pub fn has_listener(&self, id: ElementId, event: EventKind, action: &Action) -> bool {
        self.elements[id.0]
            .listeners
            .iter()
            .any(|l| l.event == event && l.action == *action)
    }

    /// Raw insertion; components register through `Guard::add_listener`.
    pub(crate) fn add_listener(&mut self, id: ElementId, event: EventKind, action: Action) {
        self.elements[id.0].listeners.push(Listener { event, action });
    }

    pub fn listeners_for(&self, id: ElementId, event: EventKind) -> Vec<Action> {
        self.elements[id.0]
            .listeners
            .iter()
            .filter(|l| l.event == event)
            .map(|l| l.action.clone())
            .collect()
    }

    /// Short human label: `#id`, else `tag.class`, else `tag`.
    pub fn label(&self, id: ElementId) -> String {
        let element = &self.elements[id.0];
        match (&element.id, element.classes.first()) {
            (Some(dom_id), _) => format!("#{dom_id}"),
            (None, Some(class)) => format!("{}.{class}", element.tag),
            (None, None) => element.tag.clone(),
        }
    }

    /// Observable state used to detect whether an interaction changed anything.
    pub fn signature(&self) -> StateSignature {
        let attached: HashSet<ElementId> = self.all().into_iter().collect();
        StateSignature(
            self.elements
                .iter()
                .enumerate()
                .map(|(index, element)| NodeState {
                    id: ElementId(index),
                    attached: attached.contains(&ElementId(index)),
                    classes: element.classes.clone(),
                    attrs: element.attrs.clone(),
                    hidden: element.hidden,
                    text: element.text.clone(),
                })
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
struct NodeState {
    id: ElementId,
    attached: bool,
    classes: Vec<String>,
    attrs: BTreeMap<String, String>,
    hidden: bool,
    text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateSignature(Vec<NodeState>);

impl StateSignature {
    /// First observable difference between two signatures of the same page.
    pub fn first_change(&self, after: &StateSignature, doc: &Document) -> Option<String> {
        if after.0.len() > self.0.len() {
            return Some(format!("{} element(s) added", after.0.len() - self.0.len()));
        }
        self.0.iter().zip(&after.0).find_map(|(before, now)| {
            if before == now {
                return None;
            }
            let label = doc.label(now.id);
            let change = if before.hidden != now.hidden {
                if now.hidden { "hidden" } else { "shown" }
            } else if before.classes != now.classes {
                "class changed"
            } else if before.attrs != now.attrs {
                "attribute changed"
            } else if before.attached != now.attached {
                "moved"
            } else {
                "text changed"
            };
            Some(format!("{label} {change}"))
        })
    }
}

/// Shared handle to a document. Clones share state; [`Page::fork`] copies it.
#[derive(Clone, Default)]
pub struct Page(Rc<RefCell<Document>>);

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("elements", &self.0.borrow().elements.len())
            .finish()
    }
}

impl Page {
    pub fn new(doc: Document) -> Self {
        Self(Rc::new(RefCell::new(doc)))
    }

    /// Independent deep copy.
    pub fn fork(&self) -> Self {
        Self::new(self.0.borrow().clone())
    }

    pub fn doc(&self) -> Ref<'_, Document> {
        self.0.borrow()
    }

    pub fn doc_mut(&self) -> RefMut<'_, Document> {
        self.0.borrow_mut()
    }

    pub fn shares_document_with(&self, other: &Page) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        let mut doc = Document::new();
        let body = doc.body();
        doc.insert(
            body,
            &ElementSpec::new("div")
                .id("qnis-module")
                .class("module-view")
                .child(ElementSpec::new("h2").text("Quantum   Intelligence"))
                .child(ElementSpec::new("button").text("Zoom")),
        );
        doc.insert(
            body,
            &ElementSpec::new("nav")
                .class("sidebar")
                .child(ElementSpec::new("div").attr("onclick", "showModule('qnis')")),
        );
        doc
    }

    #[test]
    fn selectors_return_document_order() {
        let doc = sample();
        let divs = doc.select(&Selector::Tag("div".into()));
        assert_eq!(divs.len(), 2);
        assert_eq!(doc.label(divs[0]), "#qnis-module");
        assert!(doc.select_first(&Selector::Class("sidebar".into())).is_some());
    }

    #[test]
    fn text_content_normalizes_whitespace() {
        let doc = sample();
        let container = doc.by_id("qnis-module").expect("container");
        assert_eq!(doc.text_content(container), "Quantum Intelligence Zoom");
        assert_eq!(doc.interactive_count(container), 1);
    }

    #[test]
    fn visibility_follows_ancestors_and_attachment() {
        let mut doc = sample();
        let container = doc.by_id("qnis-module").expect("container");
        let heading = doc.descendants(container)[0];
        assert!(doc.is_visible(heading));
        doc.set_hidden(container, true);
        assert!(!doc.is_visible(heading));
        doc.set_hidden(container, false);
        doc.detach(container);
        assert!(!doc.is_visible(heading));
        assert!(doc.by_id("qnis-module").is_none());
    }

    #[test]
    fn navigation_and_container_lookup() {
        let doc = sample();
        assert!(doc.navigation_for("qnis").is_some());
        assert!(doc.navigation_for("legal").is_none());
        assert_eq!(doc.module_container("qnis"), doc.by_id("qnis-module"));
    }

    #[test]
    fn data_module_nav_item_is_not_a_container() {
        let mut doc = Document::new();
        let body = doc.body();
        doc.insert(
            body,
            &ElementSpec::new("a")
                .attr("data-module", "legal")
                .attr("onclick", "showModule('legal')"),
        );
        assert!(doc.module_container("legal").is_none());
        doc.insert(body, &ElementSpec::new("section").attr("data-module", "legal"));
        assert!(doc.module_container("legal").is_some());
    }

    #[test]
    fn fork_is_independent() {
        let page = Page::new(sample());
        let fork = page.fork();
        let container = fork.doc().by_id("qnis-module").expect("container");
        fork.doc_mut().set_hidden(container, true);
        assert!(page.doc().is_visible(container));
        assert!(!page.shares_document_with(&fork));
        assert!(page.shares_document_with(&page.clone()));
    }

    #[test]
    fn signature_reports_first_change() {
        let mut doc = sample();
        let before = doc.signature();
        let container = doc.by_id("qnis-module").expect("container");
        doc.add_class(container, "active");
        let change = before.first_change(&doc.signature(), &doc);
        assert_eq!(change.as_deref(), Some("#qnis-module class changed"));
        assert_eq!(doc.signature().first_change(&doc.signature(), &doc), None);
    }
}
