//! JSON page snapshots and the element builder used to populate documents.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::dom::action::parse_inline_handler;
use crate::dom::{Action, Document, ElementId, EventKind, Page, Viewport};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerSpec {
    pub event: EventKind,
    pub action: Action,
}

/// Serialized element tree. Also a builder for documents assembled in code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSpec {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default)]
    pub hidden: bool,
    /// When false, an inline `onclick` stays unbound (the handler never
    /// reached the element).
    #[serde(default = "default_bind")]
    pub bind: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listeners: Vec<ListenerSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementSpec>,
}

fn default_bind() -> bool {
    true
}

impl ElementSpec {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            id: None,
            classes: Vec::new(),
            attrs: BTreeMap::new(),
            text: String::new(),
            hidden: false,
            bind: true,
            listeners: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn unbound(mut self) -> Self {
        self.bind = false;
        self
    }

    pub fn on(mut self, event: EventKind, action: Action) -> Self {
        self.listeners.push(ListenerSpec { event, action });
        self
    }

    pub fn child(mut self, child: ElementSpec) -> Self {
        self.children.push(child);
        self
    }

    fn validate(&self, path: &str, errors: &mut Vec<String>) {
        let here = format!("{path}/{}", self.tag);
        if self.tag.trim().is_empty() || self.tag.contains(char::is_whitespace) {
            errors.push(format!("{here}: invalid tag '{}'", self.tag));
        }
        if let Some(id) = &self.id
            && id.trim().is_empty()
        {
            errors.push(format!("{here}: id must be non-empty"));
        }
        for child in &self.children {
            child.validate(&here, errors);
        }
    }
}

impl Document {
    /// Build `spec` under `parent` and return the new element.
    pub fn insert(&mut self, parent: ElementId, spec: &ElementSpec) -> ElementId {
        let el = self.create(&spec.tag);
        {
            let element = self.element_mut(el);
            element.id = spec.id.clone();
            element.classes = spec.classes.clone();
            element.attrs = spec.attrs.clone();
            element.text = spec.text.clone();
            element.hidden = spec.hidden;
        }
        if spec.bind
            && let Some(action) = spec.attrs.get("onclick").and_then(|src| parse_inline_handler(src))
        {
            self.add_listener(el, EventKind::Click, action);
        }
        for listener in &spec.listeners {
            self.add_listener(el, listener.event, listener.action.clone());
        }
        self.append(parent, el);
        for child in &spec.children {
            self.insert(el, child);
        }
        el
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpec {
    #[serde(default)]
    pub viewport: Option<Viewport>,
    #[serde(default)]
    pub head: Vec<ElementSpec>,
    #[serde(default)]
    pub body: Vec<ElementSpec>,
}

impl PageSpec {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for spec in &self.head {
            spec.validate("head", &mut errors);
        }
        for spec in &self.body {
            spec.validate("body", &mut errors);
        }
        errors
    }

    pub fn build(&self) -> Result<Document> {
        let errors = self.validate();
        if !errors.is_empty() {
            bail!("page violations:\n- {}", errors.join("\n- "));
        }
        let mut doc = Document::new();
        if let Some(viewport) = self.viewport {
            doc.set_viewport(viewport);
        }
        let (head, body) = (doc.head(), doc.body());
        for spec in &self.head {
            doc.insert(head, spec);
        }
        for spec in &self.body {
            doc.insert(body, spec);
        }
        Ok(doc)
    }
}

pub fn parse_page(contents: &str) -> Result<Page> {
    let spec: PageSpec = serde_json::from_str(contents).context("parse page snapshot json")?;
    Ok(Page::new(spec.build()?))
}

pub fn load_page(path: &Path) -> Result<Page> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_page(&contents).with_context(|| format!("load page {}", path.display()))
}
