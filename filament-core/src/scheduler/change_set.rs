//! Change sets: the unit of document work the scheduler applies.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::dom::{Document, NodeId};
use crate::error::DomError;

/// A requested set of writes to one node.
///
/// Absent fields are no-ops. Present fields apply in a fixed order: text,
/// html, attributes, styles, classes, dataset. In the attribute, style and
/// dataset maps a `None` value removes the entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<IndexMap<String, Option<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub styles: Option<IndexMap<String, Option<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classes: Option<IndexMap<String, bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<IndexMap<String, Option<String>>>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .get_or_insert_with(IndexMap::new)
            .insert(name.into(), Some(value.into()));
        self
    }

    pub fn remove_attribute(mut self, name: impl Into<String>) -> Self {
        self.attributes
            .get_or_insert_with(IndexMap::new)
            .insert(name.into(), None);
        self
    }

    pub fn style(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.styles
            .get_or_insert_with(IndexMap::new)
            .insert(property.into(), Some(value.into()));
        self
    }

    pub fn remove_style(mut self, property: impl Into<String>) -> Self {
        self.styles
            .get_or_insert_with(IndexMap::new)
            .insert(property.into(), None);
        self
    }

    /// Add (`true`) or remove (`false`) a class.
    pub fn class(mut self, name: impl Into<String>, present: bool) -> Self {
        self.classes
            .get_or_insert_with(IndexMap::new)
            .insert(name.into(), present);
        self
    }

    pub fn data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.dataset
            .get_or_insert_with(IndexMap::new)
            .insert(key.into(), Some(value.into()));
        self
    }

    pub fn remove_data(mut self, key: impl Into<String>) -> Self {
        self.dataset
            .get_or_insert_with(IndexMap::new)
            .insert(key.into(), None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.html.is_none()
            && self.attributes.is_none()
            && self.styles.is_none()
            && self.classes.is_none()
            && self.dataset.is_none()
    }

    /// Shallow merge: every field present in `later` replaces the same field
    /// here wholesale. Maps are not merged key by key.
    pub fn merge(&mut self, later: ChangeSet) {
        fn take<T>(slot: &mut Option<T>, later: Option<T>) {
            if later.is_some() {
                *slot = later;
            }
        }

        take(&mut self.text, later.text);
        take(&mut self.html, later.html);
        take(&mut self.attributes, later.attributes);
        take(&mut self.styles, later.styles);
        take(&mut self.classes, later.classes);
        take(&mut self.dataset, later.dataset);
    }

    /// Write every present field to `node`, in order.
    pub fn apply(&self, document: &Document, node: NodeId) -> Result<(), DomError> {
        if let Some(text) = &self.text {
            document.set_text_content(node, text)?;
        }
        if let Some(html) = &self.html {
            document.set_inner_html(node, html)?;
        }
        if let Some(attributes) = &self.attributes {
            for (name, value) in attributes {
                match value {
                    Some(value) => document.set_attribute(node, name, value)?,
                    None => {
                        document.remove_attribute(node, name)?;
                    }
                }
            }
        }
        if let Some(styles) = &self.styles {
            for (property, value) in styles {
                document.set_style(node, property, value.as_deref())?;
            }
        }
        if let Some(classes) = &self.classes {
            for (class, present) in classes {
                document.set_class(node, class, *present)?;
            }
        }
        if let Some(dataset) = &self.dataset {
            for (key, value) in dataset {
                document.set_data(node, key, value.as_deref())?;
            }
        }
        Ok(())
    }
}
