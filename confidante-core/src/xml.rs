use indexmap::IndexMap;

pub mod namespaces;
pub mod renderer;
pub mod stream_parser;
pub mod stream_writer;

pub type AttributeKey = (String, Option<String>);

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
}

/// A generic XML element tree node.
///
/// Attribute insertion order is preserved (namespace-prefix emission cares
/// about it) but `PartialEq` treats it as insignificant, per the round-trip
/// property that parse -> serialize -> parse yields a structurally equal
/// stanza regardless of attribute order.
#[derive(Debug, Clone)]
pub struct Element {
    pub name: String,
    pub namespace: Option<String>,
    pub attributes: IndexMap<AttributeKey, String>,
    pub children: Vec<Node>,
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.namespace == other.namespace
            && self.children == other.children
            && self.attributes.len() == other.attributes.len()
            && self
                .attributes
                .iter()
                .all(|(k, v)| other.attributes.get(k) == Some(v))
    }
}

impl Element {
    pub fn new(name: &str, namespace: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.map(|s| s.to_string()),
            attributes: IndexMap::new(),
            children: Vec::new(),
        }
    }

    pub fn validate(&self, name: &str, namespace: Option<&str>) -> bool {
        self.name == name && self.namespace.as_deref() == namespace
    }

    pub fn attribute(&self, name: &str, namespace: Option<&str>) -> Option<&str> {
        self.attributes
            .get(&(name.to_string(), namespace.map(|s| s.to_string())))
            .map(|s| s.as_str())
    }

    pub fn set_attribute(
        &mut self,
        name: &str,
        namespace: Option<impl AsRef<str>>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.attributes.insert(
            (name.to_string(), namespace.map(|s| s.as_ref().to_string())),
            value.into(),
        );
        self
    }

    pub fn find_child(&self, name: &str, namespace: Option<&str>) -> Option<&Element> {
        self.children.iter().find_map(|child| match child {
            Node::Element(element) if element.validate(name, namespace) => Some(element),
            _ => None,
        })
    }

    pub fn find_children<'a>(
        &'a self,
        name: &'a str,
        namespace: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter_map(move |child| match child {
            Node::Element(element) if element.validate(name, namespace) => Some(element),
            _ => None,
        })
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|child| match child {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn text(&self) -> String {
        let mut text = String::new();
        for child in &self.children {
            match child {
                Node::Element(element) => text.push_str(&element.text()),
                Node::Text(s) => text.push_str(s),
                Node::CData(s) => text.push_str(s),
                _ => {}
            }
        }
        text
    }

    pub fn add_child(&mut self, element: Element) -> &mut Self {
        self.children.push(Node::Element(element));
        self
    }

    pub fn with_child<F>(&mut self, name: &str, namespace: Option<&str>, f: F) -> &mut Self
    where
        F: FnOnce(&mut Element),
    {
        let mut element = Element::new(name, namespace);
        f(&mut element);
        self.children.push(Node::Element(element));
        self
    }

    pub fn add_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.children.push(Node::Text(text.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_simple() {
        let element = Element::new("foo", Some("bar"));
        assert!(element.validate("foo", Some("bar")));
    }

    #[test]
    fn validate_different_name() {
        let element = Element::new("foo", Some("bar"));
        assert!(!element.validate("baz", Some("bar")));
    }

    #[test]
    fn validate_different_namespace() {
        let element = Element::new("foo", Some("bar"));
        assert!(!element.validate("foo", Some("baz")));
    }

    #[test]
    fn attribute_missing() {
        let element = Element::new("foo", Some("bar"));
        assert_eq!(element.attribute("baz", None), None);
    }

    #[test]
    fn attribute_overwrite() {
        let mut element = Element::new("foo", Some("bar"));
        element.set_attribute("baz", None::<&str>, "qux");
        element.set_attribute("baz", None::<&str>, "overwritten");
        assert_eq!(element.attribute("baz", None), Some("overwritten"));
    }

    #[test]
    fn child_multiple() {
        let mut parent = Element::new("foo", Some("bar"));
        parent.add_child(Element::new("baz", Some("baz")));
        parent.add_child(Element::new("qux", Some("qux")));
        assert!(parent.find_child("qux", Some("qux")).is_some());
        assert_eq!(parent.elements().count(), 2);
    }

    #[test]
    fn child_helper() {
        let mut parent = Element::new("foo", Some("bar"));
        parent.with_child("baz", Some("qux"), |child| {
            child.set_attribute("quux", None::<&str>, "corge");
        });
        assert!(parent.find_child("baz", Some("qux")).is_some());
        assert_eq!(
            parent
                .find_child("baz", Some("qux"))
                .unwrap()
                .attribute("quux", None),
            Some("corge")
        );
    }

    #[test]
    fn equality_ignores_attribute_order() {
        let mut a = Element::new("foo", None);
        a.set_attribute("one", None::<&str>, "1");
        a.set_attribute("two", None::<&str>, "2");

        let mut b = Element::new("foo", None);
        b.set_attribute("two", None::<&str>, "2");
        b.set_attribute("one", None::<&str>, "1");

        assert_eq!(a, b);
    }

    #[test]
    fn text_nested() {
        let mut parent = Element::new("foo", Some("bar"));
        parent.add_text("before");
        parent.with_child("baz", Some("qux"), |child| {
            child.add_text("inside");
        });
        parent.add_text("after");
        assert_eq!(parent.text(), "beforeinsideafter");
    }
}
