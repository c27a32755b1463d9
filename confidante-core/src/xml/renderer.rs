use std::collections::HashMap;

use crate::xml::namespaces;
use crate::xml::{Element, Node};

/// Synchronous XML-fragment renderer shared by the stream writer and by
/// anything that needs a one-off string form of an `Element` (error logging,
/// the recorder, tests).
///
/// Namespace-to-prefix bindings are tracked as a stack of scopes, mirroring
/// how they go in and out of effect as elements open and close.
pub struct Renderer {
    namespaces: Vec<HashMap<String, String>>,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        let mut root = HashMap::new();
        root.insert(namespaces::XML.to_string(), "xml".to_string());
        root.insert(namespaces::XMLNS.to_string(), "xmlns".to_string());

        Self {
            namespaces: vec![root],
        }
    }

    /// Renders a standalone element, including its children, as a complete
    /// XML string.
    pub fn render(&mut self, element: &Element) -> String {
        self.build_xml_element(element)
    }

    /// Renders only the opening tag of `element`, honoring `self_closing`.
    /// Used for stream headers, where the stream element is never closed in
    /// the ordinary sense.
    pub fn render_opening_tag(&mut self, element: &Element, self_closing: bool) -> String {
        self.build_opening_tag(element, self_closing)
    }

    /// Renders a closing tag matching a previously rendered opening tag.
    pub fn render_closing_tag(&mut self, element: &Element) -> String {
        self.build_closing_tag(element)
    }

    fn lookup_namespace_prefix(&self, namespace: &str) -> Option<&str> {
        for namespaces in self.namespaces.iter().rev() {
            if let Some(prefix) = namespaces.get(namespace) {
                return Some(prefix);
            }
        }

        None
    }

    fn build_xml_element(&mut self, element: &Element) -> String {
        let mut xml = String::new();

        if !element.children.is_empty() {
            xml.push_str(&self.build_opening_tag(element, false));
            xml.push_str(&self.build_children(element));
            xml.push_str(&self.build_closing_tag(element));
        } else {
            xml.push_str(&self.build_opening_tag(element, true));
        }

        xml
    }

    fn build_opening_tag(&mut self, element: &Element, self_closing: bool) -> String {
        let mut xml = String::new();

        let mut scope = HashMap::new();
        for ((attribute, namespace), value) in &element.attributes {
            match namespace {
                Some(namespace) => {
                    if namespace == namespaces::XMLNS {
                        scope.insert(value.clone(), attribute.clone()); // prefixed namespace
                    }
                }
                None => {
                    if attribute == "xmlns" {
                        scope.insert(value.clone(), String::new()); // default namespace
                    }
                }
            }
        }
        self.namespaces.push(scope);

        match &element.namespace {
            Some(namespace) => match self.lookup_namespace_prefix(namespace) {
                Some("") => {
                    xml.push_str(&format!(
                        "<{}{}",
                        element.name,
                        self.build_attributes(element)
                    ));
                }
                Some(prefix) => {
                    xml.push_str(&format!(
                        "<{}:{}{}",
                        prefix,
                        element.name,
                        self.build_attributes(element)
                    ));
                }
                None => {
                    debug_assert!(false, "namespace not declared: {namespace}");
                }
            },
            None => {
                xml.push_str(&format!(
                    "<{}{}",
                    element.name,
                    self.build_attributes(element)
                ));
            }
        }

        if self_closing {
            self.namespaces.pop();
            xml.push_str("/>");
        } else {
            xml.push('>');
        }

        xml
    }

    fn build_attributes(&self, element: &Element) -> String {
        let mut xml = String::new();

        for ((attribute, namespace), value) in &element.attributes {
            let value = escape_attribute(value);
            match namespace {
                Some(namespace) => match self.lookup_namespace_prefix(namespace) {
                    Some("") => {
                        debug_assert!(false, "cannot use default namespace for attribute");
                    }
                    Some(prefix) => {
                        xml.push_str(&format!(r#" {}:{}="{}""#, prefix, attribute, value));
                    }
                    None => {
                        debug_assert!(false, "namespace not declared: {namespace}");
                    }
                },
                None => {
                    xml.push_str(&format!(r#" {}="{}""#, attribute, value));
                }
            }
        }

        xml
    }

    fn build_children(&mut self, element: &Element) -> String {
        let mut xml = String::new();

        for child in &element.children {
            match child {
                Node::Element(child_element) => {
                    xml.push_str(&self.build_xml_element(child_element));
                }
                Node::Text(text) => {
                    xml.push_str(&escape_text(text));
                }
                Node::CData(cdata) => {
                    xml.push_str(&format!("<![CDATA[{}]]>", cdata));
                }
                Node::Comment(comment) => {
                    xml.push_str(&format!("<!--{}-->", comment));
                }
                Node::ProcessingInstruction(pi) => {
                    xml.push_str(&format!("<?{}?>", pi));
                }
            }
        }

        xml
    }

    fn build_closing_tag(&mut self, element: &Element) -> String {
        let mut xml = String::new();

        match &element.namespace {
            Some(namespace) => match self.lookup_namespace_prefix(namespace) {
                Some("") => {
                    xml.push_str(&format!("</{}>", element.name));
                }
                Some(prefix) => {
                    xml.push_str(&format!("</{}:{}>", prefix, element.name));
                }
                None => {
                    debug_assert!(false, "namespace not declared: {namespace}");
                }
            },
            None => {
                xml.push_str(&format!("</{}>", element.name));
            }
        }

        self.namespaces.pop();

        xml
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attribute(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_default_namespace_element() {
        let mut element = Element::new("message", Some(namespaces::XMPP_CLIENT));
        element.set_attribute("xmlns", None::<&str>, namespaces::XMPP_CLIENT);
        element.add_text("hi");

        let mut renderer = Renderer::new();
        assert_eq!(renderer.render(&element), r#"<message xmlns="jabber:client">hi</message>"#);
    }

    #[test]
    fn escapes_reserved_characters() {
        let mut element = Element::new("body", Some(namespaces::XMPP_CLIENT));
        element.set_attribute("xmlns", None::<&str>, namespaces::XMPP_CLIENT);
        element.add_text("<tom> & jerry");

        let mut renderer = Renderer::new();
        assert_eq!(
            renderer.render(&element),
            r#"<body xmlns="jabber:client">&lt;tom&gt; &amp; jerry</body>"#
        );
    }

    #[test]
    fn renders_self_closing_empty_element() {
        let element = Element::new("foo", None);
        let mut renderer = Renderer::new();
        assert_eq!(renderer.render(&element), "<foo/>");
    }
}
