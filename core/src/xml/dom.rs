//! Arvore XML minima usada pelo canonicalizador e pelo assinador
//!
//! `quick-xml` expõe um parser por eventos; a canonicalizacao exclusiva
//! (secao 4.E) precisa de uma arvore completa para ordenar atributos e
//! decidir quais declaracoes de namespace sao "visivelmente utilizadas".
//! Este modulo constroi essa arvore a partir do fluxo de eventos.

use crate::error::XmlError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::borrow::Cow;

/// Nome qualificado: prefixo opcional + nome local.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
}

impl QName {
    pub fn unprefixed(local: impl Into<String>) -> Self {
        Self { prefix: None, local: local.into() }
    }

    pub fn qualified(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{}:{}", p, self.local),
            None => self.local.clone(),
        }
    }

    fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((prefix, local)) => QName {
                prefix: Some(prefix.to_string()),
                local: local.to_string(),
            },
            None => QName { prefix: None, local: raw.to_string() },
        }
    }
}

/// Um elemento da arvore, com seus atributos "normais" separados das
/// declaracoes de namespace (`xmlns`/`xmlns:prefix`).
#[derive(Debug, Clone)]
pub struct Element {
    pub name: QName,
    /// Declaracoes de namespace presentes diretamente neste elemento,
    /// na ordem em que apareciam no documento de origem.
    pub namespaces: Vec<(Option<String>, String)>,
    pub attributes: Vec<(QName, String)>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Element {
    /// Busca em profundidade pelo primeiro descendente (incluindo `self`)
    /// cujo nome local e `local_name`.
    pub fn find(&self, local_name: &str) -> Option<&Element> {
        if self.name.local == local_name {
            return Some(self);
        }
        for child in &self.children {
            if let Node::Element(e) = child {
                if let Some(found) = e.find(local_name) {
                    return Some(found);
                }
            }
        }
        None
    }

    pub fn attr(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(q, _)| q.local == local_name)
            .map(|(_, v)| v.as_str())
    }

    /// Clona a subarvore removendo todo filho chamado `Signature`
    /// (usado por `CanonicalizeSigned`, secao 4.E).
    pub fn without_signature(&self) -> Element {
        let mut clone = self.clone();
        clone.children.retain(|c| match c {
            Node::Element(e) => e.name.local != "Signature",
            Node::Text(_) => true,
        });
        for child in &mut clone.children {
            if let Node::Element(e) = child {
                *e = e.without_signature();
            }
        }
        clone
    }
}

fn decode_attr_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_string()
}

fn parse_start(start: &BytesStart) -> Result<(QName, Vec<(Option<String>, String)>, Vec<(QName, String)>), XmlError> {
    let full_name = String::from_utf8_lossy(start.name().as_ref()).to_string();
    let name = QName::parse(&full_name);

    let mut namespaces = Vec::new();
    let mut attributes = Vec::new();

    for attr in start.attributes() {
        let attr = attr.map_err(|e| XmlError::Structure(format!("atributo invalido: {e}")))?;
        let raw_name = decode_attr_name(attr.key.as_ref());
        let value: Cow<str> = attr
            .unescape_value()
            .map_err(|e| XmlError::Structure(format!("valor de atributo invalido: {e}")))?;

        if raw_name == "xmlns" {
            namespaces.push((None, value.into_owned()));
        } else if let Some(prefix) = raw_name.strip_prefix("xmlns:") {
            namespaces.push((Some(prefix.to_string()), value.into_owned()));
        } else {
            attributes.push((QName::parse(&raw_name), value.into_owned()));
        }
    }

    Ok((name, namespaces, attributes))
}

/// Analisa uma string XML completa em uma unica arvore [`Element`]
/// raiz. Retorna erro se houver mais de um elemento raiz ou nenhum.
pub fn parse(xml: &str) -> Result<Element, XmlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text = false;

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let (name, namespaces, attributes) = parse_start(&start)?;
                stack.push(Element { name, namespaces, attributes, children: Vec::new() });
            }
            Ok(Event::Empty(start)) => {
                let (name, namespaces, attributes) = parse_start(&start)?;
                let elem = Element { name, namespaces, attributes, children: Vec::new() };
                push_node(&mut stack, &mut root, Node::Element(elem))?;
            }
            Ok(Event::End(_)) => {
                let finished = stack.pop().ok_or_else(|| {
                    XmlError::Structure("tag de fechamento sem abertura correspondente".to_string())
                })?;
                push_node(&mut stack, &mut root, Node::Element(finished))?;
            }
            Ok(Event::Text(text)) => {
                let decoded = text
                    .decode()
                    .map_err(|e| XmlError::Structure(format!("texto invalido: {e}")))?;
                if !decoded.is_empty() {
                    push_node(&mut stack, &mut root, Node::Text(decoded.into_owned()))?;
                }
            }
            Ok(Event::CData(cdata)) => {
                let decoded = String::from_utf8_lossy(cdata.as_ref()).to_string();
                push_node(&mut stack, &mut root, Node::Text(decoded))?;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(XmlError::Structure(format!("{e}"))),
        }
    }

    root.ok_or_else(|| XmlError::Structure("nenhum elemento raiz encontrado".to_string()))
}

fn push_node(stack: &mut Vec<Element>, root: &mut Option<Element>, node: Node) -> Result<(), XmlError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    } else if let Node::Element(e) = node {
        *root = Some(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parseia_elemento_simples() {
        let elem = parse(r#"<a x="1"><b>texto</b></a>"#).unwrap();
        assert_eq!(elem.name.local, "a");
        assert_eq!(elem.attr("x"), Some("1"));
        assert_eq!(elem.children.len(), 1);
    }

    #[test]
    fn separa_namespaces_de_atributos_normais() {
        let elem = parse(r#"<a xmlns="urn:x" xmlns:p="urn:p" p:y="2"></a>"#).unwrap();
        assert_eq!(elem.namespaces.len(), 2);
        assert_eq!(elem.attributes.len(), 1);
    }
}
