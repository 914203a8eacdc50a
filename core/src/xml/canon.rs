//! Canonicalizacao XML exclusiva (W3C exc-c14n, secao 4.E)
//!
//! Produz bytes UTF-8 deterministicos: atributos ordenados
//! alfabeticamente, declaracoes de namespace emitidas apenas quando
//! visivelmente utilizadas (mais o conjunto `InclusiveNamespaces`
//! informado pelo chamador), sem tags auto-fechadas, com escape de
//! `&`, `<`, `>`/`"`, tab, LF e CR.

use super::dom::{Element, Node, QName};
use std::collections::BTreeMap;

/// Contexto de namespace acumulado durante a recursao: mapeia prefixo
/// (ou `None` para o namespace default) para URI.
type NsScope = BTreeMap<Option<String>, String>;

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#9;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            other => out.push(other),
        }
    }
    out
}

fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#13;"),
            other => out.push(other),
        }
    }
    out
}

fn prefixes_used_by(elem: &Element) -> Vec<Option<String>> {
    let mut used = vec![elem.name.prefix.clone()];
    for (name, _) in &elem.attributes {
        if name.prefix.is_some() {
            used.push(name.prefix.clone());
        }
    }
    used
}

/// Opcoes de canonicalizacao: o conjunto `InclusiveNamespaces` que o
/// W3C exc-c14n permite ao chamador fixar (tipicamente os prefixos que
/// o `SignedInfo` referencia fora da subarvore assinada).
#[derive(Debug, Clone, Default)]
pub struct CanonOptions {
    pub inclusive_namespaces: Vec<String>,
}

/// Canonicaliza um elemento e devolve os bytes UTF-8 resultantes.
pub fn canonicalize(root: &Element, options: &CanonOptions) -> Vec<u8> {
    let mut out = String::new();
    let initial_scope = NsScope::new();
    let rendered = NsScope::new();
    render_element(root, &initial_scope, &rendered, options, true, &mut out);
    out.into_bytes()
}

/// Atalho para canonicalizar sem `InclusiveNamespaces`.
pub fn canonicalize_default(root: &Element) -> Vec<u8> {
    canonicalize(root, &CanonOptions::default())
}

/// Clona a subarvore removendo qualquer `Signature` filho, depois
/// canonicaliza o resultado. Esta e a entrada usada para calcular o
/// digest de `infDPS` antes de assinar (secao 4.E/4.F).
pub fn canonicalize_signed(root: &Element, options: &CanonOptions) -> Vec<u8> {
    let stripped = root.without_signature();
    canonicalize(&stripped, options)
}

fn render_element(
    elem: &Element,
    scope: &NsScope,
    rendered: &NsScope,
    options: &CanonOptions,
    is_top: bool,
    out: &mut String,
) {
    let mut new_scope = scope.clone();
    for (prefix, uri) in &elem.namespaces {
        new_scope.insert(prefix.clone(), uri.clone());
    }

    let mut used: Vec<Option<String>> = prefixes_used_by(elem);
    if is_top {
        for p in &options.inclusive_namespaces {
            used.push(Some(p.clone()));
        }
    }
    used.sort();
    used.dedup();

    let mut to_render: Vec<(Option<String>, String)> = Vec::new();
    for prefix in used {
        if let Some(uri) = new_scope.get(&prefix) {
            let already = rendered.get(&prefix) == Some(uri);
            if !already {
                to_render.push((prefix, uri.clone()));
            }
        }
    }

    to_render.sort_by(|a, b| match (&a.0, &b.0) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(y),
    });

    let mut next_rendered = rendered.clone();
    for (prefix, uri) in &to_render {
        next_rendered.insert(prefix.clone(), uri.clone());
    }

    out.push('<');
    out.push_str(&elem.name.qualified());

    for (prefix, uri) in &to_render {
        match prefix {
            None => {
                out.push_str(" xmlns=\"");
                out.push_str(&escape_attr(uri));
                out.push('"');
            }
            Some(p) => {
                out.push_str(" xmlns:");
                out.push_str(p);
                out.push_str("=\"");
                out.push_str(&escape_attr(uri));
                out.push('"');
            }
        }
    }

    let mut attrs: Vec<&(QName, String)> = elem.attributes.iter().collect();
    attrs.sort_by(|a, b| a.0.qualified().cmp(&b.0.qualified()));
    for (name, value) in attrs {
        out.push(' ');
        out.push_str(&name.qualified());
        out.push_str("=\"");
        out.push_str(&escape_attr(value));
        out.push('"');
    }

    out.push('>');

    for child in &elem.children {
        match child {
            Node::Element(e) => render_element(e, &new_scope, &next_rendered, options, false, out),
            Node::Text(t) => out.push_str(&escape_text(t)),
        }
    }

    out.push_str("</");
    out.push_str(&elem.name.qualified());
    out.push('>');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::dom::parse;

    #[test]
    fn ordena_atributos_alfabeticamente() {
        let elem = parse(r#"<e z="1" a="2"></e>"#).unwrap();
        let bytes = canonicalize_default(&elem);
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"<e a="2" z="1"></e>"#);
    }

    #[test]
    fn nao_produz_tags_autofechadas() {
        let elem = parse(r#"<e></e>"#).unwrap();
        let bytes = canonicalize_default(&elem);
        assert_eq!(String::from_utf8(bytes).unwrap(), "<e></e>");
    }

    #[test]
    fn namespace_nao_utilizado_e_omitido() {
        let elem = parse(r#"<e xmlns:p="urn:p"><c/></e>"#).unwrap();
        let bytes = canonicalize_default(&elem);
        let s = String::from_utf8(bytes).unwrap();
        assert!(!s.contains("xmlns:p"));
    }

    #[test]
    fn namespace_utilizado_e_preservado() {
        let elem = parse(r#"<p:e xmlns:p="urn:p"><p:c/></p:e>"#).unwrap();
        let bytes = canonicalize_default(&elem);
        let s = String::from_utf8(bytes).unwrap();
        assert!(s.starts_with(r#"<p:e xmlns:p="urn:p">"#));
        assert!(!s[20..].contains("xmlns:p"));
    }

    #[test]
    fn escapa_atributos_e_texto() {
        let elem = parse("<e a=\"x&amp;y\">a &lt; b</e>").unwrap();
        let bytes = canonicalize_default(&elem);
        let s = String::from_utf8(bytes).unwrap();
        assert_eq!(s, "<e a=\"x&amp;y\">a &lt; b</e>");
    }

    #[test]
    fn canonicalizacao_e_idempotente() {
        let elem = parse(r#"<p:e xmlns:p="urn:p" b="2" a="1"><p:c>x</p:c></p:e>"#).unwrap();
        let once = canonicalize_default(&elem);
        let reparsed = parse(std::str::from_utf8(&once).unwrap()).unwrap();
        let twice = canonicalize_default(&reparsed);
        assert_eq!(once, twice);
    }
}
