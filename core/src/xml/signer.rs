//! Certificado A1 e assinatura XMLDSig (secoes 4.F)
//!
//! A extracao de PKCS#12 e X.509 segue o mesmo par de crates do
//! certificado digital original (`p12`, `x509-cert`, `der`, `rsa`,
//! `pkcs8`); a canonicalizacao usada pela assinatura, porem, e a
//! implementacao exc-c14n completa de [`crate::xml::canon`] em vez de
//! uma normalizacao de string.

use crate::error::SignerError;
use crate::xml::canon::{self, CanonOptions};
use crate::xml::dom::{self, Element, Node, QName};
use base64::Engine;
use chrono::{DateTime, Utc};
use der::Decode;
use pkcs8::DecodePrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{SignatureEncoding, Signer as _};
use rsa::traits::PublicKeyParts;
use sha2::{Digest, Sha256};
use x509_cert::Certificate as X509Certificate;

const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
const C14N_EXC_ALGORITHM: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const ENVELOPED_SIGNATURE_ALGORITHM: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const RSA_SHA256_ALGORITHM: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const SHA256_ALGORITHM: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

const MIN_KEY_BITS: usize = 1024;
const WARN_KEY_BITS: usize = 2048;

/// Material extraido de um arquivo PKCS#12 (.pfx): certificado X.509 em
/// DER, chave privada RSA em PKCS#8 DER, mais os metadados ja
/// decodificados do certificado.
pub struct A1Certificate {
    pub cert_der: Vec<u8>,
    pub private_key_der: Vec<u8>,
    pub subject: String,
    pub issuer: String,
    pub serial_number: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub key_bits: usize,
}

impl A1Certificate {
    /// Analisa um PFX/.p12 com a senha informada. Falhas de senha e
    /// ausencia de certificado/chave sao distinguidas (secao 4.F).
    pub fn parse(pfx_data: &[u8], password: &str) -> Result<Self, SignerError> {
        if pfx_data.len() < 10 || pfx_data[0] != 0x30 {
            return Err(SignerError::InvalidPkcs12(
                "cabecalho ASN.1 ausente ou arquivo truncado".to_string(),
            ));
        }

        let pfx = p12::PFX::parse(pfx_data)
            .map_err(|e| SignerError::InvalidPkcs12(format!("{e:?}")))?;

        let certs = pfx
            .cert_bags(password)
            .map_err(|_| SignerError::WrongPassword)?;
        let keys = pfx
            .key_bags(password)
            .map_err(|_| SignerError::WrongPassword)?;

        let cert_der = certs.into_iter().next().ok_or(SignerError::MissingCertificate)?;
        let private_key_der = keys.into_iter().next().ok_or(SignerError::MissingPrivateKey)?;

        let private_key = rsa::RsaPrivateKey::from_pkcs8_der(&private_key_der)
            .map_err(|_| SignerError::UnsupportedKeyType)?;
        let key_bits = private_key.size() * 8;
        if key_bits < MIN_KEY_BITS {
            return Err(SignerError::KeyTooSmall { bits: key_bits });
        }

        let cert = X509Certificate::from_der(&cert_der)
            .map_err(|e| SignerError::InvalidPkcs12(format!("certificado X.509 invalido: {e:?}")))?;

        let subject = cert.tbs_certificate.subject.to_string();
        let issuer = cert.tbs_certificate.issuer.to_string();
        let serial_number = hex::encode(cert.tbs_certificate.serial_number.as_bytes());

        let not_before: DateTime<Utc> = cert.tbs_certificate.validity.not_before.to_system_time().into();
        let not_after: DateTime<Utc> = cert.tbs_certificate.validity.not_after.to_system_time().into();

        Ok(Self {
            cert_der,
            private_key_der,
            subject,
            issuer,
            serial_number,
            not_before,
            not_after,
            key_bits,
        })
    }

    /// Verifica a janela de validade do certificado contra `reference`.
    /// A referencia e parametrizada para permitir testes deterministicos
    /// (em producao, deve ser `Utc::now()`).
    pub fn check_validity(&self, reference: DateTime<Utc>) -> Result<(), SignerError> {
        if reference < self.not_before {
            return Err(SignerError::CertificateNotYetValid {
                not_before: self.not_before.to_rfc3339(),
            });
        }
        if reference > self.not_after {
            return Err(SignerError::CertificateExpired {
                not_after: self.not_after.to_rfc3339(),
            });
        }
        Ok(())
    }

    pub fn warns_weak_key(&self) -> bool {
        self.key_bits < WARN_KEY_BITS
    }

    pub fn cert_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.cert_der)
    }

    fn signing_key(&self) -> Result<SigningKey<Sha256>, SignerError> {
        let private_key = rsa::RsaPrivateKey::from_pkcs8_der(&self.private_key_der)
            .map_err(|_| SignerError::UnsupportedKeyType)?;
        Ok(SigningKey::<Sha256>::new(private_key))
    }
}

fn text_element(name: &str, text: impl Into<String>) -> Element {
    Element {
        name: QName::unprefixed(name),
        namespaces: Vec::new(),
        attributes: Vec::new(),
        children: vec![Node::Text(text.into())],
    }
}

fn empty_element(name: &str, attrs: Vec<(&str, &str)>) -> Element {
    Element {
        name: QName::unprefixed(name),
        namespaces: Vec::new(),
        attributes: attrs
            .into_iter()
            .map(|(k, v)| (QName::unprefixed(k), v.to_string()))
            .collect(),
        children: Vec::new(),
    }
}

fn build_signed_info(reference_id: &str, digest_b64: &str) -> Element {
    let reference = Element {
        name: QName::unprefixed("Reference"),
        namespaces: Vec::new(),
        attributes: vec![(QName::unprefixed("URI"), format!("#{reference_id}"))],
        children: vec![
            Node::Element(Element {
                name: QName::unprefixed("Transforms"),
                namespaces: Vec::new(),
                attributes: Vec::new(),
                children: vec![
                    Node::Element(empty_element(
                        "Transform",
                        vec![("Algorithm", ENVELOPED_SIGNATURE_ALGORITHM)],
                    )),
                    Node::Element(empty_element("Transform", vec![("Algorithm", C14N_EXC_ALGORITHM)])),
                ],
            }),
            Node::Element(empty_element("DigestMethod", vec![("Algorithm", SHA256_ALGORITHM)])),
            Node::Element(text_element("DigestValue", digest_b64)),
        ],
    };

    Element {
        name: QName::unprefixed("SignedInfo"),
        namespaces: vec![(None, XMLDSIG_NS.to_string())],
        attributes: Vec::new(),
        children: vec![
            Node::Element(empty_element(
                "CanonicalizationMethod",
                vec![("Algorithm", C14N_EXC_ALGORITHM)],
            )),
            Node::Element(empty_element("SignatureMethod", vec![("Algorithm", RSA_SHA256_ALGORITHM)])),
            Node::Element(reference),
        ],
    }
}

fn build_signature_element(signed_info: Element, signature_b64: &str, cert_b64: &str) -> Element {
    Element {
        name: QName::unprefixed("Signature"),
        namespaces: vec![(None, XMLDSIG_NS.to_string())],
        attributes: Vec::new(),
        children: vec![
            Node::Element(signed_info),
            Node::Element(text_element("SignatureValue", signature_b64)),
            Node::Element(Element {
                name: QName::unprefixed("KeyInfo"),
                namespaces: Vec::new(),
                attributes: Vec::new(),
                children: vec![Node::Element(Element {
                    name: QName::unprefixed("X509Data"),
                    namespaces: Vec::new(),
                    attributes: Vec::new(),
                    children: vec![Node::Element(text_element("X509Certificate", cert_b64))],
                })],
            }),
        ],
    }
}

/// Assina o elemento `infDPS` de um documento `DPS` e devolve a arvore
/// com o `Signature` anexado como ultimo filho de `DPS` (secao 4.F,
/// assinatura envelopada).
///
/// Passos: localizar `infDPS`, canonicalizar sem `Signature`, calcular
/// o digest SHA-256, montar `SignedInfo`, canonicaliza-lo, assinar com
/// RSA-SHA256, montar `Signature` com `KeyInfo`/`X509Data` e anexar.
pub fn sign_dps(dps_xml: &str, cert: &A1Certificate) -> Result<String, SignerError> {
    let mut root = dom::parse(dps_xml).map_err(|e| SignerError::Canonicalization(e.to_string()))?;

    let inf_dps = root
        .find("infDPS")
        .ok_or_else(|| SignerError::ElementNotFound("infDPS".to_string()))?
        .clone();
    let reference_id = inf_dps.attr("Id").ok_or(SignerError::MissingId)?.to_string();

    let canonical_inf_dps = canon::canonicalize_signed(&inf_dps, &CanonOptions::default());
    let digest = Sha256::digest(&canonical_inf_dps);
    let digest_b64 = base64::engine::general_purpose::STANDARD.encode(digest);

    let signed_info = build_signed_info(&reference_id, &digest_b64);
    let canonical_signed_info = canon::canonicalize_default(&signed_info);

    let signing_key = cert.signing_key()?;
    let signature = signing_key.try_sign(&canonical_signed_info).map_err(|e| {
        SignerError::SigningFailed(e.to_string())
    })?;
    let signature_b64 = base64::engine::general_purpose::STANDARD.encode(signature.to_vec());

    let signature_element = build_signature_element(signed_info, &signature_b64, &cert.cert_base64());

    if root.name.local != "DPS" {
        return Err(SignerError::ElementNotFound("DPS".to_string()));
    }
    root.children.push(Node::Element(signature_element));

    Ok(render(&root))
}

fn render(root: &Element) -> String {
    let bytes = canon::canonicalize_default(root);
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>{}",
        String::from_utf8_lossy(&bytes)
    )
}

/// Reescreve um documento XML ja serializado com indentacao de duas
/// colunas, para os dois usos descritos na secao 4.F onde o XML
/// compacto da assinatura nao e o formato desejado de entrega (log,
/// download manual, depuracao). A indentacao nunca participa da
/// canonicalizacao ou do calculo de digest, que sempre trabalham sobre
/// o XML compacto.
fn render_indented(xml: &str) -> Result<String, SignerError> {
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;
    use quick_xml::writer::Writer;
    use std::io::Cursor;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text = true;
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    loop {
        match reader
            .read_event()
            .map_err(|e| SignerError::Canonicalization(e.to_string()))?
        {
            Event::Eof => break,
            event => writer
                .write_event(event)
                .map_err(|e| SignerError::Canonicalization(e.to_string()))?,
        }
    }

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| SignerError::Canonicalization(e.to_string()))
}

/// Mesmo pipeline de [`sign_dps`] (canonicalizacao, digest, assinatura
/// RSA-SHA256, anexo de `Signature`), mas devolvendo o XML final
/// indentado em vez do formato compacto. As duas variantes assinam
/// bytes identicos; apenas a serializacao de saida muda.
pub fn sign_dps_pretty(dps_xml: &str, cert: &A1Certificate) -> Result<String, SignerError> {
    let signed = sign_dps(dps_xml, cert)?;
    render_indented(&signed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_de_infdps_e_deterministico() {
        let inf_dps = dom::parse(r#"<infDPS Id="DPS1"><tpAmb>1</tpAmb></infDPS>"#).unwrap();
        let c1 = canon::canonicalize_signed(&inf_dps, &CanonOptions::default());
        let c2 = canon::canonicalize_signed(&inf_dps, &CanonOptions::default());
        assert_eq!(Sha256::digest(&c1), Sha256::digest(&c2));
    }

    #[test]
    fn signed_info_referencia_o_id_do_elemento_assinado() {
        let signed_info = build_signed_info("DPS123", "abc==");
        let bytes = canon::canonicalize_default(&signed_info);
        let s = String::from_utf8(bytes).unwrap();
        assert!(s.contains(r#"URI="#DPS123""#));
        assert!(s.contains("abc=="));
    }

    #[test]
    fn dps_sem_infdps_nao_tem_o_elemento() {
        let root = dom::parse("<DPS><outro/></DPS>").unwrap();
        assert!(root.find("infDPS").is_none());
    }
}
