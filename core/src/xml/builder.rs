//! Construtor do documento DPS (secao 4.G)
//!
//! Monta a arvore `DPS > infDPS > {...}` na ordem exata exigida pelo
//! schema nacional, converte valores monetarios para ponto fixo de duas
//! casas e resolve `dhEmi` para o fuso horario informado usando
//! `chrono-tz`.

use crate::calculator::{self, CalculationInput};
use crate::dpsid::{DpsId, RegistrationType};
use crate::error::XmlError;
use crate::model::{Environment, EmissionRequest};
use crate::xml::dom::{Element, Node, QName};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

const DPS_NS: &str = "http://www.sped.fazenda.gov.br/nfse";
const SCHEMA_VERSION: &str = "1.00";
const BRAZIL_TZ: Tz = chrono_tz::America::Sao_Paulo;

fn money(value: f64) -> String {
    format!("{:.2}", value)
}

fn text(name: &str, value: impl Into<String>) -> Node {
    Node::Element(Element {
        name: QName::unprefixed(name),
        namespaces: Vec::new(),
        attributes: Vec::new(),
        children: vec![Node::Text(value.into())],
    })
}

fn elem(name: &str, children: Vec<Node>) -> Node {
    Node::Element(Element {
        name: QName::unprefixed(name),
        namespaces: Vec::new(),
        attributes: Vec::new(),
        children,
    })
}

fn provider_federal_registration(request: &EmissionRequest) -> Result<(RegistrationType, String), XmlError> {
    if let Some(cnpj) = &request.provider.cnpj {
        Ok((RegistrationType::Cnpj, cnpj.clone()))
    } else if let Some(cpf) = &request.provider.cpf {
        Ok((RegistrationType::Cpf, cpf.clone()))
    } else {
        Err(XmlError::Structure("prestador sem CNPJ ou CPF".to_string()))
    }
}

/// Deriva o identificador de 42 digitos (`DpsId`) de um pedido de
/// emissao estruturado, sem montar o XML completo. Usado pela API para
/// registrar o identificador assim que o pedido e aceito, antes de o
/// worker construir e assinar a DPS.
pub fn compute_dps_id(request: &EmissionRequest) -> Result<DpsId, XmlError> {
    let (reg_type, federal_registration) = provider_federal_registration(request)?;
    DpsId::new(
        &request.provider.municipality_code,
        reg_type,
        &federal_registration,
        &request.dps.series,
        &request.dps.number,
    )
    .map_err(|e| XmlError::Structure(format!("identificador de DPS invalido: {e}")))
}

/// `subst` e obrigatorio na ordem de filhos de `infDPS` (secao 4.G),
/// mas so carrega conteudo quando esta DPS substitui uma NFS-e ja
/// autorizada.
fn build_subst(request: &EmissionRequest) -> Node {
    match &request.dps.substituted_access_key {
        Some(access_key) => elem("subst", vec![text("chSubstda", access_key.clone())]),
        None => elem("subst", Vec::new()),
    }
}

fn build_toma(request: &EmissionRequest) -> Option<Node> {
    let taker = request.taker.as_ref()?;
    let mut children = Vec::new();
    if let Some(cnpj) = &taker.cnpj {
        children.push(text("CNPJ", cnpj.clone()));
    } else if let Some(cpf) = &taker.cpf {
        children.push(text("CPF", cpf.clone()));
    } else if let Some(nif) = &taker.nif {
        children.push(text("NIF", nif.clone()));
    }
    children.push(text("xNome", taker.name.clone()));
    if let Some(address) = &taker.address {
        let mut addr_children = vec![
            text("xLgr", address.street.clone()),
            text("nro", address.number.clone()),
        ];
        if let Some(complement) = &address.complement {
            addr_children.push(text("xCpl", complement.clone()));
        }
        addr_children.push(text("xBairro", address.district.clone()));
        if let Some(code) = &address.municipality_code {
            addr_children.push(text("cMun", code.clone()));
        }
        if let Some(state) = &address.state {
            addr_children.push(text("UF", state.clone()));
        }
        if let Some(zip) = &address.zip_code {
            addr_children.push(text("CEP", zip.clone()));
        }
        if let Some(country) = &address.country_code {
            addr_children.push(text("cPais", country.clone()));
        }
        children.push(elem("end", addr_children));
    }
    Some(elem("toma", children))
}

fn build_valores(request: &EmissionRequest) -> Result<Node, XmlError> {
    let input = CalculationInput {
        service_value: request.values.service_value,
        unconditional_discount: request.values.unconditional_discount,
        conditional_discount: request.values.conditional_discount,
        deductions: request.values.deductions,
        iss_rate: request.values.iss_rate,
    };
    let result = calculator::calculate(&input)
        .map_err(|e| XmlError::Structure(format!("valores invalidos: {e}")))?;

    let mut v_serv_prest = vec![text("vServ", money(request.values.service_value))];
    if request.values.unconditional_discount > 0.0 {
        v_serv_prest.push(text("vDescIncond", money(request.values.unconditional_discount)));
    }
    if request.values.conditional_discount > 0.0 {
        v_serv_prest.push(text("vDescCond", money(request.values.conditional_discount)));
    }

    let mut children = vec![elem("vServPrest", v_serv_prest)];
    if request.values.deductions > 0.0 {
        children.push(text("vDedRed", money(request.values.deductions)));
    }
    children.push(elem(
        "trib",
        vec![text("vBC", money(result.tax_base)), text("pAliq", format!("{:.4}", request.values.iss_rate)), text(
            "vISSQN",
            money(result.iss_amount),
        )],
    ));
    children.push(text("totTrib", money(result.iss_amount)));

    Ok(elem("valores", children))
}

/// Monta o documento `DPS` completo a partir de um [`EmissionRequest`],
/// devolvendo o XML serializado (sem assinatura). A serializacao segue
/// a ordem de campos do schema nacional, nao a ordem alfabetica usada
/// pela canonicalizacao.
pub fn build_dps(request: &EmissionRequest, now: DateTime<Utc>) -> Result<String, XmlError> {
    let dps_id = compute_dps_id(request)?;

    let dh_emi = now.with_timezone(&BRAZIL_TZ).to_rfc3339();

    let mut prest_children = Vec::new();
    if let Some(cnpj) = &request.provider.cnpj {
        prest_children.push(text("CNPJ", cnpj.clone()));
    } else if let Some(cpf) = &request.provider.cpf {
        prest_children.push(text("CPF", cpf.clone()));
    }
    prest_children.push(text("xNome", request.provider.name.clone()));

    let mut serv_children = vec![
        text("cMunIncid", request.service.municipality_code.clone()),
        text("xTribNac", request.service.national_code.clone()),
        text("xDescServ", request.service.description.clone()),
    ];
    let _ = &mut serv_children;

    let mut inf_dps_children = vec![
        text("tpAmb", request.environment.code().to_string()),
        text("dhEmi", dh_emi),
        text("verAplic", "1.00"),
        text("serie", request.dps.series.clone()),
        text("nDPS", request.dps.number.clone()),
        text("dCompet", now.format("%Y-%m-%d").to_string()),
        text("tpEmit", "1"),
        text("cLocEmi", request.provider.municipality_code.clone()),
        build_subst(request),
        elem("prest", prest_children),
    ];
    if let Some(toma) = build_toma(request) {
        inf_dps_children.push(toma);
    }
    inf_dps_children.push(elem("serv", serv_children));
    inf_dps_children.push(build_valores(request)?);

    let inf_dps = Element {
        name: QName::unprefixed("infDPS"),
        namespaces: Vec::new(),
        attributes: vec![(QName::unprefixed("Id"), dps_id.to_id_string())],
        children: inf_dps_children,
    };

    let dps = Element {
        name: QName::unprefixed("DPS"),
        namespaces: vec![(None, DPS_NS.to_string())],
        attributes: vec![(QName::unprefixed("versao"), SCHEMA_VERSION.to_string())],
        children: vec![Node::Element(inf_dps)],
    };

    let bytes = crate::xml::canon::canonicalize_default(&dps);
    Ok(format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>{}",
        String::from_utf8_lossy(&bytes)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DpsNumbering, EmissionStatus, Provider, Service, Values};
    use chrono::TimeZone;

    fn sample_request() -> EmissionRequest {
        EmissionRequest {
            request_id: "r1".into(),
            api_key_id: "k1".into(),
            idempotency_key: "idem1".into(),
            status: EmissionStatus::Pending,
            environment: Environment::Homologation,
            provider: Provider {
                cnpj: Some("11222333000181".into()),
                cpf: None,
                name: "Prestador LTDA".into(),
                municipality_code: "3550308".into(),
            },
            taker: None,
            service: Service {
                national_code: "0107".into(),
                description: "Consultoria".into(),
                municipality_code: "3550308".into(),
            },
            values: Values {
                service_value: 1000.0,
                unconditional_discount: 0.0,
                conditional_discount: 0.0,
                deductions: 0.0,
                iss_rate: 5.0,
            },
            dps: DpsNumbering { series: "1".into(), number: "1".into(), substituted_access_key: None },
            dps_id: None,
            certificate: None,
            webhook_url: None,
            retry_count: 0,
            last_error: None,
            is_presigned: false,
            presigned_xml: None,
            result: None,
            rejection: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn monta_dps_com_infdps_id_e_valores() {
        let request = sample_request();
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let xml = build_dps(&request, now).unwrap();
        assert!(xml.contains("<DPS"));
        assert!(xml.contains("infDPS"));
        assert!(xml.contains("vServ"));
        assert!(xml.contains("1000.00"));
    }

    #[test]
    fn rejeita_prestador_sem_identificador() {
        let mut request = sample_request();
        request.provider.cnpj = None;
        request.provider.cpf = None;
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        assert!(build_dps(&request, now).is_err());
    }
}
