//! Extrator de DPS pre-assinada (secao 4.H)
//!
//! Usado quando o cliente ja possui um XML `DPS` assinado externamente
//! e envia o payload em base64 para emissao direta. Extrai os campos
//! minimos necessarios para registro e roteamento sem revalidar a
//! assinatura criptograficamente (isso e responsabilidade do SEFIN).

use crate::error::PresignedError;
use crate::xml::dom::{self, Element};
use base64::Engine;

/// Campos extraidos de uma DPS pre-assinada.
#[derive(Debug, Clone, PartialEq)]
pub struct PresignedDps {
    pub dps_id: String,
    pub provider_cnpj: Option<String>,
    pub provider_cpf: Option<String>,
    pub provider_name: Option<String>,
    pub provider_municipality: Option<String>,
    pub series: Option<String>,
    pub number: Option<String>,
    pub service_value: Option<f64>,
    pub environment_code: Option<u8>,
    pub emission_datetime: Option<String>,
    pub national_service_code: Option<String>,
    pub service_description: Option<String>,
    pub service_municipality: Option<String>,
    pub has_signature: bool,
    pub xml: String,
}

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%:z", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

fn parse_decimal_tolerant(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse::<f64>().ok()
}

fn try_parse_datetime(raw: &str) -> Option<String> {
    for format in DATE_FORMATS {
        if chrono::DateTime::parse_from_str(raw, format).is_ok() {
            return Some(raw.to_string());
        }
        if chrono::NaiveDateTime::parse_from_str(raw, format).is_ok() {
            return Some(raw.to_string());
        }
    }
    None
}

fn find_provider<'a>(dps: &'a Element, inf_dps: &'a Element) -> Result<&'a Element, PresignedError> {
    inf_dps
        .find("prest")
        .or_else(|| dps.find("prest"))
        .ok_or(PresignedError::MissingProvider)
}

/// Decodifica o payload base64, analisa o XML e extrai os campos
/// minimos de uma DPS pre-assinada (secao 4.H), distinguindo cada
/// condicao de falha.
pub fn extract_presigned(base64_payload: &str) -> Result<PresignedDps, PresignedError> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(base64_payload.trim())
        .map_err(|e| PresignedError::MalformedBase64(e.to_string()))?;
    let xml = String::from_utf8(decoded).map_err(|e| PresignedError::MalformedBase64(e.to_string()))?;

    let root = dom::parse(&xml).map_err(|e| PresignedError::MalformedXml(e.to_string()))?;

    let dps = if root.name.local == "DPS" {
        &root
    } else {
        root.find("DPS").ok_or(PresignedError::MissingDps)?
    };

    let inf_dps = dps.find("infDPS").ok_or(PresignedError::MissingInfDps)?;
    let dps_id = inf_dps.attr("Id").ok_or(PresignedError::MissingId)?.to_string();

    let provider = find_provider(dps, inf_dps)?;
    let provider_cnpj = provider.attr("CNPJ").map(|s| s.to_string()).or_else(|| {
        provider.find("CNPJ").and_then(|e| text_content(e))
    });
    let provider_cpf = provider.attr("CPF").map(|s| s.to_string()).or_else(|| {
        provider.find("CPF").and_then(|e| text_content(e))
    });

    if provider_cnpj.is_none() && provider_cpf.is_none() {
        return Err(PresignedError::MissingProviderIdentifier);
    }

    let environment_code = inf_dps
        .find("tpAmb")
        .and_then(text_content)
        .and_then(|s| parse_decimal_tolerant(&s))
        .map(|v| v as u8);

    let emission_datetime = inf_dps
        .find("dhEmi")
        .and_then(text_content)
        .and_then(|s| try_parse_datetime(&s));

    let provider_name = provider.find("xNome").and_then(text_content);
    let provider_municipality = inf_dps.find("cLocEmi").and_then(text_content);
    let series = inf_dps.find("serie").and_then(text_content);
    let number = inf_dps.find("nDPS").and_then(text_content);
    let service_value = inf_dps
        .find("vServ")
        .and_then(text_content)
        .and_then(|s| parse_decimal_tolerant(&s));
    let national_service_code = inf_dps.find("xTribNac").and_then(text_content);
    let service_description = inf_dps.find("xDescServ").and_then(text_content);
    let service_municipality = inf_dps.find("cMunIncid").and_then(text_content);
    let has_signature = dps.find("Signature").is_some();

    Ok(PresignedDps {
        dps_id,
        provider_cnpj,
        provider_cpf,
        provider_name,
        provider_municipality,
        series,
        number,
        service_value,
        environment_code,
        emission_datetime,
        national_service_code,
        service_description,
        service_municipality,
        has_signature,
        xml,
    })
}

fn text_content(elem: &Element) -> Option<String> {
    elem.children.iter().find_map(|c| match c {
        crate::xml::dom::Node::Text(t) => Some(t.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(xml: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(xml.as_bytes())
    }

    const VALID_XML: &str = r#"<DPS><infDPS Id="355030811234567800019900001000000000000001"><tpAmb>1</tpAmb><dhEmi>2026-01-15T10:00:00-03:00</dhEmi><serie>1</serie><nDPS>42</nDPS><cLocEmi>3550308</cLocEmi><prest><CNPJ>11222333000181</CNPJ><xNome>Prestador LTDA</xNome></prest><serv><cMunIncid>3550308</cMunIncid><xTribNac>0107</xTribNac><xDescServ>Consultoria</xDescServ></serv><valores><vServPrest><vServ>1000.00</vServ></vServPrest></valores></infDPS></DPS>"#;

    #[test]
    fn extrai_campos_de_dps_valida() {
        let result = extract_presigned(&encode(VALID_XML)).unwrap();
        assert_eq!(result.dps_id, "355030811234567800019900001000000000000001");
        assert_eq!(result.provider_cnpj.as_deref(), Some("11222333000181"));
        assert_eq!(result.provider_name.as_deref(), Some("Prestador LTDA"));
        assert_eq!(result.provider_municipality.as_deref(), Some("3550308"));
        assert_eq!(result.series.as_deref(), Some("1"));
        assert_eq!(result.number.as_deref(), Some("42"));
        assert_eq!(result.service_value, Some(1000.0));
        assert_eq!(result.national_service_code.as_deref(), Some("0107"));
        assert_eq!(result.service_description.as_deref(), Some("Consultoria"));
        assert_eq!(result.service_municipality.as_deref(), Some("3550308"));
        assert!(!result.has_signature);
        assert_eq!(result.environment_code, Some(1));
        assert!(result.emission_datetime.is_some());
    }

    #[test]
    fn rejeita_base64_malformado() {
        assert!(matches!(
            extract_presigned("not-base64!!!"),
            Err(PresignedError::MalformedBase64(_))
        ));
    }

    #[test]
    fn rejeita_xml_sem_infdps() {
        let xml = "<DPS><outro/></DPS>";
        assert_eq!(extract_presigned(&encode(xml)), Err(PresignedError::MissingInfDps));
    }

    #[test]
    fn rejeita_prestador_sem_identificador() {
        let xml = r#"<DPS><infDPS Id="x"><prest><xNome>Sem Doc</xNome></prest></infDPS></DPS>"#;
        assert_eq!(extract_presigned(&encode(xml)), Err(PresignedError::MissingProviderIdentifier));
    }

    #[test]
    fn rejeita_infdps_sem_id() {
        let xml = r#"<DPS><infDPS><prest><CNPJ>11222333000181</CNPJ></prest></infDPS></DPS>"#;
        assert_eq!(extract_presigned(&encode(xml)), Err(PresignedError::MissingId));
    }
}
