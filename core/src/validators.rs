//! Validadores estruturais (secao 4.D)
//!
//! Acumulam erros de forma determinista e independente de ordem: cada
//! validador de campo devolve sua propria sequencia de [`FieldError`] e o
//! agregador faz a uniao, sem interromper a validacao no primeiro erro.

use crate::calculator::{self, CalculationInput};
use crate::model::{Address, Service, Taker, Values};
use crate::taxid;
use serde::Serialize;

/// Erro de validacao de um campo especifico, identificado por caminho.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub code: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: impl Into<String>, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into(),
        }
    }
}

const UF_CODES: [&str; 27] = [
    "AC", "AL", "AP", "AM", "BA", "CE", "DF", "ES", "GO", "MA", "MT", "MS", "MG", "PA", "PB", "PR",
    "PE", "PI", "RJ", "RN", "RS", "RO", "RR", "SC", "SP", "SE", "TO",
];

/// Valida os campos monetarios de uma DPS, traduzindo o resultado de
/// `calculator::calculate` para a lista de campo/erro deste modulo.
pub fn validate_values(prefix: &str, values: &Values) -> Vec<FieldError> {
    let input = CalculationInput {
        service_value: values.service_value,
        unconditional_discount: values.unconditional_discount,
        conditional_discount: values.conditional_discount,
        deductions: values.deductions,
        iss_rate: values.iss_rate,
    };

    match calculator::calculate(&input) {
        Ok(_) => Vec::new(),
        Err(err) => {
            let code = match err {
                calculator::CalculationError::InvalidServiceValue => "INVALID_SERVICE_VALUE",
                calculator::CalculationError::ServiceValueOverCap => "SERVICE_VALUE_OVER_CAP",
                calculator::CalculationError::InvalidPrecision { .. } => "INVALID_PRECISION",
                calculator::CalculationError::NegativeField { .. } => "NEGATIVE_FIELD",
                calculator::CalculationError::FieldExceedsServiceValue { .. } => {
                    "FIELD_EXCEEDS_SERVICE_VALUE"
                }
                calculator::CalculationError::NegativeTaxBase => "NEGATIVE_TAX_BASE",
            };
            vec![FieldError::new(
                format!("{prefix}.service_value"),
                code,
                err.to_string(),
            )]
        }
    }
}

fn has_control_chars(s: &str) -> bool {
    s.chars().any(|c| c.is_control())
}

/// Valida um endereco nacional (IBGE + UF + CEP) ou estrangeiro (pais
/// diferente de BR, sem municipio/UF), de acordo com a natureza exigida
/// por `expect_national`.
pub fn validate_address(prefix: &str, address: &Address, expect_national: bool) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if expect_national {
        match &address.municipality_code {
            Some(code) if code.len() == 7 && code.chars().all(|c| c.is_ascii_digit()) => {}
            _ => errors.push(FieldError::new(
                format!("{prefix}.municipality_code"),
                "INVALID_MUNICIPALITY_CODE",
                "codigo de municipio IBGE deve ter 7 digitos",
            )),
        }
        match &address.state {
            Some(uf) if UF_CODES.contains(&uf.as_str()) => {}
            _ => errors.push(FieldError::new(
                format!("{prefix}.state"),
                "INVALID_STATE",
                "UF deve ser uma das 27 siglas validas",
            )),
        }
        match &address.zip_code {
            Some(cep) if cep.len() == 8 && cep.chars().all(|c| c.is_ascii_digit()) => {}
            _ => errors.push(FieldError::new(
                format!("{prefix}.zip_code"),
                "INVALID_ZIP_CODE",
                "CEP deve ter 8 digitos",
            )),
        }
    } else {
        match &address.country_code {
            Some(cc) if cc.len() == 2 && cc.to_uppercase() != "BR" => {}
            _ => errors.push(FieldError::new(
                format!("{prefix}.country_code"),
                "INVALID_COUNTRY_CODE",
                "endereco estrangeiro exige codigo de pais de 2 letras diferente de BR",
            )),
        }
        if address.municipality_code.is_some() {
            errors.push(FieldError::new(
                format!("{prefix}.municipality_code"),
                "FOREIGN_ADDRESS_FORBIDS_MUNICIPALITY",
                "endereco estrangeiro nao pode informar codigo de municipio",
            ));
        }
        if address.state.is_some() {
            errors.push(FieldError::new(
                format!("{prefix}.state"),
                "FOREIGN_ADDRESS_FORBIDS_STATE",
                "endereco estrangeiro nao pode informar UF",
            ));
        }
    }

    errors
}

/// Valida o tomador: exclusividade de `{cnpj, cpf, nif}`, tamanho do nome
/// e obrigatoriedade/formato de endereco conforme o tipo do tomador.
pub fn validate_taker(prefix: &str, taker: &Taker) -> Vec<FieldError> {
    let mut errors = Vec::new();

    let present = [&taker.cnpj, &taker.cpf, &taker.nif]
        .iter()
        .filter(|f| f.is_some())
        .count();

    if present != 1 {
        errors.push(FieldError::new(
            format!("{prefix}"),
            "TAKER_IDENTIFIER_EXCLUSIVITY",
            "exatamente um entre CNPJ, CPF e NIF deve ser informado",
        ));
    }

    if taker.name.len() > 300 {
        errors.push(FieldError::new(
            format!("{prefix}.name"),
            "NAME_TOO_LONG",
            "nome do tomador deve ter no maximo 300 caracteres",
        ));
    }
    if has_control_chars(&taker.name) {
        errors.push(FieldError::new(
            format!("{prefix}.name"),
            "NAME_CONTROL_CHARS",
            "nome do tomador nao pode conter caracteres de controle",
        ));
    }

    if taker.cnpj.is_some() {
        if let Some(cnpj) = &taker.cnpj {
            if !taxid::validate_cnpj(cnpj) {
                errors.push(FieldError::new(
                    format!("{prefix}.cnpj"),
                    "INVALID_CNPJ",
                    "CNPJ invalido",
                ));
            }
        }
        match &taker.address {
            Some(addr) => errors.extend(validate_address(&format!("{prefix}.address"), addr, true)),
            None => errors.push(FieldError::new(
                format!("{prefix}.address"),
                "ADDRESS_REQUIRED",
                "endereco nacional e obrigatorio para tomador CNPJ",
            )),
        }
    } else if taker.cpf.is_some() {
        if let Some(cpf) = &taker.cpf {
            if !taxid::validate_cpf(cpf) {
                errors.push(FieldError::new(
                    format!("{prefix}.cpf"),
                    "INVALID_CPF",
                    "CPF invalido",
                ));
            }
        }
        if let Some(addr) = &taker.address {
            errors.extend(validate_address(&format!("{prefix}.address"), addr, true));
        }
    } else if taker.nif.is_some() {
        match &taker.address {
            Some(addr) => errors.extend(validate_address(&format!("{prefix}.address"), addr, false)),
            None => errors.push(FieldError::new(
                format!("{prefix}.address"),
                "ADDRESS_REQUIRED",
                "endereco estrangeiro e obrigatorio para tomador NIF",
            )),
        }
    }

    errors
}

/// Valida os dados do servico (descricao nao vazia, codigos presentes).
pub fn validate_service(prefix: &str, service: &Service) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if service.national_code.trim().is_empty() {
        errors.push(FieldError::new(
            format!("{prefix}.national_code"),
            "REQUIRED",
            "codigo nacional do servico e obrigatorio",
        ));
    }
    if service.description.trim().is_empty() {
        errors.push(FieldError::new(
            format!("{prefix}.description"),
            "REQUIRED",
            "descricao do servico e obrigatoria",
        ));
    }
    if service.municipality_code.len() != 7
        || !service.municipality_code.chars().all(|c| c.is_ascii_digit())
    {
        errors.push(FieldError::new(
            format!("{prefix}.municipality_code"),
            "INVALID_MUNICIPALITY_CODE",
            "codigo de municipio de prestacao deve ter 7 digitos",
        ));
    }
    errors
}

/// Entrada agregada para validacao de um pedido de emissao estruturado
/// (corpo de `POST /v1/nfse`, secao 6).
pub struct EmissionRequestInput<'a> {
    pub taker: Option<&'a Taker>,
    pub service: &'a Service,
    pub values: &'a Values,
}

/// Executa todos os validadores de campo e devolve a uniao dos erros,
/// sem interromper em caso de falha parcial (secao 4.D).
pub fn validate_emission_request(input: &EmissionRequestInput<'_>) -> Vec<FieldError> {
    let mut errors = Vec::new();
    errors.extend(validate_values("values", input.values));
    errors.extend(validate_service("service", input.service));
    if let Some(taker) = input.taker {
        errors.extend(validate_taker("taker", taker));
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_values() -> Values {
        Values {
            service_value: 1000.0,
            unconditional_discount: 0.0,
            conditional_discount: 0.0,
            deductions: 0.0,
            iss_rate: 5.0,
        }
    }

    fn valid_service() -> Service {
        Service {
            national_code: "0107".into(),
            description: "Consultoria".into(),
            municipality_code: "3550308".into(),
        }
    }

    #[test]
    fn pedido_sem_tomador_e_valido_quando_valores_e_servico_ok() {
        let input = EmissionRequestInput {
            taker: None,
            service: &valid_service(),
            values: &valid_values(),
        };
        assert!(validate_emission_request(&input).is_empty());
    }

    #[test]
    fn tomador_com_mais_de_um_identificador_e_rejeitado() {
        let taker = Taker {
            cnpj: Some("11222333000181".into()),
            cpf: Some("52998224725".into()),
            nif: None,
            name: "Empresa".into(),
            address: None,
        };
        let errors = validate_taker("taker", &taker);
        assert!(errors.iter().any(|e| e.code == "TAKER_IDENTIFIER_EXCLUSIVITY"));
    }

    #[test]
    fn tomador_cnpj_exige_endereco_nacional() {
        let taker = Taker {
            cnpj: Some("11222333000181".into()),
            cpf: None,
            nif: None,
            name: "Empresa".into(),
            address: None,
        };
        let errors = validate_taker("taker", &taker);
        assert!(errors.iter().any(|e| e.code == "ADDRESS_REQUIRED"));
    }

    #[test]
    fn endereco_nacional_valida_uf_e_cep() {
        let addr = Address {
            street: "Rua A".into(),
            number: "10".into(),
            complement: None,
            district: "Centro".into(),
            municipality_code: Some("3550308".into()),
            state: Some("XX".into()),
            zip_code: Some("123".into()),
            country_code: None,
        };
        let errors = validate_address("address", &addr, true);
        assert!(errors.iter().any(|e| e.code == "INVALID_STATE"));
        assert!(errors.iter().any(|e| e.code == "INVALID_ZIP_CODE"));
    }

    #[test]
    fn endereco_estrangeiro_rejeita_municipio_e_uf() {
        let addr = Address {
            street: "Main st".into(),
            number: "1".into(),
            complement: None,
            district: "".into(),
            municipality_code: Some("3550308".into()),
            state: Some("SP".into()),
            zip_code: None,
            country_code: Some("US".into()),
        };
        let errors = validate_address("address", &addr, false);
        assert!(errors.iter().any(|e| e.code == "FOREIGN_ADDRESS_FORBIDS_MUNICIPALITY"));
        assert!(errors.iter().any(|e| e.code == "FOREIGN_ADDRESS_FORBIDS_STATE"));
    }

    #[test]
    fn nome_com_caractere_de_controle_e_rejeitado() {
        let taker = Taker {
            cnpj: Some("11222333000181".into()),
            cpf: None,
            nif: None,
            name: "Empresa\u{0007}".into(),
            address: None,
        };
        let errors = validate_taker("taker", &taker);
        assert!(errors.iter().any(|e| e.code == "NAME_CONTROL_CHARS"));
    }
}
