//! Codec do identificador da DPS (secao 4.B)
//!
//! Layout fixo de 42 digitos:
//! `municipio[7] | tipoInscricao[1] | inscricaoFederal[14] | serie[5] | numero[15]`

use crate::error::DpsIdError;
use std::fmt;

/// Tipo de inscricao federal do prestador identificado na DPS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationType {
    Cnpj = 1,
    Cpf = 2,
}

impl RegistrationType {
    fn from_digit(d: u8) -> Result<Self, DpsIdError> {
        match d {
            1 => Ok(RegistrationType::Cnpj),
            2 => Ok(RegistrationType::Cpf),
            other => Err(DpsIdError::InvalidRegistrationType(other)),
        }
    }
}

/// Identificador de 42 digitos de uma Declaracao de Prestacao de Servicos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DpsId {
    pub municipality_code: String,
    pub registration_type: RegistrationType,
    pub federal_registration: String,
    pub series: String,
    pub number: String,
}

const TOTAL_LEN: usize = 42;
const MUNICIPALITY_LEN: usize = 7;
const REG_TYPE_LEN: usize = 1;
const FEDERAL_REG_LEN: usize = 14;
const SERIES_LEN: usize = 5;
const NUMBER_LEN: usize = 15;

impl DpsId {
    /// Analisa uma string de 42 digitos, aplicando todas as verificacoes
    /// de secao 4.B (tamanho, numericidade, tipo de inscricao, padding de
    /// CPF).
    pub fn parse(s: &str) -> Result<Self, DpsIdError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DpsIdError::EmptyDpsId);
        }
        if trimmed.len() != TOTAL_LEN {
            return Err(DpsIdError::InvalidLength);
        }
        if !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return Err(DpsIdError::NonNumeric);
        }

        let mut offset = 0;
        let municipality_code = trimmed[offset..offset + MUNICIPALITY_LEN].to_string();
        offset += MUNICIPALITY_LEN;

        let reg_type_digit: u8 = trimmed[offset..offset + REG_TYPE_LEN].parse().unwrap();
        let registration_type = RegistrationType::from_digit(reg_type_digit)?;
        offset += REG_TYPE_LEN;

        let federal_registration = trimmed[offset..offset + FEDERAL_REG_LEN].to_string();
        offset += FEDERAL_REG_LEN;

        let series = trimmed[offset..offset + SERIES_LEN].to_string();
        offset += SERIES_LEN;

        let number = trimmed[offset..offset + NUMBER_LEN].to_string();

        if registration_type == RegistrationType::Cpf && !federal_registration.starts_with("000") {
            return Err(DpsIdError::InvalidCpfPadding);
        }

        Ok(Self {
            municipality_code,
            registration_type,
            federal_registration,
            series,
            number,
        })
    }

    /// Repete as verificacoes estruturais de [`DpsId::parse`] sobre uma
    /// instancia ja construida (ex.: via [`DpsId::new`]).
    pub fn validate(&self) -> Result<(), DpsIdError> {
        if self.municipality_code.len() != MUNICIPALITY_LEN
            || !self.municipality_code.chars().all(|c| c.is_ascii_digit())
        {
            return Err(DpsIdError::InvalidLength);
        }
        if self.federal_registration.len() != FEDERAL_REG_LEN
            || !self.federal_registration.chars().all(|c| c.is_ascii_digit())
        {
            return Err(DpsIdError::InvalidLength);
        }
        if self.series.len() != SERIES_LEN || !self.series.chars().all(|c| c.is_ascii_digit()) {
            return Err(DpsIdError::InvalidLength);
        }
        if self.number.len() != NUMBER_LEN || !self.number.chars().all(|c| c.is_ascii_digit()) {
            return Err(DpsIdError::InvalidLength);
        }
        if self.registration_type == RegistrationType::Cpf
            && !self.federal_registration.starts_with("000")
        {
            return Err(DpsIdError::InvalidCpfPadding);
        }
        Ok(())
    }

    /// Normaliza os componentes de entrada (removendo `.`, `-`, `/` da
    /// inscricao federal, zero-preenchendo CPF de 11 para 14 digitos e
    /// serie/numero para 5/15 digitos) e constroi um [`DpsId`] valido.
    pub fn new(
        municipality_code: &str,
        registration_type: RegistrationType,
        federal_registration: &str,
        series: &str,
        number: &str,
    ) -> Result<Self, DpsIdError> {
        let cleaned_fed: String = federal_registration
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();

        let federal_registration = match registration_type {
            RegistrationType::Cpf if cleaned_fed.len() == 11 => format!("000{}", cleaned_fed),
            _ => cleaned_fed,
        };

        let municipality_code = format!("{:0>7}", municipality_code);
        let series = format!("{:0>5}", series);
        let number = format!("{:0>15}", number);

        let dps = Self {
            municipality_code,
            registration_type,
            federal_registration,
            series,
            number,
        };
        dps.validate()?;
        Ok(dps)
    }

    /// Formata o valor de volta para a string de 42 digitos de origem.
    pub fn to_id_string(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.municipality_code,
            self.registration_type as u8,
            self.federal_registration,
            self.series,
            self.number
        )
    }
}

impl fmt::Display for DpsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_id_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "355030811234567800019900001000000000000001";

    #[test]
    fn parse_extrai_campos_fixos() {
        let id = DpsId::parse(SAMPLE).unwrap();
        assert_eq!(id.municipality_code, "3550308");
        assert_eq!(id.registration_type, RegistrationType::Cnpj);
        assert_eq!(id.federal_registration, "12345678000199");
        assert_eq!(id.series, "00001");
        assert_eq!(id.number, "000000000000001");
    }

    #[test]
    fn round_trip_reproduz_entrada() {
        let id = DpsId::parse(SAMPLE).unwrap();
        assert_eq!(id.to_id_string(), SAMPLE);
    }

    #[test]
    fn vazio_retorna_erro_dedicado() {
        assert_eq!(DpsId::parse(""), Err(DpsIdError::EmptyDpsId));
        assert_eq!(DpsId::parse("   "), Err(DpsIdError::EmptyDpsId));
    }

    #[test]
    fn comprimento_incorreto_e_rejeitado() {
        let too_short = &SAMPLE[..41];
        let too_long = format!("{}9", SAMPLE);
        assert_eq!(DpsId::parse(too_short), Err(DpsIdError::InvalidLength));
        assert_eq!(DpsId::parse(&too_long), Err(DpsIdError::InvalidLength));
    }

    #[test]
    fn cpf_sem_padding_e_rejeitado() {
        let mut bad = SAMPLE.to_string();
        bad.replace_range(7..8, "2");
        assert_eq!(DpsId::parse(&bad), Err(DpsIdError::InvalidCpfPadding));
    }

    #[test]
    fn tipo_inscricao_invalido() {
        let mut bad = SAMPLE.to_string();
        bad.replace_range(7..8, "9");
        assert_eq!(DpsId::parse(&bad), Err(DpsIdError::InvalidRegistrationType(9)));
    }

    #[test]
    fn new_normaliza_cpf_e_preenche_zeros() {
        let id = DpsId::new("3550308", RegistrationType::Cpf, "529.982.247-25", "1", "1").unwrap();
        assert_eq!(id.federal_registration, "00052998224725");
        assert_eq!(id.series, "00001");
        assert_eq!(id.number, "000000000000001");
    }

    #[test]
    fn new_normaliza_cnpj_com_pontuacao() {
        let id = DpsId::new("3550308", RegistrationType::Cnpj, "11.222.333/0001-81", "1", "1").unwrap();
        assert_eq!(id.federal_registration, "11222333000181");
    }
}
