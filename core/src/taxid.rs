//! Codec de CNPJ/CPF (secao 4.A)
//!
//! Limpeza, validacao por digito verificador modulo 11, formatacao e
//! mascaramento dos identificadores fiscais brasileiros.

use crate::error::TaxIdError;

/// Tipo de identificador fiscal reconhecido por [`validate_tax_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxIdKind {
    Cnpj,
    Cpf,
}

/// Remove tudo que nao for digito decimal.
pub fn clean(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn all_same_digit(digits: &str) -> bool {
    let mut chars = digits.chars();
    match chars.next() {
        Some(first) => chars.all(|c| c == first),
        None => true,
    }
}

fn mod11_digit(weighted_sum: u32) -> u8 {
    let remainder = weighted_sum % 11;
    if remainder < 2 {
        0
    } else {
        (11 - remainder) as u8
    }
}

/// Calcula os dois digitos verificadores de uma base numerica de CNPJ
/// (12 digitos) ou CPF (9 digitos), retornando-os na ordem em que devem
/// ser anexados.
pub fn generate_check_digits(base: &str) -> Result<(u8, u8), TaxIdError> {
    let digits: Vec<u32> = base
        .chars()
        .map(|c| c.to_digit(10))
        .collect::<Option<Vec<_>>>()
        .ok_or(TaxIdError::CheckDigitMismatch)?;

    let weights_for = |len: usize| -> Vec<u32> {
        match len {
            12 => vec![5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2],
            13 => vec![6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2],
            9 => vec![10, 9, 8, 7, 6, 5, 4, 3, 2],
            10 => vec![11, 10, 9, 8, 7, 6, 5, 4, 3, 2],
            _ => unreachable!(),
        }
    };

    let weights1 = weights_for(digits.len());
    let sum1: u32 = digits.iter().zip(weights1.iter()).map(|(d, w)| d * w).sum();
    let dv1 = mod11_digit(sum1);

    let mut digits2 = digits.clone();
    digits2.push(dv1 as u32);
    let weights2 = weights_for(digits2.len());
    let sum2: u32 = digits2.iter().zip(weights2.iter()).map(|(d, w)| d * w).sum();
    let dv2 = mod11_digit(sum2);

    Ok((dv1, dv2))
}

/// Valida um CNPJ apos limpeza dos caracteres nao numericos.
pub fn validate_cnpj(s: &str) -> bool {
    let digits = clean(s);
    if digits.len() != 14 {
        return false;
    }
    if all_same_digit(&digits) {
        return false;
    }
    let base = &digits[..12];
    let given = &digits[12..];
    match generate_check_digits(base) {
        Ok((dv1, dv2)) => format!("{}{}", dv1, dv2) == given,
        Err(_) => false,
    }
}

/// Valida um CPF apos limpeza dos caracteres nao numericos.
pub fn validate_cpf(s: &str) -> bool {
    let digits = clean(s);
    if digits.len() != 11 {
        return false;
    }
    if all_same_digit(&digits) {
        return false;
    }
    let base = &digits[..9];
    let given = &digits[9..];
    match generate_check_digits(base) {
        Ok((dv1, dv2)) => format!("{}{}", dv1, dv2) == given,
        Err(_) => false,
    }
}

/// Limpa e valida um CNPJ, retornando apenas os digitos.
pub fn clean_cnpj(s: &str) -> Result<String, TaxIdError> {
    let digits = clean(s);
    if digits.len() != 14 {
        return Err(TaxIdError::InvalidLength { expected: 14, actual: digits.len() });
    }
    if all_same_digit(&digits) {
        return Err(TaxIdError::RepeatedDigits);
    }
    if !validate_cnpj(&digits) {
        return Err(TaxIdError::CheckDigitMismatch);
    }
    Ok(digits)
}

/// Limpa e valida um CPF, retornando apenas os digitos.
pub fn clean_cpf(s: &str) -> Result<String, TaxIdError> {
    let digits = clean(s);
    if digits.len() != 11 {
        return Err(TaxIdError::InvalidLength { expected: 11, actual: digits.len() });
    }
    if all_same_digit(&digits) {
        return Err(TaxIdError::RepeatedDigits);
    }
    if !validate_cpf(&digits) {
        return Err(TaxIdError::CheckDigitMismatch);
    }
    Ok(digits)
}

/// Formata um CNPJ limpo como `00.000.000/0000-00`.
pub fn format_cnpj(digits: &str) -> String {
    let d = clean(digits);
    if d.len() != 14 {
        return d;
    }
    format!(
        "{}.{}.{}/{}-{}",
        &d[0..2],
        &d[2..5],
        &d[5..8],
        &d[8..12],
        &d[12..14]
    )
}

/// Formata um CPF limpo como `000.000.000-00`.
pub fn format_cpf(digits: &str) -> String {
    let d = clean(digits);
    if d.len() != 11 {
        return d;
    }
    format!("{}.{}.{}-{}", &d[0..3], &d[3..6], &d[6..9], &d[9..11])
}

/// Mascara um CNPJ expondo apenas os dois primeiros e dois ultimos digitos.
pub fn cnpj_mask(digits: &str) -> String {
    let d = clean(digits);
    if d.len() != 14 {
        return "*".repeat(d.len());
    }
    format!("{}**********{}", &d[0..2], &d[12..14])
}

/// Mascara um CPF expondo apenas os tres primeiros e dois ultimos digitos.
pub fn cpf_mask(digits: &str) -> String {
    let d = clean(digits);
    if d.len() != 11 {
        return "*".repeat(d.len());
    }
    format!("{}******{}", &d[0..3], &d[9..11])
}

/// Detecta o tipo de identificador fiscal (CNPJ ou CPF) pelo tamanho limpo
/// e valida o digito verificador.
pub fn validate_tax_id(s: &str) -> (Option<TaxIdKind>, bool) {
    let digits = clean(s);
    match digits.len() {
        14 => (Some(TaxIdKind::Cnpj), validate_cnpj(&digits)),
        11 => (Some(TaxIdKind::Cpf), validate_cpf(&digits)),
        _ => (None, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valida_cnpj_formatado() {
        assert!(validate_cnpj("11.222.333/0001-81"));
    }

    #[test]
    fn valida_cpf_valido() {
        assert!(validate_cpf("52998224725"));
        assert!(!validate_cpf("00000000000"));
    }

    #[test]
    fn rejeita_tamanho_invalido() {
        assert!(clean_cpf("123").is_err());
        assert!(clean_cnpj("123").is_err());
    }

    #[test]
    fn rejeita_digitos_repetidos() {
        assert!(!validate_cnpj("11111111111111"));
        assert!(!validate_cpf("11111111111"));
    }

    #[test]
    fn mascara_cpf_expoe_apenas_bordas() {
        assert_eq!(cpf_mask("52998224725"), "529******25");
    }

    #[test]
    fn mascara_cnpj_expoe_apenas_bordas() {
        assert_eq!(cnpj_mask("11222333000181"), "11**********81");
    }

    #[test]
    fn detecta_tipo_pelo_tamanho() {
        let (kind, ok) = validate_tax_id("52998224725");
        assert_eq!(kind, Some(TaxIdKind::Cpf));
        assert!(ok);

        let (kind, ok) = validate_tax_id("11222333000181");
        assert_eq!(kind, Some(TaxIdKind::Cnpj));
        assert!(ok);
    }

    #[test]
    fn formata_cnpj_e_cpf() {
        assert_eq!(format_cnpj("11222333000181"), "11.222.333/0001-81");
        assert_eq!(format_cpf("52998224725"), "529.982.247-25");
    }
}
