//! Calculadora de valores e ISS (secao 4.C)
//!
//! Arredondamento bancario ("banker's rounding") em duas casas decimais,
//! conforme a decisao de precisao monetaria registrada em `DESIGN.md`
//! (ponto flutuante `f64` em vez de decimal de ponto fixo).

use crate::error::CalculationError;

const SERVICE_VALUE_CAP: f64 = 999_999_999.99;
const PRECISION_EPSILON: f64 = 1e-3;

/// Entrada do calculo de valores de uma DPS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalculationInput {
    pub service_value: f64,
    pub unconditional_discount: f64,
    pub conditional_discount: f64,
    pub deductions: f64,
    pub iss_rate: f64,
}

/// Resultado do calculo: base de calculo, aliquota de deducao e valores
/// finais de ISS e liquido.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalculationResult {
    pub tax_base: f64,
    pub deduction_pct: f64,
    pub iss_amount: f64,
    pub net_value: f64,
}

/// Arredonda para duas casas decimais usando arredondamento bancario
/// (metade para o par mais proximo).
pub fn round2(value: f64) -> f64 {
    let scaled = value * 100.0;
    let floor = scaled.floor();
    let diff = scaled - floor;

    let rounded = if (diff - 0.5).abs() < 1e-9 {
        if (floor as i64) % 2 == 0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        scaled.round()
    };

    rounded / 100.0
}

/// Retorna `true` se `value` tem no maximo duas casas decimais dentro da
/// tolerancia de 10^-3 exigida pela propriedade de teste da secao 8.
fn has_at_most_two_decimals(value: f64) -> bool {
    let scaled = value * 100.0;
    (scaled - scaled.round()).abs() < PRECISION_EPSILON
}

/// Executa o calculo de valores descrito na secao 4.C, incluindo todas as
/// condicoes de falha enumeradas ali.
pub fn calculate(input: &CalculationInput) -> Result<CalculationResult, CalculationError> {
    if input.service_value <= 0.0 {
        return Err(CalculationError::InvalidServiceValue);
    }
    if input.service_value > SERVICE_VALUE_CAP {
        return Err(CalculationError::ServiceValueOverCap);
    }

    let fields: [(&'static str, f64); 4] = [
        ("service_value", input.service_value),
        ("unconditional_discount", input.unconditional_discount),
        ("conditional_discount", input.conditional_discount),
        ("deductions", input.deductions),
    ];

    for (name, value) in fields {
        if !has_at_most_two_decimals(value) {
            return Err(CalculationError::InvalidPrecision { field: name });
        }
    }

    for (name, value) in [
        ("unconditional_discount", input.unconditional_discount),
        ("conditional_discount", input.conditional_discount),
        ("deductions", input.deductions),
    ] {
        if value < 0.0 {
            return Err(CalculationError::NegativeField { field: name });
        }
        if value > input.service_value {
            return Err(CalculationError::FieldExceedsServiceValue { field: name });
        }
    }

    if input.unconditional_discount + input.deductions > input.service_value {
        return Err(CalculationError::NegativeTaxBase);
    }

    let tax_base = round2(input.service_value - input.unconditional_discount - input.deductions);
    let iss_amount = round2(tax_base * (input.iss_rate / 100.0));
    let deduction_pct = if input.service_value > 0.0 {
        round2((input.deductions / input.service_value) * 100.0)
    } else {
        0.0
    };
    let net_value = round2(
        input.service_value - input.unconditional_discount - input.conditional_discount - input.deductions,
    );

    Ok(CalculationResult {
        tax_base,
        deduction_pct,
        iss_amount,
        net_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-2
    }

    #[test]
    fn cenario_1_calculo_completo() {
        let input = CalculationInput {
            service_value: 1500.00,
            unconditional_discount: 100.00,
            conditional_discount: 50.00,
            deductions: 200.00,
            iss_rate: 2.0,
        };
        let result = calculate(&input).unwrap();
        assert!(close(result.tax_base, 1200.00));
        assert!(close(result.iss_amount, 24.00));
        assert!(close(result.deduction_pct, 13.33));
        assert!(close(result.net_value, 1150.00));
    }

    #[test]
    fn cenario_2_mei_aliquota_zero() {
        let input = CalculationInput {
            service_value: 1000.00,
            unconditional_discount: 0.0,
            conditional_discount: 0.0,
            deductions: 0.0,
            iss_rate: 0.0,
        };
        let result = calculate(&input).unwrap();
        assert!(close(result.tax_base, 1000.00));
        assert!(close(result.iss_amount, 0.00));
    }

    #[test]
    fn valor_servico_zero_e_rejeitado() {
        let input = CalculationInput {
            service_value: 0.0,
            unconditional_discount: 0.0,
            conditional_discount: 0.0,
            deductions: 0.0,
            iss_rate: 5.0,
        };
        assert_eq!(calculate(&input), Err(CalculationError::InvalidServiceValue));
    }

    #[test]
    fn valor_servico_no_limite_e_aceito() {
        let input = CalculationInput {
            service_value: 999_999_999.99,
            unconditional_discount: 0.0,
            conditional_discount: 0.0,
            deductions: 0.0,
            iss_rate: 1.0,
        };
        assert!(calculate(&input).is_ok());
    }

    #[test]
    fn valor_servico_com_tres_decimais_e_rejeitado() {
        let input = CalculationInput {
            service_value: 999_999_999.999,
            unconditional_discount: 0.0,
            conditional_discount: 0.0,
            deductions: 0.0,
            iss_rate: 1.0,
        };
        assert_eq!(
            calculate(&input),
            Err(CalculationError::InvalidPrecision { field: "service_value" })
        );
    }

    #[test]
    fn descontos_iguais_ao_servico_zeram_base() {
        let input = CalculationInput {
            service_value: 1000.0,
            unconditional_discount: 600.0,
            conditional_discount: 0.0,
            deductions: 400.0,
            iss_rate: 5.0,
        };
        let result = calculate(&input).unwrap();
        assert!(close(result.tax_base, 0.0));
    }

    #[test]
    fn descontos_acima_do_servico_geram_base_negativa() {
        let input = CalculationInput {
            service_value: 1000.0,
            unconditional_discount: 700.0,
            conditional_discount: 0.0,
            deductions: 400.0,
            iss_rate: 5.0,
        };
        assert_eq!(calculate(&input), Err(CalculationError::NegativeTaxBase));
    }

    #[test]
    fn desconto_condicionado_nao_afeta_base() {
        let input_a = CalculationInput {
            service_value: 1000.0,
            unconditional_discount: 0.0,
            conditional_discount: 900.0,
            deductions: 0.0,
            iss_rate: 5.0,
        };
        let input_b = CalculationInput {
            conditional_discount: 0.0,
            ..input_a
        };
        assert_eq!(calculate(&input_a).unwrap().tax_base, calculate(&input_b).unwrap().tax_base);
    }

    #[test]
    fn campo_negativo_e_rejeitado() {
        let input = CalculationInput {
            service_value: 1000.0,
            unconditional_discount: -1.0,
            conditional_discount: 0.0,
            deductions: 0.0,
            iss_rate: 5.0,
        };
        assert_eq!(
            calculate(&input),
            Err(CalculationError::NegativeField { field: "unconditional_discount" })
        );
    }
}
