//! Tradutor de codigos de rejeicao (secao 4.M)
//!
//! Mantem uma tabela estatica de codigos conhecidos, consultavel sem
//! distincao de maiusculas/minusculas, e um registro em memoria que
//! permite adicionar traducoes adicionais (ex.: de um arquivo de
//! configuracao carregado pelo servico) sem recompilar.

use crate::model::RejectionCategory;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::RwLock;

/// Traducao de um codigo de rejeicao governamental ou interno.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectionInfo {
    pub message: String,
    pub description: String,
    pub action: String,
    pub category: RejectionCategory,
    pub retryable: bool,
}

fn entry(
    message: &str,
    description: &str,
    action: &str,
    category: RejectionCategory,
    retryable: bool,
) -> RejectionInfo {
    RejectionInfo {
        message: message.to_string(),
        description: description.to_string(),
        action: action.to_string(),
        category,
        retryable,
    }
}

fn static_table() -> HashMap<String, RejectionInfo> {
    use RejectionCategory::*;
    let rows: &[(&str, &str, &str, &str, RejectionCategory, bool)] = &[
        (
            "E001",
            "CNPJ do prestador invalido",
            "O CNPJ informado para o prestador nao passa na validacao dos digitos verificadores (modulo 11).",
            "Corrija o CNPJ do prestador e reenvie a emissao.",
            Validation,
            false,
        ),
        (
            "E002",
            "CPF do prestador invalido",
            "O CPF informado para o prestador nao passa na validacao dos digitos verificadores (modulo 11).",
            "Corrija o CPF do prestador e reenvie a emissao.",
            Validation,
            false,
        ),
        (
            "E003",
            "municipio do prestador desconhecido",
            "O codigo IBGE informado para o municipio do prestador nao consta na tabela nacional de municipios.",
            "Verifique o codigo IBGE do municipio do prestador e reenvie.",
            Validation,
            false,
        ),
        (
            "E004",
            "inscricao municipal do prestador invalida",
            "A inscricao municipal informada nao corresponde ao cadastro do prestador na prefeitura.",
            "Confirme a inscricao municipal junto a prefeitura e reenvie.",
            Validation,
            false,
        ),
        (
            "E005",
            "prestador nao habilitado a emitir NFS-e neste municipio",
            "O prestador nao possui credenciamento ativo para emissao de NFS-e no municipio informado.",
            "Regularize o credenciamento do prestador junto a prefeitura antes de tentar novamente.",
            Permission,
            false,
        ),
        (
            "E020",
            "identificador do tomador invalido",
            "Nenhum identificador valido (CNPJ, CPF ou NIF) foi informado para o tomador do servico.",
            "Informe um identificador valido para o tomador e reenvie.",
            Validation,
            false,
        ),
        (
            "E021",
            "CNPJ do tomador invalido",
            "O CNPJ informado para o tomador nao passa na validacao dos digitos verificadores (modulo 11).",
            "Corrija o CNPJ do tomador e reenvie a emissao.",
            Validation,
            false,
        ),
        (
            "E022",
            "CPF do tomador invalido",
            "O CPF informado para o tomador nao passa na validacao dos digitos verificadores (modulo 11).",
            "Corrija o CPF do tomador e reenvie a emissao.",
            Validation,
            false,
        ),
        (
            "E023",
            "endereco do tomador incompleto",
            "O endereco do tomador esta ausente ou sem os campos obrigatorios (logradouro, numero, bairro).",
            "Complete o endereco do tomador e reenvie.",
            Validation,
            false,
        ),
        (
            "E024",
            "mais de um identificador informado para o tomador",
            "Mais de um entre CNPJ, CPF e NIF foi informado para o tomador; apenas um e permitido.",
            "Informe exatamente um identificador para o tomador e reenvie.",
            Validation,
            false,
        ),
        (
            "E040",
            "valor do servico invalido",
            "O valor do servico e zero, negativo ou nao numerico.",
            "Informe um valor de servico positivo e reenvie.",
            Validation,
            false,
        ),
        (
            "E041",
            "base de calculo negativa",
            "A base de calculo do ISS, apos descontos e deducoes, resultou em valor negativo.",
            "Revise os descontos e deducoes informados e reenvie.",
            Validation,
            false,
        ),
        (
            "E042",
            "aliquota de ISS fora do intervalo permitido pelo municipio",
            "A aliquota de ISS informada esta fora da faixa permitida pela legislacao do municipio de incidencia.",
            "Ajuste a aliquota de ISS conforme a legislacao municipal e reenvie.",
            Validation,
            false,
        ),
        (
            "E043",
            "codigo de servico nacional desconhecido",
            "O codigo de tributacao nacional informado nao consta na tabela de servicos do SEFIN.",
            "Verifique o codigo de servico nacional e reenvie.",
            Validation,
            false,
        ),
        (
            "E060",
            "numero de DPS duplicado",
            "Ja existe uma DPS autorizada com a mesma serie e numero para este prestador.",
            "Utilize um novo numero de DPS e reenvie.",
            Duplicate,
            false,
        ),
        (
            "E061",
            "serie de DPS invalida para o prestador",
            "A serie informada nao esta habilitada para o prestador no municipio de emissao.",
            "Utilize uma serie valida para o prestador e reenvie.",
            Validation,
            false,
        ),
        (
            "E062",
            "identificador de 42 digitos malformado",
            "O identificador de 42 digitos da DPS nao segue o formato esperado pelo schema nacional.",
            "Revise a montagem do identificador da DPS e reenvie.",
            Validation,
            false,
        ),
        (
            "E080",
            "codigo de municipio de incidencia invalido",
            "O codigo IBGE informado para o municipio de incidencia do servico nao consta na tabela nacional.",
            "Verifique o codigo IBGE do municipio de incidencia e reenvie.",
            Validation,
            false,
        ),
        (
            "E081",
            "servico nao tributavel no municipio informado",
            "O codigo de servico informado nao e tributavel pelo ISS no municipio de incidencia indicado.",
            "Confirme o codigo de servico e o municipio de incidencia e reenvie.",
            Validation,
            false,
        ),
        (
            "E100",
            "SEFIN indisponivel",
            "O backend nacional do SEFIN nao respondeu a submissao.",
            "Aguarde o reprocessamento automatico; nenhuma acao do cliente e necessaria.",
            Service,
            true,
        ),
        (
            "E101",
            "tempo limite excedido ao contatar o SEFIN",
            "A submissao ao SEFIN excedeu o tempo limite configurado antes de receber resposta.",
            "Aguarde o reprocessamento automatico; nenhuma acao do cliente e necessaria.",
            Service,
            true,
        ),
        (
            "E102",
            "erro interno do SEFIN",
            "O SEFIN retornou um erro interno ao processar a submissao.",
            "Aguarde o reprocessamento automatico; se persistir, contate o suporte do SEFIN.",
            Service,
            true,
        ),
        (
            "E103",
            "certificado expirado ou revogado",
            "O certificado digital A1 usado para assinar a DPS esta expirado ou foi revogado pela autoridade certificadora.",
            "Renove o certificado digital e reenvie a emissao.",
            Certificate,
            false,
        ),
        (
            "E104",
            "assinatura XMLDSig invalida",
            "A assinatura XMLDSig anexada a DPS nao corresponde ao digest calculado sobre o conteudo assinado.",
            "Verifique o processo de assinatura e reenvie a DPS.",
            Certificate,
            false,
        ),
        (
            "E200",
            "chave de acesso nao autorizada para este ambiente",
            "A chave de acesso consultada pertence a um ambiente (producao/homologacao) diferente do autenticado.",
            "Consulte a chave de acesso no ambiente correto.",
            Permission,
            false,
        ),
        (
            "E201",
            "DPS nao encontrada",
            "Nenhuma DPS foi encontrada para o identificador informado.",
            "Verifique o identificador e tente novamente.",
            NotFound,
            false,
        ),
        (
            "E202",
            "requisicao nao autenticada",
            "A requisicao nao apresentou uma chave de API valida.",
            "Inclua uma chave de API valida no cabecalho da requisicao.",
            Permission,
            false,
        ),
        (
            "E203",
            "limite de requisicoes excedido",
            "O numero de requisicoes desta chave de API excedeu o limite por minuto configurado.",
            "Aguarde a janela de um minuto se renovar antes de tentar novamente.",
            Service,
            true,
        ),
        (
            "XML_BUILD_ERROR",
            "falha ao construir o XML da DPS",
            "Os dados estruturados do pedido nao puderam ser serializados no formato exigido pelo schema nacional.",
            "Revise os dados do pedido e reenvie a emissao.",
            Validation,
            false,
        ),
        (
            "CERTIFICATE_ERROR",
            "falha ao processar o certificado digital",
            "O certificado digital A1 enviado nao pode ser lido, decodificado ou validado.",
            "Verifique o arquivo PFX e a senha informada e reenvie.",
            Certificate,
            false,
        ),
    ];
    rows.iter()
        .map(|(code, msg, desc, action, cat, retry)| {
            (code.to_string(), entry(msg, desc, action, *cat, *retry))
        })
        .collect()
}

static REGISTRY: Lazy<RwLock<HashMap<String, RejectionInfo>>> = Lazy::new(|| RwLock::new(static_table()));

fn normalize(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Consulta a traducao de um codigo. Codigos desconhecidos caem em
/// [`RejectionCategory::Unknown`], nao-retentavel.
pub fn lookup(code: &str) -> RejectionInfo {
    let key = normalize(code);
    REGISTRY
        .read()
        .expect("registro de rejeicoes envenenado")
        .get(&key)
        .cloned()
        .unwrap_or_else(|| entry("codigo de rejeicao desconhecido", RejectionCategory::Unknown, false))
}

pub fn is_retryable(code: &str) -> bool {
    lookup(code).retryable
}

pub fn category_of(code: &str) -> RejectionCategory {
    lookup(code).category
}

/// Registra ou sobrescreve uma traducao em tempo de execucao (ex.: a
/// partir de uma tabela carregada de configuracao pelo servico).
pub fn register(code: &str, info: RejectionInfo) {
    REGISTRY
        .write()
        .expect("registro de rejeicoes envenenado")
        .insert(normalize(code), info);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codigo_conhecido_e_case_insensitive() {
        let a = lookup("e100");
        let b = lookup("E100");
        assert_eq!(a, b);
        assert!(a.retryable);
    }

    #[test]
    fn codigo_desconhecido_cai_em_unknown() {
        let info = lookup("E999");
        assert_eq!(info.category, RejectionCategory::Unknown);
        assert!(!info.retryable);
    }

    #[test]
    fn duplicado_nao_e_retentavel() {
        assert!(!is_retryable("E060"));
        assert_eq!(category_of("E060"), RejectionCategory::Duplicate);
    }

    #[test]
    fn registro_customizado_sobrescreve_tabela_estatica() {
        register(
            "E900",
            entry(
                "codigo customizado de teste",
                "descricao customizada de teste",
                "acao customizada de teste",
                RejectionCategory::Unknown,
                true,
            ),
        );
        let info = lookup("e900");
        assert!(info.retryable);
    }
}
