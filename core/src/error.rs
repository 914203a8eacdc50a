//! Erros do pipeline de emissao da NFS-e
//!
//! Cada variante corresponde a um "kind" distinto citado pela especificacao
//! (secoes 4.C, 4.F, 4.H e 7), nunca a uma mensagem generica.

use derive_more::{Display, Error as DeriveError};

/// Taxonomia de erro do componente de calculo de valores (secao 4.C).
#[derive(Debug, Display, DeriveError, Clone, PartialEq, Eq)]
pub enum CalculationError {
    #[display(fmt = "valor do servico deve ser maior que zero")]
    InvalidServiceValue,
    #[display(fmt = "valor do servico excede o limite de 999.999.999,99")]
    ServiceValueOverCap,
    #[display(fmt = "campo {} possui mais de duas casas decimais", field)]
    InvalidPrecision { field: &'static str },
    #[display(fmt = "campo {} nao pode ser negativo", field)]
    NegativeField { field: &'static str },
    #[display(fmt = "desconto ou deducao no campo {} excede o valor do servico", field)]
    FieldExceedsServiceValue { field: &'static str },
    #[display(fmt = "desconto incondicionado somado as deducoes excede o valor do servico (base de calculo negativa)")]
    NegativeTaxBase,
}

/// Taxonomia de erro do codec de CNPJ/CPF (secao 4.A).
#[derive(Debug, Display, DeriveError, Clone, PartialEq, Eq)]
pub enum TaxIdError {
    #[display(fmt = "tamanho invalido apos limpeza: esperado {}, encontrado {}", expected, actual)]
    InvalidLength { expected: usize, actual: usize },
    #[display(fmt = "sequencia de digitos repetidos nao e um identificador valido")]
    RepeatedDigits,
    #[display(fmt = "digitos verificadores nao conferem")]
    CheckDigitMismatch,
}

/// Taxonomia de erro do codec de identificador da DPS (secao 4.B).
#[derive(Debug, Display, DeriveError, Clone, PartialEq, Eq)]
pub enum DpsIdError {
    #[display(fmt = "identificador da DPS vazio")]
    EmptyDpsId,
    #[display(fmt = "tamanho invalido: esperado 42 digitos")]
    InvalidLength,
    #[display(fmt = "identificador da DPS deve conter apenas digitos")]
    NonNumeric,
    #[display(fmt = "tipo de inscricao invalido: {}", _0)]
    InvalidRegistrationType(#[error(not(source))] u8),
    #[display(fmt = "inscricao federal de CPF deve iniciar com \"000\"")]
    InvalidCpfPadding,
}

/// Taxonomia de erro do assinador XMLDSig (secao 4.F).
#[derive(Debug, Display, DeriveError)]
pub enum SignerError {
    #[display(fmt = "arquivo PKCS#12 invalido ou corrompido: {}", _0)]
    InvalidPkcs12(String),
    #[display(fmt = "senha do certificado incorreta")]
    WrongPassword,
    #[display(fmt = "certificado nao contem chave privada")]
    MissingPrivateKey,
    #[display(fmt = "certificado nao contem cadeia X.509")]
    MissingCertificate,
    #[display(fmt = "chave privada nao e RSA ou e de tipo nao suportado")]
    UnsupportedKeyType,
    #[display(fmt = "chave RSA de {} bits e menor que o minimo de 1024 bits", bits)]
    KeyTooSmall { bits: usize },
    #[display(fmt = "certificado expirado em {}", not_after)]
    CertificateExpired { not_after: String },
    #[display(fmt = "certificado ainda nao e valido, valido a partir de {}", not_before)]
    CertificateNotYetValid { not_before: String },
    #[display(fmt = "elemento {} nao encontrado no documento", _0)]
    ElementNotFound(String),
    #[display(fmt = "atributo Id nao encontrado no elemento assinado")]
    MissingId,
    #[display(fmt = "falha ao assinar com RSA-SHA256: {}", _0)]
    SigningFailed(String),
    #[display(fmt = "falha ao canonicalizar XML: {}", _0)]
    Canonicalization(String),
}

/// Taxonomia de erro do extrator de DPS pre-assinada (secao 4.H).
#[derive(Debug, Display, DeriveError, Clone, PartialEq, Eq)]
pub enum PresignedError {
    #[display(fmt = "payload base64 malformado: {}", _0)]
    MalformedBase64(String),
    #[display(fmt = "XML malformado: {}", _0)]
    MalformedXml(String),
    #[display(fmt = "elemento DPS ausente")]
    MissingDps,
    #[display(fmt = "elemento infDPS ausente")]
    MissingInfDps,
    #[display(fmt = "atributo Id ausente em infDPS")]
    MissingId,
    #[display(fmt = "elemento prest (prestador) ausente")]
    MissingProvider,
    #[display(fmt = "identificador do prestador (CNPJ ou CPF) ausente")]
    MissingProviderIdentifier,
}

/// Erro de parsing/serializacao XML generico usado pelo builder e pelo
/// canonicalizador. Mantem o mesmo idioma `derive_more` do restante do
/// crate em vez de introduzir `thiserror` apenas para este modulo.
#[derive(Debug, Display, DeriveError)]
pub enum XmlError {
    #[display(fmt = "erro de leitura/escrita XML: {}", _0)]
    Quick(#[error(source)] quick_xml::Error),
    #[display(fmt = "estrutura XML invalida: {}", _0)]
    Structure(String),
}

impl From<quick_xml::Error> for XmlError {
    fn from(e: quick_xml::Error) -> Self {
        XmlError::Quick(e)
    }
}

/// Erro agregado de todo o crate `nfse-core`, usado nas fronteiras publicas
/// onde o chamador precisa de um unico tipo (ex.: o orquestrador de emissao).
#[derive(Debug, Display, DeriveError)]
pub enum Error {
    #[display(fmt = "{}", _0)]
    Calculation(CalculationError),
    #[display(fmt = "{}", _0)]
    TaxId(TaxIdError),
    #[display(fmt = "{}", _0)]
    DpsId(DpsIdError),
    #[display(fmt = "{}", _0)]
    Signer(SignerError),
    #[display(fmt = "{}", _0)]
    Presigned(PresignedError),
    #[display(fmt = "{}", _0)]
    Xml(XmlError),
    #[display(fmt = "erro de validacao: {} campo(s) invalido(s)", _0)]
    Validation(#[error(not(source))] usize),
}

impl From<CalculationError> for Error {
    fn from(e: CalculationError) -> Self {
        Error::Calculation(e)
    }
}
impl From<TaxIdError> for Error {
    fn from(e: TaxIdError) -> Self {
        Error::TaxId(e)
    }
}
impl From<DpsIdError> for Error {
    fn from(e: DpsIdError) -> Self {
        Error::DpsId(e)
    }
}
impl From<SignerError> for Error {
    fn from(e: SignerError) -> Self {
        Error::Signer(e)
    }
}
impl From<PresignedError> for Error {
    fn from(e: PresignedError) -> Self {
        Error::Presigned(e)
    }
}
impl From<XmlError> for Error {
    fn from(e: XmlError) -> Self {
        Error::Xml(e)
    }
}
