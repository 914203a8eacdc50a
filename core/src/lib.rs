//! # nfse-core
//!
//! Logica pura de emissao de NFS-e (DPS v1.00): codecs de CNPJ/CPF e de
//! identificador de DPS, calculo de ISS, validadores estruturais,
//! canonicalizacao e assinatura XMLDSig, construcao/extracao de XML e
//! traducao de codigos de rejeicao.
//!
//! Este crate nao realiza I/O: persistencia, fila de tarefas e
//! integracao com o SEFIN vivem em `nfse-service`.

pub mod calculator;
pub mod dpsid;
pub mod error;
pub mod model;
pub mod rejection;
pub mod taxid;
pub mod validators;
pub mod xml;

pub use error::Error;
pub use model::{EmissionRequest, EmissionResult, EmissionStatus, Environment, Rejection};
