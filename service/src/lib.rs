//! Camada de servico da emissao de NFS-e: armazenamento, fila de jobs,
//! integracao com o SEFIN, entrega de webhooks e a API HTTP que os
//! amarra. A logica pura (calculo de ISS, construcao e assinatura de
//! XML, validacao) vive na crate `nfse-core`; aqui cuidamos apenas do
//! que envolve I/O.

pub mod api;
pub mod config;
pub mod error;
pub mod processor;
pub mod queue;
pub mod sefin;
pub mod store;
pub mod webhook;
