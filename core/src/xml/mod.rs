//! Pipeline de documento XML: arvore minima, canonicalizacao exclusiva,
//! assinatura XMLDSig, construcao de DPS e extracao de DPS pre-assinada.

pub mod builder;
pub mod canon;
pub mod dom;
pub mod presigned;
pub mod signer;
