//! Cliente SEFIN simulado: aceita toda submissao, derivando uma chave
//! de acesso deterministica do XML recebido. Usado em desenvolvimento e
//! nos testes do processador, onde um backend nacional real nao esta
//! disponivel.

use super::{NfseEvent, SefinClient, SefinError, SefinOutcome};
use async_trait::async_trait;
use nfse_core::model::EmissionResult;
use nfse_core::xml::dom;
use sha2::{Digest, Sha256};

#[derive(Default)]
pub struct MockSefinClient;

impl MockSefinClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SefinClient for MockSefinClient {
    async fn submit_dps(&self, signed_xml: &str) -> Result<SefinOutcome, SefinError> {
        let root = dom::parse(signed_xml)
            .map_err(|e| SefinError::MalformedResponse(e.to_string()))?;
        let inf_dps = root
            .find("infDPS")
            .ok_or_else(|| SefinError::MalformedResponse("infDPS ausente".to_string()))?;
        let dps_id = inf_dps
            .attr("Id")
            .ok_or_else(|| SefinError::MalformedResponse("Id ausente em infDPS".to_string()))?;

        let digest = Sha256::digest(dps_id.as_bytes());
        let access_key = hex::encode(digest);
        let nfse_number = dps_id[dps_id.len() - 15..].trim_start_matches('0').to_string();

        Ok(SefinOutcome::Accepted(EmissionResult {
            access_key,
            nfse_number: if nfse_number.is_empty() { "0".to_string() } else { nfse_number },
            xml: signed_xml.to_string(),
        }))
    }

    async fn query_status(&self, access_key: &str) -> Result<SefinOutcome, SefinError> {
        Ok(SefinOutcome::Accepted(EmissionResult {
            access_key: access_key.to_string(),
            nfse_number: "0".to_string(),
            xml: String::new(),
        }))
    }

    async fn query_events(
        &self,
        _access_key: &str,
        event_type: Option<&str>,
    ) -> Result<Vec<NfseEvent>, SefinError> {
        // Nenhum backend nacional real esta disponivel neste ambiente;
        // uma NFS-e simulada nao acumula eventos ainda.
        let events = Vec::new();
        Ok(match event_type {
            Some(filter) => events
                .into_iter()
                .filter(|e: &NfseEvent| e.event_type == filter)
                .collect(),
            None => events,
        })
    }

    async fn lookup_dps(&self, dps_id: &str) -> Result<Option<SefinOutcome>, SefinError> {
        if dps_id.len() != 42 {
            return Ok(None);
        }
        let digest = Sha256::digest(dps_id.as_bytes());
        let access_key = hex::encode(digest);
        let nfse_number = dps_id[dps_id.len() - 15..].trim_start_matches('0').to_string();
        Ok(Some(SefinOutcome::Accepted(EmissionResult {
            access_key,
            nfse_number: if nfse_number.is_empty() { "0".to_string() } else { nfse_number },
            xml: String::new(),
        })))
    }

    async fn check_dps_exists(&self, dps_id: &str) -> Result<bool, SefinError> {
        Ok(dps_id.len() == 42)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn aceita_dps_assinada_valida() {
        let client = MockSefinClient::new();
        let xml = r#"<DPS><infDPS Id="355030811234567800019900001000000000000001"></infDPS></DPS>"#;
        let outcome = client.submit_dps(xml).await.unwrap();
        match outcome {
            SefinOutcome::Accepted(result) => assert!(!result.access_key.is_empty()),
            SefinOutcome::Rejected(_) => panic!("esperava aceitacao"),
        }
    }

    #[tokio::test]
    async fn rejeita_xml_sem_infdps() {
        let client = MockSefinClient::new();
        let err = client.submit_dps("<DPS></DPS>").await.unwrap_err();
        assert!(matches!(err, SefinError::MalformedResponse(_)));
    }
}
