//! 402 payment-requirements advertiser.
//!
//! For any unpaid request to a priced route, the advertiser synthesizes the
//! per-rail payment options and responds `402 Payment Required` with:
//! - a `PAYMENT-REQUIRED` header carrying the base64-encoded JSON body,
//! - an empty JSON object as the response content.
//!
//! Accept entries are listed in the chain registry's stable order and their
//! amounts are computed by the same string arithmetic used at verification
//! time, so advertisement and verification can never disagree.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use serde_json::json;

use crate::network::{Chain, ChainRegistry, Network};
use crate::price::{price_to_base_units, PriceError};
use crate::services::Service;
use crate::types::{
    AcceptEntry, PaymentRequiredBody, ResourceInfo, Scheme, TokenAmount, X402Version2,
};

/// Header carrying the base64-encoded payment requirements.
pub const PAYMENT_REQUIRED_HEADER: &str = "PAYMENT-REQUIRED";

/// Payment timeout advertised per rail: the fast rail confirms in
/// milliseconds, the permit rails wait on facilitator settlement.
fn max_timeout_seconds(network: Network) -> u64 {
    if network.is_fast_rail() { 60 } else { 300 }
}

/// Rail-specific extra block for an accept entry.
fn extra_for(chain: &Chain) -> serde_json::Value {
    match chain.network {
        Network::Megaeth => crate::facilitator_fast::FastRailFacilitator::extra(),
        Network::Base => json!({"name": "USD Coin", "version": "2"}),
        Network::Solana => json!({"feePayer": chain.pay_to}),
    }
}

/// Builds 402 advertisements from the chain registry.
#[derive(Clone)]
pub struct Advertiser {
    chains: ChainRegistry,
}

impl Advertiser {
    pub fn new(chains: ChainRegistry) -> Self {
        Self { chains }
    }

    /// The accept entry for one service on one chain.
    pub fn accept_entry(&self, service: &Service, chain: &Chain) -> Result<AcceptEntry, PriceError> {
        let amount = price_to_base_units(&service.price, chain.stablecoin.decimals)?;
        Ok(AcceptEntry {
            scheme: Scheme::Exact,
            network: chain.chain_id.clone(),
            amount: TokenAmount(amount),
            asset: chain.stablecoin.address.clone(),
            pay_to: chain.pay_to.clone(),
            max_timeout_seconds: max_timeout_seconds(chain.network),
            extra: Some(extra_for(chain)),
        })
    }

    /// Accept entries for every enabled rail, in stable registry order.
    pub fn accept_entries(&self, service: &Service) -> Result<Vec<AcceptEntry>, PriceError> {
        self.chains
            .all()
            .iter()
            .map(|chain| self.accept_entry(service, chain))
            .collect()
    }

    /// The decoded 402 body for a service at a request URL.
    pub fn payment_required_body(
        &self,
        service: &Service,
        url: &str,
    ) -> Result<PaymentRequiredBody, PriceError> {
        Ok(PaymentRequiredBody {
            x402_version: X402Version2,
            error: "Payment required".to_string(),
            resource: ResourceInfo {
                url: url.to_string(),
                description: service.description.clone(),
                mime_type: service.mime_type.clone(),
            },
            accepts: self.accept_entries(service)?,
        })
    }

    /// The full 402 response: header, status, empty-object body.
    pub fn respond_402(&self, service: &Service, url: &str) -> Response {
        let body = match self.payment_required_body(service, url) {
            Ok(body) => body,
            Err(e) => {
                // Catalog prices are validated at load; reaching this means
                // the registry and catalog disagree.
                tracing::error!(service = %service.id, error = %e, "could not price accept entries");
                return crate::errors::GatewayError::Internal.into_response();
            }
        };
        let encoded = match serde_json::to_vec(&body) {
            Ok(raw) => base64::engine::general_purpose::STANDARD.encode(raw),
            Err(e) => {
                tracing::error!(error = %e, "could not serialize 402 body");
                return crate::errors::GatewayError::Internal.into_response();
            }
        };

        let mut response = (
            StatusCode::PAYMENT_REQUIRED,
            axum::Json(json!({})),
        )
            .into_response();
        match encoded.parse() {
            Ok(value) => {
                response.headers_mut().insert(PAYMENT_REQUIRED_HEADER, value);
            }
            Err(e) => {
                tracing::error!(error = %e, "could not encode PAYMENT-REQUIRED header");
                return crate::errors::GatewayError::Internal.into_response();
            }
        }
        response.headers_mut().insert(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            PAYMENT_REQUIRED_HEADER
                .parse()
                .expect("static header value"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ServiceMethod;
    use alloy::primitives::U256;

    fn registry() -> ChainRegistry {
        ChainRegistry::new(
            "0x1111111111111111111111111111111111111111".to_string(),
            "7hQxnCfyqyPNjdhL5DCAyBJDHjVUsYBkqLcVRRHCmVuq".to_string(),
            "https://carrot.megaeth.com/rpc".to_string(),
            "0x2222222222222222222222222222222222222222".to_string(),
        )
    }

    fn weather_service() -> Service {
        Service {
            id: "weather-current".to_string(),
            display_name: "Current Weather".to_string(),
            description: "Current weather conditions for a city".to_string(),
            price: "0.001".to_string(),
            method: ServiceMethod::Get,
            path: "/api/weather/current".to_string(),
            provider: "openweather".to_string(),
            cost_estimate: None,
            params: vec![],
            mime_type: "application/json".to_string(),
            category: "weather".to_string(),
        }
    }

    #[test]
    fn test_amounts_match_price_arithmetic() {
        let advertiser = Advertiser::new(registry());
        let entries = advertiser.accept_entries(&weather_service()).unwrap();
        assert_eq!(entries.len(), 3);

        // Fast rail, 18 decimals: 0.001 USD = 10^15 base units.
        assert_eq!(
            entries[0].amount.0,
            U256::from(10u64).pow(U256::from(15u64))
        );
        // Base, 6 decimals: 0.001 USD = 10^3 base units.
        assert_eq!(entries[1].amount.0, U256::from(1000u64));
        // Solana, 6 decimals.
        assert_eq!(entries[2].amount.0, U256::from(1000u64));
    }

    #[test]
    fn test_stable_rail_order() {
        let advertiser = Advertiser::new(registry());
        let entries = advertiser.accept_entries(&weather_service()).unwrap();
        assert_eq!(entries[0].network.to_string(), "eip155:6342");
        assert_eq!(entries[1].network.to_string(), "eip155:8453");
        assert!(entries[2].network.to_string().starts_with("solana:"));
    }

    #[test]
    fn test_body_shape() {
        let advertiser = Advertiser::new(registry());
        let body = advertiser
            .payment_required_body(&weather_service(), "/api/weather/current?q=London")
            .unwrap();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["x402Version"], 2);
        assert_eq!(json["error"], "Payment required");
        assert_eq!(json["resource"]["url"], "/api/weather/current?q=London");
        assert_eq!(json["resource"]["mimeType"], "application/json");
        assert!(json["accepts"].as_array().unwrap().len() >= 1);
    }

    #[test]
    fn test_header_roundtrip() {
        let advertiser = Advertiser::new(registry());
        let service = weather_service();
        let response = advertiser.respond_402(&service, "/api/weather/current");
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

        let header = response
            .headers()
            .get(PAYMENT_REQUIRED_HEADER)
            .expect("PAYMENT-REQUIRED header present")
            .to_str()
            .unwrap()
            .to_string();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(header)
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(body["x402Version"], 2);
        assert!(!body["accepts"].as_array().unwrap().is_empty());

        let exposed = response
            .headers()
            .get(header::ACCESS_CONTROL_EXPOSE_HEADERS)
            .unwrap();
        assert_eq!(exposed, PAYMENT_REQUIRED_HEADER);
    }

    #[test]
    fn test_solana_extra_has_fee_payer() {
        let advertiser = Advertiser::new(registry());
        let entries = advertiser.accept_entries(&weather_service()).unwrap();
        let solana = &entries[2];
        assert!(solana.extra.as_ref().unwrap().get("feePayer").is_some());
    }
}
