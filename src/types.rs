//! Wire types for the x402 payment protocol.
//!
//! Everything here crosses an HTTP boundary: 402 advertisement bodies,
//! payment headers echoed back by clients, and verify/settle responses
//! exchanged with facilitators. Field names follow the protocol's camelCase
//! convention.

use serde::{Deserialize, Serialize};

use crate::network::ChainId;
use alloy::primitives::U256;

/// x402 protocol version marker. Serializes as the bare number `2` and
/// refuses anything else on the way in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct X402Version2;

impl Serialize for X402Version2 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(2)
    }
}

impl<'de> Deserialize<'de> for X402Version2 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = u8::deserialize(deserializer)?;
        if v == 2 {
            Ok(X402Version2)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected x402 version 2, got {v}"
            )))
        }
    }
}

/// Payment scheme identifier. The gateway only speaks `exact`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
}

/// A token amount in base units, carried on the wire as a decimal string so
/// 18-decimal amounts survive JSON number precision.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TokenAmount(pub U256);

impl std::fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        TokenAmount(value)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_str_radix(&s, 10)
            .map(TokenAmount)
            .map_err(|e| serde::de::Error::custom(format!("invalid token amount {s:?}: {e}")))
    }
}

/// Metadata about the payment-gated resource, embedded in 402 bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    /// The URL of the payment-gated resource.
    pub url: String,
    /// Human-readable description of the resource.
    pub description: String,
    /// MIME type of the resource content.
    pub mime_type: String,
}

/// One element of the `accepts` array in a 402 response: a single payment
/// option on a single network.
///
/// The human-readable price is intentionally absent. Clients echo the whole
/// entry back inside their payment header, and the server compares the echo
/// against its own freshly built entry with strict equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptEntry {
    pub scheme: Scheme,
    /// CAIP-2 identifier of the settlement network.
    pub network: ChainId,
    /// Required amount in the stablecoin's base units.
    pub amount: TokenAmount,
    /// Stablecoin contract address on this network.
    pub asset: String,
    /// Recipient address.
    pub pay_to: String,
    /// How long the payment option stays actionable.
    pub max_timeout_seconds: u64,
    /// Rail-specific extras: EIP-712 `{name, version}` on EVM rails, the
    /// fee payer on Solana.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// The decoded body of a 402 response (also carried base64-encoded in the
/// `PAYMENT-REQUIRED` header).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredBody {
    pub x402_version: X402Version2,
    pub error: String,
    pub resource: ResourceInfo,
    pub accepts: Vec<AcceptEntry>,
}

/// A client's decoded payment header: the accept entry it chose plus the
/// rail-specific proof payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentHeader {
    pub x402_version: u8,
    pub accepted: AcceptedOption,
    /// Rail-specific proof. `{txHash}` on the fast rail; an opaque signed
    /// permit on the permit rails.
    pub payload: serde_json::Value,
}

/// The payment option a client claims to have exercised. Fields beyond the
/// network are optional because the gateway re-derives requirements from its
/// own catalog rather than trusting the echo.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedOption {
    pub scheme: Scheme,
    pub network: ChainId,
    #[serde(default)]
    pub amount: Option<TokenAmount>,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub pay_to: Option<String>,
}

/// Why a presented payment proof was rejected.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    MissingProof,
    MalformedProof,
    NotFound,
    Reverted,
    WrongToken,
    WrongRecipient,
    InsufficientAmount,
    Replayed,
    FacilitatorRejected,
    UpstreamUnavailable,
}

impl InvalidReason {
    /// Stable snake_case label, used in JSON error bodies and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::MissingProof => "missing_proof",
            InvalidReason::MalformedProof => "malformed_proof",
            InvalidReason::NotFound => "not_found",
            InvalidReason::Reverted => "reverted",
            InvalidReason::WrongToken => "wrong_token",
            InvalidReason::WrongRecipient => "wrong_recipient",
            InvalidReason::InsufficientAmount => "insufficient_amount",
            InvalidReason::Replayed => "replayed",
            InvalidReason::FacilitatorRejected => "facilitator_rejected",
            InvalidReason::UpstreamUnavailable => "upstream_unavailable",
        }
    }
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of payment verification on any rail.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    /// Payment is valid; `payer` is the address the funds came from.
    Valid { payer: String },
    /// Payment is invalid.
    Invalid { reason: InvalidReason },
}

impl VerifyOutcome {
    pub fn valid(payer: impl Into<String>) -> Self {
        VerifyOutcome::Valid {
            payer: payer.into(),
        }
    }

    pub fn invalid(reason: InvalidReason) -> Self {
        VerifyOutcome::Invalid { reason }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyOutcome::Valid { .. })
    }
}

impl Serialize for VerifyOutcome {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        match self {
            VerifyOutcome::Valid { payer } => {
                let mut s = serializer.serialize_struct("VerifyOutcome", 2)?;
                s.serialize_field("isValid", &true)?;
                s.serialize_field("payer", payer)?;
                s.end()
            }
            VerifyOutcome::Invalid { reason } => {
                let mut s = serializer.serialize_struct("VerifyOutcome", 3)?;
                s.serialize_field("isValid", &false)?;
                s.serialize_field("invalidReason", reason)?;
                s.serialize_field("invalidMessage", reason.as_str())?;
                s.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for VerifyOutcome {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            is_valid: bool,
            payer: Option<String>,
            invalid_reason: Option<InvalidReason>,
        }
        let raw = Raw::deserialize(deserializer)?;
        if raw.is_valid {
            let payer = raw
                .payer
                .ok_or_else(|| serde::de::Error::custom("payer required when isValid is true"))?;
            Ok(VerifyOutcome::Valid { payer })
        } else {
            Ok(VerifyOutcome::Invalid {
                reason: raw.invalid_reason.unwrap_or(InvalidReason::FacilitatorRejected),
            })
        }
    }
}

/// Outcome of settlement on any rail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleOutcome {
    pub success: bool,
    /// Settlement transaction reference. On the fast rail this is the
    /// already-confirmed payment transaction hash.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    pub network: ChainId,
}

/// Static manifest returned by a facilitator's `supported` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedKind {
    pub x402_version: X402Version2,
    pub scheme: Scheme,
    pub network: ChainId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Response envelope for `supported`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportedResponse {
    pub kinds: Vec<SupportedKind>,
}

/// Truncates a hash for log output: first 10 + last 6 characters.
pub fn truncate_hash(hash: &str) -> String {
    if hash.len() <= 16 {
        hash.to_string()
    } else {
        format!("{}…{}", &hash[..10], &hash[hash.len() - 6..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;

    #[test]
    fn test_version_marker_serde() {
        assert_eq!(serde_json::to_string(&X402Version2).unwrap(), "2");
        assert!(serde_json::from_str::<X402Version2>("2").is_ok());
        assert!(serde_json::from_str::<X402Version2>("1").is_err());
    }

    #[test]
    fn test_token_amount_serde() {
        let amount = TokenAmount(U256::from(10u64).pow(U256::from(15u64)));
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"1000000000000000\"");
        let back: TokenAmount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
    }

    #[test]
    fn test_token_amount_rejects_non_decimal() {
        assert!(serde_json::from_str::<TokenAmount>("\"0x10\"").is_err());
        assert!(serde_json::from_str::<TokenAmount>("\"ten\"").is_err());
    }

    #[test]
    fn test_accept_entry_camel_case() {
        let entry = AcceptEntry {
            scheme: Scheme::Exact,
            network: Network::Base.chain_id(),
            amount: TokenAmount(U256::from(1000u64)),
            asset: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string(),
            pay_to: "0x1111111111111111111111111111111111111111".to_string(),
            max_timeout_seconds: 300,
            extra: None,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["scheme"], "exact");
        assert_eq!(json["network"], "eip155:8453");
        assert_eq!(json["payTo"], "0x1111111111111111111111111111111111111111");
        assert_eq!(json["maxTimeoutSeconds"], 300);
        // The human-readable price field must not appear.
        assert!(json.get("price").is_none());
    }

    #[test]
    fn test_accept_entry_echo_roundtrip() {
        let entry = AcceptEntry {
            scheme: Scheme::Exact,
            network: Network::Megaeth.chain_id(),
            amount: TokenAmount(U256::from(5u64)),
            asset: "0x2222222222222222222222222222222222222222".to_string(),
            pay_to: "0x1111111111111111111111111111111111111111".to_string(),
            max_timeout_seconds: 60,
            extra: Some(serde_json::json!({"name": "USDm", "version": "1"})),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: AcceptEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_verify_outcome_serde() {
        let valid = VerifyOutcome::valid("0xabc");
        let json = serde_json::to_string(&valid).unwrap();
        assert!(json.contains("\"isValid\":true"));
        assert!(json.contains("\"payer\":\"0xabc\""));

        let invalid = VerifyOutcome::invalid(InvalidReason::Replayed);
        let json = serde_json::to_string(&invalid).unwrap();
        assert!(json.contains("\"isValid\":false"));
        assert!(json.contains("\"invalidReason\":\"replayed\""));

        let parsed: VerifyOutcome =
            serde_json::from_str(r#"{"isValid":true,"payer":"0xdef"}"#).unwrap();
        assert_eq!(parsed, VerifyOutcome::valid("0xdef"));
    }

    #[test]
    fn test_payment_header_decode() {
        let raw = serde_json::json!({
            "x402Version": 2,
            "accepted": {
                "scheme": "exact",
                "network": "eip155:6342",
                "amount": "1000000000000000",
                "asset": "0x2222222222222222222222222222222222222222",
                "payTo": "0x1111111111111111111111111111111111111111",
            },
            "payload": {"txHash": "0xdeadbeef"},
        });
        let header: PaymentHeader = serde_json::from_value(raw).unwrap();
        assert_eq!(header.accepted.network, Network::Megaeth.chain_id());
        assert_eq!(header.payload["txHash"], "0xdeadbeef");
    }

    #[test]
    fn test_truncate_hash() {
        let hash = "0x1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef";
        let short = truncate_hash(hash);
        assert!(short.starts_with("0x12345678"));
        assert!(short.ends_with("abcdef"));
        assert_eq!(truncate_hash("0xshort"), "0xshort");
    }
}
