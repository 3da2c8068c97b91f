//! Stablecoin transfer verification from transaction receipts.
//!
//! Given a client-submitted transaction hash, the verifier re-fetches the
//! receipt from the fast-rail RPC (a client-supplied receipt is never
//! trusted), confirms the transaction succeeded, and sums every stablecoin
//! `Transfer` whose recipient is the gateway's pay-to address. Split
//! payments in one transaction sum together; overpayment is accepted;
//! transfers to other recipients and logs from other contracts are ignored.
//!
//! All address comparisons are byte comparisons on parsed values, so hex
//! case never matters.

use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::Log;
use alloy::sol;
use std::str::FromStr;
use std::time::Duration;

use crate::network::ChainId;
use crate::types::{truncate_hash, InvalidReason};

sol! {
    #[derive(Debug)]
    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// Failure modes of receipt verification, each mapping onto the payment
/// rejection taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum ReceiptError {
    #[error("malformed transaction hash")]
    MalformedTxHash,
    #[error("malformed recipient address")]
    MalformedRecipient,
    #[error("transaction not found")]
    NotFound,
    #[error("transaction reverted")]
    Reverted,
    #[error("receipt contains no stablecoin transfer")]
    WrongToken,
    #[error("no transfer to the expected recipient")]
    WrongRecipient,
    #[error("transferred {got} base units, {want} required")]
    InsufficientAmount { got: U256, want: U256 },
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("rpc deadline exceeded")]
    RpcTimeout,
}

impl ReceiptError {
    /// The taxonomy label surfaced in 402 rejection bodies.
    pub fn reason(&self) -> InvalidReason {
        match self {
            ReceiptError::MalformedTxHash | ReceiptError::MalformedRecipient => {
                InvalidReason::MalformedProof
            }
            ReceiptError::NotFound => InvalidReason::NotFound,
            ReceiptError::Reverted => InvalidReason::Reverted,
            ReceiptError::WrongToken => InvalidReason::WrongToken,
            ReceiptError::WrongRecipient => InvalidReason::WrongRecipient,
            ReceiptError::InsufficientAmount { .. } => InvalidReason::InsufficientAmount,
            ReceiptError::Rpc(_) | ReceiptError::RpcTimeout => InvalidReason::UpstreamUnavailable,
        }
    }
}

/// A successfully verified on-chain payment.
#[derive(Debug, Clone)]
pub struct VerifiedTransfer {
    /// Lowercased 0x-prefixed transaction hash — the proof key.
    pub tx_hash: String,
    /// The address the summed funds came from.
    pub payer: Address,
    /// Total base units transferred to the recipient in this transaction.
    pub total: U256,
}

/// Read-only verifier bound to one RPC endpoint and one stablecoin contract.
pub struct ReceiptVerifier {
    provider: RootProvider,
    token: Address,
    chain_id: ChainId,
    rpc_timeout: Duration,
}

impl ReceiptVerifier {
    /// Builds the verifier. Fails if the RPC URL or the stablecoin contract
    /// address cannot be parsed.
    pub fn new(
        rpc_url: &str,
        token_address: &str,
        chain_id: ChainId,
        rpc_timeout: Duration,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let url: url::Url = rpc_url.parse()?;
        let token = Address::from_str(token_address)
            .map_err(|e| format!("invalid stablecoin contract address: {e}"))?;
        // The per-call deadline in verify_transfer is the authoritative
        // bound; the transport timeout is a backstop slightly above it.
        let http_client = alloy::transports::http::reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(rpc_timeout + Duration::from_secs(5))
            .build()?;
        let client = RpcClient::builder().http_with_client(http_client, url);
        let provider = RootProvider::new(client);
        tracing::info!(
            rpc = rpc_url,
            token = %token,
            chain = %chain_id,
            "receipt verifier initialized"
        );
        Ok(Self {
            provider,
            token,
            chain_id,
            rpc_timeout,
        })
    }

    /// CAIP-2 identifier of the chain this verifier reads.
    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    /// Fetches the receipt for `tx_hash` and validates that it carries
    /// stablecoin transfers totalling at least `expected_amount` to
    /// `recipient`.
    pub async fn verify_transfer(
        &self,
        tx_hash: &str,
        expected_amount: U256,
        recipient: &str,
    ) -> Result<VerifiedTransfer, ReceiptError> {
        let normalized = normalize_tx_hash(tx_hash).ok_or(ReceiptError::MalformedTxHash)?;
        let hash = B256::from_str(&normalized).map_err(|_| ReceiptError::MalformedTxHash)?;
        let recipient = parse_evm_address(recipient).ok_or(ReceiptError::MalformedRecipient)?;

        let receipt = tokio::time::timeout(
            self.rpc_timeout,
            self.provider.get_transaction_receipt(hash),
        )
        .await
        .map_err(|_| {
            tracing::warn!(tx = %truncate_hash(&normalized), "receipt fetch timed out");
            ReceiptError::RpcTimeout
        })?
        .map_err(|e| {
            tracing::warn!(tx = %truncate_hash(&normalized), error = %e, "receipt fetch failed");
            ReceiptError::Rpc(e.to_string())
        })?
        .ok_or(ReceiptError::NotFound)?;

        if !receipt.status() {
            return Err(ReceiptError::Reverted);
        }

        let scan = sum_transfers_to(receipt.inner.logs(), self.token, recipient);
        let (total, payer) = admit_scan(scan, expected_amount)?;

        tracing::info!(
            tx = %truncate_hash(&normalized),
            payer = %payer,
            total = %total,
            "on-chain transfer verified"
        );

        Ok(VerifiedTransfer {
            tx_hash: normalized,
            payer,
            total,
        })
    }
}

/// Lowercases and validates a transaction hash: `0x` + 64 hex characters.
pub fn normalize_tx_hash(raw: &str) -> Option<String> {
    let lower = raw.trim().to_ascii_lowercase();
    let hex = lower.strip_prefix("0x")?;
    if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(lower)
    } else {
        None
    }
}

/// Parses a `0x` + 40-hex-char EVM address, any case.
pub fn parse_evm_address(raw: &str) -> Option<Address> {
    let trimmed = raw.trim();
    if trimmed.len() != 42 || !trimmed.starts_with("0x") {
        return None;
    }
    Address::from_str(trimmed).ok()
}

/// Result of scanning a receipt's logs for stablecoin transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferScan {
    /// Logs emitted by the stablecoin contract, whatever their event.
    pub token_logs: usize,
    /// Of those, logs that decoded as `Transfer`.
    pub transfers: usize,
    /// Summed value of transfers whose `to` equals the recipient.
    pub total_to_recipient: U256,
    /// `from` of any summed transfer, the candidate payer.
    pub payer: Option<Address>,
}

/// Scans receipt logs: keeps logs emitted by `token`, decodes them as
/// ERC-20 `Transfer` events, and sums the values sent to `recipient`.
/// Transfers to other recipients and logs from other contracts are skipped.
pub fn sum_transfers_to(logs: &[Log], token: Address, recipient: Address) -> TransferScan {
    let mut scan = TransferScan {
        token_logs: 0,
        transfers: 0,
        total_to_recipient: U256::ZERO,
        payer: None,
    };
    for log in logs {
        if log.address() != token {
            continue;
        }
        scan.token_logs += 1;
        let Ok(decoded) = log.log_decode::<Transfer>() else {
            continue;
        };
        scan.transfers += 1;
        let event = decoded.inner.data;
        if event.to == recipient {
            scan.total_to_recipient += event.value;
            scan.payer = Some(event.from);
        }
    }
    scan
}

/// Applies the acceptance rules to a scan: some token log must exist, some
/// of them must be transfers, the recipient sum must be non-zero and reach
/// the expected amount. Overpayment passes. Returns `(total, payer)`.
fn admit_scan(scan: TransferScan, expected: U256) -> Result<(U256, Address), ReceiptError> {
    if scan.token_logs == 0 || scan.transfers == 0 {
        return Err(ReceiptError::WrongToken);
    }
    if scan.total_to_recipient.is_zero() {
        return Err(ReceiptError::WrongRecipient);
    }
    if scan.total_to_recipient < expected {
        return Err(ReceiptError::InsufficientAmount {
            got: scan.total_to_recipient,
            want: expected,
        });
    }
    let payer = scan.payer.ok_or(ReceiptError::WrongRecipient)?;
    Ok((scan.total_to_recipient, payer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::LogData;
    use alloy::sol_types::SolEvent;

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
    }

    fn transfer_log(emitter: Address, from: Address, to: Address, value: U256) -> Log {
        let data = LogData::new_unchecked(
            vec![Transfer::SIGNATURE_HASH, from.into_word(), to.into_word()],
            value.to_be_bytes::<32>().to_vec().into(),
        );
        Log {
            inner: alloy::primitives::Log {
                address: emitter,
                data,
            },
            ..Default::default()
        }
    }

    fn other_event_log(emitter: Address) -> Log {
        let data = LogData::new_unchecked(vec![B256::from([0xEEu8; 32])], Default::default());
        Log {
            inner: alloy::primitives::Log {
                address: emitter,
                data,
            },
            ..Default::default()
        }
    }

    const TOKEN: u8 = 0x10;
    const RECIPIENT: u8 = 0x20;
    const PAYER: u8 = 0x30;

    fn amount(n: u64) -> U256 {
        U256::from(n)
    }

    #[test]
    fn test_exact_amount_accepted() {
        let logs = vec![transfer_log(
            addr(TOKEN),
            addr(PAYER),
            addr(RECIPIENT),
            amount(1000),
        )];
        let scan = sum_transfers_to(&logs, addr(TOKEN), addr(RECIPIENT));
        assert_eq!(scan.total_to_recipient, amount(1000));
        assert!(admit_scan(scan, amount(1000)).is_ok());
    }

    #[test]
    fn test_overpayment_accepted() {
        let logs = vec![transfer_log(
            addr(TOKEN),
            addr(PAYER),
            addr(RECIPIENT),
            amount(2000),
        )];
        let scan = sum_transfers_to(&logs, addr(TOKEN), addr(RECIPIENT));
        assert!(admit_scan(scan, amount(1000)).is_ok());
    }

    #[test]
    fn test_one_base_unit_short_rejected() {
        let logs = vec![transfer_log(
            addr(TOKEN),
            addr(PAYER),
            addr(RECIPIENT),
            amount(999),
        )];
        let scan = sum_transfers_to(&logs, addr(TOKEN), addr(RECIPIENT));
        let err = admit_scan(scan, amount(1000)).unwrap_err();
        assert_eq!(err.reason(), InvalidReason::InsufficientAmount);
    }

    #[test]
    fn test_split_payments_sum() {
        let logs = vec![
            transfer_log(addr(TOKEN), addr(PAYER), addr(RECIPIENT), amount(600)),
            transfer_log(addr(TOKEN), addr(PAYER), addr(RECIPIENT), amount(400)),
        ];
        let scan = sum_transfers_to(&logs, addr(TOKEN), addr(RECIPIENT));
        assert_eq!(scan.total_to_recipient, amount(1000));
        assert!(admit_scan(scan, amount(1000)).is_ok());
    }

    #[test]
    fn test_unrelated_recipients_ignored() {
        let logs = vec![
            transfer_log(addr(TOKEN), addr(PAYER), addr(0x99), amount(5000)),
            transfer_log(addr(TOKEN), addr(PAYER), addr(RECIPIENT), amount(1000)),
        ];
        let scan = sum_transfers_to(&logs, addr(TOKEN), addr(RECIPIENT));
        assert_eq!(scan.total_to_recipient, amount(1000));
    }

    #[test]
    fn test_other_contracts_ignored() {
        let logs = vec![transfer_log(
            addr(0x77),
            addr(PAYER),
            addr(RECIPIENT),
            amount(1000),
        )];
        let scan = sum_transfers_to(&logs, addr(TOKEN), addr(RECIPIENT));
        assert_eq!(scan.token_logs, 0);
        let err = admit_scan(scan, amount(1000)).unwrap_err();
        assert_eq!(err.reason(), InvalidReason::WrongToken);
    }

    #[test]
    fn test_token_log_without_transfer_event() {
        let logs = vec![other_event_log(addr(TOKEN))];
        let scan = sum_transfers_to(&logs, addr(TOKEN), addr(RECIPIENT));
        assert_eq!(scan.token_logs, 1);
        assert_eq!(scan.transfers, 0);
        let err = admit_scan(scan, amount(1)).unwrap_err();
        assert_eq!(err.reason(), InvalidReason::WrongToken);
    }

    #[test]
    fn test_wrong_recipient() {
        let logs = vec![transfer_log(
            addr(TOKEN),
            addr(PAYER),
            addr(0x99),
            amount(1000),
        )];
        let scan = sum_transfers_to(&logs, addr(TOKEN), addr(RECIPIENT));
        let err = admit_scan(scan, amount(1000)).unwrap_err();
        assert_eq!(err.reason(), InvalidReason::WrongRecipient);
    }

    #[test]
    fn test_payer_captured() {
        let logs = vec![transfer_log(
            addr(TOKEN),
            addr(PAYER),
            addr(RECIPIENT),
            amount(1000),
        )];
        let scan = sum_transfers_to(&logs, addr(TOKEN), addr(RECIPIENT));
        assert_eq!(scan.payer, Some(addr(PAYER)));
    }

    #[test]
    fn test_normalize_tx_hash() {
        let mixed = format!("0x{}", "AB".repeat(32));
        let normalized = normalize_tx_hash(&mixed).unwrap();
        assert_eq!(normalized, format!("0x{}", "ab".repeat(32)));

        assert!(normalize_tx_hash("0x1234").is_none());
        assert!(normalize_tx_hash(&"ab".repeat(32)).is_none()); // no 0x prefix
        assert!(normalize_tx_hash(&format!("0x{}zz", "ab".repeat(31))).is_none());
    }

    #[test]
    fn test_address_case_insensitive() {
        let lower = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913";
        let checksummed = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";
        assert_eq!(
            parse_evm_address(lower).unwrap(),
            parse_evm_address(checksummed).unwrap()
        );
        assert!(parse_evm_address("0x123").is_none());
    }
}
