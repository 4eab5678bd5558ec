//! Transaction building and signing.
//!
//! Transactions are typed JSON documents. The bytes that are signed and
//! hashed are `"TX"` followed by the document's canonical JSON encoding
//! (fields in declaration order, absent options omitted).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512_256};
use ticket_custody_core::{LedgerAccount, LedgerError, LedgerErrorKind, LedgerOperation, TxId};

use crate::keys;

const SIGNING_PREFIX: &[u8] = b"TX";

/// Network parameters every transaction must carry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SuggestedParams {
    /// Latest round known to the node.
    pub last_round: u64,
    /// Network name.
    pub genesis_id: String,
    /// Network genesis hash.
    pub genesis_hash: String,
    /// Minimum fee per transaction.
    pub min_fee: u64,
}

/// Asset parameters fixed per deployment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetParams {
    /// Total units.
    #[serde(rename = "t")]
    pub total: u64,
    /// Decimal places.
    #[serde(rename = "dc")]
    pub decimals: u32,
    /// Asset name.
    #[serde(rename = "an")]
    pub name: String,
    /// Unit name.
    #[serde(rename = "un")]
    pub unit_name: String,
    /// Reference URL.
    #[serde(rename = "au")]
    pub url: String,
}

/// Type-specific transaction body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TxBody {
    /// Native currency payment.
    #[serde(rename = "pay")]
    Payment {
        /// Receiver.
        #[serde(rename = "rcv")]
        receiver: String,
        /// Amount in micro-units.
        #[serde(rename = "amt")]
        amount: u64,
    },
    /// Asset creation.
    #[serde(rename = "acfg")]
    AssetConfig {
        /// Parameters of the new asset.
        #[serde(rename = "apar")]
        params: AssetParams,
    },
    /// Asset transfer. A zero-amount transfer to oneself is an opt-in.
    #[serde(rename = "axfer")]
    AssetTransfer {
        /// Asset.
        #[serde(rename = "xaid")]
        asset: u64,
        /// Units.
        #[serde(rename = "aamt")]
        amount: u64,
        /// Receiver.
        #[serde(rename = "arcv")]
        receiver: String,
    },
}

/// An unsigned transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender address.
    #[serde(rename = "snd")]
    pub sender: String,
    /// Fee in micro-units.
    pub fee: u64,
    /// First valid round.
    #[serde(rename = "fv")]
    pub first_valid: u64,
    /// Last valid round.
    #[serde(rename = "lv")]
    pub last_valid: u64,
    /// Network name.
    #[serde(rename = "gen")]
    pub genesis_id: String,
    /// Network genesis hash.
    #[serde(rename = "gh")]
    pub genesis_hash: String,
    /// Body.
    #[serde(flatten)]
    pub body: TxBody,
}

impl Transaction {
    /// Build a transaction valid from the node's last round for
    /// `validity_window` rounds, paying at least `min_fee`.
    #[must_use]
    pub fn new(
        sender: &str,
        params: &SuggestedParams,
        min_fee: u64,
        validity_window: u64,
        body: TxBody,
    ) -> Self {
        Self {
            sender: sender.to_string(),
            fee: params.min_fee.max(min_fee),
            first_valid: params.last_round,
            last_valid: params.last_round + validity_window,
            genesis_id: params.genesis_id.clone(),
            genesis_hash: params.genesis_hash.clone(),
            body,
        }
    }

    /// Bytes that are signed and hashed.
    ///
    /// # Errors
    ///
    /// Returns `LedgerErrorKind::Decode` if the transaction cannot be encoded.
    pub fn signing_bytes(&self, operation: LedgerOperation) -> Result<Vec<u8>, LedgerError> {
        let encoded = serde_json::to_vec(self)
            .map_err(|e| LedgerError::new(operation, LedgerErrorKind::Decode(e.to_string())))?;
        let mut bytes = Vec::with_capacity(SIGNING_PREFIX.len() + encoded.len());
        bytes.extend_from_slice(SIGNING_PREFIX);
        bytes.extend_from_slice(&encoded);
        Ok(bytes)
    }

    /// Transaction id: hex SHA-512/256 of the signing bytes.
    ///
    /// # Errors
    ///
    /// Returns `LedgerErrorKind::Decode` if the transaction cannot be encoded.
    pub fn id(&self, operation: LedgerOperation) -> Result<TxId, LedgerError> {
        let bytes = self.signing_bytes(operation)?;
        Ok(TxId::new(hex::encode_upper(Sha512_256::digest(&bytes))))
    }

    /// Sign with `account`'s key, checking the key matches the sender.
    ///
    /// # Errors
    ///
    /// Returns `LedgerErrorKind::InvalidKey` if `account` is not the sender
    /// or its recovery phrase does not derive its address.
    pub fn sign(
        self,
        operation: LedgerOperation,
        account: &LedgerAccount,
    ) -> Result<SignedTransaction, LedgerError> {
        if account.address != self.sender {
            return Err(LedgerError::new(
                operation,
                LedgerErrorKind::InvalidKey(format!(
                    "{} cannot sign for {}",
                    account.address, self.sender
                )),
            ));
        }
        let key = keys::signing_key(operation, account)?;
        let signature = keys::sign(&key, &self.signing_bytes(operation)?);

        Ok(SignedTransaction {
            txn: self,
            sig: STANDARD.encode(signature),
        })
    }
}

/// A transaction with its base64 ed25519 signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// The signed transaction.
    pub txn: Transaction,
    /// Base64 signature over the signing bytes.
    pub sig: String,
}
