//! Account keys.
//!
//! Accounts are ed25519 keys generated from 32 bytes of OS entropy.
//!
//! ```text
//! seed (32 bytes) ──► SigningKey ──► public key (32 bytes)
//!   │                                   │
//!   ├─► private_key  = hex(seed)        ├─► checksum = SHA-512/256(pk)[28..32]
//!   └─► recovery     = BIP-39(seed)     └─► address  = HEX(pk) ‖ HEX(checksum)
//! ```
//!
//! Signing always re-derives the key from the recovery phrase and refuses
//! accounts whose derived address differs from the stored one.

use bip39::Mnemonic;
use ed25519_dalek::{Signer, SigningKey};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha512_256};
use ticket_custody_core::{LedgerAccount, LedgerError, LedgerErrorKind, LedgerOperation};

const CHECKSUM_LEN: usize = 4;
const PUBLIC_KEY_LEN: usize = 32;

/// Generate a new account from OS entropy.
///
/// # Errors
///
/// Returns `LedgerErrorKind::InvalidKey` if the entropy source fails.
pub fn generate_account() -> Result<LedgerAccount, LedgerError> {
    let mut seed = [0u8; 32];
    OsRng.try_fill_bytes(&mut seed).map_err(|e| {
        LedgerError::new(
            LedgerOperation::CreateAccount,
            LedgerErrorKind::InvalidKey(format!("entropy source failed: {e}")),
        )
    })?;
    account_from_seed(&seed)
}

fn account_from_seed(seed: &[u8; 32]) -> Result<LedgerAccount, LedgerError> {
    let mnemonic = Mnemonic::from_entropy(seed).map_err(|e| {
        LedgerError::new(
            LedgerOperation::CreateAccount,
            LedgerErrorKind::InvalidKey(e.to_string()),
        )
    })?;
    let signing_key = SigningKey::from_bytes(seed);

    Ok(LedgerAccount::new(
        address_of(&signing_key.verifying_key().to_bytes()),
        hex::encode(seed),
        mnemonic.to_string(),
    ))
}

/// Address of a public key: upper-case hex key followed by a 4-byte checksum.
#[must_use]
pub fn address_of(public_key: &[u8; PUBLIC_KEY_LEN]) -> String {
    let digest = Sha512_256::digest(public_key);
    let checksum = &digest[digest.len() - CHECKSUM_LEN..];
    format!(
        "{}{}",
        hex::encode_upper(public_key),
        hex::encode_upper(checksum)
    )
}

/// Decode and checksum-verify an address.
///
/// # Errors
///
/// Returns `LedgerErrorKind::InvalidKey` if the address is malformed or its
/// checksum does not match.
pub fn decode_address(
    operation: LedgerOperation,
    address: &str,
) -> Result<[u8; PUBLIC_KEY_LEN], LedgerError> {
    let invalid = |reason: &str| {
        LedgerError::new(
            operation,
            LedgerErrorKind::InvalidKey(format!("address {address}: {reason}")),
        )
    };

    let bytes = hex::decode(address).map_err(|_| invalid("not hex"))?;
    if bytes.len() != PUBLIC_KEY_LEN + CHECKSUM_LEN {
        return Err(invalid("wrong length"));
    }
    let mut public_key = [0u8; PUBLIC_KEY_LEN];
    public_key.copy_from_slice(&bytes[..PUBLIC_KEY_LEN]);

    if address_of(&public_key) != address.to_uppercase() {
        return Err(invalid("checksum mismatch"));
    }
    Ok(public_key)
}

/// Key that signs for `account`, re-derived from its recovery phrase.
///
/// # Errors
///
/// Returns `LedgerErrorKind::InvalidKey` if the phrase does not parse or
/// derives a different address.
pub fn signing_key(
    operation: LedgerOperation,
    account: &LedgerAccount,
) -> Result<SigningKey, LedgerError> {
    let invalid = |reason: String| LedgerError::new(operation, LedgerErrorKind::InvalidKey(reason));

    let mnemonic = Mnemonic::parse_normalized(&account.recovery_phrase)
        .map_err(|e| invalid(format!("recovery phrase: {e}")))?;
    let seed: [u8; 32] = mnemonic
        .to_entropy()
        .try_into()
        .map_err(|_| invalid("recovery phrase does not encode a 32-byte seed".to_string()))?;

    let key = SigningKey::from_bytes(&seed);
    let derived = address_of(&key.verifying_key().to_bytes());
    if derived != account.address {
        return Err(invalid(format!(
            "recovery phrase derives {derived}, not {}",
            account.address
        )));
    }
    Ok(key)
}

/// Sign `message` with `key`, returning the 64-byte signature.
#[must_use]
pub fn sign(key: &SigningKey, message: &[u8]) -> [u8; 64] {
    key.sign(message).to_bytes()
}
