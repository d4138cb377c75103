//! Deterministic signer for simulated chains.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use circuit_relay_client::{ClientError, Signer, SigningIdentity};
use circuit_relay_primitives::{bytes::blake2_256, Address, Call, ChainTarget, SignedTx};

/// Derives addresses and signatures by hashing the identity
#[derive(Debug, Default)]
pub struct SimSigner {
    unavailable: AtomicBool,
}

impl SimSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent signing request fail
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn address_of(identity: &SigningIdentity) -> Address {
        Address::digest(identity.0.as_bytes())
    }
}

#[async_trait]
impl Signer for SimSigner {
    async fn sign(
        &self,
        _target: &ChainTarget,
        call: &Call,
        identity: &SigningIdentity,
    ) -> Result<SignedTx, ClientError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ClientError::SigningUnavailable(format!(
                "no key for {identity}"
            )));
        }
        let mut payload =
            bincode::serialize(call).map_err(|err| ClientError::Codec(err.to_string()))?;
        payload.extend_from_slice(identity.0.as_bytes());
        Ok(SignedTx {
            call: call.clone(),
            signer: Self::address_of(identity),
            signature: blake2_256(&payload).to_vec(),
        })
    }

    fn address(&self, identity: &SigningIdentity) -> Result<Address, ClientError> {
        Ok(Self::address_of(identity))
    }
}
