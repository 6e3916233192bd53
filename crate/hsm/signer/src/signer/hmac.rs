use openssl::{
    md_ctx::MdCtx,
    pkey::{PKey, Private},
};

use crate::{DigestAlgorithm, EngineState, HError, HResult};

/// HMAC over streamed content with a key held in process memory.
///
/// The "signature" is the raw MAC. Used for integrity tokens that need no asymmetric trust
/// chain; no token is involved.
pub struct HmacContentSigner {
    digest: DigestAlgorithm,
    key: PKey<Private>,
    ctx: MdCtx,
    state: EngineState,
}

impl HmacContentSigner {
    pub fn new(digest: DigestAlgorithm, key: &[u8]) -> HResult<Self> {
        if key.is_empty() {
            return Err(HError::InvalidKey("an HMAC key must not be empty".to_owned()));
        }
        let key = PKey::hmac(key)?;
        let ctx = Self::start(digest, &key)?;
        Ok(Self {
            digest,
            key,
            ctx,
            state: EngineState::Initialized,
        })
    }

    fn start(digest: DigestAlgorithm, key: &PKey<Private>) -> HResult<MdCtx> {
        let mut ctx = MdCtx::new()?;
        ctx.digest_sign_init(Some(digest.md()), key)?;
        Ok(ctx)
    }

    #[must_use]
    pub const fn digest(&self) -> DigestAlgorithm {
        self.digest
    }

    /// Length of the MAC in bytes.
    #[must_use]
    pub const fn output_len(&self) -> usize {
        self.digest.output_len()
    }

    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    pub fn update(&mut self, data: &[u8]) -> HResult<()> {
        self.state.check_update()?;
        self.ctx.digest_sign_update(data)?;
        self.state = EngineState::Accumulating;
        Ok(())
    }

    /// The MAC of everything fed since creation or the last [`HmacContentSigner::reset`].
    pub fn sign(&mut self) -> HResult<Vec<u8>> {
        self.state.check_finish()?;
        self.state = EngineState::Finalized;
        let mut mac = Vec::with_capacity(self.output_len());
        self.ctx.digest_sign_final_to_vec(&mut mac)?;
        Ok(mac)
    }

    /// Start a new MAC with the same key.
    pub fn reset(&mut self) -> HResult<()> {
        self.ctx = Self::start(self.digest, &self.key)?;
        self.state = EngineState::Initialized;
        Ok(())
    }
}
