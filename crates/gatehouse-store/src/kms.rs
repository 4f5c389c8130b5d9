//! Key management: per-scope wrappers used to seal oplog entries.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use gatehouse_errors::{Code, Error, Result};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::RwLock;

use crate::context::Context;

type HmacSha256 = Hmac<Sha256>;

/// What a wrapper is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    Oplog,
    Database,
}

impl fmt::Display for KeyPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPurpose::Oplog => f.write_str("oplog"),
            KeyPurpose::Database => f.write_str("database"),
        }
    }
}

/// Output of [`Wrapper::seal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBlob {
    pub key_id: String,
    /// Base64 encoded authentication tag.
    pub tag: String,
}

/// A key handle bound to one scope and purpose.
pub trait Wrapper: Send + Sync + fmt::Debug {
    fn key_id(&self) -> &str;

    fn seal(&self, plaintext: &[u8]) -> Result<SealedBlob>;
}

/// Resolves wrappers for scopes.
#[async_trait]
pub trait KeyManager: Send + Sync {
    async fn get_wrapper(
        &self,
        ctx: &Context,
        scope_id: &str,
        purpose: KeyPurpose,
    ) -> Result<Arc<dyn Wrapper>>;
}

/// HMAC-SHA256 wrapper held by [`MemoryKms`].
pub struct HmacWrapper {
    key_id: String,
    key: [u8; 32],
}

impl HmacWrapper {
    pub fn new(key_id: impl Into<String>, key: [u8; 32]) -> Self {
        Self { key_id: key_id.into(), key }
    }
}

impl fmt::Debug for HmacWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacWrapper").field("key_id", &self.key_id).finish_non_exhaustive()
    }
}

impl Wrapper for HmacWrapper {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn seal(&self, plaintext: &[u8]) -> Result<SealedBlob> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| Error::wrap(e.to_string(), "kms.seal"))?;
        mac.update(plaintext);
        let tag = STANDARD.encode(mac.finalize().into_bytes());
        Ok(SealedBlob { key_id: self.key_id.clone(), tag })
    }
}

/// In-memory key manager generating one random key per scope and purpose.
#[derive(Clone, Default)]
pub struct MemoryKms {
    inner: Arc<RwLock<KmsState>>,
}

#[derive(Default)]
struct KmsState {
    wrappers: HashMap<(String, KeyPurpose), Arc<HmacWrapper>>,
    revoked: HashSet<String>,
}

impl MemoryKms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `get_wrapper` call for `scope_id` fail.
    pub async fn revoke(&self, scope_id: &str) {
        self.inner.write().await.revoked.insert(scope_id.to_string());
    }
}

#[async_trait]
impl KeyManager for MemoryKms {
    async fn get_wrapper(
        &self,
        ctx: &Context,
        scope_id: &str,
        purpose: KeyPurpose,
    ) -> Result<Arc<dyn Wrapper>> {
        ctx.check("kms.get_wrapper")?;
        if scope_id.is_empty() {
            return Err(Error::new(Code::MissingScopeId, "kms.get_wrapper"));
        }

        let mut state = self.inner.write().await;
        if state.revoked.contains(scope_id) {
            return Err(Error::new(Code::Unknown, "kms.get_wrapper")
                .with_msg(format!("no {purpose} key available for scope {scope_id}")));
        }

        let wrapper = state
            .wrappers
            .entry((scope_id.to_string(), purpose))
            .or_insert_with(|| {
                let mut key = [0u8; 32];
                rand::rng().fill_bytes(&mut key);
                Arc::new(HmacWrapper::new(format!("{purpose}_{scope_id}"), key))
            })
            .clone();
        Ok(wrapper)
    }
}
