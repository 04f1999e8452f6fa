//! Response DTOs for relay endpoints that don't just return a bare array of
//! `EncryptedEntry`/`DeletionRequest`/`DumpRequest` (those are consumed
//! directly from `tidelog_core::entry`).

use serde::{Deserialize, Serialize};

/// The optional informational banner returned by `/api/v1/banner`. Out of
/// scope beyond being a typed response the client can ignore: the core
/// never acts on its contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BannerResponse {
    #[serde(default)]
    pub banner: String,
    #[serde(default)]
    pub link: String,
}
