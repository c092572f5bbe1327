//! Mojang API response types and textures-property decoding.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::Deserialize;

use super::UpstreamError;

/// Username -> UUID lookup result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiProfile {
    /// 32-hex UUID.
    pub id: String,
    /// Canonical username casing.
    pub name: String,
}

/// Raw session profile document.
#[derive(Debug, Deserialize)]
pub struct RawSessionProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub properties: Vec<ProfileProperty>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileProperty {
    pub name: String,
    pub value: String,
}

/// Decoded payload of the `textures` property.
#[derive(Debug, Deserialize)]
pub struct TexturesPayload {
    #[serde(default)]
    pub textures: Textures,
}

#[derive(Debug, Default, Deserialize)]
pub struct Textures {
    #[serde(rename = "SKIN")]
    pub skin: Option<TextureRef>,
    #[serde(rename = "CAPE")]
    pub cape: Option<TextureRef>,
}

#[derive(Debug, Deserialize)]
pub struct TextureRef {
    pub url: String,
}

/// Session profile reduced to what the resolver needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProfile {
    pub id: String,
    pub name: String,
    pub skin_url: Option<String>,
    pub cape_url: Option<String>,
}

impl TryFrom<RawSessionProfile> for SessionProfile {
    type Error = UpstreamError;

    /// Decode the base64 `textures` property. A profile without one yields
    /// no URLs rather than an error.
    fn try_from(raw: RawSessionProfile) -> Result<Self, Self::Error> {
        let mut profile = SessionProfile { id: raw.id, name: raw.name, skin_url: None, cape_url: None };

        let Some(property) = raw.properties.into_iter().find(|p| p.name == "textures") else {
            return Ok(profile);
        };

        let json = BASE64_STANDARD
            .decode(property.value.trim())
            .map_err(|e| UpstreamError::Parse(format!("textures base64: {e}")))?;
        let payload: TexturesPayload =
            serde_json::from_slice(&json).map_err(|e| UpstreamError::Parse(format!("textures json: {e}")))?;

        profile.skin_url = payload.textures.skin.map(|t| t.url).filter(|u| !u.is_empty());
        profile.cape_url = payload.textures.cape.map(|t| t.url).filter(|u| !u.is_empty());
        Ok(profile)
    }
}
