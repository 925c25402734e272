//! Wire protocol between the controller and the rendering surface.
//!
//! Messages are JSON objects discriminated by a `command` field. Each direction is a closed
//! enum; decoding distinguishes commands this side does not know (ignored, never an error for
//! the caller) from known commands with a malformed payload.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("message is not an object with a string `command` field")]
    MissingCommand,

    #[error("malformed `{command}` message: {message}")]
    Malformed { command: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    #[default]
    Svg,
    Png,
    Jpg,
    Webp,
}

impl ImageType {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Svg => "svg",
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Webp => "webp",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Svg => "image/svg+xml",
            Self::Png => "image/png",
            Self::Jpg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ImageType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "svg" => Ok(Self::Svg),
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpg),
            "webp" => Ok(Self::Webp),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureTarget {
    #[default]
    File,
    Clipboard,
}

impl FromStr for CaptureTarget {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "clipboard" => Ok(Self::Clipboard),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureImageParams {
    #[serde(rename = "type")]
    pub image_type: ImageType,
    pub scale: f64,
    pub quality: f64,
    pub target: CaptureTarget,
}

impl Default for CaptureImageParams {
    fn default() -> Self {
        Self {
            image_type: ImageType::Svg,
            scale: 1.0,
            quality: 1.0,
            target: CaptureTarget::File,
        }
    }
}

impl CaptureImageParams {
    /// Checks `scale > 0` and `quality ∈ [0, 1]`.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(format!("scale must be a positive number, got {}", self.scale));
        }
        if !(0.0..=1.0).contains(&self.quality) {
            return Err(format!("quality must be within [0, 1], got {}", self.quality));
        }
        Ok(())
    }
}

/// Controller → surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum HostCommand {
    #[serde(rename = "update")]
    Update {
        code: String,
        /// Mermaid configuration as JSON text, parsed by the surface.
        configuration: String,
        #[serde(rename = "backgroundColor")]
        background_color: String,
    },
    #[serde(rename = "zoomTo")]
    ZoomTo { value: f64 },
    #[serde(rename = "takeImage")]
    TakeImage(CaptureImageParams),
}

impl HostCommand {
    pub const COMMANDS: &'static [&'static str] = &["update", "zoomTo", "takeImage"];

    pub fn decode(message: &Value) -> Result<Option<Self>, ProtocolError> {
        decode_tagged(message, Self::COMMANDS)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureFailure {
    pub message: String,
}

/// Mirrors the shape of a Mermaid parse error (`{ str: ... }`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseFailure {
    pub str: String,
}

/// Surface → controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum SurfaceEvent {
    #[serde(rename = "onTakeImage")]
    OnTakeImage {
        #[serde(rename = "type")]
        image_type: ImageType,
        /// Base64 encoded image bytes.
        data: String,
    },
    #[serde(rename = "onFailTakeImage")]
    OnFailTakeImage { error: CaptureFailure },
    #[serde(rename = "onCopyImage")]
    OnCopyImage,
    #[serde(rename = "onParseError")]
    OnParseError { error: ParseFailure },
}

impl SurfaceEvent {
    pub const COMMANDS: &'static [&'static str] =
        &["onTakeImage", "onFailTakeImage", "onCopyImage", "onParseError"];

    pub fn decode(message: &Value) -> Result<Option<Self>, ProtocolError> {
        decode_tagged(message, Self::COMMANDS)
    }
}

/// Surface-local state the host keeps across surface teardown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedSurfaceState {
    pub scale: f64,
    pub code: String,
    pub configuration: String,
    pub background_color: String,
    pub scroll_top: f64,
    pub scroll_left: f64,
}

impl Default for PersistedSurfaceState {
    fn default() -> Self {
        Self {
            scale: crate::constants::ZOOM_DEFAULT_SCALE,
            code: String::new(),
            configuration: String::new(),
            background_color: String::new(),
            scroll_top: 0.0,
            scroll_left: 0.0,
        }
    }
}

pub fn command_of(message: &Value) -> Option<&str> {
    message.as_object()?.get("command")?.as_str()
}

fn decode_tagged<T: DeserializeOwned>(
    message: &Value,
    known: &[&str],
) -> Result<Option<T>, ProtocolError> {
    let command = command_of(message).ok_or(ProtocolError::MissingCommand)?;
    if !known.contains(&command) {
        return Ok(None);
    }
    T::deserialize(message)
        .map(Some)
        .map_err(|e| ProtocolError::Malformed {
            command: command.to_string(),
            message: e.to_string(),
        })
}
