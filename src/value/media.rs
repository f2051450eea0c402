// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Binary media embedded by value.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};

use super::slot::SaveSlot;
use super::{ToWeaveValue, WeaveValue};

/// Kind of media payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    /// Image with a file extension such as `png`.
    Image { format: String },
    /// Audio with a file extension such as `wav`.
    Audio { format: String },
}

impl MediaKind {
    pub fn png() -> Self {
        Self::Image {
            format: "png".to_string(),
        }
    }

    pub fn wav() -> Self {
        Self::Audio {
            format: "wav".to_string(),
        }
    }

    /// File name the blob is stored under.
    pub fn file_name(&self) -> String {
        match self {
            Self::Image { format } => format!("image.{}", format),
            Self::Audio { format } => format!("audio.{}", format),
        }
    }

    /// Type tag the server uses to decode the placeholder.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Image { .. } => "PIL.Image.Image",
            Self::Audio { .. } => "wave.Wave_read",
        }
    }
}

/// An image or audio blob, persisted content-addressed and embedded as a
/// placeholder descriptor.
#[derive(Clone)]
pub struct Media {
    inner: Arc<MediaInner>,
}

struct MediaInner {
    kind: MediaKind,
    data: Vec<u8>,
    slot: SaveSlot<String>,
}

impl Media {
    pub fn new(kind: MediaKind, data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(MediaInner {
                kind,
                data,
                slot: SaveSlot::new(),
            }),
        }
    }

    pub fn image_png(data: Vec<u8>) -> Self {
        Self::new(MediaKind::png(), data)
    }

    pub fn audio_wav(data: Vec<u8>) -> Self {
        Self::new(MediaKind::wav(), data)
    }

    pub fn kind(&self) -> &MediaKind {
        &self.inner.kind
    }

    pub fn data(&self) -> &[u8] {
        &self.inner.data
    }

    /// File digest once the blob has been stored.
    pub fn file_digest(&self) -> Option<String> {
        self.inner.slot.resolved()
    }

    pub(crate) fn slot(&self) -> &SaveSlot<String> {
        &self.inner.slot
    }

    /// Descriptor embedded in place of the media value.
    pub fn placeholder(&self, file_digest: &str) -> Value {
        let kind = self.kind();
        json!({
            "_type": "CustomWeaveType",
            "weave_type": {"type": kind.type_tag()},
            "files": {kind.file_name(): file_digest},
        })
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Media {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Media")
            .field("kind", &self.inner.kind)
            .field("bytes", &self.inner.data.len())
            .finish()
    }
}

impl ToWeaveValue for Media {
    fn to_weave_value(&self) -> WeaveValue {
        WeaveValue::Media(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder() {
        let media = Media::image_png(vec![0x89, 0x50]);
        let placeholder = media.placeholder("abc");
        assert_eq!(placeholder["weave_type"]["type"], "PIL.Image.Image");
        assert_eq!(placeholder["files"]["image.png"], "abc");
    }

    #[test]
    fn test_audio_file_name() {
        assert_eq!(MediaKind::wav().file_name(), "audio.wav");
        assert_eq!(MediaKind::wav().type_tag(), "wave.Wave_read");
    }
}
