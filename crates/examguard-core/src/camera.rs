//! Camera frame sources.
//!
//! A missing camera, a revoked permission or a failed grab all surface as
//! `None` from [`FrameSource::capture_still`]; none of them is an error.

use std::path::Path;
use std::sync::Mutex;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// One encoded still image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    mime: String,
    data: Vec<u8>,
}

impl Frame {
    /// Wraps encoded image bytes.
    #[must_use]
    pub fn new(mime: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            data,
        }
    }

    /// Reads an image file, guessing the MIME type from its extension.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be read.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        let mime = match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("png") => "image/png",
            Some("webp") => "image/webp",
            _ => "image/jpeg",
        };
        Ok(Self::new(mime, data))
    }

    /// MIME type of the encoded image.
    #[must_use]
    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// Encoded image bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Encodes the frame as a `data:` URL.
    #[must_use]
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.data))
    }

    /// Snapshot event payload: `{"imageBase64": "<data url>"}`.
    #[must_use]
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({ "imageBase64": self.to_data_url() })
    }
}

/// Something that can hand out a still on demand.
pub trait FrameSource: Send + Sync {
    /// Grabs the current frame, or `None` if no frame is available.
    fn capture_still(&self) -> Option<Frame>;
}

/// No camera attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCamera;

impl FrameSource for NoCamera {
    fn capture_still(&self) -> Option<Frame> {
        None
    }
}

/// Returns the same frame on every capture; used by the replay harness.
#[derive(Debug)]
pub struct StillImage {
    frame: Mutex<Option<Frame>>,
}

impl StillImage {
    /// Creates a source that always yields `frame`.
    #[must_use]
    pub const fn new(frame: Frame) -> Self {
        Self {
            frame: Mutex::new(Some(frame)),
        }
    }

    /// Simulates the stream going away (permission revoked, device unplugged).
    pub fn disconnect(&self) {
        *self
            .frame
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }
}

impl FrameSource for StillImage {
    fn capture_still(&self) -> Option<Frame> {
        self.frame
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_encoding() {
        let frame = Frame::new("image/jpeg", vec![0xff, 0xd8, 0xff]);
        assert_eq!(frame.to_data_url(), "data:image/jpeg;base64,/9j/");
        assert_eq!(frame.to_payload()["imageBase64"], "data:image/jpeg;base64,/9j/");
    }

    #[test]
    fn test_mime_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("still.PNG");
        std::fs::write(&png, [1, 2, 3]).unwrap();
        let jpg = dir.path().join("still.jpg");
        std::fs::write(&jpg, [4]).unwrap();

        assert_eq!(Frame::from_file(&png).unwrap().mime(), "image/png");
        assert_eq!(Frame::from_file(&jpg).unwrap().mime(), "image/jpeg");
    }

    #[test]
    fn test_disconnected_still_yields_nothing() {
        let source = StillImage::new(Frame::new("image/png", vec![1]));
        assert!(source.capture_still().is_some());

        source.disconnect();

        assert!(source.capture_still().is_none());
        assert!(NoCamera.capture_still().is_none());
    }
}
