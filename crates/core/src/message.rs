//! Message-facing types shared with the UI layer

use serde::{Deserialize, Serialize};

/// Reference to a generated image attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Location of the image (URL or opaque backend reference)
    pub url: String,

    /// The subject the image was generated for
    pub subject: String,
}

impl ImageRef {
    pub fn new(url: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            subject: subject.into(),
        }
    }
}
