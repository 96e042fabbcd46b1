use serde::{Deserialize, Serialize};

// Catalog records

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Previews {
    #[serde(rename = "preview-hq-mp3", default, skip_serializing_if = "Option::is_none")]
    pub hq_mp3: Option<String>,
    #[serde(rename = "preview-lq-mp3", default, skip_serializing_if = "Option::is_none")]
    pub lq_mp3: Option<String>,
    #[serde(rename = "preview-hq-ogg", default, skip_serializing_if = "Option::is_none")]
    pub hq_ogg: Option<String>,
    #[serde(rename = "preview-lq-ogg", default, skip_serializing_if = "Option::is_none")]
    pub lq_ogg: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Images {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform_m: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform_l: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectral_m: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectral_l: Option<String>,
}

/// One catalog entry. Searches only request a subset of fields, so
/// everything but the id may be missing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Sound {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub license: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samplerate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitdepth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previews: Option<Previews>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Images>,
}

/// One batch of search results plus the server's continuation cursors.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Page {
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    #[serde(default)]
    pub results: Vec<Sound>,
}

impl Page {
    /// Zero-based lookup; out of range is `None`.
    pub fn get_item(&self, index: usize) -> Option<&Sound> {
        self.results.get(index)
    }

    pub fn ids(&self) -> Vec<u64> {
        self.results.iter().map(|s| s.id).collect()
    }

    pub fn total_pages(&self, page_size: u32) -> u32 {
        if page_size == 0 {
            return 1;
        }
        let pages = self.count.div_ceil(page_size as u64);
        pages.clamp(1, u32::MAX as u64) as u32
    }
}

// HTTP surface

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct SearchRequest {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session: uuid::Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FavoritesResponse {
    pub favorites: Vec<u64>,
    pub cached: Vec<Sound>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SweepResponse {
    pub items_removed: usize,
    pub pages_removed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
