use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{MAXIMUM_LEVEL, TilingScheme};

/// Everything a transport needs to fetch one tile image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageryRequest {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
}

/// Source of tile images for one layer.
pub trait ImageryProvider: Send {
    /// Whether metadata has loaded; rectangles and requests are only valid once this is true.
    fn ready(&self) -> bool;
    fn tiling_scheme(&self) -> &dyn TilingScheme;
    fn minimum_level(&self) -> u32 {
        0
    }
    fn maximum_level(&self) -> u32;
    /// `None` when the provider has no image for the tile.
    fn request(&self, x: u32, y: u32, level: u32) -> Option<ImageryRequest>;
}

/// Shared readiness switch, flipped by whoever loads the provider's metadata.
#[derive(Debug, Clone)]
pub struct ReadyFlag(Arc<AtomicBool>);

impl ReadyFlag {
    pub fn new(ready: bool) -> Self {
        Self(Arc::new(AtomicBool::new(ready)))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, ready: bool) {
        self.0.store(ready, Ordering::Release);
    }
}

/// Builds tile URLs from a template such as `https://{s}.tile.example/{z}/{x}/{y}.png`.
///
/// Recognized placeholders: `{z}`, `{x}`, `{y}`, `{reverseY}` (y counted from the south edge) and
/// `{s}` (subdomain, rotated by tile so requests spread across hosts).
pub struct UrlTemplateImageryProvider {
    template: String,
    tiling_scheme: Box<dyn TilingScheme>,
    subdomains: Vec<String>,
    minimum_level: u32,
    maximum_level: u32,
    headers: BTreeMap<String, String>,
    params: BTreeMap<String, String>,
    ready: ReadyFlag,
}

impl UrlTemplateImageryProvider {
    pub fn new(template: impl Into<String>, tiling_scheme: Box<dyn TilingScheme>) -> Self {
        Self {
            template: template.into(),
            tiling_scheme,
            subdomains: vec!["a".to_owned(), "b".to_owned(), "c".to_owned()],
            minimum_level: 0,
            maximum_level: 18,
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            ready: ReadyFlag::new(true),
        }
    }

    pub fn with_subdomains(mut self, subdomains: Vec<String>) -> Self {
        self.subdomains = subdomains;
        self
    }

    pub fn with_levels(mut self, minimum_level: u32, maximum_level: u32) -> Self {
        assert!(
            minimum_level <= maximum_level,
            "imagery provider minimum level {minimum_level} exceeds maximum level {maximum_level}"
        );
        assert!(
            maximum_level <= MAXIMUM_LEVEL,
            "imagery provider maximum level {maximum_level} exceeds the deepest level {MAXIMUM_LEVEL}"
        );
        self.minimum_level = minimum_level;
        self.maximum_level = maximum_level;
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }

    /// Starts not ready; the returned flag marks it ready later.
    pub fn deferred(mut self) -> (Self, ReadyFlag) {
        self.ready = ReadyFlag::new(false);
        let flag = self.ready.clone();
        (self, flag)
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    fn expand(&self, x: u32, y: u32, level: u32) -> String {
        let reverse_y = self.tiling_scheme.number_of_y_tiles_at_level(level) - y - 1;
        let mut url = self
            .template
            .replace("{z}", &level.to_string())
            .replace("{x}", &x.to_string())
            .replace("{y}", &y.to_string())
            .replace("{reverseY}", &reverse_y.to_string());
        if !self.subdomains.is_empty() {
            let index = (x as usize + y as usize + level as usize) % self.subdomains.len();
            url = url.replace("{s}", &self.subdomains[index]);
        }
        url
    }
}

impl ImageryProvider for UrlTemplateImageryProvider {
    fn ready(&self) -> bool {
        self.ready.get()
    }

    fn tiling_scheme(&self) -> &dyn TilingScheme {
        self.tiling_scheme.as_ref()
    }

    fn minimum_level(&self) -> u32 {
        self.minimum_level
    }

    fn maximum_level(&self) -> u32 {
        self.maximum_level
    }

    fn request(&self, x: u32, y: u32, level: u32) -> Option<ImageryRequest> {
        if level < self.minimum_level || level > self.maximum_level {
            return None;
        }
        Some(ImageryRequest {
            url: self.expand(x, y, level),
            headers: self.headers.clone(),
            params: self.params.clone(),
        })
    }
}
