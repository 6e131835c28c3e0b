//! Stream provider registry: resolves a stream id's alphabetic prefix to a
//! [`Provider`] that knows how to build input/output URIs and an FFmpeg
//! argv for ids within it.

use std::{collections::HashMap, sync::Arc};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use crate::error::UnknownStream;
use crate::ffmpeg_cmd;

static PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]*").expect("valid regex"));

/// Splits a stream id into its alphabetic provider prefix and numeric/named
/// suffix, e.g. `"C123"` -> `("C", "123")`.
#[must_use]
pub fn split_id(id: &str) -> (&str, &str) {
    let m = PREFIX_RE.find(id).expect("regex always matches");
    (m.as_str(), &id[m.end()..])
}

/// A configured remote source able to build input/output URIs and a
/// transcoder argv for a given stream id.
///
/// Concrete implementations are [`Numeric`] (suffix is a bare integer
/// index) and [`Named`] (suffix indexes a fixed name list), mirroring the
/// original class hierarchy without needing one of our own.
pub trait Provider: Send + Sync {
    /// Alphabetic prefix this provider is registered under.
    fn identifier(&self) -> &str;

    /// Whether thumbnails for this provider's streams may be taken from
    /// the local republish URL when the stream is alive, instead of from
    /// the provider's origin.
    fn thumbnail_local(&self) -> bool;

    /// All stream ids currently known to this provider.
    fn streams(&self) -> Vec<String>;

    /// Builds the FFmpeg argv that pulls `id` from its remote source and
    /// republishes it to the local origin.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownStream`] if `id` is out of range for this provider.
    fn build_cmd(&self, id: &str) -> Result<Vec<String>, UnknownStream>;

    /// Resolves `id` to the origin-side identifier used when a local
    /// republish is unavailable (thumbnailing straight from the source).
    ///
    /// # Errors
    ///
    /// Returns [`UnknownStream`] if `id` is out of range for this provider.
    fn get_origin_id(&self, id: &str) -> Result<String, UnknownStream>;

    /// A JSON metadata blob describing `id`, used by the `/info` routes.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownStream`] if `id` is out of range for this provider.
    fn stream_data(
        &self,
        id: &str,
    ) -> Result<serde_json::Value, UnknownStream>;

    /// The local republish URL `id` is available at once its supervisor
    /// is alive, used for thumbnailing when `thumbnail_local()` permits it.
    fn local_uri(&self, id: &str) -> String;

    /// The provider's own origin-side source URL for `id`, used for
    /// thumbnailing when the local republish isn't usable.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownStream`] if `id` is out of range for this provider.
    fn origin_uri(&self, id: &str) -> Result<String, UnknownStream>;
}

/// Configuration shared by [`Numeric`] and [`Named`] providers.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    /// Alphabetic identifier prefix, e.g. `"C"`.
    pub identifier: String,
    /// Input URI template; `{}` is replaced with the resolved stream name.
    pub input_stream_template: String,
    /// Output URI template; `{}` is replaced with the stream id.
    pub output_stream_template: String,
    /// Extra FFmpeg input options (split on whitespace).
    pub input_opts: String,
    /// Extra FFmpeg output options (split on whitespace).
    pub output_opts: String,
    /// Whether the local republish URL may be used for thumbnailing.
    pub thumbnail_local: bool,
}

fn expand_cmd(
    cfg: &ProviderConfig,
    stream: &str,
    id: &str,
) -> Vec<String> {
    let input_uri = cfg.input_stream_template.replace("{}", stream);
    let output_uri = cfg.output_stream_template.replace("{}", id);
    ffmpeg_cmd::build_cmd(
        &cfg.input_opts,
        &input_uri,
        &cfg.output_opts,
        &output_uri,
    )
}

/// A provider whose streams are indexed by a bare integer suffix, e.g.
/// `"C0"`, `"C1"`, ....
#[derive(Clone, Debug)]
pub struct Numeric {
    cfg: ProviderConfig,
    /// The numeric ids this provider exposes.
    pub stream_list: Vec<u32>,
}

impl Numeric {
    /// Creates a new numeric provider from its config and known id list.
    #[must_use]
    pub fn new(cfg: ProviderConfig, stream_list: Vec<u32>) -> Self {
        Self { cfg, stream_list }
    }

    fn number_id(id: &str) -> Result<u32, UnknownStream> {
        let (_, suffix) = split_id(id);
        suffix
            .parse()
            .map_err(|_| UnknownStream(id.to_string()))
    }
}

impl Provider for Numeric {
    fn identifier(&self) -> &str {
        &self.cfg.identifier
    }

    fn thumbnail_local(&self) -> bool {
        self.cfg.thumbnail_local
    }

    fn streams(&self) -> Vec<String> {
        self.stream_list
            .iter()
            .map(|n| format!("{}{}", self.cfg.identifier, n))
            .collect()
    }

    fn build_cmd(&self, id: &str) -> Result<Vec<String>, UnknownStream> {
        let n = Self::number_id(id)?;
        if !self.stream_list.contains(&n) {
            return Err(UnknownStream(id.to_string()));
        }
        Ok(expand_cmd(&self.cfg, &n.to_string(), id))
    }

    fn get_origin_id(&self, id: &str) -> Result<String, UnknownStream> {
        let n = Self::number_id(id)?;
        if !self.stream_list.contains(&n) {
            return Err(UnknownStream(id.to_string()));
        }
        Ok(n.to_string())
    }

    fn stream_data(
        &self,
        id: &str,
    ) -> Result<serde_json::Value, UnknownStream> {
        let n = Self::number_id(id)?;
        Ok(json!({ "id": id, "origin": n.to_string() }))
    }

    fn local_uri(&self, id: &str) -> String {
        self.cfg.output_stream_template.replace("{}", id)
    }

    fn origin_uri(&self, id: &str) -> Result<String, UnknownStream> {
        let n = Self::number_id(id)?;
        if !self.stream_list.contains(&n) {
            return Err(UnknownStream(id.to_string()));
        }
        Ok(self.cfg.input_stream_template.replace("{}", &n.to_string()))
    }
}

/// A provider whose streams are indexed by position in a fixed name list,
/// e.g. `"C0"` maps to `stream_list[0]`.
#[derive(Clone, Debug)]
pub struct Named {
    cfg: ProviderConfig,
    /// The ordered list of origin-side stream names.
    pub stream_list: Vec<String>,
}

impl Named {
    /// Creates a new named provider from its config and name list.
    #[must_use]
    pub fn new(cfg: ProviderConfig, stream_list: Vec<String>) -> Self {
        Self { cfg, stream_list }
    }

    fn index_of(&self, id: &str) -> Result<usize, UnknownStream> {
        let (_, suffix) = split_id(id);
        suffix
            .parse::<usize>()
            .ok()
            .filter(|i| *i < self.stream_list.len())
            .ok_or_else(|| UnknownStream(id.to_string()))
    }
}

impl Provider for Named {
    fn identifier(&self) -> &str {
        &self.cfg.identifier
    }

    fn thumbnail_local(&self) -> bool {
        self.cfg.thumbnail_local
    }

    fn streams(&self) -> Vec<String> {
        (0..self.stream_list.len())
            .map(|i| format!("{}{}", self.cfg.identifier, i))
            .collect()
    }

    fn build_cmd(&self, id: &str) -> Result<Vec<String>, UnknownStream> {
        let i = self.index_of(id)?;
        Ok(expand_cmd(&self.cfg, &self.stream_list[i], id))
    }

    fn get_origin_id(&self, id: &str) -> Result<String, UnknownStream> {
        let i = self.index_of(id)?;
        Ok(self.stream_list[i].clone())
    }

    fn stream_data(
        &self,
        id: &str,
    ) -> Result<serde_json::Value, UnknownStream> {
        let i = self.index_of(id)?;
        Ok(json!({ "id": id, "origin": self.stream_list[i] }))
    }

    fn local_uri(&self, id: &str) -> String {
        self.cfg.output_stream_template.replace("{}", id)
    }

    fn origin_uri(&self, id: &str) -> Result<String, UnknownStream> {
        let i = self.index_of(id)?;
        Ok(self.cfg.input_stream_template.replace("{}", &self.stream_list[i]))
    }
}

/// Registry mapping a provider prefix to its [`Provider`] implementation.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` under its own `identifier()`.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers
            .insert(provider.identifier().to_string(), provider);
    }

    /// Resolves a stream id's alphabetic prefix to its registered
    /// [`Provider`].
    ///
    /// # Errors
    ///
    /// Returns [`UnknownStream`] if no provider is registered for the
    /// prefix.
    pub fn select(
        &self,
        id: &str,
    ) -> Result<Arc<dyn Provider>, UnknownStream> {
        let (prefix, _) = split_id(id);
        self.providers
            .get(prefix)
            .cloned()
            .ok_or_else(|| UnknownStream(id.to_string()))
    }

    /// Looks up a provider directly by its identifier prefix (not a full
    /// stream id).
    #[must_use]
    pub fn by_prefix(&self, prefix: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(prefix).cloned()
    }

    /// Iterates over all registered providers.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Provider> {
        self.providers.values().map(|p| &**p)
    }
}

#[cfg(test)]
mod providers_spec {
    use super::*;

    fn cfg(id: &str) -> ProviderConfig {
        ProviderConfig {
            identifier: id.to_string(),
            input_stream_template: "rtsp://cam/{}".to_string(),
            output_stream_template: "rtmp://origin/live/{}".to_string(),
            input_opts: "-re".to_string(),
            output_opts: "-c copy".to_string(),
            thumbnail_local: true,
        }
    }

    #[test]
    fn split_id_separates_prefix_and_suffix() {
        assert_eq!(split_id("C123"), ("C", "123"));
        assert_eq!(split_id("M"), ("M", ""));
    }

    #[test]
    fn numeric_provider_resolves_known_ids() {
        let p = Numeric::new(cfg("C"), vec![0, 1, 2]);
        assert!(p.build_cmd("C1").is_ok());
        assert!(p.build_cmd("C9").is_err());
        assert_eq!(p.streams(), vec!["C0", "C1", "C2"]);
    }

    #[test]
    fn named_provider_resolves_by_index() {
        let p = Named::new(cfg("N"), vec!["front".into(), "back".into()]);
        assert_eq!(p.get_origin_id("N1").unwrap(), "back");
        assert!(p.get_origin_id("N2").is_err());
    }

    #[test]
    fn registry_selects_by_prefix() {
        let mut reg = ProviderRegistry::new();
        reg.register(Arc::new(Numeric::new(cfg("C"), vec![0, 1])));
        assert!(reg.select("C1").is_ok());
        assert!(reg.select("Z1").is_err());
        assert!(reg.by_prefix("C").is_some());
    }
}
