//! Node options
use mesh_proxy::HttpClientConfig;

/// Tags used when a node is configured without any.
pub const DEFAULT_TAGS: &[&str] = &["default", "local"];

#[derive(Clone, Debug)]
pub struct NodeOptions {
    /// Environment partition; nodes only see services with the same tags.
    pub tags: Vec<String>,
    /// Bootstrap peers joined in the background when the node is created.
    pub nodes: Vec<String>,
    /// Log every served request at info level.
    pub debug: bool,
    pub http: HttpClientConfig,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            tags: default_tags(),
            nodes: Vec::new(),
            debug: false,
            http: HttpClientConfig::default(),
        }
    }
}

impl NodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tags; an empty list keeps the defaults.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: Vec<String> = tags
            .into_iter()
            .map(Into::into)
            .filter(|t: &String| !t.is_empty())
            .collect();
        self.tags = if tags.is_empty() { default_tags() } else { tags };
        self
    }

    pub fn with_nodes<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nodes = nodes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_http(mut self, http: HttpClientConfig) -> Self {
        self.http = http;
        self
    }
}

fn default_tags() -> Vec<String> {
    DEFAULT_TAGS.iter().map(|t| t.to_string()).collect()
}
