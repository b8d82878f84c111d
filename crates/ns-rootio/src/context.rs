//! Read options and the per-descent read context.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::forth::cache::CacheConfig;
use crate::forth::form::IndexFormat;

/// Options for reading an object branch.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// Top-level objects carry a byte-count/version header.
    pub header: bool,
    /// `TObject` bases carry their version/id/bits header.
    pub tobject_header: bool,
    /// Offsets type of generated list forms.
    pub index_format: IndexFormat,
    /// Compiled-model cache settings.
    pub cache: CacheConfig,
    /// Decode baskets on the rayon pool.
    pub parallel: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            header: true,
            tobject_header: true,
            index_format: IndexFormat::I64,
            cache: CacheConfig::default(),
            parallel: true,
        }
    }
}

impl ReadOptions {
    /// Set [`ReadOptions::header`].
    pub fn with_header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    /// Set [`ReadOptions::tobject_header`].
    pub fn with_tobject_header(mut self, tobject_header: bool) -> Self {
        self.tobject_header = tobject_header;
        self
    }

    /// Set [`ReadOptions::index_format`].
    pub fn with_index_format(mut self, index_format: IndexFormat) -> Self {
        self.index_format = index_format;
        self
    }

    /// Set [`ReadOptions::cache`].
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Set [`ReadOptions::parallel`].
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// State threaded down one read. Cloned on descent, never shared mutably.
#[derive(Debug, Clone, Default)]
pub struct ReadContext {
    /// The value being read starts with a byte-count/version header.
    pub header: bool,
    /// `TObject` headers are present.
    pub tobject_header: bool,
    /// Offsets type of generated list forms.
    pub index_format: IndexFormat,
    breadcrumbs: Vec<String>,
    path: Vec<String>,
}

impl ReadContext {
    /// Context for a top-level read.
    pub fn new(options: &ReadOptions) -> Self {
        Self {
            header: options.header,
            tobject_header: options.tobject_header,
            index_format: options.index_format,
            breadcrumbs: Vec::new(),
            path: Vec::new(),
        }
    }

    /// Classes currently being read, outermost first.
    pub fn breadcrumbs(&self) -> &[String] {
        &self.breadcrumbs
    }

    /// Structural position of the value being read.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Whether `class` is already being read further up.
    pub fn contains_class(&self, class: &str) -> bool {
        self.breadcrumbs.iter().any(|c| c == class)
    }

    /// Enter an instance of `class`.
    pub fn descend_class(&self, class: &str) -> Self {
        let mut ctx = self.clone();
        ctx.breadcrumbs.push(class.to_string());
        ctx
    }

    /// Enter member or element slot `segment`.
    pub fn descend_path(&self, segment: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        ctx.path.push(segment.into());
        ctx
    }

    /// Same position, with or without a header.
    pub fn with_header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    /// Stable key for a node at this position; `role` tells apart the nodes
    /// one contributor registers.
    pub fn key(&self, role: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.path.hash(&mut hasher);
        role.hash(&mut hasher);
        hasher.finish()
    }

    /// `node{key}`: node name and form key prefix for `role`.
    pub fn node_name(&self, role: &str) -> String {
        format!("node{}", self.key(role))
    }
}
