use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tracing::{debug, trace};

use super::{TranslateError, TranslateKey, Translator};
use crate::format::FormatRegistry;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TranslateCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub translators: usize,
}

/// Translators keyed by their full [`TranslateKey`].
///
/// Unbounded unless a capacity is given, in which case the least recently used translator is
/// dropped first. Translators are shared, so an evicted one stays valid for callers still
/// holding it.
pub struct TranslateCache {
    registry: Arc<dyn FormatRegistry + Send + Sync>,
    translators: LruCache<TranslateKey, Arc<Translator>>,
    stats: TranslateCacheStats,
}

impl TranslateCache {
    pub fn new(registry: Arc<dyn FormatRegistry + Send + Sync>) -> Self {
        Self::with_capacity(registry, None)
    }

    pub fn with_capacity(
        registry: Arc<dyn FormatRegistry + Send + Sync>,
        capacity: Option<NonZeroUsize>,
    ) -> Self {
        let translators = match capacity {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Self {
            registry,
            translators,
            stats: TranslateCacheStats::default(),
        }
    }

    pub fn registry(&self) -> &(dyn FormatRegistry + Send + Sync) {
        self.registry.as_ref()
    }

    /// Return the translator for `key`, building it on a miss.
    ///
    /// A key that fails validation is not cached; the next lookup reports the error again.
    pub fn find(&mut self, key: &TranslateKey) -> Result<Arc<Translator>, TranslateError> {
        if let Some(translator) = self.translators.get(key) {
            self.stats.hits += 1;
            trace!(stride = key.output_stride, "vertex translator cache hit");
            return Ok(Arc::clone(translator));
        }

        self.stats.misses += 1;
        let translator = Arc::new(Translator::new(key.clone(), self.registry.as_ref())?);
        if let Some((evicted, _)) = self
            .translators
            .push(key.clone(), Arc::clone(&translator))
            .filter(|(evicted, _)| evicted != key)
        {
            self.stats.evictions += 1;
            debug!(
                elements = evicted.elements.len(),
                stride = evicted.output_stride,
                "evicted vertex translator"
            );
        }
        debug!(
            elements = key.elements.len(),
            stride = key.output_stride,
            cached = self.translators.len(),
            "built vertex translator"
        );
        Ok(translator)
    }

    pub fn len(&self) -> usize {
        self.translators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.translators.is_empty()
    }

    pub fn clear(&mut self) {
        self.translators.clear();
    }

    pub fn stats(&self) -> TranslateCacheStats {
        TranslateCacheStats {
            translators: self.translators.len(),
            ..self.stats
        }
    }
}

impl fmt::Debug for TranslateCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslateCache")
            .field("translators", &self.translators.len())
            .field("stats", &self.stats)
            .finish()
    }
}
