use super::CallSite;
use crate::definition::TransactionDefinition;
use dashmap::DashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Lookup of transaction definitions declared for operations and types.
///
/// Implementations answer only what was declared directly; fallback between operation
/// and type level declarations is done by [`CachingDefinitionSource`].
pub trait DefinitionSource: Send + Sync {
    /// Definition declared on `method` of `type_name`.
    fn find_for_method(&self, type_name: &str, method: &str) -> Option<TransactionDefinition>;

    /// Definition declared on `type_name` as a whole.
    fn find_for_type(&self, type_name: &str) -> Option<TransactionDefinition>;
}

/// A [`DefinitionSource`] backed by explicit registrations.
#[derive(Default)]
pub struct MapDefinitionSource {
    methods: DashMap<(String, String), TransactionDefinition>,
    types: DashMap<String, TransactionDefinition>,
}

impl MapDefinitionSource {
    pub fn new() -> Self {
        MapDefinitionSource {
            methods: DashMap::new(),
            types: DashMap::new(),
        }
    }

    pub fn add_method(&self, type_name: &str, method: &str, definition: TransactionDefinition) {
        self.methods
            .insert((type_name.to_string(), method.to_string()), definition);
    }

    pub fn add_type(&self, type_name: &str, definition: TransactionDefinition) {
        self.types.insert(type_name.to_string(), definition);
    }
}

impl DefinitionSource for MapDefinitionSource {
    fn find_for_method(&self, type_name: &str, method: &str) -> Option<TransactionDefinition> {
        self.methods
            .get(&(type_name.to_string(), method.to_string()))
            .map(|entry| entry.value().clone())
    }

    fn find_for_type(&self, type_name: &str) -> Option<TransactionDefinition> {
        self.types.get(type_name).map(|entry| entry.value().clone())
    }
}

#[derive(Clone)]
enum CachedDefinition {
    Found(TransactionDefinition),
    Absent,
}

/// Resolves and memoizes the definition that applies to a [`CallSite`].
///
/// # Resolution order
/// 1. the operation on the target type
/// 2. the target type
/// 3. the operation on the declaring type
/// 4. the declaring type
///
/// The first hit wins. A resolved definition without a name is named after the call
/// site. Misses are cached as well, so each call site is computed once.
///
/// # Examples
///
/// ```rust
/// use txscope::definition::{Propagation, TransactionDefinition};
/// use txscope::interceptor::{CachingDefinitionSource, CallSite, MapDefinitionSource};
///
/// let declarations = MapDefinitionSource::new();
/// declarations.add_type("OrderService", TransactionDefinition::with_propagation(Propagation::Required));
///
/// let source = CachingDefinitionSource::new(declarations);
/// let definition = source.resolve(&CallSite::new("OrderService", "place")).unwrap();
/// assert_eq!(definition.name(), Some("OrderService.place"));
/// assert!(source.resolve(&CallSite::new("Audit", "log")).is_none());
/// ```
#[derive(Clone)]
pub struct CachingDefinitionSource {
    inner: Arc<CachingDefinitionSourceInner>,
}

struct CachingDefinitionSourceInner {
    source: Box<dyn DefinitionSource>,
    cache: DashMap<CallSite, CachedDefinition>,
}

impl CachingDefinitionSource {
    pub fn new<T: DefinitionSource + 'static>(source: T) -> Self {
        CachingDefinitionSource {
            inner: Arc::new(CachingDefinitionSourceInner {
                source: Box::new(source),
                cache: DashMap::new(),
            }),
        }
    }

    /// Definition that applies to `call_site`, or `None` if it is not transactional.
    pub fn resolve(&self, call_site: &CallSite) -> Option<TransactionDefinition> {
        if let Some(cached) = self.inner.cache.get(call_site) {
            return match cached.value() {
                CachedDefinition::Found(definition) => Some(definition.clone()),
                CachedDefinition::Absent => None,
            };
        }

        match self.compute(call_site) {
            Some(definition) => {
                let definition = match definition.name() {
                    Some(_) => definition,
                    None => definition.named(&call_site.qualified_name()),
                };
                log::trace!(
                    "Adding transactional method '{}' with definition: {}",
                    call_site,
                    definition
                );
                self.inner
                    .cache
                    .insert(call_site.clone(), CachedDefinition::Found(definition.clone()));
                Some(definition)
            }
            None => {
                self.inner
                    .cache
                    .insert(call_site.clone(), CachedDefinition::Absent);
                None
            }
        }
    }

    /// Number of cached call sites, misses included.
    pub fn cache_len(&self) -> usize {
        self.inner.cache.len()
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    fn compute(&self, call_site: &CallSite) -> Option<TransactionDefinition> {
        let source = &self.inner.source;
        source
            .find_for_method(call_site.target_type(), call_site.method())
            .or_else(|| source.find_for_type(call_site.target_type()))
            .or_else(|| {
                let declaring = call_site.declaring_type()?;
                source
                    .find_for_method(declaring, call_site.method())
                    .or_else(|| source.find_for_type(declaring))
            })
    }
}

impl Debug for CachingDefinitionSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingDefinitionSource")
            .field("cache_len", &self.cache_len())
            .finish()
    }
}
