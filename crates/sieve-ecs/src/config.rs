//! Engine construction settings.

/// Settings for [`Engine::with_config`](crate::Engine::with_config).
///
/// # Example
///
/// ```ignore
/// let engine = Engine::with_config(
///     EngineConfig::default()
///         .with_entity_capacity(10_000)
///         .with_signal_recursion_limit(Some(64)),
/// );
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Initial capacity of the entity list.
    pub entity_capacity: usize,
    /// Initial capacity of the query list.
    pub query_capacity: usize,
    /// Initial capacity of the system list.
    pub system_capacity: usize,
    /// Nesting limit applied to the engine's signals and to every entity and
    /// query attached to it. `None` leaves recursion unbounded.
    pub signal_recursion_limit: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entity_capacity: 64,
            query_capacity: 8,
            system_capacity: 8,
            signal_recursion_limit: None,
        }
    }
}

impl EngineConfig {
    pub fn with_entity_capacity(mut self, capacity: usize) -> Self {
        self.entity_capacity = capacity;
        self
    }

    pub fn with_query_capacity(mut self, capacity: usize) -> Self {
        self.query_capacity = capacity;
        self
    }

    pub fn with_system_capacity(mut self, capacity: usize) -> Self {
        self.system_capacity = capacity;
        self
    }

    pub fn with_signal_recursion_limit(mut self, limit: Option<u32>) -> Self {
        self.signal_recursion_limit = limit;
        self
    }
}
