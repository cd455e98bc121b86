use std::collections::HashMap;
use std::sync::Arc;

/// A pluggable capability identified by a configuration code.
pub trait Strategy: Send + Sync {
    fn code(&self) -> &str;
}

/// `code -> capability` map injected into the order engine at construction.
pub struct Registry<T: ?Sized> {
    entries: HashMap<String, Arc<T>>,
}

impl<T: ?Sized + Strategy> Registry<T> {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Register under the capability's own code, replacing any previous entry.
    pub fn with(mut self, entry: Arc<T>) -> Self {
        self.register(entry);
        self
    }

    pub fn register(&mut self, entry: Arc<T>) {
        let code = entry.code().to_string();
        if self.entries.insert(code.clone(), entry).is_some() {
            tracing::warn!(code = %code, "Replaced previously registered strategy");
        }
    }

    pub fn get(&self, code: &str) -> Option<Arc<T>> {
        self.entries.get(code).cloned()
    }

    pub fn codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: ?Sized + Strategy> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self { entries: self.entries.clone() }
    }
}
