use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::device::DeviceHandle;

/// Custom response hook: `(command text, invocation count, device)`.
///
/// Runs on the device worker thread. It answers by pushing to the device's
/// output queue through the handle.
pub type CustomHandler = Arc<dyn Fn(&str, u64, &DeviceHandle) + Send + Sync>;

/// Named custom handlers a Program may reference.
#[derive(Clone, Default)]
pub struct Handlers {
    map: HashMap<String, CustomHandler>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&str, u64, &DeviceHandle) + Send + Sync + 'static,
    {
        self.map.insert(name.into(), Arc::new(f));
        self
    }

    pub fn get(&self, name: &str) -> Option<CustomHandler> {
        self.map.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("Handlers").field("names", &names).finish()
    }
}
