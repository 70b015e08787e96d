//! Explicit list of the kernels a pipeline runs.

/// Name and launch shape of one kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelInfo {
    /// Kernel name, unique within a registry.
    pub name: &'static str,
    /// Lanes per group.
    pub group_size: usize,
}

/// Kernels registered by the stages of a pipeline.
///
/// Stages register their kernels when they are constructed, so the registry
/// reflects exactly the stages that were built. Registering the same name
/// twice keeps the first entry.
#[derive(Clone, Debug, Default)]
pub struct KernelRegistry {
    kernels: Vec<KernelInfo>,
}

impl KernelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a kernel. Returns false if the name was already taken.
    pub fn register(&mut self, name: &'static str, group_size: usize) -> bool {
        if self.get(name).is_some() {
            return false;
        }
        self.kernels.push(KernelInfo { name, group_size });
        true
    }

    /// Looks up a kernel by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&KernelInfo> {
        self.kernels.iter().find(|kernel| kernel.name == name)
    }

    /// Kernels in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &KernelInfo> {
        self.kernels.iter()
    }

    /// Number of registered kernels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}
