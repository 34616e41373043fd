//! Component driver registry for the canal pipeline engine.
//!
//! The registry maps a [`ComponentType`] to the driver that creates
//! instances of it. It is an ordinary value: build one at startup, register
//! the drivers you need, and pass it by reference to whatever instantiates
//! components.
//!
//! # Features
//!
//! - **Driver Discovery**: List every registered driver with its description
//! - **Factory Pattern**: Create component instances by type at runtime
//! - **Built-in Drivers**: HOST and DAI endpoints plus the `canal-modules`
//!   processing modules, wired to a shared DMA factory, DAI group table and
//!   xrun notifier
//!
//! # Example
//!
//! ```rust
//! use canal_core::{AdapterSettings, CompConfig, CompId, ComponentType, DaiGroups, SimDmaBank, TypeConfig, XrunNotifier};
//! use canal_registry::{BuiltinContext, DriverRegistry};
//! use std::sync::Arc;
//!
//! let registry = DriverRegistry::with_builtin(&BuiltinContext {
//!     dma: Arc::new(SimDmaBank::new()),
//!     groups: Arc::new(DaiGroups::new()),
//!     notifier: XrunNotifier::disabled(),
//!     adapter: AdapterSettings::default(),
//! });
//!
//! for driver in registry.drivers() {
//!     println!("{}: {}", driver.name, driver.description);
//! }
//!
//! let settings = TypeConfig::new().with("gain_db", -6.0);
//! let volume = registry
//!     .create(CompConfig::new(CompId(1), ComponentType::Volume), &settings)
//!     .unwrap();
//! assert_eq!(volume.comp_type(), ComponentType::Volume);
//! ```

pub mod drivers;

pub use drivers::{BuiltinContext, DEFAULT_FIFO_BYTES, DaiDriver, HostDriver, ModuleDriver, ModuleFactory};

use canal_core::{CompConfig, CompId, ComponentCell, ComponentDriver, ComponentError, ComponentRef, ComponentType, TypeConfig};
use std::sync::Arc;
use thiserror::Error;

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    /// No driver handles the requested type.
    #[error("no driver registered for '{0}'")]
    UnknownType(ComponentType),

    /// A driver for the type is already registered.
    #[error("a driver for '{0}' is already registered")]
    DuplicateType(ComponentType),

    /// The driver refused to create the instance.
    #[error("creating {comp} ({comp_type}): {source}")]
    CreateFailed {
        /// Requested component.
        comp: CompId,
        /// Requested type.
        comp_type: ComponentType,
        /// Driver error.
        #[source]
        source: ComponentError,
    },
}

/// Describes a registered driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverDescriptor {
    /// Type the driver creates.
    pub comp_type: ComponentType,
    /// Short name.
    pub name: String,
    /// One-line description.
    pub description: String,
}

/// Registry of component drivers keyed by component type.
#[derive(Default)]
pub struct DriverRegistry {
    entries: Vec<Arc<dyn ComponentDriver>>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|d| d.comp_type()))
            .finish()
    }
}

impl DriverRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in driver.
    pub fn with_builtin(ctx: &BuiltinContext) -> Self {
        let mut registry = Self::new();
        for driver in drivers::builtin(ctx) {
            // the built-in set has one driver per type
            if let Err(err) = registry.register(driver) {
                tracing::error!("built-in driver skipped: {err}");
            }
        }
        registry
    }

    /// Add `driver`. Each type can have one driver.
    pub fn register(&mut self, driver: Arc<dyn ComponentDriver>) -> Result<(), RegistryError> {
        let comp_type = driver.comp_type();
        if self.entries.iter().any(|d| d.comp_type() == comp_type) {
            return Err(RegistryError::DuplicateType(comp_type));
        }
        tracing::debug!(ty = %comp_type, name = driver.name(), "driver registered");
        self.entries.push(driver);
        Ok(())
    }

    /// Remove and return the driver for `comp_type`.
    ///
    /// Instances already created keep working; only new creations fail.
    pub fn unregister(&mut self, comp_type: ComponentType) -> Result<Arc<dyn ComponentDriver>, RegistryError> {
        let index = self
            .entries
            .iter()
            .position(|d| d.comp_type() == comp_type)
            .ok_or(RegistryError::UnknownType(comp_type))?;
        tracing::debug!(ty = %comp_type, "driver unregistered");
        Ok(self.entries.remove(index))
    }

    /// Driver for `comp_type`.
    pub fn lookup(&self, comp_type: ComponentType) -> Option<Arc<dyn ComponentDriver>> {
        self.entries.iter().find(|d| d.comp_type() == comp_type).cloned()
    }

    /// Descriptors of every registered driver, in registration order.
    pub fn drivers(&self) -> Vec<DriverDescriptor> {
        self.entries
            .iter()
            .map(|d| DriverDescriptor {
                comp_type: d.comp_type(),
                name: d.name().to_owned(),
                description: d.description().to_owned(),
            })
            .collect()
    }

    /// Number of registered drivers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no drivers are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Create a component through the driver registered for its type.
    pub fn create(&self, config: CompConfig, settings: &TypeConfig) -> Result<ComponentRef, RegistryError> {
        let (comp, comp_type) = (config.id, config.comp_type);
        let driver = self.lookup(comp_type).ok_or(RegistryError::UnknownType(comp_type))?;
        ComponentCell::create(driver.as_ref(), config, settings).map_err(|source| {
            tracing::error!(comp = comp.0, ty = %comp_type, "create failed: {source}");
            RegistryError::CreateFailed {
                comp,
                comp_type,
                source,
            }
        })
    }
}
