//! The core module
//!
//! Always linked into the runtime. Starting it registers the built-in data
//! kinds and contributes a handful of general purpose services.

mod copy;
mod fill;
mod notifier;

pub use copy::CopyService;
pub use fill::FillService;
pub use notifier::NotifierService;

use std::sync::Arc;

use sight_data::{builtin_kinds, Data};
use sight_runtime::{ExecutableFactory, Linkage, ModuleContext, ModuleDescriptor, Plugin, PluginError};
use sight_service::Service;

/// Identifier of the core module
pub const CORE_MODULE: &str = "sight.core";

pub const COPY_SERVICE: &str = "sight::service::Copy";
pub const FILL_SERVICE: &str = "sight::service::Fill";
pub const NOTIFIER_SERVICE: &str = "sight::service::Notifier";

/// Descriptor of the core module
pub fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::new(CORE_MODULE, env!("CARGO_PKG_VERSION"))
}

/// Code contributed by the core module
pub fn linkage(data: Arc<ExecutableFactory<dyn Data>>) -> Linkage<dyn Service> {
    Linkage::new(CORE_MODULE)
        .plugin(move || Box::new(CorePlugin::new(Arc::clone(&data))) as Box<dyn Plugin>)
        .executable(COPY_SERVICE, || Box::new(CopyService::default()) as Box<dyn Service>)
        .executable(FILL_SERVICE, || Box::new(FillService::default()) as Box<dyn Service>)
        .executable(NOTIFIER_SERVICE, || Box::new(NotifierService::new()) as Box<dyn Service>)
}

/// Registers the built-in data kinds
pub struct CorePlugin {
    data: Arc<ExecutableFactory<dyn Data>>,
}

impl CorePlugin {
    pub fn new(data: Arc<ExecutableFactory<dyn Data>>) -> Self {
        Self { data }
    }
}

impl Plugin for CorePlugin {
    fn start(&mut self, context: &ModuleContext) -> Result<(), PluginError> {
        let mut registered = 0;
        for (class, constructor) in builtin_kinds() {
            // Kinds survive a module restart
            if self.data.contains(class) {
                continue;
            }
            self.data.register(class, constructor)?;
            registered += 1;
        }
        tracing::info!(module = %context.id, registered, "Core data kinds registered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sight_data::{Array, Integer};

    fn context() -> ModuleContext {
        ModuleContext {
            id: CORE_MODULE.to_string(),
            version: "0.0.0".to_string(),
            parameters: Default::default(),
            location: None,
        }
    }

    #[test]
    fn test_plugin_registers_builtin_kinds() {
        let data = Arc::new(ExecutableFactory::<dyn Data>::new("data"));
        let mut plugin = CorePlugin::new(Arc::clone(&data));
        plugin.start(&context()).unwrap();

        assert!(data.contains(Integer::CLASS));
        assert!(data.contains(Array::CLASS));
        assert_eq!(data.create(Integer::CLASS).unwrap().class_name(), Integer::CLASS);
    }

    #[test]
    fn test_plugin_restart_keeps_kinds() {
        let data = Arc::new(ExecutableFactory::<dyn Data>::new("data"));
        let mut plugin = CorePlugin::new(Arc::clone(&data));
        plugin.start(&context()).unwrap();
        plugin.stop().unwrap();
        plugin.start(&context()).unwrap();
        assert_eq!(data.keys().len(), builtin_kinds().len());
    }

    #[test]
    fn test_linkage_contributes_services() {
        let data = Arc::new(ExecutableFactory::<dyn Data>::new("data"));
        let linkage = linkage(data);
        assert_eq!(linkage.module(), CORE_MODULE);
        assert_eq!(
            linkage.executable_keys(),
            vec![COPY_SERVICE, FILL_SERVICE, NOTIFIER_SERVICE]
        );
    }
}
