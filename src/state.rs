use std::{path::Path, sync::Arc};

use crate::{
    bus::{BusConfig, NotificationBus},
    directory::Directory,
    orders::Pricing,
    service::OrderService,
    store::Store,
};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<OrderService>,
    pub bus: Arc<NotificationBus>,
    pub directory: Arc<Directory>,
}

impl AppState {
    /// Store under `path`, demo directory, default pricing.
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::with_parts(path, Directory::demo()?, Pricing::default(), BusConfig::default())
    }

    pub fn with_parts(
        path: impl AsRef<Path>,
        directory: Directory,
        pricing: Pricing,
        bus: BusConfig,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(Store::open(path)?);
        let directory = Arc::new(directory);
        let bus = Arc::new(NotificationBus::new(bus));
        let service = Arc::new(OrderService::new(
            store,
            directory.clone(),
            bus.clone(),
            pricing,
        ));
        Ok(Self {
            service,
            bus,
            directory,
        })
    }
}
