use std::sync::Arc;

use zkpanel_kernel::Kernel;
use zkpanel_sync::SchedulerRegistry;

#[derive(Clone)]
pub(crate) struct AppState {
    kernel: Kernel,
    registry: Arc<SchedulerRegistry>,
}

impl AppState {
    pub(crate) fn new(kernel: Kernel, registry: Arc<SchedulerRegistry>) -> Self {
        Self { kernel, registry }
    }

    pub(crate) fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub(crate) fn registry(&self) -> &SchedulerRegistry {
        &self.registry
    }
}
