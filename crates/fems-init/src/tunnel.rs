//! Remote access tunnel as used by the init workflow and the CLI

use fems_yaler::{
    CommandRunner, ControlLock, ObservedActivation, Reconciled, ServiceIdentity, Systemctl,
    TunnelError, TunnelReconciler, TunnelState, UnitDefinitionWriter,
};
use std::sync::Arc;

/// Entry point into tunnel reconciliation
///
/// Calls block on service manager invocations.
pub trait TunnelManager: Send + Sync {
    /// Probe the service without changing it
    fn status(&self) -> ObservedActivation;

    fn reconcile(&self, desired: &TunnelState) -> Result<Reconciled, TunnelError>;
}

/// [`TunnelManager`] for the systemd yaler unit
///
/// Every call builds a fresh [`TunnelReconciler`], so the service is always
/// probed again and no state is carried over between calls.
pub struct SystemdTunnel {
    identity: ServiceIdentity,
    runner: Arc<dyn CommandRunner>,
    lock: Arc<dyn ControlLock>,
}

impl SystemdTunnel {
    pub fn new(
        identity: ServiceIdentity,
        runner: Arc<dyn CommandRunner>,
        lock: Arc<dyn ControlLock>,
    ) -> Self {
        Self {
            identity,
            runner,
            lock,
        }
    }

    fn reconciler(&self) -> TunnelReconciler<Systemctl> {
        let controller = Systemctl::new(
            self.identity.clone(),
            self.runner.clone(),
            self.lock.clone(),
        );
        TunnelReconciler::new(controller, UnitDefinitionWriter::new(&self.identity))
    }
}

impl TunnelManager for SystemdTunnel {
    fn status(&self) -> ObservedActivation {
        self.reconciler().observed()
    }

    fn reconcile(&self, desired: &TunnelState) -> Result<Reconciled, TunnelError> {
        self.reconciler().reconcile(desired)
    }
}

/// Run a reconcile on the blocking pool
pub async fn reconcile_blocking(
    manager: Arc<dyn TunnelManager>,
    desired: TunnelState,
) -> Result<Reconciled, TunnelError> {
    tokio::task::spawn_blocking(move || manager.reconcile(&desired))
        .await
        .map_err(|e| TunnelError::Unknown(e.to_string()))?
}
