//! Desired/observed state reconciliation of the tunnel service
//!
//! A [`TunnelReconciler`] probes the service once when it is constructed and
//! afterwards only tracks the effect of its own mutations. Activation aborts on
//! the first fatal step; deactivation always runs every step.

use std::fmt;

use crate::domain::RelayDomain;
use crate::error::TunnelError;
use crate::systemctl::ServiceController;
use crate::unit_file::UnitDefinitionWriter;

/// Desired tunnel state for one reconcile call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelState {
    Disabled,
    /// Tunnel through the given relay domain (validated during reconcile)
    Enabled(String),
}

/// What a successful reconcile call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// Already in the desired state, nothing was touched
    Unchanged,
    Activated,
    Deactivated,
}

/// Service flags as last observed or established by this reconciler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObservedActivation {
    /// Service is running
    pub active: bool,
    /// Service is enabled at boot
    pub enabled: bool,
}

impl ObservedActivation {
    /// Either flag counts as activated
    pub fn is_activated(&self) -> bool {
        self.active || self.enabled
    }
}

impl fmt::Display for ObservedActivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_activated() {
            write!(f, "online")
        } else {
            write!(f, "offline")
        }
    }
}

/// Brings the tunnel service to the caller's desired state
pub struct TunnelReconciler<C> {
    controller: C,
    unit: UnitDefinitionWriter,
    observed: ObservedActivation,
}

impl<C: ServiceController> TunnelReconciler<C> {
    /// Probe the service and build a reconciler around the result
    ///
    /// Probe failures count as "not active" and are only logged.
    pub fn new(controller: C, unit: UnitDefinitionWriter) -> Self {
        let observed = Self::probe(&controller);
        tracing::info!("Yaler service status is {}", observed);

        Self {
            controller,
            unit,
            observed,
        }
    }

    fn probe(controller: &C) -> ObservedActivation {
        let active = match controller.is_active() {
            Ok(active) => active,
            Err(e) => {
                tracing::warn!("Status of yaler service is unknown: {}", e);
                return ObservedActivation::default();
            }
        };

        // An active service is enough; the enabled flag only matters otherwise.
        if active {
            return ObservedActivation {
                active: true,
                enabled: false,
            };
        }

        match controller.is_enabled() {
            Ok(enabled) => ObservedActivation {
                active: false,
                enabled,
            },
            Err(e) => {
                tracing::warn!("Status of yaler service is unknown: {}", e);
                ObservedActivation::default()
            }
        }
    }

    pub fn observed(&self) -> ObservedActivation {
        self.observed
    }

    /// Reconcile the service with `desired`
    pub fn reconcile(&mut self, desired: &TunnelState) -> Result<Reconciled, TunnelError> {
        match desired {
            TunnelState::Enabled(domain) => self.activate(domain),
            TunnelState::Disabled => Ok(self.deactivate()),
        }
    }

    fn activate(&mut self, domain: &str) -> Result<Reconciled, TunnelError> {
        // Only a running service short-circuits. Enabled-but-stopped is what a
        // failed start leaves behind and has to go through the steps again.
        if self.observed.active {
            tracing::debug!("Yaler service already active, requested {}", domain);
            return Ok(Reconciled::Unchanged);
        }

        let domain = RelayDomain::parse(domain)?;
        tracing::info!("Activating yaler tunnel via {}", domain);

        if let Err(e) = self.controller.stop() {
            tracing::warn!("Unable to stop yaler service before reinstall: {}", e);
        }

        if let Err(e) = self.unit.delete() {
            tracing::warn!("Unable to delete {:?}: {}", self.unit.path(), e);
        }

        self.unit
            .write(&domain)
            .map_err(|source| TunnelError::InstallFailed {
                path: self.unit.path().to_path_buf(),
                source,
            })?;

        self.controller.enable().map_err(|e| {
            tracing::error!("Unable to enable yaler service: {}", e);
            TunnelError::EnableFailed(e)
        })?;
        self.observed.enabled = true;

        self.controller.start().map_err(|e| {
            tracing::error!("Unable to start yaler service: {}", e);
            TunnelError::StartFailed(e)
        })?;
        self.observed.active = true;

        tracing::info!("Yaler tunnel active via {}", domain);
        Ok(Reconciled::Activated)
    }

    fn deactivate(&mut self) -> Reconciled {
        if !self.observed.is_activated() {
            return Reconciled::Unchanged;
        }

        tracing::info!("Deactivating yaler tunnel");

        if let Err(e) = self.controller.stop() {
            tracing::warn!("Unable to stop yaler service: {}", e);
        }

        if let Err(e) = self.controller.disable() {
            tracing::warn!("Unable to disable yaler service: {}", e);
        }

        if let Err(e) = self.unit.delete() {
            tracing::warn!("Unable to delete {:?}: {}", self.unit.path(), e);
        }

        self.observed = ObservedActivation::default();
        Reconciled::Deactivated
    }
}
