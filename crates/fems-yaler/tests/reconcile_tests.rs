//! Reconciliation against a simulated systemd, going through `Systemctl`

use fems_yaler::{
    CommandOutput, CommandRunner, ProcessLock, Reconciled, ServiceIdentity, Systemctl,
    TunnelError, TunnelReconciler, TunnelState, UnitDefinitionWriter,
};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Pretends to be systemctl for a single unit
#[derive(Default)]
struct FakeSystemd {
    state: Mutex<UnitState>,
    exit_codes: Mutex<HashMap<String, i32>>,
    log: Mutex<Vec<String>>,
}

#[derive(Default, Clone, Copy)]
struct UnitState {
    active: bool,
    enabled: bool,
}

impl FakeSystemd {
    fn with_state(active: bool, enabled: bool) -> Self {
        Self {
            state: Mutex::new(UnitState { active, enabled }),
            ..Self::default()
        }
    }

    /// Make `verb` exit with `code` without changing state
    fn fail(&self, verb: &str, code: i32) {
        self.exit_codes
            .lock()
            .unwrap()
            .insert(verb.to_string(), code);
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn state(&self) -> UnitState {
        *self.state.lock().unwrap()
    }
}

impl CommandRunner for FakeSystemd {
    fn run(&self, program: &Path, args: &[&str]) -> io::Result<CommandOutput> {
        assert_eq!(program, Path::new("/bin/systemctl"));
        assert_eq!(args[1], "fems-yalertunnel.service");

        let verb = args[0];
        self.log.lock().unwrap().push(args.join(" "));

        if let Some(code) = self.exit_codes.lock().unwrap().get(verb) {
            return Ok(CommandOutput {
                code: Some(*code),
                stdout: String::new(),
                stderr: format!("Failed to {} unit", verb),
            });
        }

        let mut state = self.state.lock().unwrap();
        let code = match verb {
            "is-active" => i32::from(!state.active) * 3,
            "is-enabled" => i32::from(!state.enabled),
            "stop" => {
                state.active = false;
                0
            }
            "start" => {
                state.active = true;
                0
            }
            "enable" => {
                state.enabled = true;
                0
            }
            "disable" => {
                state.enabled = false;
                0
            }
            other => panic!("unexpected systemctl verb {}", other),
        };

        Ok(CommandOutput::with_code(code))
    }
}

struct Harness {
    _temp: TempDir,
    systemd: Arc<FakeSystemd>,
    unit_path: PathBuf,
    identity: ServiceIdentity,
}

impl Harness {
    fn new(systemd: FakeSystemd) -> Self {
        let temp = TempDir::new().unwrap();
        let identity = ServiceIdentity::with_unit_dir(temp.path());
        Self {
            unit_path: identity.unit_path.clone(),
            _temp: temp,
            systemd: Arc::new(systemd),
            identity,
        }
    }

    fn reconciler(&self) -> TunnelReconciler<Systemctl> {
        let controller = Systemctl::new(
            self.identity.clone(),
            self.systemd.clone(),
            Arc::new(ProcessLock::new()),
        );
        TunnelReconciler::new(controller, UnitDefinitionWriter::new(&self.identity))
    }
}

#[test]
fn test_activation_scenario() {
    let harness = Harness::new(FakeSystemd::with_state(false, false));
    let mut reconciler = harness.reconciler();

    let outcome = reconciler
        .reconcile(&TunnelState::Enabled("fenecon-wx7q-99zz".to_string()))
        .unwrap();

    assert_eq!(outcome, Reconciled::Activated);
    assert_eq!(
        harness.systemd.log(),
        vec![
            "is-active fems-yalertunnel.service --quiet",
            "is-enabled fems-yalertunnel.service --quiet",
            "stop fems-yalertunnel.service",
            "enable fems-yalertunnel.service",
            "start fems-yalertunnel.service",
        ]
    );

    let unit = std::fs::read_to_string(&harness.unit_path).unwrap();
    assert!(unit.contains(
        "ExecStart=/usr/bin/fems-yalertunnel proxy 127.0.0.1:22 via.yaler.net:80 fenecon-wx7q-99zz"
    ));
    assert!(unit.contains("RestartSec=30"));
    assert!(unit.contains("Restart=always"));
    assert!(reconciler.observed().active);
}

#[test]
fn test_round_trip_leaves_nothing_behind() {
    let harness = Harness::new(FakeSystemd::default());
    let mut reconciler = harness.reconciler();

    reconciler
        .reconcile(&TunnelState::Enabled("fenecon-ab12-cd34".to_string()))
        .unwrap();
    reconciler.reconcile(&TunnelState::Disabled).unwrap();

    let state = harness.systemd.state();
    assert!(!state.active);
    assert!(!state.enabled);
    assert!(!harness.unit_path.exists());
}

#[test]
fn test_enable_failure_reports_and_keeps_unit() {
    let systemd = FakeSystemd::default();
    systemd.fail("enable", 1);
    let harness = Harness::new(systemd);
    let mut reconciler = harness.reconciler();

    let result = reconciler.reconcile(&TunnelState::Enabled("fenecon-ab12-cd34".to_string()));

    match result {
        Err(TunnelError::EnableFailed(e)) => {
            assert!(e.to_string().contains("enable"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(harness.unit_path.exists());
    assert!(!harness.systemd.state().active);
    assert!(!harness
        .systemd
        .log()
        .iter()
        .any(|line| line.starts_with("start")));
}

#[test]
fn test_invalid_domain_issues_no_mutations() {
    let harness = Harness::new(FakeSystemd::default());
    let mut reconciler = harness.reconciler();

    for domain in ["", "fenecon", "fenecon-abc-defg", "other-ab12-cd34"] {
        let result = reconciler.reconcile(&TunnelState::Enabled(domain.to_string()));
        assert!(matches!(result, Err(TunnelError::InvalidDomain(_))));
    }

    assert!(harness
        .systemd
        .log()
        .iter()
        .all(|line| line.starts_with("is-")));
    assert!(!harness.unit_path.exists());
}

#[test]
fn test_double_disable_is_harmless() {
    let harness = Harness::new(FakeSystemd::with_state(true, true));
    harness.systemd.fail("stop", 5);
    let mut reconciler = harness.reconciler();

    assert_eq!(
        reconciler.reconcile(&TunnelState::Disabled).unwrap(),
        Reconciled::Deactivated
    );
    assert_eq!(
        reconciler.reconcile(&TunnelState::Disabled).unwrap(),
        Reconciled::Unchanged
    );

    // A fresh run re-probes: the stop failure left the service running
    let mut next_run = harness.reconciler();
    assert!(next_run.observed().active);
    assert_eq!(
        next_run.reconcile(&TunnelState::Disabled).unwrap(),
        Reconciled::Deactivated
    );
    assert!(!harness.systemd.state().enabled);
}

#[test]
fn test_error_messages_are_readable() {
    let err = TunnelError::InvalidDomain("bogus".to_string());
    assert_eq!(err.to_string(), "Invalid relayDomain: bogus");
}
