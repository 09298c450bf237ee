//! Service control through systemd

use std::sync::Arc;

use crate::command::CommandRunner;
use crate::error::ControlError;
use crate::identity::ServiceIdentity;
use crate::lock::ControlLock;

/// Control operations on the tunnel service
///
/// Each call is synchronous and independent; none of them retries.
pub trait ServiceController: Send + Sync {
    /// Whether the service is currently running
    fn is_active(&self) -> Result<bool, ControlError>;

    /// Whether the service is enabled at boot
    fn is_enabled(&self) -> Result<bool, ControlError>;

    fn stop(&self) -> Result<(), ControlError>;

    fn start(&self) -> Result<(), ControlError>;

    fn enable(&self) -> Result<(), ControlError>;

    fn disable(&self) -> Result<(), ControlError>;
}

/// [`ServiceController`] that invokes `systemctl`
pub struct Systemctl {
    identity: ServiceIdentity,
    runner: Arc<dyn CommandRunner>,
    lock: Arc<dyn ControlLock>,
}

impl Systemctl {
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

    /// Run `systemctl <verb> <service> [extra]` while holding the control lock
    ///
    /// Returns the exit code and stderr; signal termination and spawn failures
    /// are errors.
    fn invoke(&self, verb: &'static str, extra: &[&str]) -> Result<(i32, String), ControlError> {
        let _guard = self.lock.acquire().map_err(ControlError::Lock)?;

        let mut args = vec![verb, self.identity.service_name.as_str()];
        args.extend_from_slice(extra);

        let output = self
            .runner
            .run(&self.identity.systemctl, &args)
            .map_err(|source| ControlError::Spawn { verb, source })?;

        let code = output.code.ok_or(ControlError::Terminated { verb })?;
        tracing::debug!("systemctl {} {} -> {}", verb, self.identity.service_name, code);
        Ok((code, output.stderr))
    }

    fn query(&self, verb: &'static str) -> Result<bool, ControlError> {
        let (code, _) = self.invoke(verb, &["--quiet"])?;
        Ok(code == 0)
    }

    fn mutate(&self, verb: &'static str) -> Result<(), ControlError> {
        match self.invoke(verb, &[])? {
            (0, _) => Ok(()),
            (code, stderr) => Err(ControlError::Exit { verb, code, stderr }),
        }
    }
}

impl ServiceController for Systemctl {
    fn is_active(&self) -> Result<bool, ControlError> {
        self.query("is-active")
    }

    fn is_enabled(&self) -> Result<bool, ControlError> {
        self.query("is-enabled")
    }

    fn stop(&self) -> Result<(), ControlError> {
        self.mutate("stop")
    }

    fn start(&self) -> Result<(), ControlError> {
        self.mutate("start")
    }

    fn enable(&self) -> Result<(), ControlError> {
        self.mutate("enable")
    }

    fn disable(&self) -> Result<(), ControlError> {
        self.mutate("disable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::lock::{LockGuard, ProcessLock};
    use std::collections::VecDeque;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records invocations and replays canned results
    #[derive(Default)]
    struct ScriptedRunner {
        calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
        results: Mutex<VecDeque<io::Result<CommandOutput>>>,
    }

    impl ScriptedRunner {
        fn push(&self, result: io::Result<CommandOutput>) {
            self.results.lock().unwrap().push_back(result);
        }

        fn calls(&self) -> Vec<(PathBuf, Vec<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, program: &Path, args: &[&str]) -> io::Result<CommandOutput> {
            self.calls.lock().unwrap().push((
                program.to_path_buf(),
                args.iter().map(|a| a.to_string()).collect(),
            ));
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(CommandOutput::with_code(0)))
        }
    }

    /// Counts acquisitions
    #[derive(Default)]
    struct CountingLock {
        inner: ProcessLock,
        acquired: AtomicUsize,
    }

    impl ControlLock for CountingLock {
        fn acquire(&self) -> io::Result<LockGuard<'_>> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            self.inner.acquire()
        }
    }

    struct BrokenLock;

    impl ControlLock for BrokenLock {
        fn acquire(&self) -> io::Result<LockGuard<'_>> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "no access"))
        }
    }

    fn systemctl(runner: Arc<ScriptedRunner>, lock: Arc<dyn ControlLock>) -> Systemctl {
        Systemctl::new(ServiceIdentity::default(), runner, lock)
    }

    #[test]
    fn test_queries_use_quiet_flag() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.push(Ok(CommandOutput::with_code(0)));
        runner.push(Ok(CommandOutput::with_code(1)));
        let ctl = systemctl(runner.clone(), Arc::new(ProcessLock::new()));

        assert!(ctl.is_active().unwrap());
        assert!(!ctl.is_enabled().unwrap());

        let calls = runner.calls();
        assert_eq!(calls[0].0, PathBuf::from("/bin/systemctl"));
        assert_eq!(
            calls[0].1,
            vec!["is-active", "fems-yalertunnel.service", "--quiet"]
        );
        assert_eq!(
            calls[1].1,
            vec!["is-enabled", "fems-yalertunnel.service", "--quiet"]
        );
    }

    #[test]
    fn test_mutations_map_exit_codes() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.push(Ok(CommandOutput::with_code(0)));
        runner.push(Ok(CommandOutput {
            code: Some(5),
            stdout: String::new(),
            stderr: "Unit not found".to_string(),
        }));
        let ctl = systemctl(runner.clone(), Arc::new(ProcessLock::new()));

        assert!(ctl.enable().is_ok());
        match ctl.start() {
            Err(ControlError::Exit { verb, code, stderr }) => {
                assert_eq!(verb, "start");
                assert_eq!(code, 5);
                assert_eq!(stderr, "Unit not found");
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let verbs: Vec<String> = runner.calls().into_iter().map(|(_, a)| a[0].clone()).collect();
        assert_eq!(verbs, vec!["enable", "start"]);
    }

    #[test]
    fn test_signal_termination_is_an_error() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.push(Ok(CommandOutput::default()));
        runner.push(Ok(CommandOutput::default()));
        let ctl = systemctl(runner, Arc::new(ProcessLock::new()));

        assert!(matches!(
            ctl.stop(),
            Err(ControlError::Terminated { verb: "stop" })
        ));
        assert!(matches!(
            ctl.is_active(),
            Err(ControlError::Terminated { verb: "is-active" })
        ));
    }

    #[test]
    fn test_spawn_failure() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.push(Err(io::Error::new(io::ErrorKind::NotFound, "no systemctl")));
        let ctl = systemctl(runner, Arc::new(ProcessLock::new()));

        assert!(matches!(
            ctl.disable(),
            Err(ControlError::Spawn {
                verb: "disable",
                ..
            })
        ));
    }

    #[test]
    fn test_every_operation_takes_the_lock() {
        let runner = Arc::new(ScriptedRunner::default());
        let lock = Arc::new(CountingLock::default());
        let ctl = systemctl(runner, lock.clone());

        ctl.is_active().unwrap();
        ctl.is_enabled().unwrap();
        ctl.stop().unwrap();
        ctl.start().unwrap();
        ctl.enable().unwrap();
        ctl.disable().unwrap();

        assert_eq!(lock.acquired.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_lock_failure_skips_command() {
        let runner = Arc::new(ScriptedRunner::default());
        let ctl = systemctl(runner.clone(), Arc::new(BrokenLock));

        assert!(matches!(ctl.enable(), Err(ControlError::Lock(_))));
        assert!(runner.calls().is_empty());
    }
}
