//! Lifecycle of the single managed VM: create, start, stop, delete and status

use crate::bootstrap::{LOGS_COMMAND, STATUS_COMMAND};
use crate::cache::AssetCache;
use crate::config::MachineConfig;
use crate::constants::{DOCKER_DAEMON_PORT, DOES_NOT_EXIST, MACHINE_NAME};
use crate::driver::{Driver, DriverFactory, DriverKind, SshCredentials};
use crate::models::{Host, PowerState};
use crate::provision::{self, AuthOptions};
use crate::retry::RetryPolicy;
use crate::store::HostStore;
use crate::{Error, MultiError, Result, ResultExt};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Attempts at bringing the host up when only transient failures occur
pub const START_HOST_POLICY: RetryPolicy = RetryPolicy::new(5, Duration::from_secs(2));

/// A request to terminate the process, produced by [`HostManager::check_running`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitRequest {
    pub code: i32,
    pub message: String,
}

/// Owns the create/start/stop/delete state machine for one named VM
pub struct HostManager<'a> {
    name: String,
    home: PathBuf,
    store: &'a dyn HostStore,
    drivers: &'a dyn DriverFactory,
    cache: &'a AssetCache,
}

impl<'a> HostManager<'a> {
    pub fn new(
        home: impl Into<PathBuf>,
        store: &'a dyn HostStore,
        drivers: &'a dyn DriverFactory,
        cache: &'a AssetCache,
    ) -> Self {
        Self {
            name: MACHINE_NAME.to_string(),
            home: home.into(),
            store,
            drivers,
            cache,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Bring the VM to Running, creating it first if there is none
    pub fn ensure_started(&self, config: &MachineConfig) -> Result<Host> {
        let (host, driver) = if self.store.exists(&self.name)? {
            self.start_existing()?
        } else {
            self.create(config)?
        };

        self.configure_auth(&host, driver.as_ref())
            .map_err(|e| Error::retriable(e.context("Error configuring auth on host")))?;
        Ok(host)
    }

    /// [`ensure_started`](Self::ensure_started) under `policy`, retrying only retriable failures
    pub fn ensure_started_with_retry(&self, config: &MachineConfig, policy: RetryPolicy) -> Result<Host> {
        policy.run_while(|| self.ensure_started(config), Error::is_retriable)
    }

    fn machine_dir(&self) -> PathBuf {
        self.home.join("machines").join(&self.name)
    }

    fn start_existing(&self) -> Result<(Host, Box<dyn Driver>)> {
        let mut host = self
            .store
            .load(&self.name)
            .context("Error loading existing host")?;
        let driver = self.drivers.driver_for(&host)?;

        let state = driver.state().context("Error getting state for host")?;
        if state.is_running() {
            tracing::debug!(machine = %self.name, "Machine already running");
            return Ok((host, driver));
        }

        tracing::info!(machine = %self.name, state = %state, "Starting stopped machine");
        driver.start().context("Error starting stopped host")?;
        host.state = PowerState::Running;
        host.ip_address = driver.ip().ok();
        host.last_started_at = Some(Utc::now());
        self.store
            .save(&host)
            .context("Error saving started host")?;
        Ok((host, driver))
    }

    fn create(&self, config: &MachineConfig) -> Result<(Host, Box<dyn Driver>)> {
        let kind: DriverKind = config.vm_driver.parse()?;
        config.validate()?;

        let iso = self.cache.cache_iso(&config.iso_url)?;
        let machine_dir = self.machine_dir();
        let mut host = Host::new(
            self.name.clone(),
            kind,
            config.clone(),
            iso.to_string_lossy(),
            SshCredentials::for_machine(&machine_dir),
        );

        tracing::info!(machine = %self.name, driver = %kind, "Creating machine");
        let driver = self.drivers.driver_for(&host)?;
        driver.create().context("Error creating host")?;

        host.state = PowerState::Running;
        host.ip_address = driver.ip().ok();
        host.last_started_at = Some(Utc::now());

        if let Err(e) = self.store.save(&host) {
            return Err(self.discard_unsaved(e, driver.as_ref()));
        }
        Ok((host, driver))
    }

    /// Undo a create whose record could not be saved: drop any partial record and
    /// the VM itself, reporting every failure alongside the save error
    fn discard_unsaved(&self, save_error: Error, driver: &dyn Driver) -> Error {
        let mut errors = MultiError::new();
        errors.push(save_error.context("Error attempting to save"));
        match self.store.exists(&self.name) {
            Ok(true) => errors.collect(
                self.store
                    .remove(&self.name)
                    .context("Error removing partially saved record"),
            ),
            Ok(false) => {}
            Err(e) => errors.push(e.context("Error checking for partially saved record")),
        }
        errors.collect(driver.remove().context("Error removing unsaved machine"));
        errors.into_error()
    }

    fn configure_auth(&self, host: &Host, driver: &dyn Driver) -> Result<()> {
        let ip = driver.ip().context("Error getting ip")?;
        let channel = driver.channel().context("Error creating new ssh client")?;
        let machine_dir = self.machine_dir();
        provision::configure_auth(
            channel.as_ref(),
            &AuthOptions {
                home: &self.home,
                machine_dir: &machine_dir,
                ip: &ip,
                provider: host.driver,
                engine: &host.machine,
            },
        )
    }

    pub fn stop(&self) -> Result<()> {
        let (mut host, driver) = self.open()?;
        driver.stop().context("Error stopping host")?;
        host.state = PowerState::Stopped;
        host.ip_address = None;
        self.store.save(&host).context("Error saving stopped host")?;
        tracing::info!(machine = %self.name, "Machine stopped");
        Ok(())
    }

    /// Remove the VM and its record; both are attempted and every failure is reported
    pub fn delete(&self) -> Result<()> {
        let (_, driver) = self.open()?;

        let mut errors = MultiError::new();
        errors.collect(driver.remove().context("Error deleting machine"));
        errors.collect(
            self.store
                .remove(&self.name)
                .context("Error removing machine record"),
        );
        errors.into_result()
    }

    /// Human-readable power state, or "Does Not Exist"
    pub fn status(&self) -> Result<String> {
        if !self.store.exists(&self.name)? {
            return Ok(DOES_NOT_EXIST.to_string());
        }
        let host = self.store.load(&self.name)?;
        let driver = self.drivers.driver_for(&host)?;
        let state = match driver.state() {
            Ok(PowerState::None) => return Ok(DOES_NOT_EXIST.to_string()),
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(machine = %self.name, error = %e, "Driver could not report state");
                return Ok(DOES_NOT_EXIST.to_string());
            }
        };
        Ok(state.to_string())
    }

    /// `Ok` if the VM is running, else how the caller should exit
    pub fn check_running(&self, exit_status: i32) -> std::result::Result<(), ExitRequest> {
        match self.status() {
            Err(e) => Err(ExitRequest {
                code: 1,
                message: format!("Error getting machine status: {e}"),
            }),
            Ok(s) if s != PowerState::Running.to_string() => Err(ExitRequest {
                code: exit_status,
                message: "minikube is not currently running so the service cannot be accessed"
                    .to_string(),
            }),
            Ok(_) => Ok(()),
        }
    }

    /// Terminate the process unless the VM is running
    pub fn ensure_running_or_exit(&self, exit_status: i32) {
        if let Err(exit) = self.check_running(exit_status) {
            eprintln!("{}", exit.message);
            std::process::exit(exit.code);
        }
    }

    /// The persisted host; a missing record is an error
    pub fn load_existing(&self) -> Result<Host> {
        if !self.store.exists(&self.name)? {
            return Err(Error::HostNotFound(self.name.clone()));
        }
        self.store.load(&self.name)
    }

    /// Driver for the existing host
    pub fn driver(&self) -> Result<Box<dyn Driver>> {
        Ok(self.open()?.1)
    }

    fn open(&self) -> Result<(Host, Box<dyn Driver>)> {
        let host = self.load_existing()?;
        let driver = self.drivers.driver_for(&host)?;
        Ok((host, driver))
    }

    pub fn ip(&self) -> Result<String> {
        self.driver()?.ip().context("Error getting IP")
    }

    /// Variables pointing a docker client at the VM's daemon
    pub fn docker_env(&self) -> Result<BTreeMap<String, String>> {
        let ip = self.ip()?;
        Ok(BTreeMap::from([
            ("DOCKER_TLS_VERIFY".to_string(), "1".to_string()),
            (
                "DOCKER_HOST".to_string(),
                format!("tcp://{ip}:{DOCKER_DAEMON_PORT}"),
            ),
            (
                "DOCKER_CERT_PATH".to_string(),
                self.home.join("certs").to_string_lossy().to_string(),
            ),
        ]))
    }

    pub fn logs(&self) -> Result<String> {
        self.driver()?
            .run_command(LOGS_COMMAND)
            .context("Error getting localkube logs")
    }

    /// `Running` or `Stopped` for the control plane inside the VM
    pub fn cluster_status(&self) -> Result<String> {
        let output = self
            .driver()?
            .run_command(STATUS_COMMAND)
            .context("Error localkube status")?;
        match output.trim() {
            s @ ("Running" | "Stopped") => Ok(s.to_string()),
            other => Err(Error::UnrecognizedOutput(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::RESTART_DOCKER_COMMAND;
    use crate::ssh::CommandChannel;
    use crate::store::MemoryHostStore;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Clone)]
    struct FakeDriver {
        state: Arc<Mutex<PowerState>>,
        calls: Arc<Mutex<Vec<String>>>,
        pushed: Arc<Mutex<Vec<Vec<u8>>>>,
        /// Remote commands still to fail before the channel starts succeeding
        command_failures: Arc<Mutex<usize>>,
        fail_create: bool,
        fail_remove: bool,
        status_output: &'static str,
    }

    impl FakeDriver {
        fn new(state: PowerState) -> Self {
            Self {
                state: Arc::new(Mutex::new(state)),
                calls: Arc::new(Mutex::new(Vec::new())),
                pushed: Arc::new(Mutex::new(Vec::new())),
                command_failures: Arc::new(Mutex::new(0)),
                fail_create: false,
                fail_remove: false,
                status_output: "Running\n",
            }
        }

        fn failing_commands(self, count: usize) -> Self {
            *self.command_failures.lock() = count;
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn count(&self, call: &str) -> usize {
            self.calls.lock().iter().filter(|c| c.as_str() == call).count()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().push(call.into());
        }
    }

    struct FakeChannel(FakeDriver);

    impl FakeChannel {
        fn check(&self) -> Result<()> {
            let mut left = self.0.command_failures.lock();
            if *left > 0 {
                *left -= 1;
                return Err(Error::Command("ssh: connect to host: timeout".into()));
            }
            Ok(())
        }
    }

    impl CommandChannel for FakeChannel {
        fn run(&self, command: &str) -> Result<String> {
            self.0.record(format!("run:{command}"));
            self.check()?;
            if command == STATUS_COMMAND {
                return Ok(self.0.status_output.to_string());
            }
            Ok(String::new())
        }

        fn run_with_input(&self, command: &str, input: &[u8]) -> Result<String> {
            self.0.record(format!("push:{command}"));
            self.check()?;
            self.0.pushed.lock().push(input.to_vec());
            Ok(String::new())
        }
    }

    impl Driver for FakeDriver {
        fn kind(&self) -> DriverKind {
            DriverKind::VirtualBox
        }

        fn create(&self) -> Result<()> {
            self.record("create");
            if self.fail_create {
                return Err(Error::Command("VBoxManage createvm: already exists".into()));
            }
            *self.state.lock() = PowerState::Running;
            Ok(())
        }

        fn ip(&self) -> Result<String> {
            Ok("192.168.99.100".to_string())
        }

        fn state(&self) -> Result<PowerState> {
            Ok(*self.state.lock())
        }

        fn start(&self) -> Result<()> {
            self.record("start");
            *self.state.lock() = PowerState::Running;
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            self.record("stop");
            *self.state.lock() = PowerState::Stopped;
            Ok(())
        }

        fn remove(&self) -> Result<()> {
            self.record("remove");
            if self.fail_remove {
                return Err(Error::Command("VBoxManage unregistervm failed".into()));
            }
            Ok(())
        }

        fn ssh_credentials(&self) -> SshCredentials {
            SshCredentials::new("docker", 22, "/tmp/id_rsa")
        }

        fn channel(&self) -> Result<Box<dyn CommandChannel>> {
            Ok(Box::new(FakeChannel(self.clone())))
        }
    }

    struct FakeFactory {
        driver: FakeDriver,
        built: Mutex<usize>,
    }

    impl FakeFactory {
        fn new(driver: FakeDriver) -> Self {
            Self {
                driver,
                built: Mutex::new(0),
            }
        }
    }

    impl DriverFactory for FakeFactory {
        fn driver_for(&self, _host: &Host) -> Result<Box<dyn Driver>> {
            *self.built.lock() += 1;
            Ok(Box::new(self.driver.clone()))
        }
    }

    #[derive(Default)]
    struct FailingStore {
        inner: MemoryHostStore,
        fail_save: bool,
        /// Save writes the record, then reports failure
        partial_save: bool,
        fail_remove: bool,
    }

    impl HostStore for FailingStore {
        fn exists(&self, name: &str) -> Result<bool> {
            self.inner.exists(name)
        }

        fn load(&self, name: &str) -> Result<Host> {
            self.inner.load(name)
        }

        fn save(&self, host: &Host) -> Result<()> {
            if self.partial_save {
                self.inner.save(host)?;
            }
            if self.fail_save || self.partial_save {
                return Err(Error::Io(std::io::Error::other("disk full")));
            }
            self.inner.save(host)
        }

        fn remove(&self, name: &str) -> Result<()> {
            if self.fail_remove {
                return Err(Error::Io(std::io::Error::other("permission denied")));
            }
            self.inner.remove(name)
        }

        fn list(&self) -> Result<Vec<String>> {
            self.inner.list()
        }
    }

    struct Env {
        temp: TempDir,
        cache: AssetCache,
        config: MachineConfig,
    }

    impl Env {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let iso = temp.path().join("minikube.iso");
            std::fs::write(&iso, b"iso").unwrap();
            let cache = AssetCache::in_home(temp.path());
            let config = MachineConfig::builder()
                .iso_url(url::Url::from_file_path(&iso).unwrap().to_string())
                .build();
            Self { temp, cache, config }
        }

        fn manager<'a>(&'a self, store: &'a dyn HostStore, drivers: &'a dyn DriverFactory) -> HostManager<'a> {
            HostManager::new(self.temp.path(), store, drivers, &self.cache)
        }
    }

    fn seeded(store: &dyn HostStore, env: &Env, state: PowerState) {
        let mut host = Host::new(
            MACHINE_NAME,
            DriverKind::VirtualBox,
            env.config.clone(),
            "/tmp/minikube.iso",
            SshCredentials::new("docker", 22, "/tmp/id_rsa"),
        );
        host.state = state;
        store.save(&host).unwrap();
    }

    #[test]
    fn test_ensure_started_creates_new_host() {
        let env = Env::new();
        let store = MemoryHostStore::new();
        let driver = FakeDriver::new(PowerState::None);
        let factory = FakeFactory::new(driver.clone());

        let host = env.manager(&store, &factory).ensure_started(&env.config).unwrap();

        assert_eq!(host.state, PowerState::Running);
        assert_eq!(host.ip_address.as_deref(), Some("192.168.99.100"));
        assert!(host.iso_path.ends_with("minikube.iso"));
        assert!(store.exists(MACHINE_NAME).unwrap());
        let calls = driver.calls();
        assert_eq!(calls[0], "create");
        assert_eq!(calls.last().unwrap(), &format!("run:{RESTART_DOCKER_COMMAND}"));
        assert!(calls.contains(&"push:sudo mkdir -p /etc/docker && sudo scp -t /etc/docker".to_string()));

        // DOCKER_CERT_PATH is populated
        let certs = env.temp.path().join("certs");
        for name in ["ca.pem", "cert.pem", "key.pem"] {
            assert!(certs.join(name).is_file(), "{name} missing");
        }
    }

    #[test]
    fn test_engine_options_reach_the_vm() {
        let env = Env::new();
        let store = MemoryHostStore::new();
        let driver = FakeDriver::new(PowerState::None);
        let factory = FakeFactory::new(driver.clone());
        let mut config = env.config.clone();
        config.insecure_registry = vec!["10.0.0.0/24".to_string()];
        config.registry_mirror = vec!["https://mirror.gcr.io".to_string()];
        config.docker_env = vec!["HTTP_PROXY=http://proxy:3128".to_string()];

        env.manager(&store, &factory).ensure_started(&config).unwrap();

        let pushed = driver.pushed.lock();
        let profile = pushed
            .iter()
            .map(|p| String::from_utf8_lossy(p).to_string())
            .find(|p| p.starts_with("C0644") && p.contains("EXTRA_ARGS"))
            .unwrap();
        assert!(profile.contains("--insecure-registry 10.0.0.0/24"));
        assert!(profile.contains("--registry-mirror https://mirror.gcr.io"));
        assert!(profile.contains("export \"HTTP_PROXY=http://proxy:3128\""));
    }

    #[test]
    fn test_create_failure_is_not_retried() {
        let env = Env::new();
        let store = MemoryHostStore::new();
        let mut driver = FakeDriver::new(PowerState::None);
        driver.fail_create = true;
        let factory = FakeFactory::new(driver.clone());

        let err = env
            .manager(&store, &factory)
            .ensure_started_with_retry(&env.config, RetryPolicy::new(5, Duration::ZERO))
            .unwrap_err();

        assert_eq!(driver.count("create"), 1);
        assert!(!err.is_retriable());
        assert!(err.to_string().starts_with("Error creating host"));
        assert!(!store.exists(MACHINE_NAME).unwrap());
    }

    #[test]
    fn test_transient_auth_failure_is_retried() {
        let env = Env::new();
        let store = MemoryHostStore::new();
        let driver = FakeDriver::new(PowerState::None).failing_commands(1);
        let factory = FakeFactory::new(driver.clone());

        env.manager(&store, &factory)
            .ensure_started_with_retry(&env.config, RetryPolicy::new(5, Duration::ZERO))
            .unwrap();

        // Second attempt finds the saved, running machine and only redoes auth
        assert_eq!(driver.count("create"), 1);
        assert_eq!(driver.count("start"), 0);
        assert_eq!(driver.count(&format!("run:{RESTART_DOCKER_COMMAND}")), 1);
    }

    #[test]
    fn test_unsupported_driver_leaves_store_untouched() {
        let env = Env::new();
        let store = MemoryHostStore::new();
        let driver = FakeDriver::new(PowerState::None);
        let factory = FakeFactory::new(driver.clone());
        let mut config = env.config.clone();
        config.vm_driver = "xhyve".to_string();

        let err = env.manager(&store, &factory).ensure_started(&config).unwrap_err();

        assert!(err.is_unsupported_driver());
        assert!(store.list().unwrap().is_empty());
        assert_eq!(*factory.built.lock(), 0);
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn test_ensure_started_is_noop_when_running() {
        let env = Env::new();
        let store = MemoryHostStore::new();
        seeded(&store, &env, PowerState::Running);
        let before = store.load(MACHINE_NAME).unwrap();
        let driver = FakeDriver::new(PowerState::Running);
        let factory = FakeFactory::new(driver.clone());

        env.manager(&store, &factory).ensure_started(&env.config).unwrap();

        assert!(!driver.calls().contains(&"start".to_string()));
        let after = store.load(MACHINE_NAME).unwrap();
        assert_eq!(after.state, before.state);
        assert_eq!(after.last_started_at, before.last_started_at);
    }

    #[test]
    fn test_ensure_started_starts_stopped_host() {
        let env = Env::new();
        let store = MemoryHostStore::new();
        seeded(&store, &env, PowerState::Stopped);
        let driver = FakeDriver::new(PowerState::Stopped);
        let factory = FakeFactory::new(driver.clone());

        env.manager(&store, &factory).ensure_started(&env.config).unwrap();

        assert_eq!(driver.calls()[0], "start");
        let host = store.load(MACHINE_NAME).unwrap();
        assert_eq!(host.state, PowerState::Running);
        assert!(host.last_started_at.is_some());
    }

    #[test]
    fn test_auth_failure_is_retriable() {
        let env = Env::new();
        let store = MemoryHostStore::new();
        seeded(&store, &env, PowerState::Running);
        let driver = FakeDriver::new(PowerState::Running).failing_commands(usize::MAX);
        let factory = FakeFactory::new(driver);

        let err = env.manager(&store, &factory).ensure_started(&env.config).unwrap_err();
        assert!(err.is_retriable());
        assert!(err.to_string().contains("Error configuring auth on host"));
    }

    #[test]
    fn test_failed_save_leaves_no_record() {
        let env = Env::new();
        let store = FailingStore {
            fail_save: true,
            ..Default::default()
        };
        let driver = FakeDriver::new(PowerState::None);
        let factory = FakeFactory::new(driver.clone());

        let err = env.manager(&store, &factory).ensure_started(&env.config).unwrap_err();
        assert!(err.to_string().starts_with("Error attempting to save"));
        assert!(!store.exists(MACHINE_NAME).unwrap());
        assert!(matches!(
            env.manager(&store, &factory).load_existing(),
            Err(Error::HostNotFound(_))
        ));
        assert_eq!(driver.calls(), vec!["create".to_string(), "remove".to_string()]);
    }

    #[test]
    fn test_failed_save_removes_partial_record() {
        let env = Env::new();
        let store = FailingStore {
            partial_save: true,
            ..Default::default()
        };
        let factory = FakeFactory::new(FakeDriver::new(PowerState::None));

        let err = env.manager(&store, &factory).ensure_started(&env.config).unwrap_err();
        assert!(err.to_string().starts_with("Error attempting to save"));
        assert!(!store.exists(MACHINE_NAME).unwrap());
    }

    #[test]
    fn test_failed_save_reports_cleanup_failures() {
        let env = Env::new();
        let store = FailingStore {
            partial_save: true,
            fail_remove: true,
            ..Default::default()
        };
        let mut driver = FakeDriver::new(PowerState::None);
        driver.fail_remove = true;
        let factory = FakeFactory::new(driver);

        let err = env.manager(&store, &factory).ensure_started(&env.config).unwrap_err();
        match &err {
            Error::Multi(m) => assert_eq!(m.len(), 3),
            other => panic!("expected aggregate, got {other:?}"),
        }
        let text = err.to_string();
        assert!(text.contains("Error attempting to save"));
        assert!(text.contains("Error removing partially saved record"));
        assert!(text.contains("Error removing unsaved machine"));
    }

    #[test]
    fn test_stop_requires_record() {
        let env = Env::new();
        let store = MemoryHostStore::new();
        let factory = FakeFactory::new(FakeDriver::new(PowerState::None));
        assert!(matches!(
            env.manager(&store, &factory).stop(),
            Err(Error::HostNotFound(_))
        ));
    }

    #[test]
    fn test_stop_persists_state() {
        let env = Env::new();
        let store = MemoryHostStore::new();
        seeded(&store, &env, PowerState::Running);
        let driver = FakeDriver::new(PowerState::Running);
        let factory = FakeFactory::new(driver.clone());

        env.manager(&store, &factory).stop().unwrap();
        assert_eq!(driver.calls(), vec!["stop".to_string()]);
        assert_eq!(store.load(MACHINE_NAME).unwrap().state, PowerState::Stopped);
    }

    #[test]
    fn test_delete_aggregates_failures() {
        let env = Env::new();
        let store = FailingStore {
            fail_remove: true,
            ..Default::default()
        };
        seeded(&store, &env, PowerState::Running);
        let mut driver = FakeDriver::new(PowerState::Running);
        driver.fail_remove = true;
        let factory = FakeFactory::new(driver.clone());

        let err = env.manager(&store, &factory).delete().unwrap_err();
        match &err {
            Error::Multi(m) => assert_eq!(m.len(), 2),
            other => panic!("expected aggregate, got {other:?}"),
        }
        let text = err.to_string();
        assert!(text.contains("Error deleting machine"));
        assert!(text.contains("Error removing machine record"));
        assert_eq!(driver.calls(), vec!["remove".to_string()]);
    }

    #[test]
    fn test_delete_removes_record_even_if_driver_fails() {
        let env = Env::new();
        let store = MemoryHostStore::new();
        seeded(&store, &env, PowerState::Stopped);
        let mut driver = FakeDriver::new(PowerState::Stopped);
        driver.fail_remove = true;
        let factory = FakeFactory::new(driver);

        let err = env.manager(&store, &factory).delete().unwrap_err();
        assert!(!matches!(err, Error::Multi(_)));
        assert!(!store.exists(MACHINE_NAME).unwrap());
    }

    #[test]
    fn test_status() {
        let env = Env::new();
        let store = MemoryHostStore::new();
        let driver = FakeDriver::new(PowerState::None);
        let factory = FakeFactory::new(driver.clone());
        let manager = env.manager(&store, &factory);

        assert_eq!(manager.status().unwrap(), "Does Not Exist");

        seeded(&store, &env, PowerState::Stopped);
        assert_eq!(manager.status().unwrap(), "Does Not Exist");

        *driver.state.lock() = PowerState::Stopped;
        assert_eq!(manager.status().unwrap(), "Stopped");
        *driver.state.lock() = PowerState::Running;
        assert_eq!(manager.status().unwrap(), "Running");
    }

    #[test]
    fn test_check_running() {
        let env = Env::new();
        let store = MemoryHostStore::new();
        let driver = FakeDriver::new(PowerState::Stopped);
        let factory = FakeFactory::new(driver.clone());
        let manager = env.manager(&store, &factory);

        let exit = manager.check_running(3).unwrap_err();
        assert_eq!(exit.code, 3);

        seeded(&store, &env, PowerState::Running);
        *driver.state.lock() = PowerState::Running;
        assert!(manager.check_running(3).is_ok());
    }

    #[test]
    fn test_docker_env() {
        let env = Env::new();
        let store = MemoryHostStore::new();
        seeded(&store, &env, PowerState::Running);
        let factory = FakeFactory::new(FakeDriver::new(PowerState::Running));

        let vars = env.manager(&store, &factory).docker_env().unwrap();
        assert_eq!(vars["DOCKER_TLS_VERIFY"], "1");
        assert_eq!(vars["DOCKER_HOST"], "tcp://192.168.99.100:2376");
        assert!(vars["DOCKER_CERT_PATH"].ends_with("certs"));
    }

    #[test]
    fn test_cluster_status_parsing() {
        let env = Env::new();
        let store = MemoryHostStore::new();
        seeded(&store, &env, PowerState::Running);

        let factory = FakeFactory::new(FakeDriver::new(PowerState::Running));
        assert_eq!(env.manager(&store, &factory).cluster_status().unwrap(), "Running");

        let mut garbled = FakeDriver::new(PowerState::Running);
        garbled.status_output = "ps: invalid option\n";
        let factory = FakeFactory::new(garbled);
        assert!(matches!(
            env.manager(&store, &factory).cluster_status(),
            Err(Error::UnrecognizedOutput(_))
        ));
    }

    #[test]
    fn test_logs_runs_tail() {
        let env = Env::new();
        let store = MemoryHostStore::new();
        seeded(&store, &env, PowerState::Running);
        let driver = FakeDriver::new(PowerState::Running);
        let factory = FakeFactory::new(driver.clone());

        env.manager(&store, &factory).logs().unwrap();
        assert_eq!(driver.calls(), vec![format!("run:{LOGS_COMMAND}")]);
    }
}
