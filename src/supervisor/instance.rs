//! Namespace-scoped proxy instance supervisor.

use crate::config::{Config, InterfaceDriverKind};
use crate::model::LogicalConfig;
use crate::namespace::{
    command, replace_file, CommandExecutor, InterfaceDriver, IpNetns, NamespaceBinding,
    OvsInterfaceDriver, PlugCallback,
};
use crate::render::ConfigCompiler;
use crate::supervisor::{
    DestroyReport, DeviceDriver, PoolStats, SignalFailure, StatePaths, SupervisorError,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns the lifecycle of one proxy process per pool, each inside its own
/// network namespace.
pub struct InstanceSupervisor {
    paths: StatePaths,
    compiler: ConfigCompiler,
    binding: NamespaceBinding,
    ip: IpNetns,
    executor: Arc<dyn CommandExecutor>,
    proxy_binary: PathBuf,
    namespace_prefix: String,
    /// Pool id to the VIP port plugged for it
    pool_to_port_id: Mutex<HashMap<String, String>>,
}

impl InstanceSupervisor {
    /// Build a supervisor and its collaborators from agent configuration.
    pub fn from_config(
        config: &Config,
        executor: Arc<dyn CommandExecutor>,
        callback: Arc<dyn PlugCallback>,
    ) -> Self {
        let ip = IpNetns::new(Arc::clone(&executor));
        let driver: Arc<dyn InterfaceDriver> = match config.interface.driver {
            InterfaceDriverKind::Ovs => Arc::new(OvsInterfaceDriver::new(
                Arc::clone(&executor),
                config.interface.bridge.clone(),
            )),
        };

        Self {
            paths: StatePaths::new(&config.agent.state_path),
            compiler: ConfigCompiler::new(config.proxy.dialect, config.proxy.compiler_options()),
            binding: NamespaceBinding::new(ip.clone(), driver, callback),
            ip,
            executor,
            proxy_binary: config.proxy.binary.clone(),
            namespace_prefix: config.proxy.namespace_prefix.clone(),
            pool_to_port_id: Mutex::new(HashMap::new()),
        }
    }

    /// Namespace that hosts the instance for `pool_id`.
    pub fn namespace_name(&self, pool_id: &str) -> String {
        format!("{}{}", self.namespace_prefix, pool_id)
    }

    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    /// VIP port recorded for a pool, if any.
    pub fn bound_port(&self, pool_id: &str) -> Option<String> {
        self.pool_to_port_id.lock().get(pool_id).cloned()
    }

    /// Render, write and hand the configuration to the proxy.
    fn spawn(&self, config: &LogicalConfig, extra_args: &[&str]) -> Result<(), SupervisorError> {
        let pool_id = config.pool_id();
        let namespace = self.namespace_name(pool_id);

        let rendered = self
            .compiler
            .render(config)
            .map_err(|source| SupervisorError::Compile {
                pool_id: pool_id.to_string(),
                source,
            })?;

        match rendered {
            Some(text) => {
                self.paths.ensure_instance_dir(pool_id)?;
                let conf_path = self.paths.config_path(pool_id)?;
                replace_file(&conf_path, &text).map_err(|source| SupervisorError::Io {
                    path: conf_path.clone(),
                    source,
                })?;

                let conf = conf_path.to_string_lossy();
                let base = self.paths.base_path(pool_id)?;
                let binary = self.proxy_binary.to_string_lossy();
                let mut cmd = command(&[&*binary, "-c", &*conf, "-p", base.as_str()]);
                cmd.extend(command(extra_args));

                info!(pool_id, namespace = %namespace, reload = !extra_args.is_empty(), "starting proxy");
                self.ip.execute_in(&namespace, &cmd, true)?;
            }
            None => {
                debug!(pool_id, "empty configuration, proxy not started");
            }
        }

        self.record_port(pool_id, &config.vip.port.id)
    }

    /// Remember the VIP port for `pool_id`, on disk when the instance
    /// directory exists.
    fn record_port(&self, pool_id: &str, port_id: &str) -> Result<(), SupervisorError> {
        self.pool_to_port_id
            .lock()
            .insert(pool_id.to_string(), port_id.to_string());

        if self.paths.instance_dir(pool_id)?.is_dir() {
            let port_path = self.paths.port_path(pool_id)?;
            replace_file(&port_path, &format!("{}\n", port_id))
                .map_err(|source| SupervisorError::Io { path: port_path, source })?;
        }
        Ok(())
    }

    /// Forget the VIP port for `pool_id`, falling back to the copy on disk
    /// left by an earlier process.
    fn take_port(&self, pool_id: &str) -> Result<Option<String>, SupervisorError> {
        if let Some(port_id) = self.pool_to_port_id.lock().remove(pool_id) {
            return Ok(Some(port_id));
        }

        let port_path = self.paths.port_path(pool_id)?;
        match std::fs::read_to_string(&port_path) {
            Ok(contents) => {
                let port_id = contents.trim();
                Ok((!port_id.is_empty()).then(|| port_id.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => {
                warn!(path = %port_path.display(), error = %e, "unable to read bound port");
                Ok(None)
            }
        }
    }

    /// Send `SIGQUIT` to every PID in the instance's PID file.
    fn kill_pids(&self, pid_path: &Path, report: &mut DestroyReport) {
        let contents = match std::fs::read_to_string(pid_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            Err(e) => {
                warn!(path = %pid_path.display(), error = %e, "unable to read PID file");
                return;
            }
        };

        for entry in pid_entries(&contents) {
            let pid = match parse_pid(entry) {
                Some(pid) => pid,
                None => {
                    warn!(pid = entry, "ignoring invalid PID");
                    report.failed.push(SignalFailure {
                        pid: entry.to_string(),
                        reason: "not a valid process id".to_string(),
                    });
                    continue;
                }
            };

            let pid_arg = pid.to_string();
            match self
                .executor
                .execute(&command(&["kill", "-QUIT", pid_arg.as_str()]), true)
            {
                Ok(_) => report.signalled.push(pid),
                Err(e) => {
                    warn!(pid, error = %e, "unable to kill proxy master process");
                    report.failed.push(SignalFailure {
                        pid: pid_arg,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// Whether the namespace and PID file exist and every PID answers `kill -0`.
    fn check_alive(&self, pool_id: &str) -> Result<bool, SupervisorError> {
        let namespace = self.namespace_name(pool_id);
        let pid_path = self.paths.pid_path(pool_id)?;

        if !self.ip.namespace_exists(&namespace)? {
            return Ok(false);
        }

        let contents = match std::fs::read_to_string(&pid_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(source) => {
                return Err(SupervisorError::Io {
                    path: pid_path,
                    source,
                });
            }
        };

        for entry in pid_entries(&contents) {
            let Some(pid) = parse_pid(entry) else {
                warn!(pool_id, pid = entry, "PID file holds an invalid process id");
                return Ok(false);
            };
            if let Err(e) = self
                .executor
                .execute(&command(&["kill", "-0", pid.to_string().as_str()]), true)
            {
                warn!(pool_id, pid, error = %e, "proxy master process is not running");
                return Ok(false);
            }
        }

        Ok(true)
    }
}

impl DeviceDriver for InstanceSupervisor {
    fn create(&self, config: &LogicalConfig) -> Result<(), SupervisorError> {
        let pool_id = config.pool_id();
        crate::supervisor::validate_pool_id(pool_id)?;

        let namespace = self.namespace_name(pool_id);
        self.binding.plug(&namespace, &config.vip.port, true)?;
        self.paths.ensure_instance_dir(pool_id)?;
        self.spawn(config, &[])
    }

    fn update(&self, config: &LogicalConfig) -> Result<(), SupervisorError> {
        crate::supervisor::validate_pool_id(config.pool_id())?;
        self.spawn(config, &["-s", "reload"])
    }

    fn destroy(&self, pool_id: &str) -> Result<DestroyReport, SupervisorError> {
        let namespace = self.namespace_name(pool_id);
        let instance_dir = self.paths.instance_dir(pool_id)?;
        let pid_path = self.paths.pid_path(pool_id)?;
        let mut report = DestroyReport::default();

        self.kill_pids(&pid_path, &mut report);

        if let Some(port_id) = self.take_port(pool_id)? {
            match self.binding.unplug(&namespace, &port_id) {
                Ok(()) => report.unplugged = true,
                Err(e) => warn!(pool_id, port_id = %port_id, error = %e, "unable to unplug VIP port"),
            }
        }

        match self.ip.garbage_collect_namespace(&namespace) {
            Ok(removed) => report.namespace_removed = removed,
            Err(e) => warn!(namespace = %namespace, error = %e, "unable to clean up namespace"),
        }

        if instance_dir.is_dir() {
            let dir = instance_dir.to_string_lossy();
            self.executor.execute(&command(&["rm", "-rf", &*dir]), true)?;
        }

        info!(
            pool_id,
            signalled = report.signalled.len(),
            failed = report.failed.len(),
            "instance destroyed"
        );
        Ok(report)
    }

    fn exists(&self, pool_id: &str) -> bool {
        match self.check_alive(pool_id) {
            Ok(alive) => alive,
            Err(e) => {
                warn!(pool_id, error = %e, "unable to determine instance state");
                false
            }
        }
    }

    fn get_stats(&self, pool_id: &str) -> Result<PoolStats, SupervisorError> {
        crate::supervisor::validate_pool_id(pool_id)?;
        Ok(PoolStats::new())
    }

    fn remove_orphans(&self, _known_pool_ids: &[String]) -> Result<(), SupervisorError> {
        Err(SupervisorError::Unsupported("remove_orphans"))
    }
}

/// Non-blank lines of a PID file, trimmed.
fn pid_entries(contents: &str) -> impl Iterator<Item = &str> {
    contents.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// A positive process id. Zero would signal the whole process group.
fn parse_pid(entry: &str) -> Option<u32> {
    entry.parse::<u32>().ok().filter(|pid| *pid > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::testing::RecordingExecutor;
    use crate::namespace::LoggingPlugCallback;
    use tempfile::TempDir;

    fn device(pool_id: &str) -> LogicalConfig {
        let yaml = format!(
            r#"
vip:
  protocol: HTTP
  protocol_port: 80
  port:
    id: port-1
    network_id: net-1
    mac_address: "fa:16:3e:00:00:01"
    fixed_ips:
      - ip_address: 10.0.0.5
        subnet: {{ cidr: 10.0.0.0/24 }}
pool:
  id: {}
  protocol: HTTP
members:
  - address: 10.0.1.10
    protocol_port: 8080
"#,
            pool_id
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn supervisor(root: &TempDir, exec: Arc<RecordingExecutor>) -> InstanceSupervisor {
        let mut config = Config::default();
        config.agent.state_path = root.path().to_path_buf();
        InstanceSupervisor::from_config(&config, exec, Arc::new(LoggingPlugCallback))
    }

    #[test]
    fn test_create_writes_config_and_spawns() {
        let root = TempDir::new().unwrap();
        let exec = RecordingExecutor::new();
        let sup = supervisor(&root, exec.clone());

        sup.create(&device("pool-1")).unwrap();

        let conf = root.path().join("pool-1").join("conf");
        let text = std::fs::read_to_string(&conf).unwrap();
        assert!(text.contains("upstream pool-1 {"));

        let spawn = format!(
            "ip netns exec qlbaas-pool-1 /usr/local/senginx/sbin/nginx -c {} -p {}/",
            conf.display(),
            root.path().join("pool-1").display()
        );
        assert!(exec.called(&spawn), "calls: {:?}", exec.calls());
        assert!(exec.called_prefix("ip netns add qlbaas-pool-1"));
        assert_eq!(sup.bound_port("pool-1").as_deref(), Some("port-1"));
    }

    #[test]
    fn test_update_reloads() {
        let root = TempDir::new().unwrap();
        let exec = RecordingExecutor::new();
        let sup = supervisor(&root, exec.clone());

        sup.update(&device("pool-1")).unwrap();
        assert!(exec
            .calls()
            .iter()
            .any(|c| c.starts_with("ip netns exec qlbaas-pool-1") && c.ends_with("-s reload")));
        assert!(!exec.called_prefix("ovs-vsctl"));
    }

    #[test]
    fn test_degenerate_device_writes_nothing() {
        let root = TempDir::new().unwrap();
        let exec = RecordingExecutor::new();
        let sup = supervisor(&root, exec.clone());
        let mut config = device("pool-1");
        config.vip.protocol = None;

        sup.update(&config).unwrap();
        assert!(!root.path().join("pool-1").exists());
        assert!(exec.calls().is_empty());
        assert_eq!(sup.bound_port("pool-1").as_deref(), Some("port-1"));
    }

    #[test]
    fn test_bad_expected_codes_abort_before_write() {
        let root = TempDir::new().unwrap();
        let exec = RecordingExecutor::new();
        let sup = supervisor(&root, exec.clone());
        let mut config = device("pool-1");
        config.health_monitors = serde_yaml::from_str(
            "- { type: HTTP, delay: 5, timeout: 2, max_retries: 3, expected_codes: '2x0' }",
        )
        .unwrap();

        let err = sup.update(&config).unwrap_err();
        assert!(matches!(err, SupervisorError::Compile { ref pool_id, .. } if pool_id == "pool-1"));
        assert!(!root.path().join("pool-1").join("conf").exists());
        assert!(exec.calls().is_empty());
    }

    #[test]
    fn test_destroy_kills_unplugs_and_cleans_up() {
        let root = TempDir::new().unwrap();
        let exec = RecordingExecutor::new();
        exec.reply("ip netns list", "qlbaas-pool-1\n");
        exec.reply("ip netns exec qlbaas-pool-1 ip -o link list", "1: lo: <LOOPBACK>\n");
        exec.fail("kill -QUIT 200");
        let sup = supervisor(&root, exec.clone());

        sup.create(&device("pool-1")).unwrap();
        std::fs::write(root.path().join("pool-1").join("nginx.pid"), "100\n200\nabc\n\n").unwrap();

        let report = sup.destroy("pool-1").unwrap();
        assert_eq!(report.signalled, vec![100]);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].pid, "200");
        assert_eq!(report.failed[1].pid, "abc");
        assert!(report.unplugged);
        assert!(report.namespace_removed);
        assert!(!report.is_clean());

        assert!(exec.called("kill -QUIT 100"));
        assert!(exec.called("ovs-vsctl --if-exists del-port br-int tapport-1"));
        assert!(exec.called("ip netns delete qlbaas-pool-1"));
        let rm = format!("rm -rf {}", root.path().join("pool-1").display());
        assert!(exec.called(&rm));
        assert!(sup.bound_port("pool-1").is_none());
    }

    #[test]
    fn test_destroy_after_restart_unplugs_recorded_port() {
        let root = TempDir::new().unwrap();
        let exec = RecordingExecutor::new();
        exec.reply("ip netns list", "qlbaas-pool-1\n");
        exec.reply("ip netns exec qlbaas-pool-1 ip -o link list", "1: lo: <LOOPBACK>\n");

        supervisor(&root, exec.clone()).create(&device("pool-1")).unwrap();
        let port_file = root.path().join("pool-1").join("port");
        assert_eq!(std::fs::read_to_string(&port_file).unwrap(), "port-1\n");

        let restarted = supervisor(&root, exec.clone());
        assert!(restarted.bound_port("pool-1").is_none());

        let report = restarted.destroy("pool-1").unwrap();
        assert!(report.unplugged);
        assert!(report.namespace_removed);
        assert!(exec.called("ovs-vsctl --if-exists del-port br-int tapport-1"));
    }

    #[test]
    fn test_create_records_port_for_empty_device() {
        let root = TempDir::new().unwrap();
        let exec = RecordingExecutor::new();
        let sup = supervisor(&root, exec.clone());
        let mut config = device("pool-1");
        config.vip.protocol = None;

        sup.create(&config).unwrap();
        assert!(!root.path().join("pool-1").join("conf").exists());
        assert_eq!(
            std::fs::read_to_string(root.path().join("pool-1").join("port")).unwrap(),
            "port-1\n"
        );
    }

    #[test]
    fn test_blank_vip_protocol_starts_nothing() {
        let root = TempDir::new().unwrap();
        let exec = RecordingExecutor::new();
        let sup = supervisor(&root, exec.clone());
        let yaml = serde_yaml::to_string(&device("pool-1"))
            .unwrap()
            .replacen("protocol: HTTP", "protocol: ''", 1);
        let config: LogicalConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.vip.protocol.is_none());

        sup.update(&config).unwrap();
        assert!(!root.path().join("pool-1").exists());
        assert!(exec.calls().is_empty());
    }

    #[test]
    fn test_destroy_unknown_pool() {
        let root = TempDir::new().unwrap();
        let exec = RecordingExecutor::new();
        let sup = supervisor(&root, exec.clone());

        let report = sup.destroy("missing").unwrap();
        assert_eq!(report, DestroyReport::default());
        assert!(!exec.called_prefix("kill"));
        assert!(!exec.called_prefix("ovs-vsctl"));
        assert!(!exec.called_prefix("rm"));
    }

    #[test]
    fn test_exists() {
        let root = TempDir::new().unwrap();
        let exec = RecordingExecutor::new();
        let sup = supervisor(&root, exec.clone());

        // Namespace missing
        assert!(!sup.exists("pool-1"));

        exec.reply("ip netns list", "qlbaas-pool-1\n");
        // PID file missing
        assert!(!sup.exists("pool-1"));

        let dir = sup.paths().ensure_instance_dir("pool-1").unwrap();
        std::fs::write(dir.join("nginx.pid"), "4242\n").unwrap();
        assert!(sup.exists("pool-1"));
        assert!(exec.called("kill -0 4242"));

        exec.fail("kill -0 4242");
        assert!(!sup.exists("pool-1"));
    }

    #[test]
    fn test_exists_when_namespace_listing_fails() {
        let root = TempDir::new().unwrap();
        let exec = RecordingExecutor::new();
        exec.fail("ip netns list");
        let sup = supervisor(&root, exec.clone());

        let dir = sup.paths().ensure_instance_dir("pool-1").unwrap();
        std::fs::write(dir.join("nginx.pid"), "4242\n").unwrap();
        assert!(!sup.exists("pool-1"));
        assert!(exec.called("ip netns list"));
        assert!(!exec.called_prefix("kill"));
    }

    #[test]
    fn test_exists_rejects_invalid_pid() {
        let root = TempDir::new().unwrap();
        let exec = RecordingExecutor::new();
        exec.reply("ip netns list", "qlbaas-pool-1\n");
        let sup = supervisor(&root, exec.clone());

        let dir = sup.paths().ensure_instance_dir("pool-1").unwrap();
        std::fs::write(dir.join("nginx.pid"), "0\n").unwrap();
        assert!(!sup.exists("pool-1"));
        assert!(!exec.called_prefix("kill"));
    }

    #[test]
    fn test_stats_and_orphans() {
        let root = TempDir::new().unwrap();
        let sup = supervisor(&root, RecordingExecutor::new());

        assert!(sup.get_stats("pool-1").unwrap().is_empty());
        assert!(matches!(
            sup.remove_orphans(&["pool-1".to_string()]),
            Err(SupervisorError::Unsupported(_))
        ));
    }

    #[test]
    fn test_invalid_pool_id() {
        let root = TempDir::new().unwrap();
        let exec = RecordingExecutor::new();
        let sup = supervisor(&root, exec.clone());

        assert!(matches!(
            sup.create(&device("../etc")),
            Err(SupervisorError::InvalidPoolId(_))
        ));
        assert!(exec.calls().is_empty());
        assert!(!sup.exists("../etc"));
    }
}
