//! Integration tests for nslb.
//!
//! These drive the public API end to end: configuration files, device
//! descriptions, rendering, and instance lifecycle against a scripted
//! command executor on a temporary state directory.

use nslb::agent::{AgentManager, DeviceSource, DirectorySource};
use nslb::config::load_config;
use nslb::model::LogicalConfig;
use nslb::namespace::{CommandExecutor, ExecError, LoggingPlugCallback};
use nslb::render::{CompilerOptions, ConfigCompiler, Dialect};
use nslb::supervisor::{DeviceDriver, InstanceSupervisor};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tempfile::{NamedTempFile, TempDir};

const HTTP_DEVICE: &str = r#"
vip:
  protocol: HTTP
  protocol_port: 80
  port:
    id: port-1
    network_id: net-1
    mac_address: "fa:16:3e:00:00:01"
    fixed_ips:
      - ip_address: 10.0.0.5
        subnet:
          cidr: 10.0.0.0/24
          gateway_ip: 10.0.0.1
pool:
  id: pool-1
  protocol: HTTP
  lb_method: ROUND_ROBIN
members:
  - address: 10.0.1.10
    protocol_port: 8080
    weight: 2
  - address: 10.0.1.11
    protocol_port: 8080
    status: PENDING_CREATE
healthmonitors:
  - type: HTTP
    delay: 5
    timeout: 3
    max_retries: 2
    url_path: /health
    expected_codes: "200-202"
"#;

/// Executor that records commands and treats the namespace as present once
/// `ip netns add` has run.
#[derive(Default)]
struct ScriptedExecutor {
    calls: Mutex<Vec<String>>,
    namespaces: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn called_prefix(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }
}

impl CommandExecutor for ScriptedExecutor {
    fn execute(&self, cmd: &[String], _check_exit_code: bool) -> Result<String, ExecError> {
        let line = cmd.join(" ");
        self.calls.lock().unwrap().push(line.clone());

        let args: Vec<&str> = cmd.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["ip", "netns", "list"] => Ok(self.namespaces.lock().unwrap().join("\n")),
            ["ip", "netns", "add", ns] => {
                self.namespaces.lock().unwrap().push(ns.to_string());
                Ok(String::new())
            }
            ["ip", "netns", "delete", ns] => {
                self.namespaces.lock().unwrap().retain(|n| n.as_str() != *ns);
                Ok(String::new())
            }
            ["ip", "netns", "exec", _, "ip", "link", "show", "dev", _] => Err(ExecError::Failed {
                command: line,
                code: Some(1),
                stderr: "Device does not exist".to_string(),
            }),
            ["ip", "netns", "exec", _, "ip", "-o", "link", "list"] => {
                Ok("1: lo: <LOOPBACK,UP> mtu 65536\n".to_string())
            }
            _ => Ok(String::new()),
        }
    }
}

fn http_device() -> LogicalConfig {
    serde_yaml::from_str(HTTP_DEVICE).unwrap()
}

fn agent_config(state: &TempDir, devices: &TempDir) -> NamedTempFile {
    let yaml = format!(
        r#"
global:
  log_level: debug
  log_format: pretty
agent:
  state_path: {}
  devices_path: {}
  periodic_interval: 5s
  root_helper: ""
proxy:
  binary: /opt/senginx/sbin/nginx
  prefix: /opt/senginx
interface:
  bridge: br-lb
"#,
        state.path().display(),
        devices.path().display()
    );

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[test]
fn test_render_http_device() {
    let compiler = ConfigCompiler::new(Dialect::Senginx, CompilerOptions::default());
    let text = compiler.render(&http_device()).unwrap().unwrap();

    let expected = r#"user senginx root;
worker_processes 1;
error_log error.log;
pid nginx.pid;
events {
worker_connections 10240;
}

http {
include /usr/local/senginx/conf/mime.types;
default_type application/octet-stream;
access_log http.access.log;
sendfile on;
keepalive_timeout 65;

upstream pool-1 {
server 10.0.1.10:8080 weight=2;
check interval=5000 fall=2 timeout=3000 type=http;
check_http_send "GET /health HTTP/1.0\r\n\r\n";
check_http_expect_alive http_2xx;
}

server {
listen 10.0.0.5:80;
location / {
proxy_pass http://pool-1;
}
location /senginx-check-http-status {
check_status csv;
}
}

}
"#;
    assert_eq!(text, expected);
}

#[test]
fn test_render_is_deterministic() {
    let compiler = ConfigCompiler::new(Dialect::Senginx, CompilerOptions::default());
    let device = http_device();
    assert_eq!(compiler.render(&device).unwrap(), compiler.render(&device).unwrap());
}

#[test]
fn test_render_legacy_dialect() {
    let compiler = ConfigCompiler::new(Dialect::Legacy, CompilerOptions::default());
    let lines = compiler.compile(&http_device()).unwrap();

    assert!(lines.contains(&"http-check expect rstatus 200|201|202;".to_string()));
    assert!(lines.contains(&"option httpchk GET /health;".to_string()));
    assert!(!lines.iter().any(|l| l.contains("senginx-check-http-status")));
}

#[test]
fn test_config_drives_supervisor_lifecycle() {
    let state = TempDir::new().unwrap();
    let devices = TempDir::new().unwrap();
    let config = load_config(agent_config(&state, &devices).path()).unwrap();

    let exec = Arc::new(ScriptedExecutor::default());
    let supervisor =
        InstanceSupervisor::from_config(&config, exec.clone(), Arc::new(LoggingPlugCallback));
    let device = http_device();

    assert!(!supervisor.exists("pool-1"));
    supervisor.create(&device).unwrap();

    let conf = state.path().join("pool-1").join("conf");
    let text = std::fs::read_to_string(&conf).unwrap();
    assert!(text.contains("include /opt/senginx/conf/mime.types;"));

    assert!(exec.called_prefix("ovs-vsctl -- --if-exists del-port tapport-1 -- add-port br-lb tapport-1"));
    assert!(exec.called_prefix("ip netns exec qlbaas-pool-1 ip addr add 10.0.0.5/24 dev tapport-1"));
    assert!(exec.called_prefix("ip netns exec qlbaas-pool-1 route add default gw 10.0.0.1"));
    assert!(exec.called_prefix(&format!(
        "ip netns exec qlbaas-pool-1 /opt/senginx/sbin/nginx -c {}",
        conf.display()
    )));

    // The proxy writes its PID file once running
    std::fs::write(state.path().join("pool-1").join("nginx.pid"), "321\n").unwrap();
    assert!(supervisor.exists("pool-1"));

    supervisor.update(&device).unwrap();
    assert!(exec.calls().last().unwrap().ends_with("-s reload"));

    let report = supervisor.destroy("pool-1").unwrap();
    assert_eq!(report.signalled, vec![321]);
    assert!(report.unplugged);
    assert!(report.namespace_removed);
    assert!(exec.called_prefix("ovs-vsctl --if-exists del-port br-lb tapport-1"));
    assert!(exec.called_prefix(&format!("rm -rf {}", state.path().join("pool-1").display())));
    assert!(!supervisor.exists("pool-1"));
}

#[test]
fn test_agent_syncs_device_directory() {
    let state = TempDir::new().unwrap();
    let devices = TempDir::new().unwrap();
    let config = load_config(agent_config(&state, &devices).path()).unwrap();

    let exec = Arc::new(ScriptedExecutor::default());
    let supervisor = Arc::new(InstanceSupervisor::from_config(
        &config,
        exec.clone(),
        Arc::new(LoggingPlugCallback),
    ));
    let source = Arc::new(DirectorySource::new(&config.agent.devices_path));
    let manager = AgentManager::new(supervisor, source.clone());

    std::fs::write(devices.path().join("pool-1.yaml"), HTTP_DEVICE).unwrap();
    assert_eq!(source.ready_devices().unwrap(), vec!["pool-1"]);

    manager.sync_state();
    assert_eq!(manager.known_pool_ids(), vec!["pool-1"]);
    assert!(!manager.needs_resync());
    assert!(state.path().join("pool-1").join("conf").is_file());

    std::fs::remove_file(devices.path().join("pool-1.yaml")).unwrap();
    manager.sync_state();
    assert!(manager.known_pool_ids().is_empty());
    assert!(exec.called_prefix("ip netns delete qlbaas-pool-1"));
}

#[test]
fn test_agent_flags_broken_device_for_resync() {
    let state = TempDir::new().unwrap();
    let devices = TempDir::new().unwrap();
    let config = load_config(agent_config(&state, &devices).path()).unwrap();

    let exec = Arc::new(ScriptedExecutor::default());
    let supervisor = Arc::new(InstanceSupervisor::from_config(
        &config,
        exec,
        Arc::new(LoggingPlugCallback),
    ));
    let manager = AgentManager::new(
        supervisor,
        Arc::new(DirectorySource::new(devices.path())),
    );

    std::fs::write(devices.path().join("pool-2.yaml"), "vip: [").unwrap();
    manager.sync_state();

    assert!(manager.needs_resync());
    assert!(manager.known_pool_ids().is_empty());
}
