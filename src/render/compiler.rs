//! Logical configuration to proxy configuration compiler.

use crate::model::{LbMethod, LogicalConfig, Member, Protocol};
use crate::render::codes::ExpectedCodesError;
use crate::render::dialect::{BlockKind, Dialect, DialectTables, UpstreamRules, fill};
use crate::render::health::health_lines;
use thiserror::Error;
use tracing::debug;

/// Errors that abort compilation of an instance.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("invalid health monitor expected codes: {0}")]
    ExpectedCodes(#[from] ExpectedCodesError),

    #[error("VIP port '{0}' has no fixed IP to listen on")]
    MissingVipAddress(String),

    #[error("protocol {0:?} has no mapping in the {1} dialect")]
    UnmappedProtocol(Protocol, &'static str),
}

/// Process-level settings rendered into the global section.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    pub user: String,
    pub group: String,
    pub worker_connections: u32,
    /// Path of the proxy's `mime.types`
    pub mime_types: String,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            user: "senginx".to_string(),
            group: "root".to_string(),
            worker_connections: 10240,
            mime_types: "/usr/local/senginx/conf/mime.types".to_string(),
        }
    }
}

/// Renders a [`LogicalConfig`] into configuration lines for one dialect.
///
/// Compilation is pure: the same input always produces the same lines, so a
/// rewrite of an unchanged instance is byte-identical.
#[derive(Debug, Clone)]
pub struct ConfigCompiler {
    tables: &'static DialectTables,
    options: CompilerOptions,
}

impl ConfigCompiler {
    /// Create a compiler for a built-in dialect.
    pub fn new(dialect: Dialect, options: CompilerOptions) -> Self {
        Self::with_tables(dialect.tables(), options)
    }

    /// Create a compiler over explicit mapping tables.
    pub fn with_tables(tables: &'static DialectTables, options: CompilerOptions) -> Self {
        Self { tables, options }
    }

    /// Name of the dialect this compiler emits.
    pub fn dialect_name(&self) -> &'static str {
        self.tables.name
    }

    /// Compile a logical configuration into configuration lines.
    ///
    /// A VIP without a protocol compiles to no lines at all.
    pub fn compile(&self, config: &LogicalConfig) -> Result<Vec<String>, CompileError> {
        let Some(protocol) = config.vip.protocol else {
            debug!(pool_id = %config.pool_id(), "VIP has no protocol, nothing to render");
            return Ok(Vec::new());
        };

        let block = self
            .tables
            .block_for(protocol)
            .ok_or(CompileError::UnmappedProtocol(protocol, self.tables.name))?;

        let mut lines = self.global_section();
        match block {
            BlockKind::Http => self.http_section(config, &mut lines)?,
            BlockKind::Tcp => self.tcp_section(config, &mut lines)?,
        }

        Ok(lines)
    }

    /// Compile to file contents, `None` when there is nothing to write.
    pub fn render(&self, config: &LogicalConfig) -> Result<Option<String>, CompileError> {
        let lines = self.compile(config)?;
        if lines.is_empty() {
            return Ok(None);
        }
        let mut text = lines.join("\n");
        text.push('\n');
        Ok(Some(text))
    }

    fn global_section(&self) -> Vec<String> {
        vec![
            format!("user {} {};", self.options.user, self.options.group),
            "worker_processes 1;".to_string(),
            "error_log error.log;".to_string(),
            "pid nginx.pid;".to_string(),
            "events {".to_string(),
            format!("worker_connections {};", self.options.worker_connections),
            "}".to_string(),
            String::new(),
        ]
    }

    fn http_section(&self, config: &LogicalConfig, lines: &mut Vec<String>) -> Result<(), CompileError> {
        lines.push("http {".to_string());
        lines.push(format!("include {};", self.options.mime_types));
        lines.push("default_type application/octet-stream;".to_string());
        lines.push("access_log http.access.log;".to_string());
        lines.push("sendfile on;".to_string());
        lines.push("keepalive_timeout 65;".to_string());
        lines.push(String::new());

        if has_eligible_members(config) {
            self.upstream(config, BlockKind::Http, lines)?;

            let scheme = self
                .tables
                .scheme_for(config.pool.protocol)
                .ok_or(CompileError::UnmappedProtocol(config.pool.protocol, self.tables.name))?;

            lines.push("server {".to_string());
            lines.push(listen_line(config)?);
            lines.push("location / {".to_string());
            lines.push(format!("proxy_pass {}://{};", scheme, config.pool_id()));
            lines.push("}".to_string());
            if !config.health_monitors.is_empty() {
                lines.extend(self.tables.status_location.iter().map(|l| l.to_string()));
            }
            lines.push("}".to_string());
            lines.push(String::new());
        }

        lines.push("}".to_string());
        Ok(())
    }

    fn tcp_section(&self, config: &LogicalConfig, lines: &mut Vec<String>) -> Result<(), CompileError> {
        lines.push("tcp {".to_string());
        lines.push("access_log tcp.access.log;".to_string());
        lines.push(String::new());

        if has_eligible_members(config) {
            self.upstream(config, BlockKind::Tcp, lines)?;

            lines.push("server {".to_string());
            lines.push(listen_line(config)?);
            lines.push(format!("proxy_pass {};", config.pool_id()));
            lines.push("}".to_string());
            lines.push(String::new());
        }

        lines.push("}".to_string());
        Ok(())
    }

    fn upstream(
        &self,
        config: &LogicalConfig,
        block: BlockKind,
        lines: &mut Vec<String>,
    ) -> Result<(), CompileError> {
        let rules = self.tables.upstream_rules(block);
        let method = config.pool.lb_method;

        lines.push(format!("upstream {} {{", config.pool_id()));

        if rules.balanced.contains(&method) {
            if let Some(directive) = self.tables.balance_for(method) {
                lines.push(format!("{};", directive));
            }
        }

        if rules.persistence {
            lines.extend(self.persistence_lines(config));
        }

        for member in config.eligible_members() {
            lines.push(server_line(member, rules, method));
        }

        if let Some(monitor) = config.active_monitor() {
            lines.extend(health_lines(self.tables, monitor)?);
        }

        lines.push("}".to_string());
        lines.push(String::new());
        Ok(())
    }

    fn persistence_lines(&self, config: &LogicalConfig) -> Vec<String> {
        let Some(persistence) = &config.vip.session_persistence else {
            return Vec::new();
        };

        let templates = self.tables.persistence_for(persistence.persistence_type);
        if templates.is_empty() {
            debug!(
                pool_id = %config.pool_id(),
                persistence = ?persistence.persistence_type,
                dialect = self.tables.name,
                "session persistence not supported by dialect, skipping"
            );
            return Vec::new();
        }

        let cookie = persistence.cookie_name.as_deref().unwrap_or_default();
        if cookie.is_empty() && templates.iter().any(|t| t.contains("{cookie}")) {
            debug!(pool_id = %config.pool_id(), "app cookie persistence without cookie name, skipping");
            return Vec::new();
        }

        templates.iter().map(|t| fill(t, &[("cookie", cookie)])).collect()
    }
}

fn has_eligible_members(config: &LogicalConfig) -> bool {
    config.eligible_members().next().is_some()
}

fn server_line(member: &Member, rules: &UpstreamRules, method: LbMethod) -> String {
    if rules.weighted.contains(&method) {
        format!(
            "server {}:{} weight={};",
            member.address, member.protocol_port, member.weight
        )
    } else {
        format!("server {}:{};", member.address, member.protocol_port)
    }
}

fn listen_line(config: &LogicalConfig) -> Result<String, CompileError> {
    let ip = config
        .vip
        .port
        .first_ip()
        .ok_or_else(|| CompileError::MissingVipAddress(config.vip.port.id.clone()))?;

    if ip.contains(':') {
        Ok(format!("listen [{}]:{};", ip, config.vip.protocol_port))
    } else {
        Ok(format!("listen {}:{};", ip, config.vip.protocol_port))
    }
}
