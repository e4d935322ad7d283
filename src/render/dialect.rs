//! Dialect mapping tables.
//!
//! Everything that differs between the configuration dialects lives here as
//! immutable data. The compiler walks the same structure for every dialect and
//! only consults these tables for directive text.

use crate::model::{LbMethod, MonitorType, PersistenceType, Protocol};
use crate::render::codes::CodePolicy;
use serde::{Deserialize, Serialize};

/// Configuration dialect understood by the target proxy.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// SEnginx with upstream health checks and cookie persistence
    #[default]
    Senginx,
    /// Older directive set with stick tables and literal status matching
    Legacy,
}

impl Dialect {
    /// Mapping tables for this dialect.
    pub fn tables(&self) -> &'static DialectTables {
        match self {
            Dialect::Senginx => &SENGINX,
            Dialect::Legacy => &LEGACY,
        }
    }
}

/// Top-level protocol block a listener is rendered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Http,
    Tcp,
}

/// Per-block rules for the upstream section.
#[derive(Debug)]
pub struct UpstreamRules {
    /// Methods that get an explicit balance directive
    pub balanced: &'static [LbMethod],
    /// Methods whose server lines carry `weight=`
    pub weighted: &'static [LbMethod],
    /// Whether session persistence is rendered in this block
    pub persistence: bool,
}

/// Directive tables for one dialect.
#[derive(Debug)]
pub struct DialectTables {
    pub name: &'static str,
    /// VIP protocol to protocol block
    pub blocks: &'static [(Protocol, BlockKind)],
    /// Pool protocol to `proxy_pass` scheme in HTTP blocks
    pub schemes: &'static [(Protocol, &'static str)],
    /// Balancing method to directive
    pub balance: &'static [(LbMethod, &'static str)],
    pub http_upstream: UpstreamRules,
    pub tcp_upstream: UpstreamRules,
    /// Persistence type to directive templates; `{cookie}` is the app cookie name
    pub persistence: &'static [(PersistenceType, &'static [&'static str])],
    /// Monitor type to health-check directive templates
    pub health: &'static [(MonitorType, &'static [&'static str])],
    pub code_policy: CodePolicy,
    pub code_separator: &'static str,
    /// Extra location emitted in HTTP servers when the pool has monitors
    pub status_location: &'static [&'static str],
}

impl DialectTables {
    pub fn block_for(&self, protocol: Protocol) -> Option<BlockKind> {
        lookup(self.blocks, protocol)
    }

    pub fn scheme_for(&self, protocol: Protocol) -> Option<&'static str> {
        lookup(self.schemes, protocol)
    }

    pub fn balance_for(&self, method: LbMethod) -> Option<&'static str> {
        lookup(self.balance, method)
    }

    pub fn upstream_rules(&self, block: BlockKind) -> &UpstreamRules {
        match block {
            BlockKind::Http => &self.http_upstream,
            BlockKind::Tcp => &self.tcp_upstream,
        }
    }

    pub fn persistence_for(&self, kind: PersistenceType) -> &'static [&'static str] {
        lookup(self.persistence, kind).unwrap_or(&[])
    }

    pub fn health_for(&self, kind: MonitorType) -> &'static [&'static str] {
        lookup(self.health, kind).unwrap_or(&[])
    }
}

fn lookup<K: PartialEq + Copy, V: Copy>(table: &[(K, V)], key: K) -> Option<V> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Substitute `{name}` placeholders in a directive template.
pub fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |line, (name, value)| {
        line.replace(&format!("{{{name}}}"), value)
    })
}

const ALL_METHODS: &[LbMethod] = &[
    LbMethod::RoundRobin,
    LbMethod::LeastConnections,
    LbMethod::SourceIp,
];

const BALANCE: &[(LbMethod, &str)] = &[
    (LbMethod::RoundRobin, "rr"),
    (LbMethod::LeastConnections, "least_conn"),
    (LbMethod::SourceIp, "ip_hash"),
];

static SENGINX: DialectTables = DialectTables {
    name: "senginx",
    blocks: &[
        (Protocol::Tcp, BlockKind::Tcp),
        (Protocol::Http, BlockKind::Http),
        (Protocol::Https, BlockKind::Tcp),
    ],
    schemes: &[
        (Protocol::Tcp, "http"),
        (Protocol::Http, "http"),
        (Protocol::Https, "https"),
    ],
    balance: BALANCE,
    http_upstream: UpstreamRules {
        balanced: &[LbMethod::LeastConnections, LbMethod::SourceIp],
        weighted: ALL_METHODS,
        persistence: true,
    },
    tcp_upstream: UpstreamRules {
        balanced: &[LbMethod::SourceIp],
        weighted: &[LbMethod::RoundRobin],
        persistence: false,
    },
    // No source-ip persistence module; ip_hash covers that use case.
    persistence: &[
        (
            PersistenceType::HttpCookie,
            &["persistence insert_cookie cookie_name=senginx timeout=30;"],
        ),
        (
            PersistenceType::AppCookie,
            &["persistence insert_cookie cookie_name=senginx monitor_cookie={cookie} timeout=30;"],
        ),
    ],
    health: &[
        (
            MonitorType::Http,
            &[
                "check interval={interval} fall={fall} timeout={timeout} type=http;",
                r#"check_http_send "{method} {path} HTTP/1.0\r\n\r\n";"#,
                "check_http_expect_alive {codes};",
            ],
        ),
        (
            MonitorType::Https,
            &["check interval={interval} fall={fall} timeout={timeout} type=ssl_hello;"],
        ),
        (
            MonitorType::Tcp,
            &["check interval={interval} fall={fall} timeout={timeout} type=tcp;"],
        ),
    ],
    code_policy: CodePolicy::Bucketed,
    code_separator: " ",
    status_location: &[
        "location /senginx-check-http-status {",
        "check_status csv;",
        "}",
    ],
};

static LEGACY: DialectTables = DialectTables {
    name: "legacy",
    blocks: &[
        (Protocol::Tcp, BlockKind::Tcp),
        (Protocol::Http, BlockKind::Http),
        (Protocol::Https, BlockKind::Http),
    ],
    schemes: &[
        (Protocol::Tcp, "tcp"),
        (Protocol::Http, "http"),
        (Protocol::Https, "https"),
    ],
    balance: BALANCE,
    http_upstream: UpstreamRules {
        balanced: &[LbMethod::LeastConnections, LbMethod::SourceIp],
        weighted: ALL_METHODS,
        persistence: true,
    },
    tcp_upstream: UpstreamRules {
        balanced: &[LbMethod::LeastConnections, LbMethod::SourceIp],
        weighted: ALL_METHODS,
        persistence: true,
    },
    persistence: &[
        (
            PersistenceType::SourceIp,
            &["stick-table type ip size 10k;", "stick on src;"],
        ),
        (
            PersistenceType::HttpCookie,
            &["cookie SRV insert indirect nocache;"],
        ),
        (
            PersistenceType::AppCookie,
            &["appsession {cookie} len 56 timeout 3h;"],
        ),
    ],
    health: &[
        (
            MonitorType::Http,
            &[
                "timeout check {timeout_s}s;",
                "option httpchk {method} {path};",
                "http-check expect rstatus {codes};",
            ],
        ),
        (
            MonitorType::Https,
            &[
                "timeout check {timeout_s}s;",
                "option httpchk {method} {path};",
                "http-check expect rstatus {codes};",
                "option ssl-hello-chk;",
            ],
        ),
        (MonitorType::Tcp, &["timeout check {timeout_s}s;"]),
    ],
    code_policy: CodePolicy::Literal,
    code_separator: "|",
    status_location: &[],
};
