use std::sync::Arc;

use clap::Parser;
use ledger_node::{
    config::{AuditConfig, CliArgs, Config},
    server, telemetry, ProtocolEngine,
};
use ledger_node_core::{AuditSink, DisabledAuditSink};
use ledger_node_sqlite::SqliteAuditSink;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);

    telemetry::init_tracing(&config.logging);

    match telemetry::init_metrics(&config.metrics) {
        Ok(Some(addr)) => tracing::info!(%addr, "Prometheus metrics exposed"),
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Metrics disabled"),
    }

    let audit = open_audit_sink(&config.audit);

    let engine = match ProtocolEngine::open(&config.ledger.data_file, audit) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            tracing::error!(path = %config.ledger.data_file.display(), error = %e, "Failed to load ledger");
            std::process::exit(1);
        }
    };

    let addr = match config.listen_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(host = %config.server.host, port = config.server.port, error = %e, "Invalid listen address");
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!(
        %addr,
        accounts = engine.account_count(),
        data_file = %engine.data_file().display(),
        "Ledger node listening"
    );

    server::serve(listener, engine).await;
}

fn open_audit_sink(config: &AuditConfig) -> Arc<dyn AuditSink> {
    if !config.enabled {
        tracing::info!("Audit trail disabled");
        return Arc::new(DisabledAuditSink);
    }

    match SqliteAuditSink::open(&config.database) {
        Ok(sink) => {
            tracing::info!(database = %config.database, "Audit trail enabled");
            Arc::new(sink)
        }
        Err(e) => {
            tracing::warn!(database = %config.database, error = %e, "Audit database unavailable, continuing without audit");
            Arc::new(DisabledAuditSink)
        }
    }
}
