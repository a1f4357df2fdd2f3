use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;

use lmsync_crypto::{MachineToken, SigningKey};
use lmsync_event::{Event, EventCodec};
use lmsync_pack::read_event_files;
use lmsync_protocol::ExternalEventDtoMapper;
use lmsync_server::{AgentRegistry, LmsyncServer, ServerConfig};
use lmsync_store::{EventStore, FileEventStore, StoreError, StoreLock};
use lmsync_store::InMemoryLeaseStore;
use lmsync_sync::{
    AgentConfig, DomainState, HttpTransport, ImportReport, JobScheduler, LocalAgentController,
    LocalSyncResults, SyncStatus,
};
use lmsync_types::{AgentId, FacilityId, NodeRole};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let json = matches!(cli.format, OutputFormat::Json);
    match cli.command {
        Command::Init(args) => cmd_init(args),
        Command::Keygen => cmd_keygen(json),
        Command::Token(args) => cmd_token(args),
        Command::Register(args) => cmd_register(args),
        Command::Serve(args) => cmd_serve(args),
        Command::Activate(args) => cmd_activate(args),
        Command::Sync(args) => cmd_sync(args),
        Command::Export(args) => cmd_export(args),
        Command::Import(args) => cmd_import(args, json),
        Command::Upload(args) => cmd_upload(args, json),
        Command::Download(args) => cmd_download(args),
        Command::Inspect(args) => cmd_inspect(args, json),
        Command::Status(args) => cmd_status(args, json),
        Command::Retry(args) => cmd_retry(args, json),
        Command::Compact(args) => cmd_compact(args),
    }
}

/// An agent opened from its configuration, without a link to the online web.
struct LocalAgent {
    config: AgentConfig,
    store: Arc<FileEventStore>,
    controller: LocalAgentController,
}

fn load_agent_config(path: &Path) -> anyhow::Result<AgentConfig> {
    AgentConfig::load(path).with_context(|| format!("reading agent config {}", path.display()))
}

/// Open the agent's journal. Fails with [`StoreError::Locked`] while another
/// lmsync process (a `sync --watch`, say) has it open.
fn open_agent(path: &Path) -> anyhow::Result<LocalAgent> {
    let config = load_agent_config(path)?;
    let store = Arc::new(
        FileEventStore::open(
            &config.journal_path(),
            NodeRole::Agent,
            EventCodec::default(),
            config.sync_mode,
        )
        .with_context(|| format!("opening journal {}", config.journal_path().display()))?,
    );
    let registry = Arc::new(DomainState::default().replay_registry());
    let mut controller = LocalAgentController::new(config.context()?, store.clone(), registry)?
        .with_enrollment_secret(config.enrollment_secret.clone())
        .with_status_file(config.status_path())?;
    if let Some(key) = config.signing_key()? {
        controller = controller.with_signing_key(key);
    }
    Ok(LocalAgent {
        config,
        store,
        controller,
    })
}

fn online(agent: LocalAgent) -> LocalAgent {
    let transport = Arc::new(HttpTransport::new(agent.config.server_url.clone()));
    LocalAgent {
        controller: agent.controller.with_transport(transport),
        ..agent
    }
}

fn is_locked(error: &anyhow::Error) -> bool {
    matches!(error.downcast_ref::<StoreError>(), Some(StoreError::Locked { .. }))
}

fn cmd_activate(args: AgentArgs) -> anyhow::Result<()> {
    let mut agent = online(open_agent(&args.config)?);
    let runtime = tokio::runtime::Runtime::new()?;
    let key = runtime.block_on(agent.controller.activate())?;
    agent.config.signing_key_hex = Some(key.to_hex());
    std::fs::write(&args.config, agent.config.to_toml()?)?;
    println!(
        "{} Activated with {}",
        "✓".green().bold(),
        agent.config.server_url.bold()
    );
    println!("  Public key: {}", key.verifying_key().to_hex().yellow());
    Ok(())
}

fn cmd_sync(args: SyncArgs) -> anyhow::Result<()> {
    let agent = online(open_agent(&args.config)?);
    let runtime = tokio::runtime::Runtime::new()?;
    if !args.watch {
        let report = runtime.block_on(agent.controller.sync_cycle())?;
        println!(
            "{} pushed {}, acked {}, pulled {}, pruned {}",
            "✓".green().bold(),
            report.pushed,
            report.acked,
            report.pulled,
            report.pruned
        );
        for id in report.push_failed.iter().chain(&report.pull_failed) {
            println!("  {} {}", "not replayed:".red(), id);
        }
        return Ok(());
    }

    let controller = Arc::new(agent.controller);
    let scheduler = JobScheduler::new(
        Arc::new(InMemoryLeaseStore::new()),
        format!("agent-{}", controller.context().facility_id),
        agent.config.lease_ttl(),
    );
    println!(
        "Syncing with {} every {}s",
        agent.config.server_url.bold(),
        agent.config.sync_interval_secs
    );
    runtime.block_on(async {
        let handle = controller.spawn_sync_loop(&scheduler, agent.config.sync_interval(), None);
        tokio::signal::ctrl_c().await?;
        handle.abort();
        anyhow::Ok(())
    })
}

fn cmd_init(args: InitArgs) -> anyhow::Result<()> {
    if args.output.exists() && !args.force {
        bail!("{} exists; pass --force to overwrite", args.output.display());
    }
    let facility = args.facility.unwrap_or_else(FacilityId::random);
    if args.server {
        let mut config = ServerConfig {
            facility_id: Some(facility),
            ..ServerConfig::default()
        };
        if let Some(dir) = args.data_dir {
            config.data_dir = dir;
        }
        std::fs::write(&args.output, toml::to_string_pretty(&config)?)?;
        println!(
            "{} Wrote server config {}",
            "✓".green().bold(),
            args.output.display().to_string().bold()
        );
        println!("  Facility: {}", facility.to_string().cyan());
        return Ok(());
    }

    let key = SigningKey::generate();
    let agent = AgentId::random();
    let mut config = AgentConfig {
        facility_id: Some(facility),
        agent_id: Some(agent),
        signing_key_hex: Some(key.to_hex()),
        ..AgentConfig::default()
    };
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    std::fs::write(&args.output, config.to_toml()?)?;
    println!(
        "{} Wrote agent config {}",
        "✓".green().bold(),
        args.output.display().to_string().bold()
    );
    println!("  Facility:   {}", facility.to_string().cyan());
    println!("  Agent:      {}", agent.to_string().cyan());
    println!("  Public key: {}", key.verifying_key().to_hex().yellow());
    Ok(())
}

fn cmd_keygen(json: bool) -> anyhow::Result<()> {
    let key = SigningKey::generate();
    let public = key.verifying_key().to_hex();
    if json {
        println!(
            "{}",
            serde_json::json!({ "secret": key.to_hex(), "public": public })
        );
    } else {
        println!("secret: {}", key.to_hex());
        println!("public: {}", public.yellow());
    }
    Ok(())
}

fn cmd_token(args: AgentArgs) -> anyhow::Result<()> {
    let config = AgentConfig::load(&args.config)?;
    let context = config.context()?;
    let agent = context.require_agent()?;
    let Some(key) = config.signing_key()? else {
        bail!("{} has no signing_key_hex", args.config.display());
    };
    let token = MachineToken::issue_now(agent, context.facility_id, &key)?;
    println!("{}", token.encode());
    Ok(())
}

fn cmd_register(args: RegisterArgs) -> anyhow::Result<()> {
    let config = ServerConfig::load(&args.config)?;
    std::fs::create_dir_all(&config.data_dir)?;
    // a running server owns the registry file
    let _lock = StoreLock::acquire(&config.journal_path()).context(
        "the server is running; stop it first or register over HTTP with the operator secret",
    )?;
    let registry = AgentRegistry::open(&config.registry_path())?;
    let agent = registry.register(args.agent, args.facility, &args.public_key)?;
    println!(
        "{} Registered agent {} for facility {}",
        "✓".green().bold(),
        agent.agent_id.to_string().cyan(),
        agent.facility_id.to_string().cyan()
    );
    Ok(())
}

fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = ServerConfig::load(&args.config)
        .with_context(|| format!("reading server config {}", args.config.display()))?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind.parse().with_context(|| format!("bad bind address {bind}"))?;
    }
    let server = LmsyncServer::open(config)?;
    println!(
        "lmsync server on {} (data: {})",
        server.config().bind_addr.to_string().bold(),
        server.config().data_dir.display()
    );
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server.serve())?;
    Ok(())
}

fn cmd_export(args: ExportArgs) -> anyhow::Result<()> {
    let agent = open_agent(&args.config)?;
    let files = agent.controller.export_to_files(
        &args.out,
        agent.config.file_capacity_bytes,
        agent.config.compression,
    )?;
    if files.is_empty() {
        println!("Nothing pending.");
    }
    for file in &files {
        println!("  {} {}", "wrote".green(), file.display());
    }
    Ok(())
}

fn print_report(report: &ImportReport, json: bool) -> anyhow::Result<()> {
    if json {
        let body = serde_json::json!({
            "imported": report.imported,
            "duplicates": report.duplicates,
            "failed": report.failed,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }
    println!(
        "{} imported, {} duplicate, {} failed",
        report.imported.len().to_string().green().bold(),
        report.duplicates.len(),
        report.failed.len().to_string().red()
    );
    for id in &report.failed {
        println!("  {} {}", "failed:".red(), id);
    }
    Ok(())
}

fn cmd_import(args: ImportArgs, json: bool) -> anyhow::Result<()> {
    let agent = open_agent(&args.config)?;
    let compression = args.compression.unwrap_or(agent.config.compression);
    let report = agent.controller.import_from_files(&args.files, compression)?;
    print_report(&report, json)
}

fn cmd_upload(args: AgentArgs, json: bool) -> anyhow::Result<()> {
    let agent = open_agent(&args.config)?;
    let resource = agent
        .controller
        .pending_resource(agent.config.file_capacity_bytes, agent.config.compression)?;
    if resource.is_empty() {
        println!("Nothing pending.");
        return Ok(());
    }
    let token = agent.controller.issue_token()?;
    let transport = HttpTransport::new(agent.config.server_url.clone());
    let runtime = tokio::runtime::Runtime::new()?;
    let response = runtime.block_on(transport.upload_resource(&token, &resource))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }
    println!(
        "{} uploaded {} events ({} bytes, {}): {} imported, {} duplicate",
        "✓".green().bold(),
        resource.count,
        resource.len(),
        resource.compression,
        response.imported,
        response.duplicates
    );
    for id in &response.failed {
        println!("  {} {}", "not replayed:".red(), id);
    }
    Ok(())
}

fn cmd_download(args: DownloadArgs) -> anyhow::Result<()> {
    let agent = open_agent(&args.config)?;
    let token = agent.controller.issue_token()?;
    let transport = HttpTransport::new(agent.config.server_url.clone());
    let runtime = tokio::runtime::Runtime::new()?;
    let resource = runtime.block_on(transport.download_export(&token))?;
    std::fs::write(&args.out, &resource.bytes)
        .with_context(|| format!("writing {}", args.out.display()))?;
    println!(
        "{} {} events to {}",
        "wrote".green(),
        resource.count,
        args.out.display()
    );
    println!(
        "  import with: lmsync import --compression {} {}",
        resource.compression,
        args.out.display()
    );
    Ok(())
}

fn event_line(event: &Event) -> String {
    let receiver = event
        .receiver_id
        .map(|r| r.to_string())
        .unwrap_or_else(|| "online web".into());
    let group = event
        .group_id
        .map(|g| format!("{g}#{}", event.group_sequence))
        .unwrap_or_else(|| "-".into());
    format!(
        "{}  {}  {} → {}  {}",
        event.id.short_id().yellow(),
        event.payload_type().cyan(),
        event.sender_id,
        receiver,
        group.dimmed()
    )
}

fn cmd_inspect(args: InspectArgs, json: bool) -> anyhow::Result<()> {
    let events = read_event_files(&args.files, &EventCodec::default(), args.compression)?;
    if json {
        let dtos = ExternalEventDtoMapper::default().to_dtos(&events)?;
        println!("{}", serde_json::to_string_pretty(&dtos)?);
        return Ok(());
    }
    for event in &events {
        println!("{}", event_line(event));
        if args.payloads {
            println!("    {}", event.payload.body_json()?);
        }
    }
    println!("{} events", events.len().to_string().bold());
    Ok(())
}

fn cmd_status(args: StatusArgs, json: bool) -> anyhow::Result<()> {
    if args.server {
        return cmd_server_status(args, json);
    }
    let agent = match open_agent(&args.config) {
        Ok(agent) => agent,
        Err(e) if is_locked(&e) => {
            // another process is syncing; show what it last saved
            let config = load_agent_config(&args.config)?;
            let status = LocalSyncResults::load(&config.status_path())?.unwrap_or_default();
            if !json {
                println!("{}", "Agent is running; showing its last saved results.".dimmed());
            }
            return print_status(&status, config.facility_id, json);
        }
        Err(e) => return Err(e),
    };
    let status = agent.controller.status()?;
    print_status(&status, Some(agent.controller.context().facility_id), json)?;
    if !json {
        println!("State:    {}", agent.controller.state());
        println!("Stored:   {} events", agent.store.len()?);
    }
    Ok(())
}

/// Online web status, read from its journal when the server is stopped and
/// from `GET /status` while it runs.
fn cmd_server_status(args: StatusArgs, json: bool) -> anyhow::Result<()> {
    let config = ServerConfig::load(&args.config)
        .with_context(|| format!("reading server config {}", args.config.display()))?;
    let opened = FileEventStore::open(
        &config.journal_path(),
        NodeRole::OnlineWeb,
        EventCodec::default(),
        config.sync_mode,
    );
    let status = match opened {
        Ok(store) => {
            LocalSyncResults::evaluate(None, None, store.undelivered()?, store.sync_errors()?)
        }
        Err(StoreError::Locked { .. }) => {
            let Some(secret) = config.operator_secret.as_deref() else {
                bail!("the server is running and no operator_secret is configured to ask it");
            };
            let url = args.url.unwrap_or_else(|| local_url(&config));
            let runtime = tokio::runtime::Runtime::new()?;
            runtime
                .block_on(HttpTransport::new(url.clone()).server_status(secret))
                .with_context(|| format!("asking {url} for its status"))?
        }
        Err(e) => return Err(e.into()),
    };
    print_status(&status, config.facility_id, json)
}

fn local_url(config: &ServerConfig) -> String {
    let mut addr = config.bind_addr;
    if addr.ip().is_unspecified() {
        addr.set_ip(std::net::Ipv4Addr::LOCALHOST.into());
    }
    format!("http://{addr}")
}

fn print_status(
    status: &LocalSyncResults,
    facility_id: Option<FacilityId>,
    json: bool,
) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(status)?);
        return Ok(());
    }
    let label = match status.status {
        SyncStatus::Ok => status.status.to_string().green().bold(),
        SyncStatus::Error => status.status.to_string().red().bold(),
        SyncStatus::Pending => status.status.to_string().yellow().bold(),
    };
    if let Some(facility_id) = facility_id {
        println!("Facility: {}", facility_id.to_string().cyan());
    }
    println!("Status:   {label}");
    println!("Pending:  {} events unconfirmed", status.pending_outgoing);
    if let Some(at) = status.last_successful_sync_at {
        println!("Last sync: {at}");
    }
    if let Some(error) = &status.last_error {
        println!("Last error: {}", error.red());
    }
    for error in &status.errors {
        println!(
            "  {} {} {} (attempts: {}): {}",
            "error".red(),
            error.event_id.short_id(),
            error.payload_type,
            error.attempts,
            error.message
        );
    }
    Ok(())
}

fn cmd_retry(args: RetryArgs, json: bool) -> anyhow::Result<()> {
    let agent = open_agent(&args.config)?;
    let importer = agent.controller.importer();
    match args.event {
        Some(id) => {
            let outcome = importer.replay_event(&id)?;
            println!("{} {} {:?}", "✓".green().bold(), id, outcome);
            Ok(())
        }
        None => print_report(&importer.retry_unreplayed()?, json),
    }
}

fn cmd_compact(args: CompactArgs) -> anyhow::Result<()> {
    let (journal, role, sync_mode) = if args.server {
        let config = ServerConfig::load(&args.config)?;
        (config.journal_path(), NodeRole::OnlineWeb, config.sync_mode)
    } else {
        let config = AgentConfig::load(&args.config)?;
        (config.journal_path(), NodeRole::Agent, config.sync_mode)
    };
    let store = FileEventStore::open(&journal, role, EventCodec::default(), sync_mode)?;
    let pruned = store.prune()?;
    let ops = store.compact()?;
    println!(
        "{} pruned {} events, journal now {} ops",
        "✓".green().bold(),
        pruned,
        ops
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn run(args: &[&str]) -> anyhow::Result<()> {
        run_command(Cli::try_parse_from(args)?)
    }

    #[test]
    fn init_writes_loadable_agent_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        let data = dir.path().join("data");
        run(&[
            "lmsync",
            "init",
            "-o",
            path.to_str().unwrap(),
            "--data-dir",
            data.to_str().unwrap(),
        ])
        .unwrap();
        let config = AgentConfig::load(&path).unwrap();
        assert!(config.context().is_ok());
        assert!(config.signing_key().unwrap().is_some());
        assert_eq!(config.data_dir, data);

        // refuses to clobber without --force
        assert!(run(&["lmsync", "init", "-o", path.to_str().unwrap()]).is_err());
    }

    #[test]
    fn init_server_then_register() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web.toml");
        let data = dir.path().join("web");
        run(&[
            "lmsync",
            "init",
            "--server",
            "-o",
            path.to_str().unwrap(),
            "--data-dir",
            data.to_str().unwrap(),
        ])
        .unwrap();
        let config = ServerConfig::load(&path).unwrap();
        assert!(config.facility_id.is_some());

        let key = SigningKey::generate();
        let agent = AgentId::random();
        run(&[
            "lmsync",
            "register",
            "-c",
            path.to_str().unwrap(),
            "--agent",
            &agent.to_string(),
            "--facility",
            &FacilityId::random().to_string(),
            "--public-key",
            &key.verifying_key().to_hex(),
        ])
        .unwrap();
        let registry = AgentRegistry::open(&config.registry_path()).unwrap();
        assert!(registry.get(&agent).is_some());
    }

    #[test]
    fn export_import_status_on_a_fresh_agent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        let data = dir.path().join("data");
        let p = path.to_str().unwrap();
        run(&["lmsync", "init", "-o", p, "--data-dir", data.to_str().unwrap()]).unwrap();

        let agent = open_agent(&path).unwrap();
        assert_eq!(agent.controller.state(), lmsync_sync::AgentState::Activated);
        drop(agent);

        let out = dir.path().join("out");
        run(&["lmsync", "export", "-c", p, "-o", out.to_str().unwrap()]).unwrap();
        run(&["lmsync", "status", "-c", p]).unwrap();
        run(&["lmsync", "compact", "-c", p]).unwrap();
        run(&["lmsync", "retry", "-c", p]).unwrap();
    }

    fn init_agent(dir: &Path, server_url: &str) -> std::path::PathBuf {
        let path = dir.join("agent.toml");
        let data = dir.join("agent-data");
        run(&[
            "lmsync",
            "init",
            "-o",
            path.to_str().unwrap(),
            "--data-dir",
            data.to_str().unwrap(),
        ])
        .unwrap();
        let mut config = AgentConfig::load(&path).unwrap();
        config.server_url = server_url.to_string();
        config.enrollment_secret = Some(SECRET.into());
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();
        path
    }

    const SECRET: &str = "district-enrollment";

    /// A server on an ephemeral port, serving from its own runtime.
    fn live_server(dir: &Path) -> (tokio::runtime::Runtime, Arc<LmsyncServer>, std::path::PathBuf) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let config = ServerConfig {
            bind_addr: listener.local_addr().unwrap(),
            data_dir: dir.join("web-data"),
            facility_id: Some(FacilityId::random()),
            operator_secret: Some(SECRET.into()),
            ..ServerConfig::default()
        };
        let path = dir.join("web.toml");
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();
        let server = Arc::new(LmsyncServer::open(config).unwrap());
        let app = server.router();
        runtime.spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (runtime, server, path)
    }

    fn submission() -> lmsync_event::EventPayload {
        lmsync_event::EventPayload::RequisitionSubmitted(lmsync_event::RequisitionSubmitted {
            requisition_id: uuid::Uuid::new_v4(),
            program_code: "EPI".into(),
            submitted_by: "clerk".into(),
            line_items: Vec::new(),
        })
    }

    #[test]
    fn failed_sync_is_visible_to_a_later_status() {
        let dir = tempfile::tempdir().unwrap();
        // nothing listens on the discard port
        let path = init_agent(dir.path(), "http://127.0.0.1:9");
        let p = path.to_str().unwrap();

        assert!(run(&["lmsync", "sync", "-c", p]).is_err());
        run(&["lmsync", "status", "-c", p]).unwrap();

        let status = open_agent(&path).unwrap().controller.status().unwrap();
        assert_eq!(status.status, SyncStatus::Error);
        assert!(status.last_error.is_some());
        assert!(status.last_successful_sync_at.is_none());
    }

    #[test]
    fn status_of_a_running_agent_comes_from_its_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = init_agent(dir.path(), "http://127.0.0.1:9");
        let p = path.to_str().unwrap();
        assert!(run(&["lmsync", "sync", "-c", p]).is_err());

        let running = open_agent(&path).unwrap();
        let err = open_agent(&path).err().unwrap();
        assert!(is_locked(&err));
        // falls back to the saved results instead of failing
        run(&["lmsync", "status", "-c", p]).unwrap();
        run(&["lmsync", "--format", "json", "status", "-c", p]).unwrap();
        drop(running);
    }

    #[test]
    fn agent_commands_against_a_live_server() {
        let dir = tempfile::tempdir().unwrap();
        let (_runtime, server, web) = live_server(dir.path());
        let url = format!("http://{}", server.config().bind_addr);
        let path = init_agent(dir.path(), &url);
        let p = path.to_str().unwrap();

        run(&["lmsync", "activate", "-c", p]).unwrap();
        run(&["lmsync", "sync", "-c", p]).unwrap();
        {
            let agent = open_agent(&path).unwrap();
            let status = agent.controller.status().unwrap();
            assert_eq!(status.status, SyncStatus::Ok);
            assert!(status.last_successful_sync_at.is_some());
        }
        run(&["lmsync", "status", "-c", p]).unwrap();

        // upload: pending events go out as one resource
        let event = {
            let agent = open_agent(&path).unwrap();
            lmsync_sync::EventPublisher::new(agent.store.clone(), agent.controller.context().clone())
                .emit_group_event(None, None, submission())
                .unwrap()
        };
        run(&["lmsync", "upload", "-c", p]).unwrap();
        assert!(server
            .controller()
            .store()
            .get(&event.id)
            .unwrap()
            .unwrap()
            .is_replayed());

        // download: events owed to this facility land in a file
        let facility_id = AgentConfig::load(&path).unwrap().facility_id.unwrap();
        let owed = server
            .controller()
            .publisher()
            .emit_group_event(None, Some(facility_id), submission())
            .unwrap();
        let out = dir.path().join("owed.bin");
        run(&["lmsync", "download", "-c", p, "-o", out.to_str().unwrap()]).unwrap();
        let compression = server.config().export_compression.to_string();
        run(&["lmsync", "import", "-c", p, "--compression", &compression, out.to_str().unwrap()])
            .unwrap();
        assert!(open_agent(&path)
            .unwrap()
            .store
            .get(&owed.id)
            .unwrap()
            .is_some());

        // the running server holds its journal, so status goes over HTTP
        let w = web.to_str().unwrap();
        run(&["lmsync", "status", "--server", "-c", w]).unwrap();
        // and offline registration is refused while it runs
        assert!(run(&[
            "lmsync",
            "register",
            "-c",
            w,
            "--agent",
            &AgentId::random().to_string(),
            "--facility",
            &FacilityId::random().to_string(),
            "--public-key",
            &SigningKey::generate().verifying_key().to_hex(),
        ])
        .is_err());
    }

    #[test]
    fn server_status_reads_a_stopped_journal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web.toml");
        let data = dir.path().join("web");
        run(&[
            "lmsync",
            "init",
            "--server",
            "-o",
            path.to_str().unwrap(),
            "--data-dir",
            data.to_str().unwrap(),
        ])
        .unwrap();
        run(&["lmsync", "status", "--server", "-c", path.to_str().unwrap()]).unwrap();
    }
}
