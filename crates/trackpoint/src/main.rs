//! `trackpt` - CLI for trackpoint
//!
//! This binary runs the ingestion server and provides client and
//! maintenance commands against a running server or its data files.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, bail, Context};
use clap::Parser;

use trackpoint::cli::{ClearCommand, ClientArgs, Cli, Command, ConfigCommand, ServeCommand};
use trackpoint::monitor::format_timestamp;
use trackpoint::{
    init_logging, Client, Config, IngestionServer, Monitor, MonitorHandle, PersistenceWriter,
    ProtocolHandler, RecordStore,
};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone())?;

    // Execute the command
    match cli.command {
        Command::Serve(serve_cmd) => handle_serve(config, &serve_cmd),
        Command::Ping(client) => handle_ping(&config, &client),
        Command::Show(client) => handle_request(&config, &client, b"show"),
        Command::Send(send_cmd) => {
            handle_request(&config, &send_cmd.client, send_cmd.payload.as_bytes())
        }
        Command::Status(status_cmd) => handle_status(&config, status_cmd.json),
        Command::Clear(clear_cmd) => handle_clear(&config, &clear_cmd),
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
    }
}

fn handle_serve(mut config: Config, cmd: &ServeCommand) -> anyhow::Result<()> {
    if let Some(bind) = cmd.bind {
        config.server.bind_address = bind.to_string();
    }
    config.validate()?;

    let store = Arc::new(RecordStore::new(config.history.capacity));
    let writer = Arc::new(PersistenceWriter::from_config(&config)?);
    let handler =
        ProtocolHandler::new(store, writer).with_show_limit(config.history.show_limit);

    // The monitor shares the handler's writer so a clear never races an append.
    let monitor = (!cmd.no_monitor).then(|| Arc::new(Monitor::for_handler(&handler)));
    let server = IngestionServer::bind_with_limit(
        config.bind_addr()?,
        handler,
        config.server.max_message_bytes,
    )?;

    if let Some(monitor) = &monitor {
        spawn_monitor(monitor, &config)?;
    }

    println!("Listening on {}", server.endpoint());
    server.serve()?;
    Ok(())
}

fn spawn_monitor(monitor: &Arc<Monitor>, config: &Config) -> anyhow::Result<()> {
    let handle = MonitorHandle::new();
    let interval = config.refresh_interval();
    let rows = config.monitor.rows;

    let console = Arc::clone(monitor);
    let console_handle = handle.clone();
    thread::Builder::new()
        .name("monitor".to_string())
        .spawn(move || {
            let mut out = io::stdout();
            if let Err(e) = console.run_console(interval, rows, &console_handle, &mut out) {
                eprintln!("Console monitor stopped: {e}");
            }
        })
        .context("failed to spawn monitor thread")?;

    let admin = Arc::clone(monitor);
    thread::Builder::new()
        .name("admin".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            let mut out = io::stdout();
            if let Err(e) = admin.run_admin_input(stdin.lock(), &mut out) {
                eprintln!("Admin input stopped: {e}");
            }
            // Stdin closed: stop redrawing so the terminal is left alone.
            handle.stop();
        })
        .context("failed to spawn admin thread")?;
    Ok(())
}

fn connect(config: &Config, args: &ClientArgs) -> anyhow::Result<Client> {
    let address = args.resolve(config)?;
    let client = Client::connect(&address)?;
    client.set_timeout(args.timeout())?;
    Ok(client)
}

fn exchange(client: &mut Client, payload: &[u8]) -> anyhow::Result<String> {
    client.request(payload).map_err(|e| {
        if e.is_transport_error() {
            anyhow!("{e} (is `trackpt serve` running at {}?)", client.endpoint())
        } else {
            e.into()
        }
    })
}

fn handle_ping(config: &Config, args: &ClientArgs) -> anyhow::Result<()> {
    let mut client = connect(config, args)?;
    let reply = exchange(&mut client, b"ping")?;
    if reply != "pong" {
        bail!("unexpected reply: {reply}");
    }
    println!("{reply}");
    Ok(())
}

fn handle_request(config: &Config, args: &ClientArgs, payload: &[u8]) -> anyhow::Result<()> {
    let mut client = connect(config, args)?;
    let reply = exchange(&mut client, payload)?;
    println!("{reply}");
    if reply.starts_with("ERROR:") {
        bail!("server rejected the request");
    }
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let writer = PersistenceWriter::from_config(config)?;
    let stats = writer.stats();

    if json {
        let status = serde_json::json!({
            "data_dir": config.data_dir(),
            "format": config.storage.format,
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let paths = writer.paths();
    println!("trackpt status");
    println!("--------------");
    println!("Data directory: {}", config.data_dir().display());
    println!("Locations:      {} ({})", stats.locations, paths.locations.display());
    println!("Location log:   {} bytes", stats.location_log_bytes);
    println!("Traffic:        {} ({})", stats.traffic, paths.traffic.display());
    println!("Telephony:      {} ({})", stats.telephony, paths.telephony.display());

    if let Some(last) = &stats.last_location {
        println!();
        println!("Last location:  {last}");
    }
    if let Some(traffic) = &stats.last_traffic {
        println!();
        println!("Last traffic:   {}", format_timestamp(traffic.timestamp));
        println!("  Total bytes:  {}", traffic.total_bytes);
        println!("  Mobile bytes: {}", traffic.mobile_total_bytes);
        for (package, usage) in traffic.ranked_apps().iter().take(5) {
            println!("  {package:<32} {:>12}", usage.total_bytes);
        }
    }
    Ok(())
}

fn handle_clear(config: &Config, cmd: &ClearCommand) -> anyhow::Result<()> {
    let writer = PersistenceWriter::from_config(config)?;
    if !cmd.yes && !confirm("Truncate every persisted file?")? {
        println!("Aborted.");
        return Ok(());
    }
    writer.clear_all()?;
    println!("Cleared files in {}", config.data_dir().display());
    Ok(())
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Server]");
                println!("  Bind address:       {}", config.server.bind_address);
                println!("  Max message bytes:  {}", config.server.max_message_bytes);
                println!();
                println!("[Storage]");
                println!("  Data directory:     {}", config.data_dir().display());
                println!("  Format:             {:?}", config.storage.format);
                println!("  Locations:          {}", config.location_path().display());
                println!("  Location log:       {}", config.location_log_path().display());
                println!("  Traffic:            {}", config.traffic_path().display());
                println!("  Telephony:          {}", config.telephony_path().display());
                println!();
                println!("[History]");
                println!("  Capacity:           {}", config.history.capacity);
                println!("  Show limit:         {}", config.history.show_limit);
                println!();
                println!("[Monitor]");
                println!("  Refresh (ms):       {}", config.monitor.refresh_interval_ms);
                println!("  Rows:               {}", config.monitor.rows);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}
