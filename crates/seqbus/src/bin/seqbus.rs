//! seqbus - inspect and wire the ALSA sequencer bus

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use seqbus::services::{self, ControlService, MixerService};
use seqbus::{
    Address, Category, ConnectionGraph, Event, PortCaps, PortFilter, PortTypes, Registry,
    SeqConfig, Sequencer, Subscription,
};

#[derive(Parser)]
#[command(name = "seqbus")]
#[command(about = "Inspect and wire the ALSA sequencer bus")]
#[command(version)]
struct Cli {
    /// Config file to load on top of the standard locations
    #[arg(short, long, global = true, env = "SEQBUS_CONFIG")]
    config: Option<PathBuf>,

    /// Client name to register on the bus
    #[arg(short, long, global = true)]
    name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List clients, ports and their connections
    List {
        /// Only ports others can read from (inputs to us)
        #[arg(short, long)]
        input: bool,

        /// Only ports others can write to (outputs from us)
        #[arg(short, long)]
        output: bool,
    },

    /// Subscribe DEST to SENDER
    Connect {
        /// Sending port, e.g. "20:0" or "Midi Through:0"
        sender: String,

        /// Receiving port
        dest: String,

        /// Queue used for time stamping
        #[arg(short, long, default_value = "0")]
        queue: u8,

        /// Refuse further subscriptions to the destination
        #[arg(short, long)]
        exclusive: bool,

        /// Stamp events with the queue's tick time
        #[arg(long)]
        tick: bool,

        /// Stamp events with the queue's real time
        #[arg(long, conflicts_with = "tick")]
        real: bool,
    },

    /// Remove a subscription
    Disconnect {
        sender: String,
        dest: String,
    },

    /// Remove every subscription between exported ports
    Clear,

    /// Print events arriving from the given ports
    Dump {
        /// Ports to subscribe to (repeatable)
        #[arg(short, long = "port", required = true)]
        ports: Vec<String>,

        /// Milliseconds to wait per batch (-1 waits forever)
        #[arg(short, long, default_value = "1000", allow_negative_numbers = true)]
        timeout: i32,

        /// Stop after this many events
        #[arg(long)]
        count: Option<usize>,
    },

    /// Send a note on/off pair to a port
    Note {
        dest: String,

        #[arg(long, default_value = "60")]
        note: u8,

        #[arg(long, default_value = "100")]
        velocity: u8,

        #[arg(long, default_value = "0")]
        channel: u8,

        /// How long the note is held
        #[arg(long, default_value = "500")]
        duration_ms: u64,
    },

    /// Show named protocol constants
    Constants {
        /// Category to show, e.g. "event_type"; all when omitted
        category: Option<String>,
    },

    /// List sound cards
    Cards,

    /// Show mixer elements and their values
    Mixer {
        #[arg(default_value = "default")]
        card: String,
    },

    /// Print the effective configuration and where it came from
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = SeqConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(name) = cli.name {
        config.connection.client_name = name;
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level)),
        )
        .init();

    debug!(files = ?sources.files, env = ?sources.env_overrides, "configuration loaded");

    match cli.command {
        Commands::Constants { category } => show_constants(category.as_deref()),
        Commands::Cards => show_cards(),
        Commands::Mixer { card } => show_mixer(&card),
        Commands::Config => {
            for file in &sources.files {
                println!("# from {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("# env {}", var);
            }
            print!("{}", config.to_toml());
            Ok(())
        }
        Commands::List { input, output } => list(&open(&config)?, input, output),
        Commands::Connect {
            sender,
            dest,
            queue,
            exclusive,
            tick,
            real,
        } => {
            let mut seq = open(&config)?;
            let mut sub = Subscription::new(seq.parse_address(&sender)?, seq.parse_address(&dest)?);
            sub.queue = queue;
            sub.exclusive = exclusive;
            sub.time_update = tick || real;
            sub.time_real = real;
            seq.connect_ports(&sub)?;
            info!("connected {} -> {}", sub.sender, sub.dest);
            Ok(())
        }
        Commands::Disconnect { sender, dest } => {
            let mut seq = open(&config)?;
            let sender = seq.parse_address(&sender)?;
            let dest = seq.parse_address(&dest)?;
            seq.disconnect_ports(sender, dest)?;
            info!("disconnected {} -> {}", sender, dest);
            Ok(())
        }
        Commands::Clear => {
            let removed = open(&config)?.remove_all_connections()?;
            println!("removed {} connection(s)", removed);
            Ok(())
        }
        Commands::Dump {
            ports,
            timeout,
            count,
        } => dump(&mut open(&config)?, &ports, timeout, count),
        Commands::Note {
            dest,
            note,
            velocity,
            channel,
            duration_ms,
        } => {
            if channel > 15 || note > 127 || velocity > 127 {
                bail!("channel must be 0-15, note and velocity 0-127");
            }
            let mut seq = open(&config)?;
            let dest = seq.parse_address(&dest)?;
            let port = seq.create_port(
                "seqbus out",
                PortTypes::MIDI_GENERIC | PortTypes::APPLICATION,
                PortCaps::READ | PortCaps::SUBS_READ,
            )?;
            let source = Address::new(seq.client_id(), port);

            let mut on = Event::note_on(channel, note, velocity);
            let mut off = Event::note_off(channel, note, 0);
            for event in [&mut on, &mut off] {
                event.set_source(source);
                event.set_dest(dest);
                event.set_direct();
            }
            seq.send_event(&on)?;
            std::thread::sleep(Duration::from_millis(duration_ms));
            seq.send_event(&off)?;
            seq.sync_output_queue()?;
            Ok(())
        }
    }
}

fn open(config: &SeqConfig) -> Result<Sequencer> {
    let seq = Sequencer::open(&config.connection)?;
    debug!(client = seq.client_id(), "joined the bus");
    Ok(seq)
}

fn list(seq: &Sequencer, input: bool, output: bool) -> Result<()> {
    if !input && !output {
        print_graph(&seq.connection_list()?);
        return Ok(());
    }
    let filter = match (input, output) {
        (true, false) => PortFilter::Readable,
        (false, true) => PortFilter::Writable,
        _ => PortFilter::All,
    };
    for port in seq.list_ports(filter)? {
        println!("{:>7}  {}", port.addr.to_string(), port.name);
    }
    Ok(())
}

fn dump(seq: &mut Sequencer, ports: &[String], timeout: i32, count: Option<usize>) -> Result<()> {
    let port = seq.create_port(
        "seqbus dump",
        PortTypes::MIDI_GENERIC | PortTypes::APPLICATION,
        PortCaps::WRITE | PortCaps::SUBS_WRITE,
    )?;
    let me = Address::new(seq.client_id(), port);
    for text in ports {
        let sender = seq.parse_address(text)?;
        seq.connect(sender, me)?;
        info!("listening to {}", sender);
    }

    let mut seen = 0usize;
    loop {
        let wanted = count.map(|c| c - seen);
        for event in seq.receive_events(timeout, wanted)? {
            println!("{:>7}  {}", event.source().to_string(), event);
            seen += 1;
        }
        if count.is_some_and(|c| seen >= c) {
            return Ok(());
        }
    }
}

fn print_graph(graph: &ConnectionGraph) {
    for client in &graph.clients {
        println!("client {}: '{}'", client.id, client.name);
        for port in &client.ports {
            println!("    {} '{}'", port.id, port.name);
            if !port.read_subscribers.is_empty() {
                let list: Vec<String> = port.read_subscribers.iter().map(|s| s.addr.to_string()).collect();
                println!("\tConnecting To: {}", list.join(", "));
            }
            if !port.write_subscribers.is_empty() {
                let list: Vec<String> = port.write_subscribers.iter().map(|s| s.addr.to_string()).collect();
                println!("\tConnected From: {}", list.join(", "));
            }
        }
    }
}

fn show_constants(category: Option<&str>) -> Result<()> {
    let categories = match category {
        Some(name) => vec![name.parse::<Category>()?],
        None => Category::ALL.to_vec(),
    };
    let registry = Registry::global();
    for category in categories {
        println!("[{}]", category);
        for name in registry.enumerate(category) {
            if let Some(constant) = registry.lookup_name(category, name) {
                println!("  {:<32} {}", name, constant.value());
            }
        }
    }
    Ok(())
}

fn show_cards() -> Result<()> {
    for card in services::cards()? {
        println!("{:>2} [{:<10}] {}", card.index, card.id, card.name);
        println!("   {}", card.long_name);
    }
    Ok(())
}

fn show_mixer(card: &str) -> Result<()> {
    let mixer = MixerService::open(card)?;
    for element in mixer.elements()? {
        println!("{:<24} {}", element, mixer.get_value(&element)?);
    }
    Ok(())
}
