use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use terapy::bus::{topics, Message};
use terapy::config::{CoreContext, CoreSettings};
use terapy::devices::DeviceRegistry;
use terapy::events::engine::auto_save_path;
use terapy::serializer;
use terapy::worker::start_sequence;
use terapy::{Result, TerapyError};

/// Runs a measurement sequence against the configured (simulated) devices.
#[derive(Parser, Debug)]
#[command(author, version, about = "Runs a TeraPy measurement sequence", long_about = None)]
struct Args {
    /// Events file with one or more sequences.
    events: PathBuf,

    /// Main config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Devices config file.
    #[arg(short, long)]
    devices: Option<PathBuf>,

    /// Sequence to run, the first one if not given.
    #[arg(short, long)]
    sequence: Option<String>,

    /// Directory for saved arrays, overrides `default_path`.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let mut settings = match &args.config {
        Some(path) => serializer::settings_from_xml(&fs::read_to_string(path)?)?,
        None => CoreSettings::default(),
    };
    if let Some(output) = &args.output {
        settings.default_path = output.clone();
    }
    let devices = match &args.devices {
        Some(path) => DeviceRegistry::from_entries(&serializer::devices_from_xml(&fs::read_to_string(path)?)?),
        None => DeviceRegistry::new(),
    };
    let core = Arc::new(CoreContext::new(settings).with_devices(devices));

    let tree = serializer::events_from_xml(&fs::read_to_string(&args.events)?)?;
    let root = match &args.sequence {
        Some(name) => tree.roots.into_iter().find(|r| r.event.name == *name),
        None => tree.roots.into_iter().next(),
    }
    .ok_or_else(|| TerapyError::SequenceInvalid(format!("no such sequence in {}", args.events.display())))?;

    core.bus.subscribe(topics::PROGRESS_CHANGE, |message| {
        if let Message::Progress(percent) = message {
            log::info!("{percent:.0} %");
        }
    });
    core.bus.subscribe(topics::SET_STATUS_TEXT, |message| {
        if let Some(text) = message.as_text() {
            log::info!("{text}");
        }
    });

    let name = root.event.name.clone();
    let measurement = start_sequence(&core, root, &name)?.join()?;

    let dir = core.settings().default_path;
    fs::create_dir_all(&dir)?;
    for array in measurement.arrays.iter().filter(|a| a.filename.is_none()) {
        let path = auto_save_path(&dir, &measurement, &array.name);
        core.formats.save(&path, array, Some(&array.name))?;
        log::info!("saved {} to {}", array.name, path.display());
    }
    log::info!(
        "{name}: {} of {} operation(s) done",
        measurement.current(),
        measurement.total
    );
    Ok(())
}
