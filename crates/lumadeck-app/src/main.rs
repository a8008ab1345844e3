use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};

use lumadeck::Engine;
use lumadeck::bus::StateEvent;
use lumadeck::media::{AnimationLibrary, PixelBuffer};
use lumadeck::midi::MidiSystem;
use lumadeck::runtime::FrameLoop;
use lumadeck::settings::EngineConfig;

const USAGE: &str = "usage: lumadeck <manifest.json> [--frames N] [--dump out.png]";

struct Args {
    manifest: PathBuf,
    frames: Option<u64>,
    dump: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut manifest = None;
    let mut frames = None;
    let mut dump = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--frames" => {
                let n = args.next().context("--frames needs a value")?;
                frames = Some(n.parse().with_context(|| format!("bad frame count '{n}'"))?);
            }
            "--dump" => {
                dump = Some(PathBuf::from(args.next().context("--dump needs a path")?));
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other if other.starts_with("--") => bail!("unknown option {other}\n{USAGE}"),
            other => {
                if manifest.replace(PathBuf::from(other)).is_some() {
                    bail!("more than one manifest given\n{USAGE}");
                }
            }
        }
    }
    Ok(Args {
        manifest: manifest.context(USAGE)?,
        frames,
        dump,
    })
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    let config = EngineConfig::load();
    let library = AnimationLibrary::load(&args.manifest, &config)
        .with_context(|| format!("loading manifest {}", args.manifest.display()))?;
    if library.is_empty() {
        log::warn!("Manifest has no playable animations");
    }

    let epoch = Instant::now();
    let mut midi = MidiSystem::new(epoch);
    let mut engine = Engine::new(config.clone(), Arc::new(library));
    let status = engine.subscribe();
    if midi.connected() {
        engine.set_connected(true);
    }

    let mut frame_loop = FrameLoop::new(engine, midi.receiver(), epoch);
    let mut surface = PixelBuffer::new(config.canvas.width, config.canvas.height);

    frame_loop.run(&mut surface, args.frames, |engine, _| {
        if let Some(connected) = midi.poll() {
            engine.set_connected(connected);
        }
        for event in status.try_iter() {
            match event {
                StateEvent::Tempo(update) => {
                    log::debug!("Tempo {:.2} BPM ({:?})", update.bpm, update.source);
                }
                StateEvent::Connection(connected) => {
                    log::info!("MIDI input {}", if connected { "connected" } else { "disconnected" });
                }
                StateEvent::Control(_) => {}
            }
        }
    });

    if let Some(path) = args.dump {
        let image = surface
            .to_image()
            .context("frame buffer does not match its dimensions")?;
        image
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        log::info!("Wrote last frame to {}", path.display());
    }

    Ok(())
}
