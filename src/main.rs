// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use sfxpool::config::PoolConfig;
use sfxpool::decoder::symphonia::SymphoniaDecoder;
use sfxpool::decoder::{DecodedAudio, Decoder};
use sfxpool::output::{self, OutputProvider};
use sfxpool::SoundPool;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A sound effect pool."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Plays the given files at once through a sound pool.
    Play {
        /// The path to the pool config.
        config_path: PathBuf,
        /// The sound files to play.
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// The priority to play every sound at.
        #[arg(short, long, default_value_t = 0)]
        priority: i32,
        /// The normalized volume, from 0.0 to 1.0.
        #[arg(short, long, default_value_t = 1.0)]
        volume: f32,
        /// Loops the first sound until interrupted.
        #[arg(short, long)]
        loop_first: bool,
    },
    /// Decodes a sound file and prints its format.
    Decode {
        /// The sound file to decode.
        file: PathBuf,
    },
}

/// Reads and decodes a file, using its extension as a format hint.
fn decode_file(path: &Path) -> Result<DecodedAudio, Box<dyn Error>> {
    let data = fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let decoder = match path.extension().and_then(|ext| ext.to_str()) {
        Some(extension) => SymphoniaDecoder::with_extension(extension),
        None => SymphoniaDecoder::new(),
    };
    Ok(decoder
        .decode(&data)
        .map_err(|e| format!("{}: {}", path.display(), e))?)
}

fn play(
    config_path: &Path,
    files: &[PathBuf],
    priority: i32,
    volume: f32,
    loop_first: bool,
) -> Result<(), Box<dyn Error>> {
    let config = PoolConfig::deserialize(config_path)?;
    let mut output = output::cpal::Output::new(
        config.device().map(str::to_string),
        config.format(),
        config.volume_range(),
    );
    output.initialize()?;
    let format = output
        .format()
        .ok_or("output did not report a format after initializing")?;

    let pool = SoundPool::new(&output, config.pool_options(format))?;
    let mut sounds = Vec::with_capacity(files.len());
    for file in files {
        let sound = pool.load_decoded(decode_file(file)?)?;
        info!(file = %file.display(), sound_id = sound.id(), "Loaded sound");
        sounds.push(sound);
    }
    info!(samples = pool.sample_count(), memory_kb = pool.memory_size() / 1024, "Samples loaded");

    for (i, sound) in sounds.iter().enumerate() {
        let looped = loop_first && i == 0;
        match pool.play(*sound, volume, looped, priority)? {
            Some(channel) => info!(sound_id = sound.id(), channel, looped, "Playing"),
            None => warn!(sound_id = sound.id(), "No channel available"),
        }
    }

    while pool.active_count() > 0 {
        thread::sleep(POLL_INTERVAL);
    }

    drop(pool);
    output.shutdown();
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = output::cpal::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Play {
            config_path,
            files,
            priority,
            volume,
            loop_first,
        } => play(&config_path, &files, priority, volume, loop_first)?,
        Commands::Decode { file } => {
            let decoded = decode_file(&file)?;
            println!("{}:", file.display());
            println!("  channels: {}", decoded.channel_count);
            println!("  sample rate: {}Hz", decoded.sample_rate);
            println!("  frames: {}", decoded.frames());
            println!("  duration: {:.3}s", decoded.duration().as_secs_f64());
        }
    }

    Ok(())
}
