// docvox demo CLI
// Loads an audio file as a base64 payload and drives the player from stdin

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use base64::Engine;
use clap::Parser;
use env_logger::Env;

use docvox::{AppSettings, OfflineOutput, Phase, Player};

#[derive(Parser)]
#[command(name = "docvox", version, about = "Playback engine demo for spoken audio")]
struct Cli {
    /// Audio file to load (any format the decoder recognizes)
    input: PathBuf,

    /// Directory holding settings.json
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Run without an audio device (manual clock; command smoke test)
    #[arg(long)]
    offline: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(dir) => AppSettings::load_or_default(dir),
        None => AppSettings::default(),
    };

    let bytes = fs::read(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    // The engine consumes exactly what the speech service would return
    let payload = base64::engine::general_purpose::STANDARD.encode(&bytes);

    let mut player = if cli.offline {
        Player::new(Box::new(OfflineOutput::new()), settings.playback.clone())
    } else {
        Player::with_default_output(settings.playback.clone())
            .context("failed to open audio output")?
    };

    player.load(&payload).context("failed to decode audio")?;
    println!(
        "Loaded {:.1}s of audio. Commands: p=play/pause  s <secs>=seek  r <rate>=speed  q=quit",
        player.duration()
    );
    print_status(&player);

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break; // EOF
        }

        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("p") => {
                let result = if player.is_playing() {
                    player.pause()
                } else {
                    player.play()
                };
                if let Err(e) = result {
                    eprintln!("error: {}", e);
                }
            }
            Some("s") => match parts.next().and_then(|v| v.parse::<f64>().ok()) {
                Some(secs) => {
                    if let Err(e) = player.seek(secs) {
                        eprintln!("error: {}", e);
                    }
                }
                None => eprintln!("usage: s <seconds>"),
            },
            Some("r") => match parts.next().and_then(|v| v.parse::<f64>().ok()) {
                Some(rate) => {
                    if let Err(e) = player.set_rate(rate) {
                        eprintln!("error: {}", e);
                    }
                }
                None => eprintln!("usage: r <rate>"),
            },
            Some("q") => break,
            Some(other) => eprintln!("unknown command: {}", other),
            None => {}
        }

        player.poll();
        print_status(&player);
        if player.phase() == Phase::Ended {
            println!("(playback ended; p replays from the start)");
        }
    }

    player.stop();
    Ok(())
}

fn print_status(player: &Player) {
    let snap = player.snapshot();
    let state = if snap.is_playing { "playing" } else { "paused" };
    match &snap.error {
        Some(err) => println!(
            "[{}] {:.1}s / {:.1}s @ {:.2}x  error: {}",
            state, snap.current_time, snap.duration, snap.rate, err
        ),
        None => println!(
            "[{}] {:.1}s / {:.1}s @ {:.2}x",
            state, snap.current_time, snap.duration, snap.rate
        ),
    }
}
