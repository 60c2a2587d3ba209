use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};

use voicenote_core::{GainLevel, SessionConfig};

#[derive(Debug, Parser)]
#[command(name = "voicenote", version, about = "Record voice notes to .m4a")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Record a voice note
    Record(RecordArgs),
    /// List capture devices
    Devices,
}

#[derive(Debug, Clone, Args)]
pub struct RecordArgs {
    /// Output file
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Stop after this many seconds instead of waiting for Enter
    #[arg(short, long)]
    pub seconds: Option<f64>,

    /// Boost in dB: 0, 6, 9, 12 or 18 (above 9 dB loud voices may clip)
    #[arg(short, long)]
    pub gain: Option<u8>,

    #[arg(long)]
    pub sample_rate: Option<u32>,

    #[arg(long)]
    pub channels: Option<u16>,

    /// AAC bitrate in bits per second
    #[arg(long)]
    pub bitrate: Option<u32>,

    /// Capture endpoint id (see `voicenote devices`)
    #[arg(long)]
    pub device: Option<String>,

    /// Skip the platform's gain control and noise suppression
    #[arg(long)]
    pub no_effects: bool,

    /// Base session config as JSON; flags override its fields
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl RecordArgs {
    pub fn session_config(&self) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
                SessionConfig::from_json_str(&json).map_err(|e| anyhow!(e))?
            }
            None => SessionConfig::default(),
        };

        if let Some(out) = &self.out {
            config.output_path = out.clone();
        } else if self.config.is_none() {
            config.output_path = default_output_name();
        }
        if let Some(gain) = self.gain {
            config.gain_db = GainLevel::try_from(gain).map_err(|e| anyhow!(e))?;
        }
        if let Some(rate) = self.sample_rate {
            config.sample_rate = rate;
        }
        if let Some(channels) = self.channels {
            config.channel_count = channels;
        }
        if let Some(bitrate) = self.bitrate {
            config.bitrate_bps = bitrate;
        }
        if self.no_effects {
            config.enable_effects = false;
        }
        if let Some(secs) = self.seconds {
            if !(secs > 0.0) {
                return Err(anyhow!("--seconds must be positive"));
            }
        }

        config.validate().map_err(|e| anyhow!(e))?;
        Ok(config)
    }
}

fn default_output_name() -> PathBuf {
    PathBuf::from(format!("voicenote-{}.m4a", chrono::Local::now().format("%Y%m%d-%H%M%S")))
}
